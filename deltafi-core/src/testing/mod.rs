//! Test doubles and fixtures for routing and lifecycle tests.

mod evaluator;
mod fixtures;

pub use evaluator::ScriptedRuleEvaluator;
pub use fixtures::{content_of_size, DeltaFileFixture, TestFlowDefinition};
