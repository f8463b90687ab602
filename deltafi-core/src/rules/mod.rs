//! Routing rules, topics and the condition evaluator seam.

mod evaluator;
mod types;

pub use evaluator::{AlwaysTrueEvaluator, RuleEvaluator};
pub use types::{DefaultRule, MatchingPolicy, PublishRules, Rule, Topic, TopicFilterPolicy};
