//! Boundary to the external boolean-condition evaluator.

use crate::content::Content;
use std::collections::HashMap;

/// Evaluates routing conditions against a flow's metadata and content.
///
/// Implementations must be synchronous, side-effect free, and safe to call
/// repeatedly with identical inputs. Evaluation failures count as `false`.
pub trait RuleEvaluator: Send + Sync {
    /// Evaluates a present condition.
    fn evaluate_condition(
        &self,
        condition: &str,
        metadata: &HashMap<String, String>,
        content: &[Content],
    ) -> bool;

    /// Evaluates an optional condition; an absent condition always holds.
    fn evaluate(
        &self,
        condition: Option<&str>,
        metadata: &HashMap<String, String>,
        content: &[Content],
    ) -> bool {
        condition.map_or(true, |c| self.evaluate_condition(c, metadata, content))
    }

    /// Returns true if every condition holds.
    fn evaluate_all(
        &self,
        conditions: &[String],
        metadata: &HashMap<String, String>,
        content: &[Content],
    ) -> bool {
        conditions
            .iter()
            .all(|c| self.evaluate_condition(c, metadata, content))
    }
}

/// Evaluator that accepts every condition.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysTrueEvaluator;

impl RuleEvaluator for AlwaysTrueEvaluator {
    fn evaluate_condition(
        &self,
        _condition: &str,
        _metadata: &HashMap<String, String>,
        _content: &[Content],
    ) -> bool {
        true
    }
}
