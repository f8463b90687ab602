//! A rule evaluator driven by a script of condition outcomes.

use crate::content::Content;
use crate::rules::RuleEvaluator;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

type Predicate = Arc<dyn Fn(&HashMap<String, String>, &[Content]) -> bool + Send + Sync>;

/// Evaluates conditions from a fixed script and records every call.
///
/// Unscripted conditions evaluate to false.
#[derive(Default)]
pub struct ScriptedRuleEvaluator {
    script: HashMap<String, Predicate>,
    calls: Mutex<Vec<String>>,
}

impl std::fmt::Debug for ScriptedRuleEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut conditions: Vec<&String> = self.script.keys().collect();
        conditions.sort();
        f.debug_struct("ScriptedRuleEvaluator")
            .field("conditions", &conditions)
            .field("calls", &self.calls.lock().len())
            .finish()
    }
}

impl ScriptedRuleEvaluator {
    /// Creates an evaluator with an empty script.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts a constant outcome.
    #[must_use]
    pub fn with(mut self, condition: impl Into<String>, outcome: bool) -> Self {
        self.script
            .insert(condition.into(), Arc::new(move |_, _| outcome));
        self
    }

    /// Scripts an outcome computed from metadata and content.
    #[must_use]
    pub fn with_predicate(
        mut self,
        condition: impl Into<String>,
        predicate: impl Fn(&HashMap<String, String>, &[Content]) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.script.insert(condition.into(), Arc::new(predicate));
        self
    }

    /// Conditions evaluated so far, in call order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// How many times a condition was evaluated.
    #[must_use]
    pub fn call_count(&self, condition: &str) -> usize {
        self.calls.lock().iter().filter(|c| *c == condition).count()
    }
}

impl RuleEvaluator for ScriptedRuleEvaluator {
    fn evaluate_condition(
        &self,
        condition: &str,
        metadata: &HashMap<String, String>,
        content: &[Content],
    ) -> bool {
        self.calls.lock().push(condition.to_string());
        self.script
            .get(condition)
            .is_some_and(|predicate| predicate(metadata, content))
    }
}
