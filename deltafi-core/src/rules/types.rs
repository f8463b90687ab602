//! Publish/subscribe rule and topic definitions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A `(topic, optional condition)` pair used on both publish and subscribe sides.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    /// Topic the rule targets.
    pub topic: String,
    /// Condition evaluated against metadata/content; absent always matches.
    #[serde(default)]
    pub condition: Option<String>,
}

impl Rule {
    /// A rule that always matches.
    #[must_use]
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            condition: None,
        }
    }

    /// A rule guarded by a condition.
    #[must_use]
    pub fn when(topic: impl Into<String>, condition: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            condition: Some(condition.into()),
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.condition {
            Some(condition) => write!(f, "{{topic: {}, condition: {}}}", self.topic, condition),
            None => write!(f, "{{topic: {}}}", self.topic),
        }
    }
}

/// How publish rules are selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchingPolicy {
    /// Stop at the first rule whose condition holds.
    FirstMatching,
    /// Collect the topic of every rule whose condition holds.
    #[default]
    AllMatching,
}

/// Fallback behavior when no publish rule matches.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "defaultBehavior", content = "topic", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DefaultRule {
    /// Record an ERROR action on the publisher.
    #[default]
    Error,
    /// Record a FILTERED action on the publisher.
    Filter,
    /// Publish to the given topic instead.
    Publish(String),
}

/// Publisher-side routing configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishRules {
    /// Ordered rules; order matters for [`MatchingPolicy::FirstMatching`].
    #[serde(default)]
    pub rules: Vec<Rule>,
    /// Selection policy.
    #[serde(default)]
    pub matching_policy: MatchingPolicy,
    /// Fallback when nothing matches.
    #[serde(default)]
    pub default_rule: DefaultRule,
}

impl PublishRules {
    /// Creates rules with the default policy and fallback.
    #[must_use]
    pub fn new(rules: Vec<Rule>) -> Self {
        Self {
            rules,
            ..Self::default()
        }
    }

    /// Sets the matching policy.
    #[must_use]
    pub fn with_matching_policy(mut self, policy: MatchingPolicy) -> Self {
        self.matching_policy = policy;
        self
    }

    /// Sets the fallback.
    #[must_use]
    pub fn with_default_rule(mut self, default_rule: DefaultRule) -> Self {
        self.default_rule = default_rule;
        self
    }

    /// Renders the rules for diagnostic contexts.
    #[must_use]
    pub fn render(&self) -> String {
        let rules: Vec<String> = self.rules.iter().map(ToString::to_string).collect();
        format!(
            "matchingPolicy: {:?}, defaultRule: {:?}, rules: [{}]",
            self.matching_policy,
            self.default_rule,
            rules.join(", ")
        )
    }
}

/// What happens to a topic whose filter conditions fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TopicFilterPolicy {
    /// Exclude the topic silently.
    #[default]
    Drop,
    /// Record a FILTERED action on the publisher.
    Filter,
    /// Record an ERROR action on the publisher.
    Error,
}

/// A named channel between publishers and subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Topic {
    /// Topic name.
    pub name: String,
    /// Conditions that must all hold for data to enter the topic.
    #[serde(default)]
    pub filters: Vec<String>,
    /// Behavior when a filter fails.
    #[serde(default)]
    pub filter_policy: TopicFilterPolicy,
}

impl Topic {
    /// Creates an unfiltered topic.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Adds a filter condition.
    #[must_use]
    pub fn with_filter(mut self, condition: impl Into<String>) -> Self {
        self.filters.push(condition.into());
        self
    }

    /// Sets the filter policy.
    #[must_use]
    pub fn with_filter_policy(mut self, policy: TopicFilterPolicy) -> Self {
        self.filter_policy = policy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let rules = PublishRules::default();
        assert_eq!(rules.matching_policy, MatchingPolicy::AllMatching);
        assert_eq!(rules.default_rule, DefaultRule::Error);
        assert_eq!(Topic::new("t").filter_policy, TopicFilterPolicy::Drop);
    }

    #[test]
    fn test_deserialize_publish_rules() {
        let json = r#"{
            "rules": [{"topic": "a"}, {"topic": "b", "condition": "size>10"}],
            "matchingPolicy": "FIRST_MATCHING",
            "defaultRule": {"defaultBehavior": "PUBLISH", "topic": "fallback"}
        }"#;
        let rules: PublishRules = serde_json::from_str(json).unwrap();

        assert_eq!(rules.rules, vec![Rule::new("a"), Rule::when("b", "size>10")]);
        assert_eq!(rules.matching_policy, MatchingPolicy::FirstMatching);
        assert_eq!(rules.default_rule, DefaultRule::Publish("fallback".into()));
    }

    #[test]
    fn test_render_includes_conditions() {
        let rules = PublishRules::new(vec![Rule::new("a"), Rule::when("b", "size>10")]);
        let rendered = rules.render();
        assert!(rendered.contains("{topic: a}"));
        assert!(rendered.contains("{topic: b, condition: size>10}"));
    }
}
