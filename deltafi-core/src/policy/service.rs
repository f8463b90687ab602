//! Process-wide cache of resume policies, consulted in priority order.

use crate::errors::PolicyValidationError;
use crate::model::Action;
use crate::policy::resume::{ResumeDecision, ResumePolicy};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Holds the configured resume policies.
///
/// Readers get a cheap snapshot; every write rebuilds the sorted list.
#[derive(Debug, Default)]
pub struct ResumePolicyService {
    policies: RwLock<Arc<Vec<ResumePolicy>>>,
}

impl ResumePolicyService {
    /// Creates an empty service.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a service from policies, validating each.
    pub fn with_policies(
        policies: impl IntoIterator<Item = ResumePolicy>,
    ) -> Result<Self, PolicyValidationError> {
        let service = Self::new();
        for policy in policies {
            service.save(policy)?;
        }
        Ok(service)
    }

    /// Current policies, highest priority first.
    #[must_use]
    pub fn snapshot(&self) -> Arc<Vec<ResumePolicy>> {
        Arc::clone(&self.policies.read())
    }

    /// Number of policies.
    #[must_use]
    pub fn len(&self) -> usize {
        self.policies.read().len()
    }

    /// Returns true if no policy is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.policies.read().is_empty()
    }

    fn replace(&self, mut policies: Vec<ResumePolicy>) {
        // stable sort keeps insertion order among equal priorities
        policies.sort_by_key(|p| std::cmp::Reverse(p.effective_priority()));
        *self.policies.write() = Arc::new(policies);
    }

    fn conflicts(
        policy: &ResumePolicy,
        others: &[ResumePolicy],
    ) -> Result<(), PolicyValidationError> {
        let mut reasons = Vec::new();
        for other in others.iter().filter(|o| o.id != policy.id) {
            if other.name == policy.name {
                reasons.push(format!("duplicate policy name: {}", policy.name));
            }
            if other.same_criteria(policy) {
                reasons.push(format!("duplicate criteria with policy {}", other.name));
            }
        }
        if reasons.is_empty() {
            Ok(())
        } else {
            Err(PolicyValidationError::new(policy.name.clone(), reasons))
        }
    }

    /// Validates and adds a policy.
    pub fn save(&self, policy: ResumePolicy) -> Result<(), PolicyValidationError> {
        policy.validate()?;
        let mut policies = self.snapshot().as_ref().clone();
        if policies.iter().any(|p| p.id == policy.id) {
            return Err(PolicyValidationError::new(
                policy.name,
                vec!["duplicate id".to_string()],
            ));
        }
        Self::conflicts(&policy, &policies)?;

        info!(policy = %policy.name, priority = policy.effective_priority(), "Saved resume policy");
        policies.push(policy);
        self.replace(policies);
        Ok(())
    }

    /// Validates and replaces an existing policy with the same id.
    pub fn update(&self, policy: ResumePolicy) -> Result<(), PolicyValidationError> {
        policy.validate()?;
        let mut policies = self.snapshot().as_ref().clone();
        let Some(slot) = policies.iter().position(|p| p.id == policy.id) else {
            return Err(PolicyValidationError::new(
                policy.name,
                vec!["policy not found".to_string()],
            ));
        };
        Self::conflicts(&policy, &policies)?;

        info!(policy = %policy.name, "Updated resume policy");
        policies[slot] = policy;
        self.replace(policies);
        Ok(())
    }

    /// Removes a policy. Returns false if it did not exist.
    pub fn remove(&self, id: Uuid) -> bool {
        let mut policies = self.snapshot().as_ref().clone();
        let before = policies.len();
        policies.retain(|p| p.id != Some(id));
        if policies.len() == before {
            return false;
        }
        self.replace(policies);
        true
    }

    /// Decides whether an errored action on `flow` resumes automatically.
    ///
    /// The first matching policy governs; if it has exhausted its attempts,
    /// no lower-priority policy is consulted.
    #[must_use]
    pub fn auto_resume_decision(&self, flow: &str, action: &Action) -> Option<ResumeDecision> {
        let policies = self.snapshot();
        let policy = policies.iter().find(|p| p.matches(flow, action))?;
        let delay = policy.next_delay(action.attempt);
        debug!(
            flow,
            action = %action.name,
            policy = %policy.name,
            attempt = action.attempt,
            scheduled = delay.is_some(),
            "Resume policy matched"
        );
        delay.map(|delay| ResumeDecision {
            policy: policy.name.clone(),
            delay,
        })
    }
}
