//! Error types for the DeltaFi orchestration core.
//!
//! Routing outcomes (no destination, missing topic, topic filter rejection)
//! are never errors: they are recorded as synthetic actions on the producing
//! flow. Only infrastructure failures and rejected configuration surface here.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

/// Result alias used across the crate.
pub type Result<T, E = DeltaFiError> = std::result::Result<T, E>;

/// The main error type for core operations.
#[derive(Debug, Error)]
pub enum DeltaFiError {
    /// The aggregate store failed.
    #[error("{0}")]
    Store(#[from] StoreError),

    /// Optimistic concurrency retries were exhausted; the caller should re-report.
    #[error("DeltaFile {did} was modified concurrently {attempts} times in a row")]
    ConcurrencyExhausted {
        /// The contended DeltaFile.
        did: Uuid,
        /// Number of attempts made.
        attempts: u32,
    },

    /// No DeltaFile exists with the given did.
    #[error("DeltaFile {0} not found")]
    NotFound(Uuid),

    /// A report referenced an action never queued on the flow.
    #[error("Action {action} was never queued on flow {flow} of DeltaFile {did}")]
    UnexpectedAction {
        /// Flow name.
        flow: String,
        /// Action name.
        action: String,
        /// DeltaFile id.
        did: Uuid,
    },

    /// A report referenced a flow that does not exist or is already terminal.
    #[error("Flow {flow} of DeltaFile {did} is not in flight")]
    UnexpectedFlow {
        /// Flow name.
        flow: String,
        /// DeltaFile id.
        did: Uuid,
    },

    /// No flow definition exists with the given name.
    #[error("Flow {0} is not configured")]
    UnknownFlow(String),

    /// A resume/retry policy was rejected.
    #[error("{0}")]
    PolicyValidation(#[from] PolicyValidationError),

    /// A content slice was out of range.
    #[error("{0}")]
    ContentRange(#[from] ContentRangeError),

    /// Configuration could not be loaded or is invalid.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DeltaFiError {
    /// Returns true if the failure is transient and the operation may be re-attempted.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ConcurrencyExhausted { .. } => true,
            Self::Store(err) => err.is_transient(),
            _ => false,
        }
    }
}

/// Failures reported by an aggregate store implementation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The backing store could not be reached.
    #[error("Aggregate store unavailable: {0}")]
    Unavailable(String),

    /// An insert collided with an existing did.
    #[error("DeltaFile {0} already exists")]
    Duplicate(Uuid),
}

impl StoreError {
    /// Returns true if the operation may succeed when retried later.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Error raised when a resume/retry policy fails validation.
///
/// Carries every reason found, not just the first.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("Invalid policy '{policy}': {}", reasons.join("; "))]
pub struct PolicyValidationError {
    /// The policy name (or id when unnamed).
    pub policy: String,
    /// Human readable reasons.
    pub reasons: Vec<String>,
}

impl PolicyValidationError {
    /// Creates a new validation error.
    #[must_use]
    pub fn new(policy: impl Into<String>, reasons: Vec<String>) -> Self {
        Self {
            policy: policy.into(),
            reasons,
        }
    }

    /// Returns true if the given reason was reported.
    #[must_use]
    pub fn has_reason(&self, reason: &str) -> bool {
        self.reasons.iter().any(|r| r == reason)
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("policy".to_string(), serde_json::json!(self.policy));
        map.insert("reasons".to_string(), serde_json::json!(self.reasons));
        map.insert("message".to_string(), serde_json::json!(self.to_string()));
        map
    }
}

/// Error raised when slicing content beyond its bounds.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Size + offset ({size} + {offset}) exceeds total Content size of {total}")]
pub struct ContentRangeError {
    /// Requested offset.
    pub offset: u64,
    /// Requested size.
    pub size: u64,
    /// Total content size.
    pub total: u64,
}
