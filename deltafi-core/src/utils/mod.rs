//! Clock, timestamp and identifier helpers.

pub mod timestamps;

pub use timestamps::{now_utc, Clock, SystemClock, TestClock, Timestamp};

use uuid::Uuid;

/// Generates a new time-ordered DeltaFile id (UUID v7).
#[must_use]
pub fn generate_did() -> Uuid {
    Uuid::now_v7()
}
