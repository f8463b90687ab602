//! Delay calculation between automatic resume attempts.

use chrono::Duration;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Backoff between automatic resume attempts, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackOff {
    /// Base delay.
    pub delay: i64,
    /// Upper bound on the delay; required when `random` is set.
    #[serde(default)]
    pub max_delay: Option<i64>,
    /// Growth factor per attempt.
    #[serde(default)]
    pub multiplier: Option<u32>,
    /// Pick a uniform delay in `[0, max_delay]` instead.
    #[serde(default)]
    pub random: bool,
}

impl BackOff {
    /// A constant delay.
    #[must_use]
    pub fn fixed(delay: i64) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    /// Sets the multiplier.
    #[must_use]
    pub fn with_multiplier(mut self, multiplier: u32) -> Self {
        self.multiplier = Some(multiplier);
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay(mut self, max_delay: i64) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    /// Enables random delays.
    #[must_use]
    pub fn with_random(mut self) -> Self {
        self.random = true;
        self
    }

    /// Validation failures, empty when valid.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut reasons = Vec::new();
        if self.delay < 0 {
            reasons.push("delay must not be negative".to_string());
        }
        if let Some(max_delay) = self.max_delay {
            if max_delay < 0 {
                reasons.push("maxDelay must not be negative".to_string());
            }
            if max_delay < self.delay {
                reasons.push("maxDelay must not be lower than delay".to_string());
            }
        }
        if self.random {
            match self.max_delay {
                None => reasons.push("Must set maxDelay when random is true".to_string()),
                Some(max_delay) if max_delay <= self.delay => {
                    reasons.push("maxDelay must be greater than delay when random is true".to_string());
                }
                Some(_) => {}
            }
        }
        if self.multiplier == Some(0) {
            reasons.push("multiplier must be at least 1".to_string());
        }
        reasons
    }

    /// Delay before the next attempt, given the attempt that just failed.
    ///
    /// `delay * multiplier^(attempt - 1)`, capped at `max_delay`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if self.random {
            let upper = self.max_delay.unwrap_or(self.delay).max(0);
            let seconds = if upper == 0 {
                0
            } else {
                rand::thread_rng().gen_range(0..=upper)
            };
            return Duration::seconds(seconds);
        }

        let exponent = attempt.saturating_sub(1);
        let factor = i64::from(self.multiplier.unwrap_or(1)).saturating_pow(exponent);
        let mut seconds = self.delay.max(0).saturating_mul(factor);
        if let Some(max_delay) = self.max_delay {
            seconds = seconds.min(max_delay.max(0));
        }
        Duration::seconds(seconds)
    }
}
