//! Runtime configuration for the orchestration core.
//!
//! Values come from defaults, an optional JSON file, and `DELTAFI_*`
//! environment overrides, in that order.

use crate::errors::{DeltaFiError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Queued actions untouched for longer than this are requeued.
    #[serde(default = "default_requeue_threshold")]
    pub requeue_threshold_seconds: u64,
    /// Period of the requeue sweep.
    #[serde(default = "default_requeue_interval")]
    pub requeue_interval_seconds: u64,
    /// Period of the auto resume sweep.
    #[serde(default = "default_auto_resume_interval")]
    pub auto_resume_interval_seconds: u64,
    /// Publish hops allowed from the data source before routing errors out.
    #[serde(default = "default_max_flow_depth")]
    pub max_flow_depth: u32,
    /// Optimistic concurrency retry settings.
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_requeue_threshold() -> u64 {
    300
}

fn default_requeue_interval() -> u64 {
    30
}

fn default_auto_resume_interval() -> u64 {
    60
}

fn default_max_flow_depth() -> u32 {
    crate::pubsub::DEFAULT_MAX_FLOW_DEPTH
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            requeue_threshold_seconds: default_requeue_threshold(),
            requeue_interval_seconds: default_requeue_interval(),
            auto_resume_interval_seconds: default_auto_resume_interval(),
            max_flow_depth: default_max_flow_depth(),
            concurrency: ConcurrencyConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Bounds on the compare-and-swap retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    /// Attempts before giving up with a retryable error.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base delay between attempts in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Maximum delay between attempts in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    10
}

fn default_base_delay_ms() -> u64 {
    5
}

fn default_max_delay_ms() -> u64 {
    250
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

/// Logging output settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    #[serde(default = "default_level")]
    pub level: String,
    /// Emit JSON lines instead of human readable output.
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
        }
    }
}

fn parse_override<T: FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| DeltaFiError::Configuration(format!("invalid value for {key}: {raw}")))
}

impl CoreConfig {
    /// Parses a JSON document; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    /// Defaults or the given file, then environment overrides, then validation.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        let config = config.with_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Applies `DELTAFI_*` overrides from the process environment.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Applies `DELTAFI_*` overrides from an arbitrary lookup.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(raw) = lookup("DELTAFI_REQUEUE_THRESHOLD_SECONDS") {
            self.requeue_threshold_seconds =
                parse_override("DELTAFI_REQUEUE_THRESHOLD_SECONDS", &raw)?;
        }
        if let Some(raw) = lookup("DELTAFI_REQUEUE_INTERVAL_SECONDS") {
            self.requeue_interval_seconds = parse_override("DELTAFI_REQUEUE_INTERVAL_SECONDS", &raw)?;
        }
        if let Some(raw) = lookup("DELTAFI_AUTO_RESUME_INTERVAL_SECONDS") {
            self.auto_resume_interval_seconds =
                parse_override("DELTAFI_AUTO_RESUME_INTERVAL_SECONDS", &raw)?;
        }
        if let Some(raw) = lookup("DELTAFI_CONCURRENCY_MAX_ATTEMPTS") {
            self.concurrency.max_attempts = parse_override("DELTAFI_CONCURRENCY_MAX_ATTEMPTS", &raw)?;
        }
        if let Some(raw) = lookup("DELTAFI_MAX_FLOW_DEPTH") {
            self.max_flow_depth = parse_override("DELTAFI_MAX_FLOW_DEPTH", &raw)?;
        }
        if let Some(raw) = lookup("DELTAFI_LOG_LEVEL") {
            self.logging.level = raw;
        }
        if let Some(raw) = lookup("DELTAFI_LOG_JSON") {
            self.logging.json = parse_override("DELTAFI_LOG_JSON", &raw)?;
        }
        Ok(self)
    }

    /// Rejects settings the sweeps and retry loop cannot run with.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();
        if self.requeue_threshold_seconds == 0 {
            problems.push("requeue_threshold_seconds must be positive");
        }
        if self.requeue_interval_seconds == 0 {
            problems.push("requeue_interval_seconds must be positive");
        }
        if self.auto_resume_interval_seconds == 0 {
            problems.push("auto_resume_interval_seconds must be positive");
        }
        if self.max_flow_depth == 0 {
            problems.push("max_flow_depth must be positive");
        }
        if self.concurrency.max_attempts == 0 {
            problems.push("concurrency.max_attempts must be positive");
        }
        if self.concurrency.max_delay_ms < self.concurrency.base_delay_ms {
            problems.push("concurrency.max_delay_ms must not be lower than base_delay_ms");
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(DeltaFiError::Configuration(problems.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = CoreConfig::default();
        assert_eq!(config.requeue_threshold_seconds, 300);
        assert_eq!(config.requeue_interval_seconds, 30);
        assert_eq!(config.auto_resume_interval_seconds, 60);
        assert_eq!(config.concurrency.max_attempts, 10);
        assert_eq!(config.max_flow_depth, 32);
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = CoreConfig::from_json(r#"{"requeue_threshold_seconds": 60, "concurrency": {"max_attempts": 3}}"#)
            .unwrap();
        assert_eq!(config.requeue_threshold_seconds, 60);
        assert_eq!(config.concurrency.max_attempts, 3);
        assert_eq!(config.concurrency.max_delay_ms, 250);
        assert_eq!(config.requeue_interval_seconds, 30);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"logging": {{"level": "debug", "json": true}}}}"#).unwrap();

        let config = CoreConfig::from_file(file.path()).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = CoreConfig::from_file(dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, DeltaFiError::Io(_)));
    }

    #[test]
    fn test_overrides() {
        let env = HashMap::from([
            ("DELTAFI_REQUEUE_THRESHOLD_SECONDS", "120"),
            ("DELTAFI_LOG_JSON", "true"),
            ("DELTAFI_MAX_FLOW_DEPTH", "8"),
        ]);
        let config = CoreConfig::default()
            .with_overrides(|key| env.get(key).map(ToString::to_string))
            .unwrap();

        assert_eq!(config.requeue_threshold_seconds, 120);
        assert_eq!(config.max_flow_depth, 8);
        assert!(config.logging.json);
    }

    #[test]
    fn test_bad_override_rejected() {
        let err = CoreConfig::default()
            .with_overrides(|key| (key == "DELTAFI_CONCURRENCY_MAX_ATTEMPTS").then(|| "many".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("DELTAFI_CONCURRENCY_MAX_ATTEMPTS"));
    }

    #[test]
    fn test_validate_rejects_zero_and_inverted_delays() {
        let mut config = CoreConfig::default();
        config.requeue_interval_seconds = 0;
        config.concurrency.max_delay_ms = 1;
        config.concurrency.base_delay_ms = 2;

        let message = config.validate().unwrap_err().to_string();
        assert!(message.contains("requeue_interval_seconds"));
        assert!(message.contains("max_delay_ms"));
    }
}
