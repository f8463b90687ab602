//! Structured logging setup.

use crate::config::LoggingConfig;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

static LOGGER_INITIALIZED: OnceLock<bool> = OnceLock::new();

/// Builds the filter: `RUST_LOG` wins, then the configured level, then `info`.
pub fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Installs the global tracing subscriber once per process.
///
/// Returns true if this call (or an earlier one) installed the subscriber,
/// false if another subscriber was already set by the host application.
pub fn init_logging(config: &LoggingConfig) -> bool {
    *LOGGER_INITIALIZED.get_or_init(|| {
        let output: Box<dyn Layer<Registry> + Send + Sync> = if config.json {
            fmt::layer()
                .json()
                .with_target(true)
                .with_current_span(true)
                .boxed()
        } else {
            fmt::layer().with_target(true).with_thread_ids(true).boxed()
        };

        let installed = tracing_subscriber::registry()
            .with(output)
            .with(env_filter(config))
            .try_init()
            .is_ok();
        if installed {
            tracing::info!(level = %config.level, json = config.json, "Logging initialized");
        } else {
            tracing::debug!("Global tracing subscriber already set, keeping it");
        }
        installed
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        let config = LoggingConfig::default();
        let first = init_logging(&config);
        let second = init_logging(&LoggingConfig {
            level: "trace".into(),
            json: true,
        });
        assert_eq!(first, second);
    }

    #[test]
    fn test_bad_level_falls_back() {
        let config = LoggingConfig {
            level: "not a [valid directive".into(),
            json: false,
        };
        let _ = env_filter(&config);
    }
}
