//! Observability utilities.

mod logging;

pub use logging::{env_filter, init_logging};
