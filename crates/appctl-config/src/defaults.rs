//! Built-in defaults applied when no configuration layer sets a value.

use std::time::Duration;

use crate::logging::LogFormat;

/// Default log filter expression.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default budget, in milliseconds, for environment writes.
pub const DEFAULT_ENV_TIMEOUT_MS: u64 = 5_000;

/// Default log filter expression.
#[must_use]
pub const fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter used by serde defaults.
#[must_use]
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default log output encoding.
#[must_use]
pub const fn default_log_format() -> LogFormat {
    LogFormat::Json
}

/// Default environment write budget in milliseconds.
#[must_use]
pub const fn default_env_timeout_ms() -> u64 {
    DEFAULT_ENV_TIMEOUT_MS
}

/// Default environment write budget.
#[must_use]
pub const fn default_env_timeout() -> Duration {
    Duration::from_millis(DEFAULT_ENV_TIMEOUT_MS)
}
