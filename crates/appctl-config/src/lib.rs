//! Layered configuration for the application control host.
//!
//! [`Config`] is resolved by `ortho_config` from built-in defaults, an
//! optional configuration file, `APPCTL_*` environment variables and command
//! line flags, in increasing order of precedence. The daemon and any embedding
//! binary share this type so they agree on where component resource
//! definitions live and how the host logs.

mod defaults;
mod logging;

use std::sync::Arc;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use ortho_config::{OrthoConfig, OrthoError};
use serde::{Deserialize, Serialize};

pub use defaults::{
    DEFAULT_ENV_TIMEOUT_MS, DEFAULT_LOG_FILTER, default_env_timeout, default_env_timeout_ms,
    default_log_filter, default_log_filter_string, default_log_format,
};
pub use logging::{LogFormat, LogFormatParseError};

/// Host configuration shared by the daemon and embedders.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "APPCTL")]
pub struct Config {
    /// `tracing` filter expression applied to the host subscriber.
    #[serde(default = "defaults::default_log_filter_string")]
    pub log_filter: String,
    /// Output encoding for log events.
    #[serde(default = "defaults::default_log_format")]
    pub log_format: LogFormat,
    /// Roots searched, in order, for component resource definitions.
    #[serde(default)]
    #[ortho_config(merge_strategy = "append")]
    pub lib_dirs: Vec<Utf8PathBuf>,
    /// JSON document supplying the override environment layer.
    #[serde(default)]
    pub overrides_path: Option<Utf8PathBuf>,
    /// Components started, with their dependencies, when the host boots.
    #[serde(default)]
    #[ortho_config(merge_strategy = "append")]
    pub boot: Vec<String>,
    /// Budget for environment writes, in milliseconds.
    #[serde(default = "defaults::default_env_timeout_ms")]
    pub env_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
            lib_dirs: Vec::new(),
            overrides_path: None,
            boot: Vec::new(),
            env_timeout_ms: default_env_timeout_ms(),
        }
    }
}

impl Config {
    /// Resolves the configuration from every layer using the process
    /// arguments.
    ///
    /// # Errors
    ///
    /// Returns the aggregated `ortho_config` error when a layer is malformed.
    pub fn resolve() -> Result<Self, Arc<OrthoError>> {
        Self::load()
    }

    /// Log filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        self.log_filter.as_str()
    }

    /// Log output encoding.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Resource search roots in lookup order.
    #[must_use]
    pub fn lib_dirs(&self) -> &[Utf8PathBuf] {
        &self.lib_dirs
    }

    /// Location of the override document, when configured.
    #[must_use]
    pub fn overrides_path(&self) -> Option<&Utf8Path> {
        self.overrides_path.as_deref()
    }

    /// Components to start at boot.
    #[must_use]
    pub fn boot(&self) -> &[String] {
        &self.boot
    }

    /// Budget for environment writes.
    #[must_use]
    pub const fn env_timeout(&self) -> Duration {
        Duration::from_millis(self.env_timeout_ms)
    }
}
