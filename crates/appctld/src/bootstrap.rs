//! Host bootstrap orchestration.
//!
//! Bootstrap loads the layered [`Config`], installs telemetry, reads the
//! override document once and builds a [`Controller`] over the configured
//! library roots. Components are not started here; see [`Host::boot`].

use std::fs;
use std::io;
use std::sync::Arc;

use camino::Utf8PathBuf;
use ortho_config::OrthoError;
use thiserror::Error;
use tracing::info;

use appctl::{
    ComponentBehaviour, ControlError, Controller, DirectoryLocator, LifecycleReporter, Overrides,
    OverridesError, RestartPolicy, StartType,
};
use appctl_config::Config;

use crate::PROCESS_TARGET;
use crate::telemetry::{self, TelemetryError, TelemetryHandle};

/// Trait abstracting configuration loading for testability.
pub trait ConfigLoader: Send + Sync {
    /// Loads the host configuration.
    ///
    /// # Errors
    ///
    /// Returns the `ortho_config` error when a layer is malformed.
    fn load(&self) -> Result<Config, Arc<OrthoError>>;
}

/// Loader that delegates to [`Config::resolve`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemConfigLoader;

impl ConfigLoader for SystemConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Config::resolve()
    }
}

/// Loader that returns a pre-resolved configuration.
#[derive(Debug, Clone)]
pub struct StaticConfigLoader {
    config: Config,
}

impl StaticConfigLoader {
    /// Wraps `config`.
    #[must_use]
    pub const fn new(config: Config) -> Self {
        Self { config }
    }
}

impl ConfigLoader for StaticConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Ok(self.config.clone())
    }
}

/// Errors surfaced during bootstrap.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Configuration failed to load.
    #[error("failed to load configuration: {source}")]
    Configuration {
        /// Underlying loader error.
        #[source]
        source: Arc<OrthoError>,
    },
    /// Telemetry initialisation failed.
    #[error("failed to initialise telemetry: {source}")]
    Telemetry {
        /// Underlying telemetry error.
        #[source]
        source: TelemetryError,
    },
    /// The override document could not be read.
    #[error("failed to read override document '{path}': {source}")]
    OverridesRead {
        /// Configured document path.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The override document is not valid.
    #[error("invalid override document '{path}': {source}")]
    OverridesParse {
        /// Configured document path.
        path: Utf8PathBuf,
        /// Underlying parse error.
        #[source]
        source: OverridesError,
    },
    /// The controller's supervisor thread could not be spawned.
    #[error("failed to start the controller: {source}")]
    Controller {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// A bootstrapped host: configuration, telemetry and a ready controller.
#[derive(Debug)]
pub struct Host {
    config: Config,
    controller: Controller,
    telemetry: TelemetryHandle,
}

impl Host {
    /// Accessor for the resolved configuration.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// The controller driving every component on this host.
    #[must_use]
    pub const fn controller(&self) -> &Controller {
        &self.controller
    }

    /// Accessor for the telemetry handle, primarily useful for testing.
    #[must_use]
    pub const fn telemetry(&self) -> TelemetryHandle {
        self.telemetry
    }

    /// Registers a callback behaviour before the host boots.
    pub fn register_behaviour(&self, module: &str, behaviour: Arc<dyn ComponentBehaviour>) {
        self.controller.register_behaviour(module, behaviour);
    }

    /// Starts every configured boot component, with its dependencies, as
    /// permanent. Returns the components started, in start order.
    ///
    /// # Errors
    ///
    /// Returns the first [`ControlError::DependencyFailed`] reported by
    /// `ensure_all_started`. Components booted earlier stay started.
    pub fn boot(&self) -> Result<Vec<String>, ControlError> {
        let mut started = Vec::new();
        for name in self.config.boot() {
            let chain =
                self.controller
                    .ensure_all_started(name, &StartType::Normal, RestartPolicy::Permanent)?;
            started.extend(chain);
        }
        info!(target: PROCESS_TARGET, components = ?started, "boot components started");
        Ok(started)
    }
}

/// Bootstraps the host using the supplied collaborators.
///
/// # Errors
///
/// Returns [`BootstrapError`] when configuration, telemetry, the override
/// document or the controller cannot be prepared.
pub fn bootstrap_with(
    loader: &dyn ConfigLoader,
    reporter: Arc<dyn LifecycleReporter>,
) -> Result<Host, BootstrapError> {
    let config = loader
        .load()
        .map_err(|source| BootstrapError::Configuration { source })?;
    let telemetry =
        telemetry::initialise(&config).map_err(|source| BootstrapError::Telemetry { source })?;
    let overrides = read_overrides(&config)?;
    let locator = DirectoryLocator::new(config.lib_dirs().iter().cloned());
    let controller = Controller::builder(Arc::new(locator))
        .with_overrides(overrides)
        .with_reporter(reporter)
        .with_env_timeout(config.env_timeout())
        .build()
        .map_err(|source| BootstrapError::Controller { source })?;
    info!(
        target: PROCESS_TARGET,
        lib_dirs = ?config.lib_dirs(),
        log_filter = config.log_filter(),
        log_format = %config.log_format(),
        "host bootstrap completed"
    );
    Ok(Host {
        config,
        controller,
        telemetry,
    })
}

fn read_overrides(config: &Config) -> Result<Overrides, BootstrapError> {
    let Some(path) = config.overrides_path() else {
        return Ok(Overrides::new());
    };
    let raw = fs::read(path).map_err(|source| BootstrapError::OverridesRead {
        path: path.to_path_buf(),
        source,
    })?;
    Overrides::from_json(&raw).map_err(|source| BootstrapError::OverridesParse {
        path: path.to_path_buf(),
        source,
    })
}

