//! Structured errors returned by every control operation.
//!
//! A single [`ControlError`] enum covers the whole taxonomy so callers can
//! match on the failure kind while still receiving the component name and
//! any opaque callback reason. [`crate::format_error`] renders these values
//! for operators.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

/// Errors raised by the application control system.
#[derive(Debug, Clone, Error)]
pub enum ControlError {
    /// No resource definition exists for the component on the search path.
    #[error("no resource definition found for component '{name}'")]
    NotFound {
        /// Component that was looked up.
        name: String,
    },

    /// The component is already loaded.
    #[error("component '{name}' is already loaded")]
    AlreadyLoaded {
        /// Component name.
        name: String,
    },

    /// The component is already started or starting.
    #[error("component '{name}' is already started")]
    AlreadyStarted {
        /// Component name.
        name: String,
    },

    /// The component is not loaded.
    #[error("component '{name}' is not loaded")]
    NotLoaded {
        /// Component name.
        name: String,
    },

    /// The component is not started.
    #[error("component '{name}' is not started")]
    NotStarted {
        /// Component name.
        name: String,
    },

    /// Unloading was refused because a component is still running.
    #[error("component '{name}' cannot be unloaded while '{started}' is started")]
    StillStarted {
        /// Component that was asked to unload.
        name: String,
        /// The component (itself or an included one) that is running.
        started: String,
    },

    /// A declared dependency is not started.
    #[error("component '{name}' depends on '{dependency}', which is not started")]
    MissingDependency {
        /// Component that was asked to start.
        name: String,
        /// First dependency, in declared order, that is not started.
        dependency: String,
    },

    /// The resource definition failed to parse or validate.
    #[error("malformed resource definition for '{name}': {message}")]
    MalformedSpec {
        /// Component whose definition is malformed.
        name: String,
        /// Description of the problem.
        message: String,
    },

    /// The start callback returned a value outside its contract.
    #[error("start callback of '{name}' returned a non-conforming value: {value}")]
    BadReturn {
        /// Component name.
        name: String,
        /// Rendering of the offending return value.
        value: Value,
    },

    /// The start callback terminated abnormally instead of returning.
    #[error("start callback of '{name}' exited abnormally: {cause}")]
    CallbackExit {
        /// Component name.
        name: String,
        /// Exit cause reported for the callback.
        cause: String,
    },

    /// The start callback returned an explicit failure.
    #[error("component '{name}' failed to start: {reason}")]
    StartFailed {
        /// Component name.
        name: String,
        /// Failure reason supplied by the callback.
        reason: Value,
    },

    /// A start phase returned a failure.
    #[error("start phase '{phase}' of '{name}' failed: {reason}")]
    PhaseFailed {
        /// Component name.
        name: String,
        /// Phase identifier.
        phase: String,
        /// Failure reason supplied by the phase callback.
        reason: Value,
    },

    /// An environment write missed its budget; the write may still apply.
    #[error("environment update of '{name}.{key}' timed out after {timeout:?}")]
    Timeout {
        /// Component name.
        name: String,
        /// Environment key.
        key: String,
        /// Budget that was exceeded.
        timeout: Duration,
    },

    /// No environment layer defines the key.
    #[error("environment key '{key}' is not defined for component '{name}'")]
    UndefinedKey {
        /// Component name.
        name: String,
        /// Environment key.
        key: String,
    },

    /// An environment value does not have the requested shape.
    #[error("environment key '{key}' of component '{name}' has an invalid value: {message}")]
    InvalidValue {
        /// Component name.
        name: String,
        /// Environment key.
        key: String,
        /// Deserialisation failure description.
        message: String,
    },

    /// The resource locator does not know the component.
    #[error("unknown component '{name}'")]
    UnknownComponent {
        /// Component name.
        name: String,
    },

    /// The transitive dependency graph contains a cycle.
    #[error("circular dependency: {}", .path.join(" -> "))]
    CircularDependency {
        /// Components along the cycle, starting and ending with the same name.
        path: Vec<String>,
    },

    /// Starting a component chain failed at `component`.
    #[error("failed to start '{component}': {source}")]
    DependencyFailed {
        /// First component in the chain that failed.
        component: String,
        /// Underlying failure.
        #[source]
        source: Box<ControlError>,
    },

    /// A global shutdown is in progress; new starts are refused.
    #[error("cannot start '{name}': shutdown in progress")]
    ShuttingDown {
        /// Component name.
        name: String,
    },

    /// The resource locator failed while reading a definition.
    #[error("failed to read resource definition for '{name}' at '{path}': {source}")]
    Locator {
        /// Component name.
        name: String,
        /// Path that could not be read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: Arc<std::io::Error>,
    },

    /// The monitoring thread for a started root process could not be spawned.
    #[error("failed to monitor the root process of '{name}': {source}")]
    Unmonitored {
        /// Component name.
        name: String,
        /// Underlying OS error.
        #[source]
        source: Arc<std::io::Error>,
    },
}

impl ControlError {
    /// Name of the component the error refers to, when there is a single one.
    #[must_use]
    pub fn component(&self) -> Option<&str> {
        match self {
            Self::NotFound { name }
            | Self::AlreadyLoaded { name }
            | Self::AlreadyStarted { name }
            | Self::NotLoaded { name }
            | Self::NotStarted { name }
            | Self::StillStarted { name, .. }
            | Self::MissingDependency { name, .. }
            | Self::MalformedSpec { name, .. }
            | Self::BadReturn { name, .. }
            | Self::CallbackExit { name, .. }
            | Self::StartFailed { name, .. }
            | Self::PhaseFailed { name, .. }
            | Self::Timeout { name, .. }
            | Self::UndefinedKey { name, .. }
            | Self::InvalidValue { name, .. }
            | Self::UnknownComponent { name }
            | Self::ShuttingDown { name }
            | Self::Locator { name, .. }
            | Self::Unmonitored { name, .. } => Some(name.as_str()),
            Self::DependencyFailed { component, .. } => Some(component.as_str()),
            Self::CircularDependency { .. } => None,
        }
    }

    pub(crate) fn malformed(name: &str, message: impl Into<String>) -> Self {
        Self::MalformedSpec {
            name: name.to_owned(),
            message: message.into(),
        }
    }
}
