//! Lifecycle status and runtime introspection.

use serde::Serialize;
use strum::{Display, EnumString};

use crate::behaviour::RestartPolicy;
use crate::process::{ExitCause, ProcessId};

/// Lifecycle status of a component.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Status {
    /// No specification is held.
    #[default]
    Unloaded,
    /// Specification held, not running.
    Loaded,
    /// Start callback in progress.
    Starting,
    /// Running.
    Started,
    /// Stop sequence in progress.
    Stopping,
}

impl Status {
    /// Returns `true` from the start callback until the stop sequence ends.
    #[must_use]
    pub const fn is_running(self) -> bool {
        matches!(self, Self::Starting | Self::Started | Self::Stopping)
    }
}

/// Snapshot of a component's runtime state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentInfo {
    /// Component name.
    pub name: String,
    /// Current status.
    pub status: Status,
    /// Restart policy recorded at the last successful start.
    pub policy: Option<RestartPolicy>,
    /// Root process while started.
    pub process: Option<ProcessId>,
    /// Cause of the most recent root-process termination.
    pub last_exit: Option<ExitCause>,
}
