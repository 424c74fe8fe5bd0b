//! Callback contract implemented by components.
//!
//! A resource definition names a callback module; the host registers one
//! [`ComponentBehaviour`] per module name with the controller before the
//! component is started.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString};

use crate::process::RootProcess;

/// How a component is being started.
///
/// Takeover and failover carry the originating node as opaque metadata; the
/// controller does not coordinate anything across nodes.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartType {
    /// Ordinary start.
    #[default]
    Normal,
    /// Start taking over from the named node.
    Takeover(String),
    /// Start failing over from the named node.
    Failover(String),
}

/// Consequence of a started component's root process terminating on its own.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum RestartPolicy {
    /// Any termination shuts the host down.
    Permanent,
    /// Termination with a cause other than `Normal` shuts the host down.
    Transient,
    /// Termination is reported and nothing else happens.
    #[default]
    Temporary,
}

/// Successful outcome of [`ComponentBehaviour::start`].
#[derive(Debug)]
pub struct Started {
    /// Root process the controller supervises until the component stops.
    pub process: RootProcess,
    /// Opaque state handed back to the stop hooks.
    pub state: Option<Value>,
}

impl Started {
    /// A started root process without state.
    #[must_use]
    pub const fn new(process: RootProcess) -> Self {
        Self {
            process,
            state: None,
        }
    }

    /// Attaches callback state.
    #[must_use]
    pub fn with_state(mut self, state: Value) -> Self {
        self.state = Some(state);
        self
    }
}

/// Start and stop hooks of a component's callback module.
pub trait ComponentBehaviour: Send + Sync {
    /// Starts the component's root process.
    ///
    /// # Errors
    ///
    /// Returns a reason when the component cannot start.
    fn start(&self, start_type: &StartType, args: &Value) -> Result<Started, Value>;

    /// Runs one start phase after the root process is up.
    ///
    /// # Errors
    ///
    /// Returns a reason that aborts the remaining phases.
    fn start_phase(
        &self,
        _phase: &str,
        _start_type: &StartType,
        _args: &Value,
    ) -> Result<(), Value> {
        Ok(())
    }

    /// Runs before the root process is terminated; `Some` replaces the state.
    fn prep_stop(&self, _state: &Value) -> Option<Value> {
        None
    }

    /// Runs after the root process and its descendants have terminated.
    fn stop(&self, state: Value);
}
