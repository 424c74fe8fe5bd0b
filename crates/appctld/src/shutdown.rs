//! Shutdown signal listeners.
//!
//! The host blocks one thread in [`ShutdownSignal::wait`]; whatever the
//! listener returns becomes the reason recorded on the controller's halt
//! latch.

use std::io;

use serde_json::{Value, json};
use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::Signals;
use thiserror::Error;
use tracing::info;

use crate::PROCESS_TARGET;

const HOST_SIGNALS: [(i32, &str); 4] = [
    (SIGTERM, "SIGTERM"),
    (SIGINT, "SIGINT"),
    (SIGQUIT, "SIGQUIT"),
    (SIGHUP, "SIGHUP"),
];

/// Why the host was asked to stop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownRequest {
    source: String,
}

impl ShutdownRequest {
    /// A request raised by `source`, such as a signal name.
    #[must_use]
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }

    /// What raised the request.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Halt reason handed to the controller.
    #[must_use]
    pub fn reason(&self) -> Value {
        json!({ "shutdown": self.source })
    }
}

/// Abstraction over shutdown notification mechanisms.
pub trait ShutdownSignal: Send + Sync {
    /// Blocks until shutdown should proceed.
    ///
    /// # Errors
    ///
    /// Returns [`ShutdownError`] when the listener cannot be installed.
    fn wait(&self) -> Result<ShutdownRequest, ShutdownError>;
}

/// Errors reported by shutdown signal listeners.
#[derive(Debug, Error)]
pub enum ShutdownError {
    /// Installing signal handlers failed.
    #[error("failed to install signal handlers: {source}")]
    Install {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The signal iterator ended without delivering a signal.
    #[error("signal delivery stopped before a shutdown signal arrived")]
    Closed,
}

/// Waits for SIGTERM, SIGINT, SIGQUIT or SIGHUP.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemShutdownSignal;

impl SystemShutdownSignal {
    /// Builds a signal listener.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl ShutdownSignal for SystemShutdownSignal {
    fn wait(&self) -> Result<ShutdownRequest, ShutdownError> {
        let mut signals = Signals::new(HOST_SIGNALS.map(|(signal, _)| signal))
            .map_err(|source| ShutdownError::Install { source })?;
        let signal = signals.forever().next().ok_or(ShutdownError::Closed)?;
        let name = signal_name(signal);
        info!(target: PROCESS_TARGET, signal = name, "shutdown signal received");
        Ok(ShutdownRequest::new(name))
    }
}

fn signal_name(signal: i32) -> &'static str {
    HOST_SIGNALS
        .iter()
        .find(|(number, _)| *number == signal)
        .map_or("unknown signal", |(_, name)| *name)
}
