//! Host process for the application control system.
//!
//! `appctld` resolves its layered configuration, installs structured
//! telemetry, builds an [`appctl::Controller`] over the configured library
//! roots and starts the boot components as permanent. It then blocks until
//! either a shutdown signal arrives, in which case every component is stopped
//! in reverse start order, or the controller halts the host because a
//! permanent component exited.

mod bootstrap;
mod runtime;
mod shutdown;
mod telemetry;

pub use bootstrap::{
    BootstrapError, ConfigLoader, Host, StaticConfigLoader, SystemConfigLoader, bootstrap_with,
};
pub use runtime::{LaunchError, run_host, run_host_with};
pub use shutdown::{ShutdownError, ShutdownRequest, ShutdownSignal, SystemShutdownSignal};
pub use telemetry::{TelemetryError, TelemetryHandle};

pub(crate) const PROCESS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::process");

#[cfg(test)]
mod tests;
