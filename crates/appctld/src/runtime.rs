//! Host runtime: boot, wait for a halt, and report why the host stopped.

use std::io;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;

use serde_json::{Value, json};
use thiserror::Error;
use tracing::{error, info, warn};

use appctl::{ControlError, StructuredReporter, format_error};

use crate::PROCESS_TARGET;
use crate::bootstrap::{BootstrapError, ConfigLoader, Host, SystemConfigLoader, bootstrap_with};
use crate::shutdown::{ShutdownError, ShutdownSignal, SystemShutdownSignal};

/// Errors surfaced while launching or supervising the host.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// Bootstrapping the host failed.
    #[error("host bootstrap failed: {source}")]
    Bootstrap {
        /// Underlying bootstrap error.
        #[from]
        source: BootstrapError,
    },
    /// A boot component could not be started.
    #[error("boot failed: {}", format_error(source))]
    Boot {
        /// Error reported by the controller.
        #[source]
        source: ControlError,
    },
    /// The signal listener thread could not be spawned.
    #[error("failed to spawn the signal listener: {source}")]
    SignalThread {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Waiting for shutdown failed.
    #[error("failed to await shutdown signal: {source}")]
    Shutdown {
        /// Underlying shutdown error.
        #[source]
        source: ShutdownError,
    },
    /// The host halted without being signalled, usually because a
    /// permanent component exited.
    #[error("host halted: {reason}")]
    Halted {
        /// Reason recorded by the controller.
        reason: Value,
    },
}

/// Runs the host with production collaborators until it halts.
///
/// # Errors
///
/// Returns [`LaunchError`] when bootstrap or boot fails, or when the host
/// halts for any reason other than a shutdown signal.
pub fn run_host() -> Result<(), LaunchError> {
    run_host_with(
        &SystemConfigLoader,
        Arc::new(StructuredReporter),
        SystemShutdownSignal::new(),
    )
}

/// Runs the host with injected collaborators.
///
/// # Errors
///
/// See [`run_host`].
pub fn run_host_with<S>(
    loader: &dyn ConfigLoader,
    reporter: Arc<dyn appctl::LifecycleReporter>,
    shutdown: S,
) -> Result<(), LaunchError>
where
    S: ShutdownSignal + 'static,
{
    let host = bootstrap_with(loader, reporter)?;
    host.run(shutdown)
}

impl Host {
    /// Boots the configured components and blocks until the controller
    /// halts.
    ///
    /// A shutdown request stops every started component in reverse start
    /// order and yields `Ok(())`. A halt requested by the controller itself
    /// yields [`LaunchError::Halted`].
    ///
    /// # Errors
    ///
    /// Returns [`LaunchError::Boot`] after stopping whatever did start when a
    /// boot component fails.
    pub fn run<S>(self, shutdown: S) -> Result<(), LaunchError>
    where
        S: ShutdownSignal + 'static,
    {
        let controller = self.controller().clone();
        if let Err(source) = self.boot() {
            error!(
                target: PROCESS_TARGET,
                error = %format_error(&source),
                "boot failed; stopping started components"
            );
            controller.shutdown(json!("boot failed"));
            return Err(LaunchError::Boot { source });
        }

        let (signalled_tx, signalled_rx) = mpsc::channel();
        let listener = controller.clone();
        thread::Builder::new()
            .name("appctld-signals".to_owned())
            .spawn(move || {
                let outcome = shutdown.wait();
                let reason = match &outcome {
                    Ok(request) => request.reason(),
                    Err(err) => {
                        warn!(target: PROCESS_TARGET, error = %err, "signal listener failed");
                        json!("signal listener failed")
                    }
                };
                // The receiver outlives the halt, so a send failure only
                // means the host already returned.
                drop(signalled_tx.send(outcome));
                listener.shutdown(reason);
            })
            .map_err(|source| {
                controller.shutdown(json!("signal listener unavailable"));
                LaunchError::SignalThread { source }
            })?;

        let reason = controller.wait_for_halt();
        match signalled_rx.try_recv() {
            Ok(Ok(request)) => {
                info!(target: PROCESS_TARGET, source = request.source(), "host stopped");
                Ok(())
            }
            Ok(Err(source)) => Err(LaunchError::Shutdown { source }),
            Err(_) => {
                warn!(target: PROCESS_TARGET, %reason, "host halted by the controller");
                Err(LaunchError::Halted { reason })
            }
        }
    }
}
