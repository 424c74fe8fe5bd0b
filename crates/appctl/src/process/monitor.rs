//! Termination monitoring for root processes.
//!
//! [`ProcessMonitor::watch`] starts one monitoring thread per root process.
//! The thread blocks until the process and its descendants have terminated
//! and then delivers a single [`Termination`] on the controller's channel,
//! unless the watch was withdrawn with [`ProcessMonitor::unwatch`] first.
//! Withdrawing a watch is how deliberate stops are told apart from crashes.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;
#[cfg(test)]
use std::sync::atomic::AtomicBool;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::Sender;
use std::thread;

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::{ExitCause, PROCESS_TARGET, ProcessId, RootProcess};

/// Notification that a watched root process terminated on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Termination {
    /// Component owning the process.
    pub name: String,
    /// Process that terminated.
    pub process: ProcessId,
    /// Termination cause.
    pub cause: ExitCause,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Watch {
    generation: u64,
    process: ProcessId,
}

/// Watches root processes and reports unexpected terminations.
#[derive(Debug)]
pub struct ProcessMonitor {
    watches: Arc<Mutex<HashMap<String, Watch>>>,
    generation: AtomicU64,
    notify: Sender<Termination>,
    #[cfg(test)]
    refuse_spawns: AtomicBool,
}

impl ProcessMonitor {
    /// Creates a monitor that reports on `notify`.
    #[must_use]
    pub fn new(notify: Sender<Termination>) -> Self {
        Self {
            watches: Arc::default(),
            generation: AtomicU64::new(0),
            notify,
            #[cfg(test)]
            refuse_spawns: AtomicBool::new(false),
        }
    }

    /// Registers interest in `process` on behalf of component `name`.
    ///
    /// A previous watch for the same name is replaced and will not report.
    ///
    /// # Errors
    ///
    /// Returns the OS error when the monitoring thread cannot be spawned. No
    /// watch is left registered in that case.
    pub fn watch(&self, name: &str, process: &RootProcess) -> io::Result<()> {
        let watch = Watch {
            generation: self.generation.fetch_add(1, Ordering::Relaxed),
            process: process.id(),
        };
        self.watches.lock().insert(name.to_owned(), watch);
        let watches = Arc::clone(&self.watches);
        let notify = self.notify.clone();
        let process = process.clone();
        let owner = name.to_owned();
        let spawned = self.spawn_watcher(name, move || {
            let cause = process.wait();
            let current = {
                let mut watches = watches.lock();
                match watches.get(&owner) {
                    Some(active) if *active == watch => watches.remove(&owner),
                    _ => None,
                }
            };
            if current.is_none() {
                debug!(
                    target: PROCESS_TARGET,
                    component = owner.as_str(),
                    process = %watch.process,
                    "termination of unwatched process suppressed"
                );
                return;
            }
            let termination = Termination {
                name: owner,
                process: watch.process,
                cause,
            };
            if notify.send(termination).is_err() {
                debug!(
                    target: PROCESS_TARGET,
                    process = %watch.process,
                    "controller gone; termination dropped"
                );
            }
        });
        if let Err(error) = spawned {
            let mut watches = self.watches.lock();
            if watches.get(name) == Some(&watch) {
                watches.remove(name);
            }
            warn!(
                target: PROCESS_TARGET,
                component = name,
                error = %error,
                "failed to spawn monitoring thread"
            );
            return Err(error);
        }
        Ok(())
    }

    fn spawn_watcher<F>(&self, name: &str, body: F) -> io::Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        #[cfg(test)]
        if self.refuse_spawns.load(Ordering::SeqCst) {
            return Err(io::Error::other("monitor spawns refused"));
        }
        thread::Builder::new()
            .name(format!("monitor-{name}"))
            .spawn(body)
            .map(drop)
    }

    /// Makes every later [`Self::watch`] fail as if threads were exhausted.
    #[cfg(test)]
    pub(crate) fn refuse_spawns(&self) {
        self.refuse_spawns.store(true, Ordering::SeqCst);
    }

    /// Withdraws the watch for `name`, returning whether one was active.
    ///
    /// Idempotent: at most one notification is ever delivered per watch.
    pub fn unwatch(&self, name: &str) -> bool {
        self.watches.lock().remove(name).is_some()
    }

    /// Returns `true` while `name` has an active watch.
    #[must_use]
    pub fn is_watching(&self, name: &str) -> bool {
        self.watches.lock().contains_key(name)
    }

    /// Withdraws the watch, terminates `process` and blocks until it and all
    /// of its descendants have exited.
    pub fn shutdown(&self, name: &str, process: &RootProcess) -> ExitCause {
        self.unwatch(name);
        process.terminate();
        let cause = process.wait();
        debug!(
            target: PROCESS_TARGET,
            component = name,
            process = %process.id(),
            %cause,
            "root process confirmed terminated"
        );
        cause
    }
}
