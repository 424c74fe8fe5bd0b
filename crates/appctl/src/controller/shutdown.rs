//! Orchestrated shutdown and handling of unexpected root-process exits.
//!
//! The supervisor thread drains [`Termination`] notifications from the
//! process monitor. Each one marks the component loaded, records the exit
//! cause and applies the restart policy recorded when the component started:
//! `Permanent` always escalates, `Transient` escalates unless the cause is
//! `Normal`, and `Temporary` only reports. Escalation stops every started
//! component in reverse start order and then raises the host halt latch.

use std::sync::atomic::Ordering;
use std::sync::mpsc::Receiver;
use std::sync::Weak;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use super::{Controller, Inner, LIFECYCLE_TARGET};
use crate::behaviour::RestartPolicy;
use crate::error::ControlError;
use crate::process::{ExitCause, Termination};
use crate::status::Status;

#[derive(Debug, Default)]
pub(super) struct HaltLatch {
    reason: Mutex<Option<Value>>,
    raised: Condvar,
}

impl HaltLatch {
    fn raise(&self, reason: Value) -> bool {
        let mut slot = self.reason.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(reason);
        self.raised.notify_all();
        true
    }

    fn wait(&self) -> Value {
        let mut slot = self.reason.lock();
        loop {
            if let Some(reason) = slot.as_ref() {
                return reason.clone();
            }
            self.raised.wait(&mut slot);
        }
    }

    fn wait_for(&self, timeout: Duration) -> Option<Value> {
        let mut slot = self.reason.lock();
        let outcome = self
            .raised
            .wait_while_for(&mut slot, |reason| reason.is_none(), timeout);
        if outcome.timed_out() && slot.is_none() {
            return None;
        }
        slot.clone()
    }

    fn peek(&self) -> Option<Value> {
        self.reason.lock().clone()
    }
}

/// Whether an unexpected exit under `policy` brings the host down.
pub(super) const fn escalates(policy: RestartPolicy, cause: &ExitCause) -> bool {
    match policy {
        RestartPolicy::Permanent => true,
        RestartPolicy::Transient => !cause.is_normal(),
        RestartPolicy::Temporary => false,
    }
}

pub(super) fn supervise(inner: &Weak<Inner>, terminations: &Receiver<Termination>) {
    while let Ok(termination) = terminations.recv() {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        Controller { inner }.handle_termination(termination);
    }
    debug!(target: LIFECYCLE_TARGET, "supervisor stopped");
}

impl Controller {
    /// Stops every started component in reverse start order and raises the
    /// host halt latch with `reason`.
    ///
    /// New starts are refused with [`ControlError::ShuttingDown`] from the
    /// moment this is called. Returns the components that were stopped, in
    /// stop order. Only the first halt reason is kept.
    pub fn shutdown(&self, reason: Value) -> Vec<String> {
        self.inner.shutting_down.store(true, Ordering::SeqCst);
        info!(
            target: LIFECYCLE_TARGET,
            reason = %reason,
            "orchestrated shutdown started"
        );
        let mut stopped = Vec::new();
        loop {
            let Some(name) = self.inner.started_order.lock().last().cloned() else {
                break;
            };
            match self.stop(&name) {
                Ok(()) => stopped.push(name),
                Err(ControlError::NotStarted { .. } | ControlError::NotLoaded { .. }) => {
                    self.inner
                        .started_order
                        .lock()
                        .retain(|started| started != &name);
                }
                Err(err) => {
                    warn!(
                        target: LIFECYCLE_TARGET,
                        component = name.as_str(),
                        error = %err,
                        "stop during shutdown failed"
                    );
                    self.inner
                        .started_order
                        .lock()
                        .retain(|started| started != &name);
                }
            }
        }
        if self.inner.halt.raise(reason) {
            info!(
                target: LIFECYCLE_TARGET,
                stopped = ?stopped,
                "host halt requested"
            );
        }
        stopped
    }

    /// Blocks until a halt is requested and returns its reason.
    #[must_use]
    pub fn wait_for_halt(&self) -> Value {
        self.inner.halt.wait()
    }

    /// Blocks until a halt is requested or `timeout` elapses.
    #[must_use]
    pub fn wait_for_halt_timeout(&self, timeout: Duration) -> Option<Value> {
        self.inner.halt.wait_for(timeout)
    }

    /// Reason of the requested halt, if any.
    #[must_use]
    pub fn halt_reason(&self) -> Option<Value> {
        self.inner.halt.peek()
    }

    fn handle_termination(&self, termination: Termination) {
        let Termination {
            name,
            process,
            cause,
        } = termination;
        let lock = self.transition_lock(&name);
        let policy = {
            let _guard = lock.lock();
            let mut runtime = self.inner.runtime.lock();
            let Some(entry) = runtime.get_mut(&name) else {
                return;
            };
            let current = entry.process.as_ref().map(|root| root.id());
            if entry.status != Status::Started || current != Some(process) {
                debug!(
                    target: LIFECYCLE_TARGET,
                    component = name.as_str(),
                    process = %process,
                    "stale termination ignored"
                );
                return;
            }
            entry.status = Status::Loaded;
            entry.process = None;
            entry.state = Value::Null;
            entry.last_exit = Some(cause.clone());
            let policy = entry.policy.unwrap_or_default();
            drop(runtime);
            self.inner
                .started_order
                .lock()
                .retain(|started| started != &name);
            policy
        };
        self.inner.reporter.exited(&name, &cause, policy);
        if escalates(policy, &cause) {
            self.inner.reporter.escalated(&name, &cause);
            self.shutdown(json!({
                "component": name,
                "cause": cause.to_string(),
            }));
        }
    }
}
