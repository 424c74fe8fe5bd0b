//! Structured reporting of lifecycle events.

use std::sync::Arc;

use crate::behaviour::RestartPolicy;
use crate::error::ControlError;
use crate::process::{ExitCause, ProcessId};

const LIFECYCLE_TARGET: &str = "appctl::lifecycle";

/// Observer trait used to surface lifecycle events to telemetry sinks.
pub trait LifecycleReporter: Send + Sync {
    /// Invoked when a specification is recorded.
    fn loaded(&self, name: &str);

    /// Invoked when a specification is removed.
    fn unloaded(&self, name: &str);

    /// Invoked before the start callback runs.
    fn starting(&self, name: &str);

    /// Invoked once the component is marked started.
    fn started(&self, name: &str, process: Option<ProcessId>);

    /// Invoked when a start attempt fails.
    fn start_failed(&self, name: &str, error: &ControlError);

    /// Invoked after the stop sequence completes.
    fn stopped(&self, name: &str);

    /// Invoked when a root process terminates without being asked to.
    fn exited(&self, name: &str, cause: &ExitCause, policy: RestartPolicy);

    /// Invoked when an unexpected exit escalates into a host shutdown.
    fn escalated(&self, name: &str, cause: &ExitCause);
}

impl<T> LifecycleReporter for Arc<T>
where
    T: LifecycleReporter + ?Sized,
{
    fn loaded(&self, name: &str) {
        (**self).loaded(name);
    }

    fn unloaded(&self, name: &str) {
        (**self).unloaded(name);
    }

    fn starting(&self, name: &str) {
        (**self).starting(name);
    }

    fn started(&self, name: &str, process: Option<ProcessId>) {
        (**self).started(name, process);
    }

    fn start_failed(&self, name: &str, error: &ControlError) {
        (**self).start_failed(name, error);
    }

    fn stopped(&self, name: &str) {
        (**self).stopped(name);
    }

    fn exited(&self, name: &str, cause: &ExitCause, policy: RestartPolicy) {
        (**self).exited(name, cause, policy);
    }

    fn escalated(&self, name: &str, cause: &ExitCause) {
        (**self).escalated(name, cause);
    }
}

/// Default reporter that records lifecycle events using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredReporter;

impl StructuredReporter {
    /// Builds a new reporter.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl LifecycleReporter for StructuredReporter {
    fn loaded(&self, name: &str) {
        tracing::debug!(
            target: LIFECYCLE_TARGET,
            event = "loaded",
            component = name,
            "component loaded"
        );
    }

    fn unloaded(&self, name: &str) {
        tracing::debug!(
            target: LIFECYCLE_TARGET,
            event = "unloaded",
            component = name,
            "component unloaded"
        );
    }

    fn starting(&self, name: &str) {
        tracing::info!(
            target: LIFECYCLE_TARGET,
            event = "starting",
            component = name,
            "starting component"
        );
    }

    fn started(&self, name: &str, process: Option<ProcessId>) {
        match process {
            Some(process) => tracing::info!(
                target: LIFECYCLE_TARGET,
                event = "started",
                component = name,
                process = %process,
                "component started"
            ),
            None => tracing::info!(
                target: LIFECYCLE_TARGET,
                event = "started",
                component = name,
                "library component started"
            ),
        }
    }

    fn start_failed(&self, name: &str, error: &ControlError) {
        tracing::error!(
            target: LIFECYCLE_TARGET,
            event = "start_failed",
            component = name,
            error = %error,
            "component failed to start"
        );
    }

    fn stopped(&self, name: &str) {
        tracing::info!(
            target: LIFECYCLE_TARGET,
            event = "stopped",
            component = name,
            "component stopped"
        );
    }

    fn exited(&self, name: &str, cause: &ExitCause, policy: RestartPolicy) {
        tracing::warn!(
            target: LIFECYCLE_TARGET,
            event = "exited",
            component = name,
            %cause,
            %policy,
            "component root process exited"
        );
    }

    fn escalated(&self, name: &str, cause: &ExitCause) {
        tracing::error!(
            target: LIFECYCLE_TARGET,
            event = "escalated",
            component = name,
            %cause,
            "component exit escalated to host shutdown"
        );
    }
}
