//! Start and stop transitions.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use serde_json::{Value, json};
use tracing::{debug, warn};

use super::{Controller, LIFECYCLE_TARGET, Runtime};
use crate::behaviour::{ComponentBehaviour, RestartPolicy, StartType, Started};
use crate::deps::{check_dependencies, start_plan};
use crate::error::ControlError;
use crate::process::{RootProcess, panic_message};
use crate::spec::{CallbackRef, ComponentSpec};
use crate::status::Status;

impl Controller {
    /// Starts `name`, loading it first when necessary.
    ///
    /// Blocks until the start callback and every start phase have returned.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::AlreadyStarted`] without invoking the callback
    /// again, [`ControlError::ShuttingDown`], [`ControlError::MissingDependency`],
    /// load errors, and the callback outcomes [`ControlError::StartFailed`],
    /// [`ControlError::BadReturn`], [`ControlError::CallbackExit`] and
    /// [`ControlError::PhaseFailed`]. After a phase failure the component
    /// stays started. [`ControlError::Unmonitored`] is returned, after the
    /// root process has been terminated, when it cannot be watched.
    pub fn start(
        &self,
        name: &str,
        start_type: &StartType,
        policy: RestartPolicy,
    ) -> Result<(), ControlError> {
        if matches!(self.status(name), Status::Starting | Status::Started) {
            return Err(already_started(name));
        }
        let lock = self.transition_lock(name);
        let _guard = lock.lock();
        if matches!(self.status(name), Status::Starting | Status::Started) {
            return Err(already_started(name));
        }
        if self.is_shutting_down() {
            return Err(ControlError::ShuttingDown {
                name: name.to_owned(),
            });
        }
        if !self.inner.store.is_loaded(name) {
            let loaded = self.inner.store.load(name)?;
            self.report_loaded(&loaded);
        }
        let spec = self
            .inner
            .store
            .spec(name)
            .ok_or_else(|| ControlError::NotLoaded {
                name: name.to_owned(),
            })?;
        check_dependencies(&spec, |dependency| self.status(dependency))?;

        self.inner.reporter.starting(name);
        let Some(callback) = spec.callback() else {
            self.mark_started(name, None, Value::Null, policy);
            return Ok(());
        };
        self.set_status(name, Status::Starting);
        let started = match self.invoke_start(name, callback, start_type) {
            Ok(started) => started,
            Err(err) => {
                self.set_status(name, Status::Loaded);
                self.inner.reporter.start_failed(name, &err);
                return Err(err);
            }
        };
        if let Err(source) = self.inner.monitor.watch(name, &started.process) {
            started.process.terminate();
            let cause = started.process.wait();
            warn!(
                target: LIFECYCLE_TARGET,
                component = name,
                %cause,
                "unmonitored root process terminated"
            );
            let err = ControlError::Unmonitored {
                name: name.to_owned(),
                source: Arc::new(source),
            };
            self.set_status(name, Status::Loaded);
            self.inner.reporter.start_failed(name, &err);
            return Err(err);
        }
        let state = started.state.unwrap_or(Value::Null);
        let phases = self.run_phases(&spec, callback, start_type);
        self.mark_started(name, Some(started.process), state, policy);
        if let Err(err) = &phases {
            self.inner.reporter.start_failed(name, err);
        }
        phases
    }

    /// Starts `name` unless it is already started.
    ///
    /// # Errors
    ///
    /// As for [`Self::start`], except [`ControlError::AlreadyStarted`].
    pub fn ensure_started(
        &self,
        name: &str,
        start_type: &StartType,
        policy: RestartPolicy,
    ) -> Result<(), ControlError> {
        match self.start(name, start_type, policy) {
            Err(ControlError::AlreadyStarted { .. }) => Ok(()),
            other => other,
        }
    }

    /// Loads and starts `name` after its transitive dependencies.
    ///
    /// Optional dependencies without a resource definition are skipped.
    /// Returns the components this call started, in start order.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::DependencyFailed`] naming the first component
    /// that could not be planned or started. Components started by this call
    /// are stopped again, in reverse order, before the error is returned.
    pub fn ensure_all_started(
        &self,
        name: &str,
        start_type: &StartType,
        policy: RestartPolicy,
    ) -> Result<Vec<String>, ControlError> {
        let plan = start_plan(name, |component| self.spec_or_load(component))
            .map_err(|err| dependency_failed(name, err))?;
        let mut started = Vec::new();
        for component in &plan {
            if self.status(component) == Status::Started {
                continue;
            }
            match self.start(component, start_type, policy) {
                Ok(()) => started.push(component.clone()),
                Err(ControlError::AlreadyStarted { .. }) => {}
                Err(err) => {
                    if matches!(err, ControlError::PhaseFailed { .. }) {
                        started.push(component.clone());
                    }
                    self.roll_back(&started);
                    return Err(ControlError::DependencyFailed {
                        component: component.clone(),
                        source: Box::new(err),
                    });
                }
            }
        }
        Ok(started)
    }

    /// Stops a started component.
    ///
    /// Runs the pre-stop hook, terminates the root process, blocks until it
    /// and every descendant have exited, then runs the post-stop hook.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::NotLoaded`] for unknown components and
    /// [`ControlError::NotStarted`] for components that are not started.
    pub fn stop(&self, name: &str) -> Result<(), ControlError> {
        let lock = self.transition_lock(name);
        let _guard = lock.lock();
        let (process, state) = {
            let mut runtime = self.inner.runtime.lock();
            match runtime.get_mut(name) {
                Some(entry) if entry.status == Status::Started => {
                    entry.status = Status::Stopping;
                    (entry.process.take(), std::mem::take(&mut entry.state))
                }
                _ if self.inner.store.is_loaded(name) => {
                    return Err(ControlError::NotStarted {
                        name: name.to_owned(),
                    });
                }
                _ => {
                    return Err(ControlError::NotLoaded {
                        name: name.to_owned(),
                    });
                }
            }
        };
        self.inner.started_order.lock().retain(|started| started != name);

        let behaviour = self
            .inner
            .store
            .spec(name)
            .and_then(|spec| spec.callback().map(|callback| callback.module().to_owned()))
            .and_then(|module| self.behaviour(&module));
        let state = match &behaviour {
            Some(behaviour) => prep_stop(name, behaviour.as_ref(), state),
            None => state,
        };
        let cause = process.map(|process| self.inner.monitor.shutdown(name, &process));
        if let Some(behaviour) = &behaviour {
            post_stop(name, behaviour.as_ref(), state);
        }
        {
            let mut runtime = self.inner.runtime.lock();
            let entry = runtime.entry(name.to_owned()).or_default();
            entry.status = Status::Loaded;
            if cause.is_some() {
                entry.last_exit = cause;
            }
        }
        self.inner.reporter.stopped(name);
        Ok(())
    }

    fn invoke_start(
        &self,
        name: &str,
        callback: &CallbackRef,
        start_type: &StartType,
    ) -> Result<Started, ControlError> {
        let behaviour =
            self.behaviour(callback.module())
                .ok_or_else(|| ControlError::CallbackExit {
                    name: name.to_owned(),
                    cause: format!(
                        "no behaviour registered for callback module '{}'",
                        callback.module()
                    ),
                })?;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            behaviour.start(start_type, callback.args())
        }));
        match outcome {
            Err(payload) => Err(ControlError::CallbackExit {
                name: name.to_owned(),
                cause: panic_message(payload.as_ref()),
            }),
            Ok(Err(reason)) => Err(ControlError::StartFailed {
                name: name.to_owned(),
                reason,
            }),
            Ok(Ok(started)) => match started.process.exit_cause() {
                Some(cause) => Err(ControlError::BadReturn {
                    name: name.to_owned(),
                    value: json!({
                        "process": started.process.id().to_string(),
                        "exited": cause.to_string(),
                    }),
                }),
                None => Ok(started),
            },
        }
    }

    fn run_phases(
        &self,
        spec: &ComponentSpec,
        callback: &CallbackRef,
        start_type: &StartType,
    ) -> Result<(), ControlError> {
        if spec.start_phases().is_empty() {
            return Ok(());
        }
        let Some(behaviour) = self.behaviour(callback.module()) else {
            return Ok(());
        };
        for phase in spec.start_phases() {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                behaviour.start_phase(phase.phase(), start_type, phase.args())
            }))
            .unwrap_or_else(|payload| Err(Value::String(panic_message(payload.as_ref()))));
            if let Err(reason) = outcome {
                return Err(ControlError::PhaseFailed {
                    name: spec.name().to_owned(),
                    phase: phase.phase().to_owned(),
                    reason,
                });
            }
            debug!(
                target: LIFECYCLE_TARGET,
                component = spec.name(),
                phase = phase.phase(),
                "start phase completed"
            );
        }
        Ok(())
    }

    fn mark_started(
        &self,
        name: &str,
        process: Option<RootProcess>,
        state: Value,
        policy: RestartPolicy,
    ) {
        let id = process.as_ref().map(RootProcess::id);
        {
            let mut runtime = self.inner.runtime.lock();
            let entry = runtime.entry(name.to_owned()).or_default();
            *entry = Runtime {
                status: Status::Started,
                process,
                state,
                policy: Some(policy),
                last_exit: entry.last_exit.take(),
            };
        }
        self.inner.started_order.lock().push(name.to_owned());
        self.inner.reporter.started(name, id);
    }

    fn set_status(&self, name: &str, status: Status) {
        self.inner
            .runtime
            .lock()
            .entry(name.to_owned())
            .or_default()
            .status = status;
    }

    fn spec_or_load(&self, name: &str) -> Result<ComponentSpec, ControlError> {
        if let Some(spec) = self.inner.store.spec(name) {
            return Ok(spec);
        }
        match self.load(name) {
            Ok(()) | Err(ControlError::AlreadyLoaded { .. }) => {}
            Err(err) => return Err(err),
        }
        self.inner
            .store
            .spec(name)
            .ok_or_else(|| ControlError::NotLoaded {
                name: name.to_owned(),
            })
    }

    fn roll_back(&self, started: &[String]) {
        for name in started.iter().rev() {
            if let Err(err) = self.stop(name) {
                warn!(
                    target: LIFECYCLE_TARGET,
                    component = name.as_str(),
                    error = %err,
                    "rollback stop failed"
                );
            }
        }
    }
}

fn already_started(name: &str) -> ControlError {
    ControlError::AlreadyStarted {
        name: name.to_owned(),
    }
}

fn dependency_failed(root: &str, err: ControlError) -> ControlError {
    let component = err.component().unwrap_or(root).to_owned();
    ControlError::DependencyFailed {
        component,
        source: Box::new(err),
    }
}

fn prep_stop(name: &str, behaviour: &dyn ComponentBehaviour, state: Value) -> Value {
    match panic::catch_unwind(AssertUnwindSafe(|| behaviour.prep_stop(&state))) {
        Ok(Some(replaced)) => replaced,
        Ok(None) => state,
        Err(payload) => {
            warn!(
                target: LIFECYCLE_TARGET,
                component = name,
                panic = %panic_message(payload.as_ref()),
                "pre-stop hook panicked"
            );
            state
        }
    }
}

fn post_stop(name: &str, behaviour: &dyn ComponentBehaviour, state: Value) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| behaviour.stop(state))) {
        warn!(
            target: LIFECYCLE_TARGET,
            component = name,
            panic = %panic_message(payload.as_ref()),
            "post-stop hook panicked"
        );
    }
}
