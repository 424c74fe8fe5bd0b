//! Shared doubles for controller tests.
//!
//! [`TestBehaviour`] is a scriptable callback module that journals every
//! hook it runs, and [`RecordingReporter`] captures lifecycle events.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;

use crate::behaviour::{ComponentBehaviour, RestartPolicy, StartType, Started};
use crate::controller::Controller;
use crate::error::ControlError;
use crate::locator::MemoryLocator;
use crate::process::{ExitCause, ProcessId, RootProcess};
use crate::reporter::LifecycleReporter;

pub(crate) const WAIT_TIMEOUT: Duration = Duration::from_secs(2);
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Ordered record of hook invocations across components.
pub(crate) type Journal = Arc<Mutex<Vec<String>>>;

/// How [`TestBehaviour::start`] responds.
#[derive(Debug, Clone)]
pub(crate) enum StartScript {
    Run,
    Fail(Value),
    Panic,
    ReturnDead,
}

/// Scriptable callback module.
pub(crate) struct TestBehaviour {
    label: String,
    journal: Journal,
    script: StartScript,
    failing_phase: Option<String>,
    children: usize,
    alive: Arc<AtomicUsize>,
    exit: Arc<Mutex<Option<ExitCause>>>,
    starts: AtomicUsize,
    drained_state: Option<Value>,
    stop_states: Mutex<Vec<(String, Value)>>,
}

impl TestBehaviour {
    pub(crate) fn new(label: &str, journal: &Journal) -> Self {
        Self {
            label: label.to_owned(),
            journal: Arc::clone(journal),
            script: StartScript::Run,
            failing_phase: None,
            children: 0,
            alive: Arc::default(),
            exit: Arc::default(),
            starts: AtomicUsize::new(0),
            drained_state: None,
            stop_states: Mutex::default(),
        }
    }

    /// Makes `prep_stop` replace the callback state with `state`.
    pub(crate) fn draining_to(mut self, state: Value) -> Self {
        self.drained_state = Some(state);
        self
    }

    /// States handed to the stop hooks, as `("prep_stop" | "stop", state)`.
    pub(crate) fn stop_states(&self) -> Vec<(String, Value)> {
        self.stop_states.lock().clone()
    }

    pub(crate) fn scripted(mut self, script: StartScript) -> Self {
        self.script = script;
        self
    }

    pub(crate) fn failing_phase(mut self, phase: &str) -> Self {
        self.failing_phase = Some(phase.to_owned());
        self
    }

    pub(crate) const fn with_children(mut self, children: usize) -> Self {
        self.children = children;
        self
    }

    /// Slot that makes the running root process exit with the stored cause.
    pub(crate) fn exit_trigger(&self) -> Arc<Mutex<Option<ExitCause>>> {
        Arc::clone(&self.exit)
    }

    pub(crate) fn start_count(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    fn record(&self, entry: String) {
        self.journal.lock().push(entry);
    }

    fn spawn_root(&self) -> RootProcess {
        let children = self.children;
        let alive = Arc::clone(&self.alive);
        let exit = Arc::clone(&self.exit);
        RootProcess::spawn(&self.label, move |ctx| {
            for index in 0..children {
                let alive_child = Arc::clone(&alive);
                alive_child.fetch_add(1, Ordering::SeqCst);
                ctx.spawn_child(&format!("child{index}"), move |child| {
                    child.wait_for_shutdown();
                    thread::sleep(Duration::from_millis(20));
                    alive_child.fetch_sub(1, Ordering::SeqCst);
                });
            }
            loop {
                if ctx.wait_for_shutdown_timeout(POLL_INTERVAL) {
                    return ExitCause::Shutdown;
                }
                if let Some(cause) = exit.lock().take() {
                    return cause;
                }
            }
        })
        .expect("spawn test root process")
    }
}

impl ComponentBehaviour for TestBehaviour {
    fn start(&self, _start_type: &StartType, args: &Value) -> Result<Started, Value> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.record(format!("start:{}", self.label));
        match &self.script {
            StartScript::Run => Ok(Started::new(self.spawn_root()).with_state(args.clone())),
            StartScript::Fail(reason) => Err(reason.clone()),
            StartScript::Panic => panic!("start of {} blew up", self.label),
            StartScript::ReturnDead => {
                let process = RootProcess::spawn(&self.label, |_ctx| ExitCause::Normal)
                    .expect("spawn short-lived process");
                assert_eq!(process.wait(), ExitCause::Normal);
                Ok(Started::new(process))
            }
        }
    }

    fn start_phase(
        &self,
        phase: &str,
        _start_type: &StartType,
        _args: &Value,
    ) -> Result<(), Value> {
        self.record(format!("phase:{}:{phase}", self.label));
        if self.failing_phase.as_deref() == Some(phase) {
            return Err(Value::String(format!("{phase} refused")));
        }
        Ok(())
    }

    fn prep_stop(&self, state: &Value) -> Option<Value> {
        self.record(format!("prep_stop:{}", self.label));
        self.stop_states
            .lock()
            .push(("prep_stop".to_owned(), state.clone()));
        self.drained_state.clone()
    }

    fn stop(&self, state: Value) {
        self.record(format!("stop:{}", self.label));
        self.stop_states.lock().push(("stop".to_owned(), state));
        if self.alive.load(Ordering::SeqCst) != 0 {
            self.record(format!("leak:{}", self.label));
        }
    }
}

/// Lifecycle events captured by [`RecordingReporter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum LifecycleEvent {
    Loaded(String),
    Unloaded(String),
    Starting(String),
    Started(String),
    StartFailed(String),
    Stopped(String),
    Exited(String, RestartPolicy),
    Escalated(String),
}

/// Records lifecycle events for assertions.
#[derive(Debug, Default)]
pub(crate) struct RecordingReporter {
    events: Mutex<Vec<LifecycleEvent>>,
}

impl RecordingReporter {
    pub(crate) fn events(&self) -> Vec<LifecycleEvent> {
        self.events.lock().clone()
    }

    fn record(&self, event: LifecycleEvent) {
        self.events.lock().push(event);
    }
}

impl LifecycleReporter for RecordingReporter {
    fn loaded(&self, name: &str) {
        self.record(LifecycleEvent::Loaded(name.to_owned()));
    }

    fn unloaded(&self, name: &str) {
        self.record(LifecycleEvent::Unloaded(name.to_owned()));
    }

    fn starting(&self, name: &str) {
        self.record(LifecycleEvent::Starting(name.to_owned()));
    }

    fn started(&self, name: &str, _process: Option<ProcessId>) {
        self.record(LifecycleEvent::Started(name.to_owned()));
    }

    fn start_failed(&self, name: &str, _error: &ControlError) {
        self.record(LifecycleEvent::StartFailed(name.to_owned()));
    }

    fn stopped(&self, name: &str) {
        self.record(LifecycleEvent::Stopped(name.to_owned()));
    }

    fn exited(&self, name: &str, _cause: &ExitCause, policy: RestartPolicy) {
        self.record(LifecycleEvent::Exited(name.to_owned(), policy));
    }

    fn escalated(&self, name: &str, _cause: &ExitCause) {
        self.record(LifecycleEvent::Escalated(name.to_owned()));
    }
}

/// A controller over an in-memory locator with recording doubles attached.
pub(crate) struct Harness {
    pub(crate) locator: Arc<MemoryLocator>,
    pub(crate) reporter: Arc<RecordingReporter>,
    pub(crate) journal: Journal,
    pub(crate) controller: Controller,
}

impl Harness {
    pub(crate) fn new() -> Self {
        Self::with_overrides(crate::env::Overrides::new())
    }

    pub(crate) fn with_overrides(overrides: crate::env::Overrides) -> Self {
        let locator = Arc::new(MemoryLocator::new());
        let reporter = Arc::new(RecordingReporter::default());
        let controller = Controller::builder(locator.clone())
            .with_overrides(overrides)
            .with_reporter(reporter.clone())
            .with_env_timeout(Duration::from_millis(200))
            .build()
            .expect("build controller");
        Self {
            locator,
            reporter,
            journal: Journal::default(),
            controller,
        }
    }

    pub(crate) fn define(&self, name: &str, definition: Value) {
        self.locator.insert(
            name,
            definition.to_string(),
            PathBuf::from("/opt/appctl/lib").join(name),
        );
    }

    pub(crate) fn register(&self, module: &str, behaviour: TestBehaviour) -> Arc<TestBehaviour> {
        let behaviour = Arc::new(behaviour);
        self.controller
            .register_behaviour(module, behaviour.clone());
        behaviour
    }

    pub(crate) fn journal_entries(&self) -> Vec<String> {
        self.journal.lock().clone()
    }

    /// Polls `condition` until it holds or [`WAIT_TIMEOUT`] elapses.
    pub(crate) fn wait_until(&self, condition: impl Fn(&Controller) -> bool) -> bool {
        let deadline = Instant::now() + WAIT_TIMEOUT;
        while Instant::now() < deadline {
            if condition(&self.controller) {
                return true;
            }
            thread::sleep(POLL_INTERVAL);
        }
        condition(&self.controller)
    }
}
