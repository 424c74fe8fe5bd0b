//! The lifecycle controller.
//!
//! [`Controller`] is the single entry point of the control system. It owns
//! the component spec and environment stores, the registry of callback
//! behaviours, every component's runtime state and the process monitor.
//! The handle is cheap to clone; all clones drive the same state.
//!
//! Transitions of one component are serialised by a per-name lock while
//! different components proceed in parallel. Unexpected root-process exits
//! arrive from the monitor over a channel and are handled on a dedicated
//! supervisor thread.

mod lifecycle;
mod shutdown;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::behaviour::{ComponentBehaviour, RestartPolicy};
use crate::env::{DEFAULT_WRITE_TIMEOUT, EnvironmentStore, Overrides, PutOptions};
use crate::error::ControlError;
use crate::locator::ResourceLocator;
use crate::process::{ExitCause, ProcessMonitor, RootProcess};
use crate::reporter::{LifecycleReporter, StructuredReporter};
use crate::spec::{ComponentSpec, SpecKey};
use crate::status::{ComponentInfo, Status};
use crate::store::SpecStore;

use self::shutdown::HaltLatch;

const LIFECYCLE_TARGET: &str = "appctl::lifecycle";

#[derive(Debug, Default)]
struct Runtime {
    status: Status,
    process: Option<RootProcess>,
    state: Value,
    policy: Option<RestartPolicy>,
    last_exit: Option<ExitCause>,
}

struct Inner {
    env: Arc<EnvironmentStore>,
    store: SpecStore,
    behaviours: RwLock<HashMap<String, Arc<dyn ComponentBehaviour>>>,
    runtime: Mutex<HashMap<String, Runtime>>,
    transitions: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    started_order: Mutex<Vec<String>>,
    monitor: ProcessMonitor,
    reporter: Arc<dyn LifecycleReporter>,
    shutting_down: AtomicBool,
    halt: HaltLatch,
    put_options: PutOptions,
}

/// Configures and builds a [`Controller`].
pub struct ControllerBuilder {
    locator: Arc<dyn ResourceLocator>,
    overrides: Overrides,
    reporter: Arc<dyn LifecycleReporter>,
    env_timeout: Duration,
}

impl fmt::Debug for ControllerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerBuilder")
            .field("overrides", &self.overrides)
            .field("env_timeout", &self.env_timeout)
            .finish_non_exhaustive()
    }
}

impl ControllerBuilder {
    /// Starts a builder resolving definitions through `locator`.
    #[must_use]
    pub fn new(locator: Arc<dyn ResourceLocator>) -> Self {
        Self {
            locator,
            overrides: Overrides::new(),
            reporter: Arc::new(StructuredReporter::new()),
            env_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }

    /// Uses `overrides` as the override environment layer.
    #[must_use]
    pub fn with_overrides(mut self, overrides: Overrides) -> Self {
        self.overrides = overrides;
        self
    }

    /// Routes lifecycle events to `reporter`.
    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn LifecycleReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Budget used by [`Controller::put`] and [`Controller::delete`].
    #[must_use]
    pub const fn with_env_timeout(mut self, timeout: Duration) -> Self {
        self.env_timeout = timeout;
        self
    }

    /// Builds the controller and starts its supervisor thread.
    ///
    /// # Errors
    ///
    /// Returns the OS error when the supervisor thread cannot be spawned.
    pub fn build(self) -> std::io::Result<Controller> {
        let (notify, terminations) = mpsc::channel();
        let env = Arc::new(EnvironmentStore::new());
        let inner = Arc::new(Inner {
            store: SpecStore::new(self.locator, self.overrides, Arc::clone(&env)),
            env,
            behaviours: RwLock::default(),
            runtime: Mutex::default(),
            transitions: Mutex::default(),
            started_order: Mutex::default(),
            monitor: ProcessMonitor::new(notify),
            reporter: self.reporter,
            shutting_down: AtomicBool::new(false),
            halt: HaltLatch::default(),
            put_options: PutOptions::runtime(self.env_timeout),
        });
        let weak: Weak<Inner> = Arc::downgrade(&inner);
        thread::Builder::new()
            .name("appctl-supervisor".to_owned())
            .spawn(move || shutdown::supervise(&weak, &terminations))?;
        Ok(Controller { inner })
    }
}

/// Handle to the application control system.
#[derive(Clone)]
pub struct Controller {
    inner: Arc<Inner>,
}

impl fmt::Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("started", &self.list_started())
            .finish_non_exhaustive()
    }
}

impl Controller {
    /// Starts a [`ControllerBuilder`].
    #[must_use]
    pub fn builder(locator: Arc<dyn ResourceLocator>) -> ControllerBuilder {
        ControllerBuilder::new(locator)
    }

    /// Registers the behaviour invoked for callback module `module`.
    ///
    /// A later registration for the same module replaces the earlier one.
    pub fn register_behaviour(
        &self,
        module: impl Into<String>,
        behaviour: Arc<dyn ComponentBehaviour>,
    ) {
        self.inner
            .behaviours
            .write()
            .insert(module.into(), behaviour);
    }

    /// Loads `name` and its included components.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::AlreadyLoaded`], [`ControlError::NotFound`],
    /// [`ControlError::Locator`] or [`ControlError::MalformedSpec`].
    pub fn load(&self, name: &str) -> Result<(), ControlError> {
        let lock = self.transition_lock(name);
        let _guard = lock.lock();
        let loaded = self.inner.store.load(name)?;
        self.report_loaded(&loaded);
        Ok(())
    }

    /// Loads an in-memory specification and its included components.
    ///
    /// # Errors
    ///
    /// As for [`Self::load`].
    pub fn load_spec(&self, spec: ComponentSpec) -> Result<(), ControlError> {
        let lock = self.transition_lock(spec.name());
        let _guard = lock.lock();
        let loaded = self.inner.store.load_spec(spec)?;
        self.report_loaded(&loaded);
        Ok(())
    }

    /// Re-reads the definition of a loaded component.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::NotLoaded`] and the errors of [`Self::load`].
    pub fn reload(&self, name: &str) -> Result<(), ControlError> {
        let lock = self.transition_lock(name);
        let _guard = lock.lock();
        let loaded = self.inner.store.reload(name)?;
        self.report_loaded(&loaded);
        Ok(())
    }

    /// Unloads `name` and its included components.
    ///
    /// The transition lock of every member of the included tree is held, in
    /// name order, from the running check until the members are removed.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::NotLoaded`] or [`ControlError::StillStarted`].
    pub fn unload(&self, name: &str) -> Result<(), ControlError> {
        loop {
            let mut members = self.inner.store.included_tree(name)?;
            members.sort();
            let locks: Vec<_> = members
                .iter()
                .map(|member| self.transition_lock(member))
                .collect();
            let _guards: Vec<_> = locks.iter().map(|lock| lock.lock()).collect();

            let mut current = self.inner.store.included_tree(name)?;
            current.sort();
            if current != members {
                // A concurrent reload changed the includes; lock the new tree.
                continue;
            }
            let unloaded = self
                .inner
                .store
                .unload(name, |member| self.status(member).is_running())?;
            let mut runtime = self.inner.runtime.lock();
            for member in &unloaded {
                runtime.remove(member);
                self.inner.reporter.unloaded(member);
            }
            return Ok(());
        }
    }

    /// Resolves an environment value, falling back to `default`.
    #[must_use]
    pub fn get(&self, name: &str, key: &str, default: Value) -> Value {
        self.inner.env.get(name, key, default)
    }

    /// Resolves an environment value.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::UndefinedKey`] when no layer defines `key`.
    pub fn fetch(&self, name: &str, key: &str) -> Result<Value, ControlError> {
        self.inner.env.fetch(name, key)
    }

    /// Resolves an environment value into `T`.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::UndefinedKey`] or [`ControlError::InvalidValue`].
    pub fn fetch_or_fail<T: DeserializeOwned>(
        &self,
        name: &str,
        key: &str,
    ) -> Result<T, ControlError> {
        self.inner.env.fetch_as(name, key)
    }

    /// Writes a runtime entry using the controller's default budget.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::Timeout`]; the write may still apply.
    pub fn put(&self, name: &str, key: &str, value: Value) -> Result<(), ControlError> {
        self.inner.env.put(name, key, value, self.inner.put_options)
    }

    /// Writes an entry with explicit options.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::Timeout`]; the write may still apply.
    pub fn put_with(
        &self,
        name: &str,
        key: &str,
        value: Value,
        options: PutOptions,
    ) -> Result<(), ControlError> {
        self.inner.env.put(name, key, value, options)
    }

    /// Removes a runtime entry using the controller's default budget.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::Timeout`]; the removal may still apply.
    pub fn delete(&self, name: &str, key: &str) -> Result<(), ControlError> {
        self.inner.env.delete(name, key, self.inner.put_options)
    }

    /// Removes an entry with explicit options.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::Timeout`]; the removal may still apply.
    pub fn delete_with(
        &self,
        name: &str,
        key: &str,
        options: PutOptions,
    ) -> Result<(), ControlError> {
        self.inner.env.delete(name, key, options)
    }

    /// Fully resolved environment of `name`.
    #[must_use]
    pub fn all_env(&self, name: &str) -> BTreeMap<String, Value> {
        self.inner.env.all(name)
    }

    /// The environment store shared by every component.
    #[must_use]
    pub fn environment(&self) -> &EnvironmentStore {
        &self.inner.env
    }

    /// Specification of a loaded component.
    #[must_use]
    pub fn spec(&self, name: &str) -> Option<ComponentSpec> {
        self.inner.store.spec(name)
    }

    /// One field of a loaded component's specification.
    #[must_use]
    pub fn spec_field(&self, name: &str, key: SpecKey) -> Option<Value> {
        self.inner.store.spec(name).map(|spec| spec.field(key))
    }

    /// Started components in start order.
    #[must_use]
    pub fn list_started(&self) -> Vec<String> {
        self.inner.started_order.lock().clone()
    }

    /// Loaded components, sorted by name.
    #[must_use]
    pub fn list_loaded(&self) -> Vec<String> {
        self.inner.store.loaded()
    }

    /// Lifecycle status of `name`.
    #[must_use]
    pub fn status(&self, name: &str) -> Status {
        let recorded = self
            .inner
            .runtime
            .lock()
            .get(name)
            .map(|runtime| runtime.status);
        match recorded {
            Some(status) if status != Status::Unloaded => status,
            _ if self.inner.store.is_loaded(name) => Status::Loaded,
            _ => Status::Unloaded,
        }
    }

    /// Runtime snapshot of a loaded component.
    #[must_use]
    pub fn info(&self, name: &str) -> Option<ComponentInfo> {
        let status = self.status(name);
        if status == Status::Unloaded {
            return None;
        }
        let runtime = self.inner.runtime.lock();
        let entry = runtime.get(name);
        Some(ComponentInfo {
            name: name.to_owned(),
            status,
            policy: entry.and_then(|runtime| runtime.policy),
            process: entry.and_then(|runtime| runtime.process.as_ref().map(RootProcess::id)),
            last_exit: entry.and_then(|runtime| runtime.last_exit.clone()),
        })
    }

    /// Installation directory of `name`.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::UnknownComponent`] when no definition exists.
    pub fn app_directory(&self, name: &str) -> Result<PathBuf, ControlError> {
        self.inner.store.install_dir(name)
    }

    /// A path inside the installation directory of `name`.
    ///
    /// # Errors
    ///
    /// As for [`Self::app_directory`].
    pub fn app_subdirectory(
        &self,
        name: &str,
        subpath: impl AsRef<Path>,
    ) -> Result<PathBuf, ControlError> {
        self.app_directory(name).map(|dir| dir.join(subpath))
    }

    fn transition_lock(&self, name: &str) -> Arc<Mutex<()>> {
        Arc::clone(
            self.inner
                .transitions
                .lock()
                .entry(name.to_owned())
                .or_default(),
        )
    }

    fn report_loaded(&self, loaded: &[String]) {
        for name in loaded {
            self.inner.reporter.loaded(name);
        }
    }

    fn behaviour(&self, module: &str) -> Option<Arc<dyn ComponentBehaviour>> {
        self.inner.behaviours.read().get(module).cloned()
    }

    fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests;
