//! Layered per-component configuration.
//!
//! Every component owns four layers of key/value entries, resolved from the
//! lowest to the highest precedence:
//!
//! 1. **file**: the `env` map of the loaded resource definition;
//! 2. **override**: values supplied by the host's [`Overrides`] document;
//! 3. **runtime**: values written with [`EnvironmentStore::put`];
//! 4. **persistent**: runtime writes flagged persistent, which survive
//!    reload and unload.
//!
//! Loading a component replaces the file and override layers wholesale and
//! discards runtime entries. Each component's layers sit behind their own
//! read/write lock so readers and writers of different components never
//! contend, and writes acquire that lock against a deadline.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::ControlError;

const ENV_TARGET: &str = "appctl::env";

/// Default budget for environment writes.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Precedence layer an entry lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Layer {
    /// Defined by the resource definition.
    File,
    /// Supplied by the host's override document.
    Override,
    /// Written after load.
    Runtime,
    /// Written after load and kept across reloads.
    Persistent,
}

/// Options for [`EnvironmentStore::put`] and [`EnvironmentStore::delete`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PutOptions {
    /// Target the persistent layer instead of the runtime layer.
    pub persistent: bool,
    /// Budget for acquiring the component's write lock.
    pub timeout: Duration,
}

impl Default for PutOptions {
    fn default() -> Self {
        Self {
            persistent: false,
            timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }
}

impl PutOptions {
    /// Runtime-layer write with the given budget.
    #[must_use]
    pub const fn runtime(timeout: Duration) -> Self {
        Self {
            persistent: false,
            timeout,
        }
    }

    /// Persistent-layer write with the given budget.
    #[must_use]
    pub const fn persistent(timeout: Duration) -> Self {
        Self {
            persistent: true,
            timeout,
        }
    }

    const fn layer(self) -> Layer {
        if self.persistent {
            Layer::Persistent
        } else {
            Layer::Runtime
        }
    }
}

/// Errors raised while reading an override document.
#[derive(Debug, Error)]
pub enum OverridesError {
    /// The document is not a `component -> key -> value` JSON object.
    #[error("invalid override document: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Read-once override mapping supplied by the host at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    components: HashMap<String, BTreeMap<String, Value>>,
}

impl Overrides {
    /// An empty mapping.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses `{"component": {"key": value}}` JSON.
    ///
    /// # Errors
    ///
    /// Returns [`OverridesError::Parse`] when the document has another shape.
    pub fn from_json(raw: &[u8]) -> Result<Self, OverridesError> {
        let components = serde_json::from_slice(raw)?;
        Ok(Self { components })
    }

    /// Adds an override entry.
    #[must_use]
    pub fn with(
        mut self,
        component: impl Into<String>,
        key: impl Into<String>,
        value: Value,
    ) -> Self {
        self.components
            .entry(component.into())
            .or_default()
            .insert(key.into(), value);
        self
    }

    /// Overrides for a single component.
    #[must_use]
    pub fn for_component(&self, component: &str) -> BTreeMap<String, Value> {
        self.components.get(component).cloned().unwrap_or_default()
    }
}

#[derive(Debug, Default)]
pub(crate) struct Layers {
    file: BTreeMap<String, Value>,
    overrides: BTreeMap<String, Value>,
    runtime: BTreeMap<String, Value>,
    persistent: BTreeMap<String, Value>,
}

impl Layers {
    fn resolve(&self, key: &str) -> Option<&Value> {
        self.persistent
            .get(key)
            .or_else(|| self.runtime.get(key))
            .or_else(|| self.overrides.get(key))
            .or_else(|| self.file.get(key))
    }

    fn layer_mut(&mut self, layer: Layer) -> &mut BTreeMap<String, Value> {
        match layer {
            Layer::File => &mut self.file,
            Layer::Override => &mut self.overrides,
            Layer::Runtime => &mut self.runtime,
            Layer::Persistent => &mut self.persistent,
        }
    }

    fn resolved(&self) -> BTreeMap<String, Value> {
        let mut merged = self.file.clone();
        for layer in [&self.overrides, &self.runtime, &self.persistent] {
            merged.extend(layer.iter().map(|(key, value)| (key.clone(), value.clone())));
        }
        merged
    }

    fn is_empty(&self) -> bool {
        self.file.is_empty()
            && self.overrides.is_empty()
            && self.runtime.is_empty()
            && self.persistent.is_empty()
    }
}

/// The single authoritative environment for every component.
#[derive(Debug, Default)]
pub struct EnvironmentStore {
    components: RwLock<HashMap<String, Arc<RwLock<Layers>>>>,
}

impl EnvironmentStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn layers(&self, name: &str) -> Option<Arc<RwLock<Layers>>> {
        self.components.read().get(name).cloned()
    }

    fn layers_or_insert(&self, name: &str) -> Arc<RwLock<Layers>> {
        if let Some(existing) = self.layers(name) {
            return existing;
        }
        Arc::clone(self.components.write().entry(name.to_owned()).or_default())
    }

    /// Resolves `key`, falling back to `default` when no layer defines it.
    #[must_use]
    pub fn get(&self, name: &str, key: &str, default: Value) -> Value {
        self.lookup(name, key).unwrap_or(default)
    }

    /// Resolves `key`.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::UndefinedKey`] when no layer defines it.
    pub fn fetch(&self, name: &str, key: &str) -> Result<Value, ControlError> {
        self.lookup(name, key).ok_or_else(|| ControlError::UndefinedKey {
            name: name.to_owned(),
            key: key.to_owned(),
        })
    }

    /// Resolves `key` and deserialises it into `T`.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::UndefinedKey`] when the key is missing and
    /// [`ControlError::InvalidValue`] when the value has another shape.
    pub fn fetch_as<T: DeserializeOwned>(&self, name: &str, key: &str) -> Result<T, ControlError> {
        let value = self.fetch(name, key)?;
        serde_json::from_value(value).map_err(|err| ControlError::InvalidValue {
            name: name.to_owned(),
            key: key.to_owned(),
            message: err.to_string(),
        })
    }

    /// Fully resolved environment of a component.
    #[must_use]
    pub fn all(&self, name: &str) -> BTreeMap<String, Value> {
        self.layers(name)
            .map(|layers| layers.read().resolved())
            .unwrap_or_default()
    }

    /// Writes `key` into the runtime or persistent layer.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::Timeout`] when the write lock is not acquired
    /// within `options.timeout`. The outcome of a timed-out write is unknown
    /// to the caller.
    pub fn put(
        &self,
        name: &str,
        key: &str,
        value: Value,
        options: PutOptions,
    ) -> Result<(), ControlError> {
        let layer = options.layer();
        self.write_registered(name, Some(Instant::now() + options.timeout), |layers| {
            layers.layer_mut(layer).insert(key.to_owned(), value);
        })
        .ok_or_else(|| timeout(name, key, options.timeout))?;
        debug!(
            target: ENV_TARGET,
            component = name,
            key,
            ?layer,
            "environment entry written"
        );
        Ok(())
    }

    /// Removes `key` from the runtime or persistent layer.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::Timeout`] under the same contract as
    /// [`Self::put`].
    pub fn delete(&self, name: &str, key: &str, options: PutOptions) -> Result<(), ControlError> {
        let Some(layers) = self.layers(name) else {
            return Ok(());
        };
        let mut guard = layers
            .try_write_for(options.timeout)
            .ok_or_else(|| timeout(name, key, options.timeout))?;
        let layer = options.layer();
        guard.layer_mut(layer).remove(key);
        debug!(
            target: ENV_TARGET,
            component = name,
            key,
            ?layer,
            "environment entry deleted"
        );
        Ok(())
    }

    /// Installs freshly loaded file and override layers.
    ///
    /// Runtime entries are discarded; persistent entries are kept.
    pub(crate) fn install(
        &self,
        name: &str,
        file: BTreeMap<String, Value>,
        overrides: BTreeMap<String, Value>,
    ) {
        let persistent = self
            .write_registered(name, None, |layers| {
                layers.file = file;
                layers.overrides = overrides;
                layers.runtime.clear();
                layers.persistent.len()
            })
            .unwrap_or_default();
        debug!(
            target: ENV_TARGET,
            component = name,
            persistent,
            "environment layers installed"
        );
    }

    /// Drops every non-persistent layer of a component being unloaded.
    pub(crate) fn discard(&self, name: &str) {
        let Some(layers) = self.layers(name) else {
            return;
        };
        let mut guard = layers.write();
        guard.file.clear();
        guard.overrides.clear();
        guard.runtime.clear();
        if guard.is_empty() {
            // Removed while the layer lock is held so a waiting writer sees
            // the entry gone and registers a fresh one.
            let mut components = self.components.write();
            if components
                .get(name)
                .is_some_and(|registered| Arc::ptr_eq(registered, &layers))
            {
                components.remove(name);
            }
        } else {
            warn!(
                target: ENV_TARGET,
                component = name,
                "persistent environment kept after unload"
            );
        }
    }

    /// Returns the layer that currently supplies `key`, if any.
    #[must_use]
    pub fn source_of(&self, name: &str, key: &str) -> Option<Layer> {
        let layers = self.layers(name)?;
        let guard = layers.read();
        [
            (Layer::Persistent, &guard.persistent),
            (Layer::Runtime, &guard.runtime),
            (Layer::Override, &guard.overrides),
            (Layer::File, &guard.file),
        ]
        .into_iter()
        .find(|(_, entries)| entries.contains_key(key))
        .map(|(layer, _)| layer)
    }

    /// Runs `write` under the write lock of the layers registered for
    /// `name`, retrying when the layers were unregistered while waiting.
    ///
    /// Returns `None` when `deadline` passes first. Lock order is always the
    /// layer lock before the registry lock.
    fn write_registered<R>(
        &self,
        name: &str,
        deadline: Option<Instant>,
        write: impl FnOnce(&mut Layers) -> R,
    ) -> Option<R> {
        loop {
            let layers = self.layers_or_insert(name);
            let mut guard = match deadline {
                Some(deadline) => layers.try_write_until(deadline)?,
                None => layers.write(),
            };
            let registered = self
                .components
                .read()
                .get(name)
                .is_some_and(|current| Arc::ptr_eq(current, &layers));
            if registered {
                return Some(write(&mut guard));
            }
        }
    }

    fn lookup(&self, name: &str, key: &str) -> Option<Value> {
        let layers = self.layers(name)?;
        let guard = layers.read();
        guard.resolve(key).cloned()
    }

    #[cfg(test)]
    pub(crate) fn hold_write(&self, name: &str) -> Arc<RwLock<Layers>> {
        self.layers_or_insert(name)
    }
}

fn timeout(name: &str, key: &str, timeout: Duration) -> ControlError {
    warn!(
        target: ENV_TARGET,
        component = name,
        key,
        timeout_ms = timeout.as_millis(),
        "environment write timed out; outcome unknown"
    );
    ControlError::Timeout {
        name: name.to_owned(),
        key: key.to_owned(),
        timeout,
    }
}
