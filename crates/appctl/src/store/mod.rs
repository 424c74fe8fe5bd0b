//! Specification store.
//!
//! Holds the parsed specification of every loaded component and keeps the
//! environment store's file and override layers in step with it. Loading a
//! component also loads, depth first, every included component that is not
//! loaded yet; a failure anywhere in that walk rolls back what the call
//! inserted.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::env::{EnvironmentStore, Overrides};
use crate::error::ControlError;
use crate::locator::{LocatorError, ResourceLocator};
use crate::spec::ComponentSpec;

const STORE_TARGET: &str = "appctl::store";

/// Loaded component specifications.
pub struct SpecStore {
    locator: Arc<dyn ResourceLocator>,
    overrides: Overrides,
    env: Arc<EnvironmentStore>,
    specs: RwLock<HashMap<String, ComponentSpec>>,
}

impl std::fmt::Debug for SpecStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpecStore")
            .field("loaded", &self.specs.read().len())
            .finish_non_exhaustive()
    }
}

impl SpecStore {
    /// Creates a store resolving definitions through `locator`.
    #[must_use]
    pub fn new(
        locator: Arc<dyn ResourceLocator>,
        overrides: Overrides,
        env: Arc<EnvironmentStore>,
    ) -> Self {
        Self {
            locator,
            overrides,
            env,
            specs: RwLock::default(),
        }
    }

    /// Locates, parses and records `name` and its included components.
    ///
    /// Returns the names that were loaded, `name` first.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::AlreadyLoaded`], [`ControlError::NotFound`],
    /// [`ControlError::Locator`] or [`ControlError::MalformedSpec`].
    pub fn load(&self, name: &str) -> Result<Vec<String>, ControlError> {
        if self.is_loaded(name) {
            return Err(ControlError::AlreadyLoaded {
                name: name.to_owned(),
            });
        }
        let spec = self.read_definition(name)?;
        self.load_spec(spec)
    }

    /// Records an in-memory specification and loads its included components.
    ///
    /// # Errors
    ///
    /// As for [`Self::load`], without the top-level locator lookup.
    pub fn load_spec(&self, spec: ComponentSpec) -> Result<Vec<String>, ControlError> {
        spec.validate()?;
        let mut loaded = Vec::new();
        let mut path = Vec::new();
        match self.insert_tree(spec, &mut loaded, &mut path, true) {
            Ok(()) => {
                info!(
                    target: STORE_TARGET,
                    components = ?loaded,
                    "components loaded"
                );
                Ok(loaded)
            }
            Err(err) => {
                self.roll_back(&loaded);
                Err(err)
            }
        }
    }

    /// Re-reads the definition of a loaded component.
    ///
    /// File and override layers are replaced, runtime entries are discarded
    /// and persistent entries kept. Newly included components are loaded.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::NotLoaded`] for unknown names, and the
    /// locator and parse errors of [`Self::load`].
    pub fn reload(&self, name: &str) -> Result<Vec<String>, ControlError> {
        if !self.is_loaded(name) {
            return Err(ControlError::NotLoaded {
                name: name.to_owned(),
            });
        }
        let spec = self.read_definition(name)?;
        let mut loaded = Vec::new();
        let mut path = vec![name.to_owned()];
        let missing: Vec<String> = spec
            .included()
            .iter()
            .filter(|included| !self.is_loaded(included))
            .cloned()
            .collect();
        for included in missing {
            let result = self
                .read_definition(&included)
                .and_then(|child| self.insert_tree(child, &mut loaded, &mut path, false));
            if let Err(err) = result {
                self.roll_back(&loaded);
                return Err(err);
            }
        }
        self.install(spec);
        debug!(target: STORE_TARGET, component = name, "component reloaded");
        Ok(loaded)
    }

    /// Removes `name` and, recursively, the components it includes.
    ///
    /// `is_running` reports whether a component is starting, started or
    /// stopping. Returns the names that were unloaded.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::NotLoaded`] for unknown names and
    /// [`ControlError::StillStarted`] when any affected component runs.
    pub fn unload<F>(&self, name: &str, is_running: F) -> Result<Vec<String>, ControlError>
    where
        F: Fn(&str) -> bool,
    {
        let tree = self.included_tree(name)?;
        if let Some(started) = tree.iter().find(|member| is_running(member)) {
            return Err(ControlError::StillStarted {
                name: name.to_owned(),
                started: started.clone(),
            });
        }
        {
            let mut specs = self.specs.write();
            for member in &tree {
                specs.remove(member);
            }
        }
        for member in &tree {
            self.env.discard(member);
        }
        info!(target: STORE_TARGET, components = ?tree, "components unloaded");
        Ok(tree)
    }

    /// Specification of a loaded component.
    #[must_use]
    pub fn spec(&self, name: &str) -> Option<ComponentSpec> {
        self.specs.read().get(name).cloned()
    }

    /// Returns `true` when `name` is loaded.
    #[must_use]
    pub fn is_loaded(&self, name: &str) -> bool {
        self.specs.read().contains_key(name)
    }

    /// Names of every loaded component, sorted.
    #[must_use]
    pub fn loaded(&self) -> Vec<String> {
        let mut names: Vec<String> = self.specs.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Parses the definition of `name` without recording it.
    ///
    /// # Errors
    ///
    /// Returns the locator and parse errors of [`Self::load`].
    pub fn read_definition(&self, name: &str) -> Result<ComponentSpec, ControlError> {
        let raw = self
            .locator
            .find_definition(name)
            .map_err(|err| locator_error(name, err))?;
        ComponentSpec::parse(name, &raw)
    }

    /// Installation directory of `name`.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::UnknownComponent`] when the locator does not
    /// know the component.
    pub fn install_dir(&self, name: &str) -> Result<PathBuf, ControlError> {
        self.locator.install_dir(name).map_err(|err| match err {
            LocatorError::NotFound { .. } => ControlError::UnknownComponent {
                name: name.to_owned(),
            },
            other => locator_error(name, other),
        })
    }

    fn insert_tree(
        &self,
        spec: ComponentSpec,
        loaded: &mut Vec<String>,
        path: &mut Vec<String>,
        top_level: bool,
    ) -> Result<(), ControlError> {
        let name = spec.name().to_owned();
        {
            let mut specs = self.specs.write();
            if specs.contains_key(&name) {
                return if top_level {
                    Err(ControlError::AlreadyLoaded { name })
                } else {
                    Ok(())
                };
            }
            specs.insert(name.clone(), spec.clone());
        }
        loaded.push(name.clone());
        self.env.install(
            &name,
            spec.env().clone(),
            self.overrides.for_component(&name),
        );
        path.push(name.clone());
        for included in spec.included() {
            if path.contains(included) {
                return Err(ControlError::malformed(
                    &name,
                    format!("inclusion cycle through '{included}'"),
                ));
            }
            if self.is_loaded(included) {
                continue;
            }
            let child = self.read_definition(included)?;
            self.insert_tree(child, loaded, path, false)?;
        }
        path.pop();
        Ok(())
    }

    fn install(&self, spec: ComponentSpec) {
        let name = spec.name().to_owned();
        self.env.install(
            &name,
            spec.env().clone(),
            self.overrides.for_component(&name),
        );
        self.specs.write().insert(name, spec);
    }

    fn roll_back(&self, loaded: &[String]) {
        if loaded.is_empty() {
            return;
        }
        {
            let mut specs = self.specs.write();
            for name in loaded {
                specs.remove(name);
            }
        }
        for name in loaded {
            self.env.discard(name);
        }
        debug!(target: STORE_TARGET, components = ?loaded, "partial load rolled back");
    }

    /// `name` followed, depth-first, by every component it includes.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::NotLoaded`] for unknown names.
    pub fn included_tree(&self, name: &str) -> Result<Vec<String>, ControlError> {
        let specs = self.specs.read();
        if !specs.contains_key(name) {
            return Err(ControlError::NotLoaded {
                name: name.to_owned(),
            });
        }
        let mut seen = HashSet::new();
        let mut pending = vec![name.to_owned()];
        let mut tree = Vec::new();
        while let Some(current) = pending.pop() {
            if !seen.insert(current.clone()) {
                continue;
            }
            let Some(spec) = specs.get(&current) else {
                continue;
            };
            pending.extend(spec.included().iter().rev().cloned());
            tree.push(current);
        }
        Ok(tree)
    }
}

fn locator_error(name: &str, err: LocatorError) -> ControlError {
    match err {
        LocatorError::NotFound { .. } => ControlError::NotFound {
            name: name.to_owned(),
        },
        LocatorError::Io { path, source } => ControlError::Locator {
            name: name.to_owned(),
            path,
            source: Arc::new(source),
        },
    }
}
