//! Declarative component specifications.
//!
//! A [`ComponentSpec`] is the parsed form of a component's resource
//! definition: identity, dependencies, included components, the callback
//! module that implements its behaviour and the file-defined environment.
//! Specs are validated when parsed or built so the store only ever holds
//! well-formed definitions.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString};

use crate::error::ControlError;

/// Reference to the behaviour implementing a component's callbacks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackRef {
    module: String,
    #[serde(default)]
    args: Value,
}

impl CallbackRef {
    /// Creates a callback reference with start arguments.
    #[must_use]
    pub fn new(module: impl Into<String>, args: Value) -> Self {
        Self {
            module: module.into(),
            args,
        }
    }

    /// Name under which the behaviour is registered.
    #[must_use]
    pub const fn module(&self) -> &str {
        self.module.as_str()
    }

    /// Arguments passed to the start callback.
    #[must_use]
    pub const fn args(&self) -> &Value {
        &self.args
    }
}

/// A named synchronous sub-step run after the start callback succeeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartPhase {
    phase: String,
    #[serde(default)]
    args: Value,
}

impl StartPhase {
    /// Creates a phase entry.
    #[must_use]
    pub fn new(phase: impl Into<String>, args: Value) -> Self {
        Self {
            phase: phase.into(),
            args,
        }
    }

    /// Phase identifier.
    #[must_use]
    pub const fn phase(&self) -> &str {
        self.phase.as_str()
    }

    /// Arguments passed to the phase callback.
    #[must_use]
    pub const fn args(&self) -> &Value {
        &self.args
    }
}

/// Introspectable fields of a [`ComponentSpec`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, Display)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum SpecKey {
    /// Free-form description.
    Description,
    /// Version string.
    Version,
    /// Modules shipped by the component.
    Modules,
    /// Names the component registers while running.
    Registered,
    /// Declared dependencies in order.
    Dependencies,
    /// Dependencies that may be absent.
    OptionalDependencies,
    /// Included components in order.
    Included,
    /// Callback reference.
    Callback,
    /// Start phases in order.
    StartPhases,
    /// File-defined environment.
    Env,
}

/// Static specification of a component.
///
/// # Example
///
/// ```
/// use appctl::{CallbackRef, ComponentSpec};
/// use serde_json::json;
///
/// let spec = ComponentSpec::new("web", "1.0.0")
///     .with_dependencies(vec!["db".into()])
///     .with_callback(CallbackRef::new("web_app", json!({})));
/// assert!(spec.validate().is_ok());
/// assert_eq!(spec.dependencies(), ["db".to_owned()]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentSpec {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    version: String,
    #[serde(default)]
    modules: Vec<String>,
    #[serde(default)]
    registered: Vec<String>,
    #[serde(default)]
    dependencies: Vec<String>,
    #[serde(default)]
    optional_dependencies: Vec<String>,
    #[serde(default)]
    included: Vec<String>,
    #[serde(default)]
    callback: Option<CallbackRef>,
    #[serde(default)]
    start_phases: Vec<StartPhase>,
    #[serde(default)]
    env: BTreeMap<String, Value>,
}

impl ComponentSpec {
    /// Creates a spec with no dependencies, callback or environment.
    #[must_use]
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            version: version.into(),
            modules: Vec::new(),
            registered: Vec::new(),
            dependencies: Vec::new(),
            optional_dependencies: Vec::new(),
            included: Vec::new(),
            callback: None,
            start_phases: Vec::new(),
            env: BTreeMap::new(),
        }
    }

    /// Parses and validates a JSON resource definition for `expected`.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::MalformedSpec`] when the document does not
    /// parse, names another component, or fails [`Self::validate`].
    pub fn parse(expected: &str, raw: &[u8]) -> Result<Self, ControlError> {
        let spec: Self = serde_json::from_slice(raw)
            .map_err(|err| ControlError::malformed(expected, err.to_string()))?;
        if spec.name != expected {
            return Err(ControlError::malformed(
                expected,
                format!("definition declares name '{}'", spec.name),
            ));
        }
        spec.validate()?;
        Ok(spec)
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Sets the module list.
    #[must_use]
    pub fn with_modules(mut self, modules: Vec<String>) -> Self {
        self.modules = modules;
        self
    }

    /// Sets the registered-name list.
    #[must_use]
    pub fn with_registered(mut self, registered: Vec<String>) -> Self {
        self.registered = registered;
        self
    }

    /// Sets the declared dependencies.
    #[must_use]
    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    /// Marks a subset of the dependencies as optional.
    #[must_use]
    pub fn with_optional_dependencies(mut self, optional: Vec<String>) -> Self {
        self.optional_dependencies = optional;
        self
    }

    /// Sets the included components.
    #[must_use]
    pub fn with_included(mut self, included: Vec<String>) -> Self {
        self.included = included;
        self
    }

    /// Sets the callback reference.
    #[must_use]
    pub fn with_callback(mut self, callback: CallbackRef) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Sets the start phases.
    #[must_use]
    pub fn with_start_phases(mut self, phases: Vec<StartPhase>) -> Self {
        self.start_phases = phases;
        self
    }

    /// Adds a file-defined environment entry.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: Value) -> Self {
        self.env.insert(key.into(), value);
        self
    }

    /// Checks the structural invariants of the component definition.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::MalformedSpec`] when the name is empty, a
    /// dependency or included component refers to the component itself or
    /// is repeated, start phases are declared without a callback, or an
    /// optional dependency is not also a declared dependency.
    pub fn validate(&self) -> Result<(), ControlError> {
        let name = self.name.as_str();
        if name.trim().is_empty() {
            return Err(ControlError::malformed(name, "component name must not be empty"));
        }
        check_names(name, "dependency", &self.dependencies)?;
        check_names(name, "included component", &self.included)?;
        if let Some(optional) = self
            .optional_dependencies
            .iter()
            .find(|dep| !self.dependencies.contains(dep))
        {
            return Err(ControlError::malformed(
                name,
                format!("optional dependency '{optional}' is not a declared dependency"),
            ));
        }
        if let Some(callback) = &self.callback
            && callback.module.trim().is_empty()
        {
            return Err(ControlError::malformed(name, "callback module must not be empty"));
        }
        if self.callback.is_none() && !self.start_phases.is_empty() {
            return Err(ControlError::malformed(
                name,
                "start phases require a callback module",
            ));
        }
        let mut phases = HashSet::new();
        if let Some(dup) = self
            .start_phases
            .iter()
            .find(|phase| !phases.insert(phase.phase()))
        {
            return Err(ControlError::malformed(
                name,
                format!("start phase '{}' is declared twice", dup.phase()),
            ));
        }
        Ok(())
    }

    /// Component name.
    #[must_use]
    pub const fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Description.
    #[must_use]
    pub const fn description(&self) -> &str {
        self.description.as_str()
    }

    /// Version string.
    #[must_use]
    pub const fn version(&self) -> &str {
        self.version.as_str()
    }

    /// Modules shipped by the component.
    #[must_use]
    pub fn modules(&self) -> &[String] {
        &self.modules
    }

    /// Names the component registers while running.
    #[must_use]
    pub fn registered(&self) -> &[String] {
        &self.registered
    }

    /// Declared dependencies in order.
    #[must_use]
    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    /// Returns `true` when `dependency` may be absent at start time.
    #[must_use]
    pub fn is_optional(&self, dependency: &str) -> bool {
        self.optional_dependencies.iter().any(|dep| dep == dependency)
    }

    /// Included components in order.
    #[must_use]
    pub fn included(&self) -> &[String] {
        &self.included
    }

    /// Callback reference, if the component has behaviour.
    #[must_use]
    pub const fn callback(&self) -> Option<&CallbackRef> {
        self.callback.as_ref()
    }

    /// Start phases in order.
    #[must_use]
    pub fn start_phases(&self) -> &[StartPhase] {
        &self.start_phases
    }

    /// File-defined environment.
    #[must_use]
    pub const fn env(&self) -> &BTreeMap<String, Value> {
        &self.env
    }

    /// Returns a single field as a JSON value.
    #[must_use]
    pub fn field(&self, key: SpecKey) -> Value {
        let rendered = match key {
            SpecKey::Description => serde_json::to_value(&self.description),
            SpecKey::Version => serde_json::to_value(&self.version),
            SpecKey::Modules => serde_json::to_value(&self.modules),
            SpecKey::Registered => serde_json::to_value(&self.registered),
            SpecKey::Dependencies => serde_json::to_value(&self.dependencies),
            SpecKey::OptionalDependencies => serde_json::to_value(&self.optional_dependencies),
            SpecKey::Included => serde_json::to_value(&self.included),
            SpecKey::Callback => serde_json::to_value(&self.callback),
            SpecKey::StartPhases => serde_json::to_value(&self.start_phases),
            SpecKey::Env => serde_json::to_value(&self.env),
        };
        rendered.unwrap_or(Value::Null)
    }
}

fn check_names(owner: &str, label: &str, names: &[String]) -> Result<(), ControlError> {
    let mut seen = HashSet::new();
    for name in names {
        if name == owner {
            return Err(ControlError::malformed(
                owner,
                format!("component cannot list itself as a {label}"),
            ));
        }
        if name.trim().is_empty() {
            return Err(ControlError::malformed(owner, format!("empty {label} name")));
        }
        if !seen.insert(name.as_str()) {
            return Err(ControlError::malformed(
                owner,
                format!("{label} '{name}' is listed twice"),
            ));
        }
    }
    Ok(())
}
