//! Application control system.
//!
//! `appctl` loads declarative component specifications, orders their startup
//! by declared dependencies and drives each component through the
//! load → start → stop lifecycle. Every component owns a layered key/value
//! environment and, while started, a supervised root process whose
//! termination is tracked by the process monitor.
//!
//! # Architecture
//!
//! The [`Controller`] is the public entry point. It combines:
//!
//! - the [`SpecStore`], which resolves resource definitions through a
//!   [`ResourceLocator`] and keeps the [`EnvironmentStore`] in step;
//! - the dependency resolver ([`check_dependencies`], [`start_plan`]);
//! - the [`ProcessMonitor`], which reports root processes that exit without
//!   being asked to;
//! - the shutdown orchestrator, which stops components in reverse start order
//!   and applies each component's [`RestartPolicy`] to unexpected exits.
//!
//! Component callbacks implement [`ComponentBehaviour`] and are registered
//! against the callback module named in the resource definition.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use appctl::{
//!     ComponentBehaviour, ComponentSpec, CallbackRef, Controller, MemoryLocator,
//!     RestartPolicy, RootProcess, StartType, Started, Status,
//! };
//! use serde_json::{Value, json};
//!
//! struct Worker;
//!
//! impl ComponentBehaviour for Worker {
//!     fn start(&self, _start_type: &StartType, _args: &Value) -> Result<Started, Value> {
//!         RootProcess::idle("worker")
//!             .map(Started::new)
//!             .map_err(|err| json!(err.to_string()))
//!     }
//!
//!     fn stop(&self, _state: Value) {}
//! }
//!
//! let controller = Controller::builder(Arc::new(MemoryLocator::new()))
//!     .build()
//!     .expect("controller builds");
//! controller.register_behaviour("worker", Arc::new(Worker));
//! controller
//!     .load_spec(
//!         ComponentSpec::new("worker", "1.0.0")
//!             .with_callback(CallbackRef::new("worker", Value::Null)),
//!     )
//!     .expect("spec loads");
//! controller
//!     .start("worker", &StartType::Normal, RestartPolicy::Temporary)
//!     .expect("worker starts");
//! assert_eq!(controller.status("worker"), Status::Started);
//! controller.stop("worker").expect("worker stops");
//! ```

pub mod behaviour;
pub mod controller;
pub mod deps;
pub mod env;
pub mod error;
pub mod format;
pub mod locator;
pub mod process;
pub mod reporter;
pub mod spec;
pub mod status;
pub mod store;

#[cfg(test)]
mod tests;

pub use self::behaviour::{ComponentBehaviour, RestartPolicy, StartType, Started};
pub use self::controller::{Controller, ControllerBuilder};
pub use self::deps::{check_dependencies, start_plan};
pub use self::env::{EnvironmentStore, Layer, Overrides, OverridesError, PutOptions};
pub use self::error::ControlError;
pub use self::format::format_error;
pub use self::locator::{DirectoryLocator, LocatorError, MemoryLocator, ResourceLocator};
pub use self::process::{
    ExitCause, ProcessContext, ProcessId, ProcessMonitor, RootProcess, Termination,
};
pub use self::reporter::{LifecycleReporter, StructuredReporter};
pub use self::spec::{CallbackRef, ComponentSpec, SpecKey, StartPhase};
pub use self::status::{ComponentInfo, Status};
pub use self::store::SpecStore;
