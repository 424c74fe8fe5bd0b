//! Operator-facing rendering of control errors.

use serde_json::Value;

use crate::error::ControlError;

/// Renders `error` as a human-readable sentence.
///
/// Opaque reasons embedded in the error are pretty-printed as JSON; if that
/// fails the raw `Debug` form is used instead.
#[must_use]
pub fn format_error(error: &ControlError) -> String {
    match error {
        ControlError::NotFound { name } => {
            format!("No resource definition for component {name} was found on the search path.")
        }
        ControlError::AlreadyLoaded { name } => format!("Component {name} is already loaded."),
        ControlError::AlreadyStarted { name } => format!("Component {name} is already started."),
        ControlError::NotLoaded { name } => format!("Component {name} is not loaded."),
        ControlError::NotStarted { name } => format!("Component {name} is not started."),
        ControlError::StillStarted { name, started } if name == started => {
            format!("Component {name} cannot be unloaded while it is running.")
        }
        ControlError::StillStarted { name, started } => format!(
            "Component {name} cannot be unloaded while its included component {started} is running."
        ),
        ControlError::MissingDependency { name, dependency } => format!(
            "Component {name} cannot start because its dependency {dependency} is not started."
        ),
        ControlError::MalformedSpec { name, message } => {
            format!("The resource definition of {name} is malformed: {message}.")
        }
        ControlError::BadReturn { name, value } => format!(
            "The start callback of {name} returned a bad value: {}",
            render(value)
        ),
        ControlError::CallbackExit { name, cause } => {
            format!("The start callback of {name} exited abnormally: {cause}.")
        }
        ControlError::StartFailed { name, reason } => {
            format!("Component {name} failed to start: {}", render(reason))
        }
        ControlError::PhaseFailed {
            name,
            phase,
            reason,
        } => format!(
            "Start phase {phase} of component {name} failed: {}",
            render(reason)
        ),
        ControlError::Timeout { name, key, timeout } => format!(
            "Updating {key} of component {name} timed out after {} ms; the update may still apply.",
            timeout.as_millis()
        ),
        ControlError::UndefinedKey { name, key } => {
            format!("Component {name} has no environment value for {key}.")
        }
        ControlError::InvalidValue { name, key, message } => {
            format!("The environment value {key} of component {name} is invalid: {message}.")
        }
        ControlError::UnknownComponent { name } => format!("Component {name} is unknown."),
        ControlError::CircularDependency { path } => {
            format!("The dependencies form a cycle: {}.", path.join(" -> "))
        }
        ControlError::DependencyFailed { component, source } => {
            format!("Starting {component} failed. {}", format_error(source))
        }
        ControlError::ShuttingDown { name } => {
            format!("Component {name} cannot start while the host is shutting down.")
        }
        ControlError::Locator { name, path, source } => format!(
            "The resource definition of {name} at {} could not be read: {source}.",
            path.display()
        ),
        ControlError::Unmonitored { name, source } => format!(
            "Component {name} was not started because its root process could not be \
             monitored: {source}."
        ),
    }
}

fn render(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| format!("{value:?}"))
}
