//! Dependency resolution.
//!
//! Dependency edges are derived from each specification's declared order and
//! never stored. [`check_dependencies`] gates a single start; [`start_plan`]
//! orders a transitive start for `ensure_all_started`.

use std::collections::HashSet;

use crate::error::ControlError;
use crate::spec::ComponentSpec;
use crate::status::Status;

/// Verifies that every declared dependency of `spec` is started.
///
/// An optional dependency that is not loaded at all is satisfied.
///
/// # Errors
///
/// Returns [`ControlError::MissingDependency`] naming the first dependency, in
/// declared order, whose status is not `Started`.
pub fn check_dependencies<F>(spec: &ComponentSpec, status: F) -> Result<(), ControlError>
where
    F: Fn(&str) -> Status,
{
    match spec
        .dependencies()
        .iter()
        .find(|dependency| match status(dependency) {
            Status::Started => false,
            Status::Unloaded => !spec.is_optional(dependency),
            _ => true,
        })
    {
        Some(dependency) => Err(ControlError::MissingDependency {
            name: spec.name().to_owned(),
            dependency: dependency.clone(),
        }),
        None => Ok(()),
    }
}

/// Orders `root` and its transitive dependencies so that every component
/// follows its dependencies. `root` is always last.
///
/// `lookup` supplies specifications, loading them if necessary. An optional
/// dependency whose lookup fails with [`ControlError::NotFound`] is left out
/// of the plan.
///
/// # Errors
///
/// Returns [`ControlError::CircularDependency`] when the graph has a cycle and
/// propagates any other lookup failure.
pub fn start_plan<F>(root: &str, mut lookup: F) -> Result<Vec<String>, ControlError>
where
    F: FnMut(&str) -> Result<ComponentSpec, ControlError>,
{
    let mut planner = Planner {
        lookup: &mut lookup,
        path: Vec::new(),
        done: HashSet::new(),
        order: Vec::new(),
    };
    let spec = (planner.lookup)(root)?;
    planner.visit(&spec)?;
    Ok(planner.order)
}

struct Planner<'a, F> {
    lookup: &'a mut F,
    path: Vec<String>,
    done: HashSet<String>,
    order: Vec<String>,
}

impl<F> Planner<'_, F>
where
    F: FnMut(&str) -> Result<ComponentSpec, ControlError>,
{
    fn visit(&mut self, spec: &ComponentSpec) -> Result<(), ControlError> {
        self.path.push(spec.name().to_owned());
        for dependency in spec.dependencies() {
            if let Some(start) = self.path.iter().position(|name| name == dependency) {
                let mut cycle = self.path.split_off(start);
                cycle.push(dependency.clone());
                return Err(ControlError::CircularDependency { path: cycle });
            }
            if self.done.contains(dependency) {
                continue;
            }
            let child = match (self.lookup)(dependency) {
                Ok(child) => child,
                Err(ControlError::NotFound { .. }) if spec.is_optional(dependency) => continue,
                Err(err) => return Err(err),
            };
            self.visit(&child)?;
        }
        self.path.pop();
        self.done.insert(spec.name().to_owned());
        self.order.push(spec.name().to_owned());
        Ok(())
    }
}
