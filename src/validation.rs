//! Structural validation of apparatus graphs and compiled schedules.
//!
//! All functions here are pure: they inspect their inputs and report the
//! first problem found as a structured [`ValidationError`] naming the
//! offending component, tube or parameter.

use crate::apparatus::{ApparatusGraph, Component, ParamValue, ParameterMap, ValueRejection};
use crate::error::ValidationError;
use crate::protocol::{EntryId, ExecutionSchedule};
use std::collections::HashSet;
use tracing::warn;

/// Validate the structure of an apparatus.
///
/// Checks, in order:
/// - component names are unique
/// - no component declares the same parameter twice, and every default
///   satisfies its own declaration
/// - every tube connects two existing, distinct components and has sane
///   geometry
/// - when there is more than one component, none is left unconnected
pub fn validate_apparatus(apparatus: &ApparatusGraph) -> Result<(), ValidationError> {
    let mut names = HashSet::new();
    for component in apparatus.components() {
        if !names.insert(component.name.as_str()) {
            return Err(ValidationError::DuplicateComponent {
                name: component.name.clone(),
            });
        }
        validate_declarations(component)?;
    }

    for connection in apparatus.connections() {
        for endpoint in [&connection.from, &connection.to] {
            if !names.contains(endpoint.as_str()) {
                return Err(ValidationError::DanglingTube {
                    from: connection.from.clone(),
                    to: connection.to.clone(),
                    missing: endpoint.clone(),
                });
            }
        }
        if connection.from == connection.to {
            return Err(ValidationError::SelfLoop {
                component: connection.from.clone(),
            });
        }
        connection
            .tube
            .check_geometry()
            .map_err(|reason| ValidationError::InvalidTube {
                from: connection.from.clone(),
                to: connection.to.clone(),
                reason,
            })?;
        if connection.tube.is_suspiciously_short() {
            warn!(
                from = %connection.from,
                to = %connection.to,
                length_mm = connection.tube.length_mm,
                "Tube is shorter than its diameter"
            );
        }
    }

    if apparatus.components().len() > 1 {
        let topology = apparatus.topology();
        if let Some(isolated) = apparatus
            .components()
            .iter()
            .find(|c| topology.degree(&c.name) == 0)
        {
            return Err(ValidationError::IsolatedComponent {
                name: isolated.name.clone(),
            });
        }
    }

    Ok(())
}

fn validate_declarations(component: &Component) -> Result<(), ValidationError> {
    let mut seen = HashSet::new();
    for spec in &component.parameters {
        if !seen.insert(spec.name.as_str()) {
            return Err(ValidationError::DuplicateParameter {
                component: component.name.clone(),
                parameter: spec.name.clone(),
            });
        }
        check_value(component, &spec.name, &spec.default)?;
    }
    Ok(())
}

/// Check a parameter assignment against a component's declared schema.
///
/// Returns the assignment with every value normalised to its declared kind.
pub fn check_assignment(
    component: &Component,
    parameters: &ParameterMap,
) -> Result<ParameterMap, ValidationError> {
    parameters
        .iter()
        .map(|(name, value)| {
            check_value(component, name, value).map(|normalised| (name.clone(), normalised))
        })
        .collect()
}

fn check_value(
    component: &Component,
    parameter: &str,
    value: &ParamValue,
) -> Result<ParamValue, ValidationError> {
    let spec = component
        .parameter(parameter)
        .ok_or_else(|| ValidationError::UnknownParameter {
            component: component.name.clone(),
            parameter: parameter.to_string(),
        })?;

    spec.check(value).map_err(|rejection| match rejection {
        ValueRejection::WrongKind { expected, found } => ValidationError::TypeMismatch {
            component: component.name.clone(),
            parameter: parameter.to_string(),
            expected,
            found,
        },
        ValueRejection::OutOfBounds => ValidationError::OutOfBounds {
            component: component.name.clone(),
            parameter: parameter.to_string(),
            value: value.clone(),
            bounds: spec.bounds.clone(),
        },
    })
}

/// Validate a compiled schedule against the apparatus it targets.
///
/// Every event must name an existing component that is reachable from an
/// entry point, and every assigned value must match the component's
/// declaration. On failure the originating entry is returned along with the
/// error so the compiler can report it.
pub fn validate_schedule(
    schedule: &ExecutionSchedule,
    apparatus: &ApparatusGraph,
) -> Result<(), (EntryId, ValidationError)> {
    let topology = apparatus.topology();
    let reachable = topology.reachable(apparatus);

    for event in schedule.events() {
        let component = apparatus.component(&event.component).ok_or_else(|| {
            (
                event.origin,
                ValidationError::UnknownComponent {
                    name: event.component.clone(),
                },
            )
        })?;

        // A lone component is trivially its own entry point.
        if apparatus.components().len() > 1 && !reachable.contains(component.name.as_str()) {
            return Err((
                event.origin,
                ValidationError::Unreachable {
                    component: component.name.clone(),
                },
            ));
        }

        for (name, value) in &event.parameters {
            check_value(component, name, value).map_err(|err| (event.origin, err))?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apparatus::{ParameterSpec, Tube};

    fn tube() -> Tube {
        Tube::new(127.0, 1.5875, 3.175, "PFA")
    }

    fn line() -> ApparatusGraph {
        let mut apparatus = ApparatusGraph::new("line");
        apparatus
            .add_component(Component::pump("pump", 10.0))
            .add_component(Component::sensor("uv"));
        apparatus.connect("pump", "uv", tube());
        apparatus
    }

    #[test]
    fn valid_line_passes() {
        assert_eq!(validate_apparatus(&line()), Ok(()));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut apparatus = line();
        apparatus.add_component(Component::sensor("uv"));
        assert_eq!(
            validate_apparatus(&apparatus),
            Err(ValidationError::DuplicateComponent { name: "uv".into() })
        );
    }

    #[test]
    fn dangling_tube_names_missing_endpoint() {
        let mut apparatus = line();
        apparatus.connect("uv", "collector", tube());
        assert_eq!(
            validate_apparatus(&apparatus),
            Err(ValidationError::DanglingTube {
                from: "uv".into(),
                to: "collector".into(),
                missing: "collector".into(),
            })
        );
    }

    #[test]
    fn duplicate_parameter_declaration_is_rejected() {
        let mut apparatus = ApparatusGraph::new("single");
        apparatus.add_component(
            Component::pump("pump", 10.0).with_parameter(ParameterSpec::float("rate", 1.0)),
        );
        assert_eq!(
            validate_apparatus(&apparatus),
            Err(ValidationError::DuplicateParameter {
                component: "pump".into(),
                parameter: "rate".into(),
            })
        );
    }

    #[test]
    fn default_outside_bounds_is_rejected() {
        let mut apparatus = ApparatusGraph::new("single");
        apparatus.add_component(
            Component::new("heater", crate::apparatus::ComponentKind::TempControl)
                .with_parameter(ParameterSpec::float("temp", 500.0).with_range(0.0, 100.0)),
        );
        assert!(matches!(
            validate_apparatus(&apparatus),
            Err(ValidationError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn self_loop_and_isolated_components_are_rejected() {
        let mut apparatus = line();
        apparatus.connect("pump", "pump", tube());
        assert_eq!(
            validate_apparatus(&apparatus),
            Err(ValidationError::SelfLoop {
                component: "pump".into()
            })
        );

        let mut apparatus = line();
        apparatus.add_component(Component::vessel("spare"));
        assert_eq!(
            validate_apparatus(&apparatus),
            Err(ValidationError::IsolatedComponent {
                name: "spare".into()
            })
        );
    }

    #[test]
    fn assignment_is_normalised_and_checked() {
        let pump = Component::pump("pump", 10.0);
        let mut params = ParameterMap::new();
        params.insert("rate".into(), ParamValue::Integer(5));
        assert_eq!(
            check_assignment(&pump, &params).unwrap()["rate"],
            ParamValue::Float(5.0)
        );

        params.insert("pressure".into(), ParamValue::Float(1.0));
        assert_eq!(
            check_assignment(&pump, &params),
            Err(ValidationError::UnknownParameter {
                component: "pump".into(),
                parameter: "pressure".into(),
            })
        );
    }
}
