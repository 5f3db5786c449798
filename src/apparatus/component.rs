//! Hardware components: identity plus declared parameter schema.

use super::parameter::{ParamValue, ParameterMap, ParameterSpec};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of hardware a component represents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    /// Passive container (reservoir, collection bottle, mixer)
    Vessel,
    Pump,
    Valve,
    Sensor,
    TempControl,
    Custom(String),
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComponentKind::Vessel => write!(f, "vessel"),
            ComponentKind::Pump => write!(f, "pump"),
            ComponentKind::Valve => write!(f, "valve"),
            ComponentKind::Sensor => write!(f, "sensor"),
            ComponentKind::TempControl => write!(f, "temp_control"),
            ComponentKind::Custom(kind) => write!(f, "{kind}"),
        }
    }
}

/// Topological role of a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentRole {
    /// Where material enters the apparatus (reservoir, feed line)
    Source,
    #[default]
    Inline,
}

/// A node of the apparatus graph.
///
/// Identity (`name`, `kind`) is fixed at construction. Parameters are kept
/// as an ordered declaration list so that duplicate declarations can be
/// reported by validation instead of being silently merged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    pub name: String,
    pub kind: ComponentKind,
    #[serde(default)]
    pub role: ComponentRole,
    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,
}

impl Component {
    pub fn new(name: impl Into<String>, kind: ComponentKind) -> Self {
        Self {
            name: name.into(),
            kind,
            role: ComponentRole::Inline,
            parameters: Vec::new(),
        }
    }

    /// A passive vessel with no parameters.
    pub fn vessel(name: impl Into<String>) -> Self {
        Self::new(name, ComponentKind::Vessel)
    }

    /// A pump with a `rate` parameter in mL/min, idle at zero flow.
    pub fn pump(name: impl Into<String>, max_rate: f64) -> Self {
        Self::new(name, ComponentKind::Pump).with_parameter(
            ParameterSpec::float("rate", 0.0)
                .with_range(0.0, max_rate)
                .with_unit("mL/min"),
        )
    }

    /// A selector valve whose `setting` is one of the named ports.
    ///
    /// The first port is the resting position.
    pub fn valve<I, S>(name: impl Into<String>, ports: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ports: Vec<String> = ports.into_iter().map(Into::into).collect();
        let resting = ports.first().cloned().unwrap_or_default();
        Self::new(name, ComponentKind::Valve)
            .with_parameter(ParameterSpec::text("setting", resting).with_choices(ports))
    }

    /// A sensor with a boolean `sampling` switch, off by default.
    pub fn sensor(name: impl Into<String>) -> Self {
        Self::new(name, ComponentKind::Sensor)
            .with_parameter(ParameterSpec::boolean("sampling", false))
    }

    /// A temperature controller with `temp` (degC) and `active`.
    ///
    /// The resting setpoint is room temperature, clamped into range.
    pub fn temp_control(name: impl Into<String>, min: f64, max: f64) -> Self {
        // Inverted ranges keep `min` and are reported by validation
        let resting = if min <= max { 25.0_f64.clamp(min, max) } else { min };
        Self::new(name, ComponentKind::TempControl)
            .with_parameter(
                ParameterSpec::float("temp", resting)
                    .with_range(min, max)
                    .with_unit("degC"),
            )
            .with_parameter(ParameterSpec::boolean("active", false))
    }

    pub fn with_parameter(mut self, spec: ParameterSpec) -> Self {
        self.parameters.push(spec);
        self
    }

    pub fn with_role(mut self, role: ComponentRole) -> Self {
        self.role = role;
        self
    }

    /// Mark the component as an entry point of the apparatus.
    pub fn as_source(self) -> Self {
        self.with_role(ComponentRole::Source)
    }

    /// Look up a declared parameter by name.
    pub fn parameter(&self, name: &str) -> Option<&ParameterSpec> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Whether protocols can drive this component.
    pub fn is_active(&self) -> bool {
        !self.parameters.is_empty()
    }

    /// Default value of every declared parameter (the component's base state).
    pub fn base_state(&self) -> ParameterMap {
        let mut state = ParameterMap::new();
        for spec in &self.parameters {
            state
                .entry(spec.name.clone())
                .or_insert_with(|| spec.default.clone());
        }
        state
    }

    /// Declared default for one parameter.
    pub fn default_of(&self, parameter: &str) -> Option<&ParamValue> {
        self.parameter(parameter).map(|p| &p.default)
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_declare_expected_parameters() {
        let pump = Component::pump("pump", 50.0);
        assert!(pump.is_active());
        assert_eq!(pump.base_state()["rate"], ParamValue::Float(0.0));

        let valve = Component::valve("valve", ["A", "B"]);
        assert_eq!(valve.base_state()["setting"], ParamValue::Text("A".into()));

        let bottle = Component::vessel("bottle");
        assert!(!bottle.is_active());
        assert!(bottle.base_state().is_empty());
    }

    #[test]
    fn temp_control_default_is_clamped_into_range() {
        let chiller = Component::temp_control("chiller", -40.0, 0.0);
        assert_eq!(chiller.default_of("temp"), Some(&ParamValue::Float(0.0)));
    }
}
