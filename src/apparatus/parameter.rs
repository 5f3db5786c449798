//! Declarative parameter schema for apparatus components.
//!
//! Every active component declares the parameters a protocol may assign,
//! together with their kind, bounds and default value. Assignments are
//! checked against this schema when a procedure is added to a protocol and
//! again when a compiled schedule is validated.
//!
//! # Example
//!
//! ```rust
//! use rust_flow::apparatus::{ParamValue, ParameterSpec};
//!
//! let rate = ParameterSpec::float("rate", 0.0)
//!     .with_range(0.0, 50.0)
//!     .with_unit("mL/min");
//!
//! assert!(rate.check(&ParamValue::Float(12.5)).is_ok());
//! assert!(rate.check(&ParamValue::Float(80.0)).is_err());
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Parameter assignment: parameter name to value.
///
/// A `BTreeMap` keeps iteration order stable, which keeps compiled
/// schedules reproducible.
pub type ParameterMap = BTreeMap<String, ParamValue>;

/// A concrete parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl ParamValue {
    /// Kind of this value.
    pub fn kind(&self) -> ParamKind {
        match self {
            ParamValue::Boolean(_) => ParamKind::Boolean,
            ParamValue::Integer(_) => ParamKind::Integer,
            ParamValue::Float(_) => ParamKind::Float,
            ParamValue::Text(_) => ParamKind::Text,
        }
    }

    /// Numeric view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Integer(v) => Some(*v as f64),
            ParamValue::Float(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Boolean(v) => write!(f, "{v}"),
            ParamValue::Integer(v) => write!(f, "{v}"),
            ParamValue::Float(v) => write!(f, "{v}"),
            ParamValue::Text(v) => write!(f, "\"{v}\""),
        }
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Boolean(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Integer(value)
    }
}

impl From<i32> for ParamValue {
    fn from(value: i32) -> Self {
        ParamValue::Integer(i64::from(value))
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        ParamValue::Float(value)
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Text(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Text(value)
    }
}

/// Declared type of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    Boolean,
    Integer,
    Float,
    Text,
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamKind::Boolean => write!(f, "boolean"),
            ParamKind::Integer => write!(f, "integer"),
            ParamKind::Float => write!(f, "float"),
            ParamKind::Text => write!(f, "text"),
        }
    }
}

/// Allowed values for a parameter.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Bounds {
    /// No constraints
    #[default]
    Unbounded,

    /// Inclusive numeric range
    Range { min: f64, max: f64 },

    /// Allowed discrete values
    Choices { values: Vec<ParamValue> },
}

impl Bounds {
    /// Check a value against the bounds.
    pub fn contains(&self, value: &ParamValue) -> bool {
        match self {
            Bounds::Unbounded => true,
            Bounds::Range { min, max } => value
                .as_f64()
                .map(|v| v >= *min && v <= *max)
                .unwrap_or(false),
            Bounds::Choices { values } => values.iter().any(|c| c == value),
        }
    }
}

impl fmt::Display for Bounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bounds::Unbounded => write!(f, "unbounded"),
            Bounds::Range { min, max } => write!(f, "[{min}, {max}]"),
            Bounds::Choices { values } => {
                let rendered: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                write!(f, "one of {{{}}}", rendered.join(", "))
            }
        }
    }
}

/// Why a value was refused by a [`ParameterSpec`].
#[derive(Debug, Clone, PartialEq)]
pub enum ValueRejection {
    WrongKind { expected: ParamKind, found: ParamKind },
    OutOfBounds,
}

/// Declaration of one mutable parameter on a component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    /// Parameter name (unique per component)
    pub name: String,
    /// Declared type
    pub kind: ParamKind,
    /// Validation constraints
    #[serde(default)]
    pub bounds: Bounds,
    /// Value the component holds before any procedure touches it
    pub default: ParamValue,
    /// Unit of measurement (e.g. "mL/min", "degC")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl ParameterSpec {
    /// Create a parameter declaration; the kind is taken from the default.
    pub fn new(name: impl Into<String>, default: impl Into<ParamValue>) -> Self {
        let default = default.into();
        Self {
            name: name.into(),
            kind: default.kind(),
            bounds: Bounds::Unbounded,
            default,
            unit: None,
        }
    }

    pub fn float(name: impl Into<String>, default: f64) -> Self {
        Self::new(name, ParamValue::Float(default))
    }

    pub fn integer(name: impl Into<String>, default: i64) -> Self {
        Self::new(name, ParamValue::Integer(default))
    }

    pub fn boolean(name: impl Into<String>, default: bool) -> Self {
        Self::new(name, ParamValue::Boolean(default))
    }

    pub fn text(name: impl Into<String>, default: impl Into<String>) -> Self {
        Self::new(name, ParamValue::Text(default.into()))
    }

    /// Restrict to an inclusive numeric range.
    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.bounds = Bounds::Range { min, max };
        self
    }

    /// Restrict to a set of discrete values.
    pub fn with_choices<I, V>(mut self, choices: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<ParamValue>,
    {
        self.bounds = Bounds::Choices {
            values: choices.into_iter().map(Into::into).collect(),
        };
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Validate `value` and return it normalised to the declared kind.
    ///
    /// Integers are widened to floats for float parameters; every other
    /// kind mismatch is refused.
    pub fn check(&self, value: &ParamValue) -> Result<ParamValue, ValueRejection> {
        let normalised = match (self.kind, value) {
            (ParamKind::Float, ParamValue::Integer(v)) => ParamValue::Float(*v as f64),
            (expected, v) if v.kind() == expected => v.clone(),
            (expected, v) => {
                return Err(ValueRejection::WrongKind {
                    expected,
                    found: v.kind(),
                })
            }
        };

        if self.bounds.contains(&normalised) {
            Ok(normalised)
        } else {
            Err(ValueRejection::OutOfBounds)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_widens_to_float() {
        let spec = ParameterSpec::float("rate", 0.0).with_range(0.0, 10.0);
        assert_eq!(
            spec.check(&ParamValue::Integer(5)),
            Ok(ParamValue::Float(5.0))
        );
    }

    #[test]
    fn rejects_wrong_kind() {
        let spec = ParameterSpec::boolean("active", false);
        assert_eq!(
            spec.check(&ParamValue::Float(1.0)),
            Err(ValueRejection::WrongKind {
                expected: ParamKind::Boolean,
                found: ParamKind::Float,
            })
        );
    }

    #[test]
    fn range_is_inclusive() {
        let spec = ParameterSpec::float("temp", 25.0).with_range(-20.0, 150.0);
        assert!(spec.check(&ParamValue::Float(150.0)).is_ok());
        assert!(spec.check(&ParamValue::Float(-20.0)).is_ok());
        assert_eq!(
            spec.check(&ParamValue::Float(150.1)),
            Err(ValueRejection::OutOfBounds)
        );
    }

    #[test]
    fn choices_match_exactly() {
        let spec = ParameterSpec::text("setting", "A").with_choices(["A", "B", "C"]);
        assert!(spec.check(&"B".into()).is_ok());
        assert_eq!(spec.check(&"D".into()), Err(ValueRejection::OutOfBounds));
    }

    #[test]
    fn untagged_values_deserialize_by_shape() {
        let map: ParameterMap = toml::from_str("rate = 15.0\nsetting = \"A\"\nactive = true\nport = 3")
            .unwrap();
        assert_eq!(map["rate"], ParamValue::Float(15.0));
        assert_eq!(map["setting"], ParamValue::Text("A".into()));
        assert_eq!(map["active"], ParamValue::Boolean(true));
        assert_eq!(map["port"], ParamValue::Integer(3));
    }
}
