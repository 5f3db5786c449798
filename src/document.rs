//! TOML experiment documents: an apparatus and a protocol in one file.
//!
//! ```toml
//! [apparatus]
//! name = "uv_monitor"
//!
//! [[apparatus.components]]
//! kind = "pump"
//! name = "pump"
//! max_rate = 10.0
//!
//! [[apparatus.components]]
//! kind = "sensor"
//! name = "uv"
//!
//! [[apparatus.tubes]]
//! from = "pump"
//! to = "uv"
//! length_mm = 500.0
//! inner_diameter_mm = 0.8
//! outer_diameter_mm = 1.6
//!
//! [protocol]
//! duration = "10s"
//!
//! [[protocol.procedures]]
//! component = "pump"
//! stop = "5s"
//! parameters = { rate = 5.0 }
//!
//! [[protocol.continuous]]
//! component = "uv"
//! parameters = { sampling = true }
//! ```
//!
//! Procedures are added before continuous entries, each group in file order.

use crate::apparatus::{ApparatusGraph, Component, ComponentKind, ParameterSpec, Tube};
use crate::error::FlowResult;
use crate::naming::NameAllocator;
use crate::protocol::{ContinuousEntry, ProcedureEntry, Protocol};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Parsed experiment file.
#[derive(Debug, Clone, Deserialize)]
pub struct ExperimentDocument {
    pub apparatus: ApparatusSection,
    pub protocol: ProtocolSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApparatusSection {
    pub name: Option<String>,
    #[serde(default)]
    pub components: Vec<ComponentDecl>,
    #[serde(default)]
    pub tubes: Vec<TubeDecl>,
}

/// A component, declared through one of the presets or in full.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ComponentDecl {
    Vessel {
        name: String,
        #[serde(default)]
        source: bool,
    },
    Pump {
        name: String,
        max_rate: f64,
        #[serde(default)]
        source: bool,
    },
    Valve {
        name: String,
        ports: Vec<String>,
        #[serde(default)]
        source: bool,
    },
    Sensor {
        name: String,
        #[serde(default)]
        source: bool,
    },
    TempControl {
        name: String,
        min: f64,
        max: f64,
        #[serde(default)]
        source: bool,
    },
    Custom {
        name: String,
        label: String,
        #[serde(default)]
        parameters: Vec<ParameterSpec>,
        #[serde(default)]
        source: bool,
    },
}

impl ComponentDecl {
    fn build(&self) -> Component {
        let (component, source) = match self {
            ComponentDecl::Vessel { name, source } => (Component::vessel(name), *source),
            ComponentDecl::Pump {
                name,
                max_rate,
                source,
            } => (Component::pump(name, *max_rate), *source),
            ComponentDecl::Valve {
                name,
                ports,
                source,
            } => (Component::valve(name, ports.iter().cloned()), *source),
            ComponentDecl::Sensor { name, source } => (Component::sensor(name), *source),
            ComponentDecl::TempControl {
                name,
                min,
                max,
                source,
            } => (Component::temp_control(name, *min, *max), *source),
            ComponentDecl::Custom {
                name,
                label,
                parameters,
                source,
            } => {
                let component = parameters.iter().cloned().fold(
                    Component::new(name, ComponentKind::Custom(label.clone())),
                    Component::with_parameter,
                );
                (component, *source)
            }
        };
        if source {
            component.as_source()
        } else {
            component
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TubeDecl {
    pub from: String,
    pub to: String,
    pub length_mm: f64,
    pub inner_diameter_mm: f64,
    pub outer_diameter_mm: f64,
    #[serde(default = "default_material")]
    pub material: String,
}

fn default_material() -> String {
    "PFA".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProtocolSection {
    pub name: Option<String>,
    pub description: Option<String>,
    #[serde(default, with = "humantime_serde")]
    pub duration: Option<Duration>,
    #[serde(default)]
    pub procedures: Vec<ProcedureEntry>,
    #[serde(default)]
    pub continuous: Vec<ContinuousEntry>,
}

impl ExperimentDocument {
    pub fn from_toml(text: &str) -> FlowResult<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> FlowResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// Build the apparatus. Unnamed apparatus draw a name from `names`.
    pub fn apparatus(&self, names: &mut NameAllocator) -> ApparatusGraph {
        let name = self
            .apparatus
            .name
            .clone()
            .unwrap_or_else(|| names.next_name());
        let mut apparatus = ApparatusGraph::new(name);
        for decl in &self.apparatus.components {
            apparatus.add_component(decl.build());
        }
        for tube in &self.apparatus.tubes {
            apparatus.connect(
                tube.from.clone(),
                tube.to.clone(),
                Tube::new(
                    tube.length_mm,
                    tube.inner_diameter_mm,
                    tube.outer_diameter_mm,
                    tube.material.clone(),
                ),
            );
        }
        apparatus
    }

    /// Build the protocol against an already-built apparatus.
    ///
    /// Every entry is checked against the apparatus as it is added.
    pub fn protocol(
        &self,
        apparatus: Arc<ApparatusGraph>,
        names: &mut NameAllocator,
    ) -> FlowResult<Protocol> {
        let section = &self.protocol;
        let name = section.name.clone().unwrap_or_else(|| names.next_name());
        let mut protocol = Protocol::new(name, apparatus);
        protocol.description = section.description.clone();
        protocol.set_duration(section.duration);

        for entry in &section.procedures {
            protocol.add(entry.clone())?;
        }
        for entry in &section.continuous {
            protocol.add_continuous(entry.clone())?;
        }
        Ok(protocol)
    }
}
