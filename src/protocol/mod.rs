//! Protocols: declarative sets of timed and continuous procedures.
//!
//! A [`Protocol`] targets one shared [`ApparatusGraph`] snapshot. Entries are
//! checked against the target component's parameter schema as they are added,
//! so a protocol only ever holds well-formed assignments. Timing is resolved
//! later by the [`compiler`].
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use rust_flow::apparatus::{ApparatusGraph, Component, Tube};
//! use rust_flow::protocol::{ContinuousEntry, ProcedureEntry, Protocol};
//!
//! let mut apparatus = ApparatusGraph::new("demo");
//! apparatus
//!     .add_component(Component::pump("pump", 10.0))
//!     .add_component(Component::sensor("uv"));
//! apparatus.connect("pump", "uv", Tube::new(120.0, 0.8, 1.6, "PFA"));
//!
//! let mut protocol = Protocol::new("demo", Arc::new(apparatus))
//!     .with_duration(Duration::from_secs(10));
//! protocol
//!     .add(ProcedureEntry::new("pump").set("rate", 5.0).stop(Duration::from_secs(5)))
//!     .unwrap();
//! protocol
//!     .add_continuous(ContinuousEntry::new("uv").set("sampling", true))
//!     .unwrap();
//!
//! let schedule = protocol.compile().unwrap();
//! assert_eq!(schedule.len(), 4);
//! ```

pub mod compiler;
pub mod schedule;

pub use compiler::{compile, CompilerOptions, OverlapPolicy, ProtocolCompiler};
pub use schedule::{ContinuousWindow, Event, EventKind, ExecutionSchedule};

use crate::apparatus::{ApparatusGraph, ComponentKind, ParamValue, ParameterMap};
use crate::error::{CompileError, ValidationError};
use crate::validation::check_assignment;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Declaration position of an entry within its protocol.
///
/// Procedures and continuous procedures share one counter, so ids also give
/// the tie-break order between events scheduled at the same offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(pub usize);

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entry #{}", self.0)
    }
}

/// A timed parameter change on one component.
///
/// The stop can be absolute (`stop`), relative to the start (`lasting`), or
/// left open. An open stop resolves at compile time to the next later start
/// on the same component, or to the end of the protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcedureEntry {
    pub component: String,
    #[serde(default)]
    pub parameters: ParameterMap,
    #[serde(default, with = "humantime_serde")]
    pub start: Duration,
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub stop: Option<Duration>,
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub lasting: Option<Duration>,
}

impl ProcedureEntry {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            parameters: ParameterMap::new(),
            start: Duration::ZERO,
            stop: None,
            lasting: None,
        }
    }

    /// Assign one parameter.
    pub fn set(mut self, parameter: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.parameters.insert(parameter.into(), value.into());
        self
    }

    pub fn start(mut self, start: Duration) -> Self {
        self.start = start;
        self
    }

    /// Absolute stop offset from the protocol start.
    pub fn stop(mut self, stop: Duration) -> Self {
        self.stop = Some(stop);
        self
    }

    /// Stop offset relative to this entry's start.
    pub fn lasting(mut self, duration: Duration) -> Self {
        self.lasting = Some(duration);
        self
    }

    /// Same timing and assignment, aimed at another component.
    fn retarget(&self, component: &str) -> Self {
        Self {
            component: component.to_string(),
            ..self.clone()
        }
    }
}

/// A parameter change held for the whole protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContinuousEntry {
    pub component: String,
    #[serde(default)]
    pub parameters: ParameterMap,
}

impl ContinuousEntry {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            parameters: ParameterMap::new(),
        }
    }

    pub fn set(mut self, parameter: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.parameters.insert(parameter.into(), value.into());
        self
    }
}

/// An accepted protocol entry.
///
/// Procedure stops given as `lasting` have already been folded into `stop`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProtocolEntry {
    Procedure(ProcedureEntry),
    Continuous(ContinuousEntry),
}

impl ProtocolEntry {
    pub fn component(&self) -> &str {
        match self {
            ProtocolEntry::Procedure(p) => &p.component,
            ProtocolEntry::Continuous(c) => &c.component,
        }
    }

    pub fn parameters(&self) -> &ParameterMap {
        match self {
            ProtocolEntry::Procedure(p) => &p.parameters,
            ProtocolEntry::Continuous(c) => &c.parameters,
        }
    }
}

/// Timed procedures targeting one apparatus.
#[derive(Debug, Clone)]
pub struct Protocol {
    pub name: String,
    pub description: Option<String>,
    apparatus: Arc<ApparatusGraph>,
    entries: Vec<ProtocolEntry>,
    duration: Option<Duration>,
}

impl Protocol {
    pub fn new(name: impl Into<String>, apparatus: Arc<ApparatusGraph>) -> Self {
        Self {
            name: name.into(),
            description: None,
            apparatus,
            entries: Vec::new(),
            duration: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Fix the protocol duration instead of inferring it.
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn set_duration(&mut self, duration: Option<Duration>) {
        self.duration = duration;
    }

    /// Explicit duration, if one was given.
    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    pub fn apparatus(&self) -> &Arc<ApparatusGraph> {
        &self.apparatus
    }

    /// Entries in declaration order.
    pub fn entries(&self) -> impl Iterator<Item = (EntryId, &ProtocolEntry)> {
        self.entries.iter().enumerate().map(|(i, e)| (EntryId(i), e))
    }

    pub fn entry(&self, id: EntryId) -> Option<&ProtocolEntry> {
        self.entries.get(id.0)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Add a timed procedure.
    ///
    /// The assignment must be non-empty and match the component's schema,
    /// and at most one of `stop` and `lasting` may be given. Values are
    /// stored normalised to their declared kinds.
    pub fn add(&mut self, entry: ProcedureEntry) -> Result<EntryId, ValidationError> {
        let entry = self.accept_procedure(entry)?;
        Ok(self.push(ProtocolEntry::Procedure(entry)))
    }

    /// Add the same procedure to several components.
    ///
    /// Either every copy is accepted or none is.
    pub fn add_each<I, S>(
        &mut self,
        components: I,
        template: ProcedureEntry,
    ) -> Result<Vec<EntryId>, ValidationError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let accepted = components
            .into_iter()
            .map(|name| self.accept_procedure(template.retarget(name.as_ref())))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(accepted
            .into_iter()
            .map(|entry| self.push(ProtocolEntry::Procedure(entry)))
            .collect())
    }

    /// Add a procedure held for the whole protocol.
    ///
    /// Compilation will require an explicit duration.
    pub fn add_continuous(&mut self, entry: ContinuousEntry) -> Result<EntryId, ValidationError> {
        let parameters = self.accept_assignment(&entry.component, &entry.parameters)?;
        Ok(self.push(ProtocolEntry::Continuous(ContinuousEntry {
            component: entry.component,
            parameters,
        })))
    }

    /// Compile with default options.
    pub fn compile(&self) -> Result<ExecutionSchedule, CompileError> {
        compile(self)
    }

    fn push(&mut self, entry: ProtocolEntry) -> EntryId {
        let id = EntryId(self.entries.len());
        debug!(protocol = %self.name, entry = %id, component = entry.component(), "Entry added");
        self.entries.push(entry);
        id
    }

    fn accept_procedure(&self, entry: ProcedureEntry) -> Result<ProcedureEntry, ValidationError> {
        let stop = match (entry.stop, entry.lasting) {
            (Some(_), Some(_)) => {
                return Err(ValidationError::AmbiguousStop {
                    component: entry.component,
                })
            }
            (Some(stop), None) => Some(stop),
            (None, Some(lasting)) => Some(entry.start + lasting),
            (None, None) => None,
        };
        let parameters = self.accept_assignment(&entry.component, &entry.parameters)?;
        Ok(ProcedureEntry {
            component: entry.component,
            parameters,
            start: entry.start,
            stop,
            lasting: None,
        })
    }

    fn accept_assignment(
        &self,
        component: &str,
        parameters: &ParameterMap,
    ) -> Result<ParameterMap, ValidationError> {
        let target = self
            .apparatus
            .component(component)
            .ok_or_else(|| ValidationError::UnknownComponent {
                name: component.to_string(),
            })?;
        if parameters.is_empty() {
            return Err(ValidationError::EmptyAssignment {
                component: component.to_string(),
            });
        }

        let mut parameters = check_assignment(target, parameters)?;

        // Setting a temperature switches the controller on unless told otherwise.
        if target.kind == ComponentKind::TempControl
            && parameters.contains_key("temp")
            && target.parameter("active").is_some()
        {
            parameters
                .entry("active".to_string())
                .or_insert(ParamValue::Boolean(true));
        }

        Ok(parameters)
    }
}
