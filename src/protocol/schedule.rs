//! Compiled, immutable execution schedules.

use super::EntryId;
use crate::apparatus::ParameterMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

/// What an event does to its component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Set,
    ContinuousStart,
    ContinuousStop,
}

/// One timed parameter assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Offset from the start of the run
    #[serde(with = "humantime_serde")]
    pub offset: Duration,
    pub component: String,
    pub parameters: ParameterMap,
    pub kind: EventKind,
    /// Entry that produced the event
    pub origin: EntryId,
}

/// The `[start, stop)` window of a continuous procedure.
#[derive(Debug, Clone, PartialEq)]
pub struct ContinuousWindow {
    pub component: String,
    pub start: Duration,
    pub stop: Duration,
    pub origin: EntryId,
}

/// Time-ordered events ready for dispatch.
///
/// Events are sorted by offset, ties broken by the declaration order of the
/// originating entry. Only the compiler constructs schedules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSchedule {
    pub protocol: String,
    events: Vec<Event>,
    #[serde(with = "humantime_serde")]
    duration: Duration,
    base_states: BTreeMap<String, ParameterMap>,
}

impl ExecutionSchedule {
    pub(crate) fn new(
        protocol: String,
        events: Vec<Event>,
        duration: Duration,
        base_states: BTreeMap<String, ParameterMap>,
    ) -> Self {
        Self {
            protocol,
            events,
            duration,
            base_states,
        }
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Total span of the schedule; equals the resolved protocol duration.
    pub fn span(&self) -> Duration {
        self.duration
    }

    /// Components targeted by at least one event.
    pub fn components(&self) -> BTreeSet<&str> {
        self.events.iter().map(|e| e.component.as_str()).collect()
    }

    /// Events for one component, in schedule order.
    pub fn events_for<'a>(&'a self, component: &'a str) -> impl Iterator<Item = &'a Event> + 'a {
        self.events.iter().filter(move |e| e.component == component)
    }

    /// Declared defaults of a parameterised component.
    pub fn base_state(&self, component: &str) -> Option<&ParameterMap> {
        self.base_states.get(component)
    }

    pub fn base_states(&self) -> &BTreeMap<String, ParameterMap> {
        &self.base_states
    }

    /// Windows opened by continuous procedures.
    pub fn continuous_windows(&self) -> Vec<ContinuousWindow> {
        self.events
            .iter()
            .filter(|e| e.kind == EventKind::ContinuousStart)
            .map(|start| ContinuousWindow {
                component: start.component.clone(),
                start: start.offset,
                stop: self
                    .events
                    .iter()
                    .find(|e| e.kind == EventKind::ContinuousStop && e.origin == start.origin)
                    .map(|e| e.offset)
                    .unwrap_or(self.duration),
                origin: start.origin,
            })
            .collect()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Short content hash identifying this exact schedule.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        // Serializing plain data into a string cannot fail.
        let json = serde_json::to_string(self).unwrap_or_default();
        hasher.update(json.as_bytes());
        format!("{:x}", hasher.finalize())[..8].to_string()
    }
}
