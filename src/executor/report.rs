//! Run reports: the audit record of one execution.
//!
//! A report keeps the schedule that was executed, what happened to every
//! event, the per-component outcome and the sample log. Reports serialise to
//! JSON and can be written to and read back from disk.

use crate::apparatus::ParameterMap;
use crate::error::{CancellationError, FlowResult};
use crate::hardware::Reading;
use crate::protocol::{EntryId, EventKind, ExecutionSchedule};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Overall result of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    CompletedWithFailures,
    Cancelled,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Completed => write!(f, "Completed"),
            RunStatus::CompletedWithFailures => write!(f, "CompletedWithFailures"),
            RunStatus::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// What happened to one scheduled event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EventStatus {
    Applied,
    Failed { error: String },
    /// Never dispatched (run cancelled, or component halted after a fault)
    Dropped,
}

/// One entry of the executed-event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Scheduled offset
    #[serde(with = "humantime_serde")]
    pub offset: Duration,
    /// Clock time since run start when the call returned. `None` if dropped,
    /// and on virtual clocks, whose time is shared by every task of the run
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub elapsed: Option<Duration>,
    pub component: String,
    pub kind: EventKind,
    pub origin: EntryId,
    pub parameters: ParameterMap,
    #[serde(flatten)]
    pub status: EventStatus,
    /// Driver calls made, retries included
    pub attempts: u32,
}

/// A failed event, as listed in a component outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventFailure {
    #[serde(with = "humantime_serde")]
    pub offset: Duration,
    pub origin: EntryId,
    pub error: String,
}

/// Per-component tally.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ComponentOutcome {
    pub component: String,
    pub applied: usize,
    pub failed: Vec<EventFailure>,
    pub dropped: usize,
    /// Sample attempts that returned an error
    pub sample_failures: usize,
    /// Set when the dispatch worker died; its events have no records
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aborted: Option<String>,
}

impl ComponentOutcome {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            ..Self::default()
        }
    }

    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty() || self.aborted.is_some()
    }
}

/// A time-stamped reading from a continuous window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub component: String,
    /// Scheduled sampling offset
    #[serde(with = "humantime_serde")]
    pub offset: Duration,
    pub reading: Reading,
}

/// Safe-state command sent during cancellation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafeStateRecord {
    pub component: String,
    pub parameters: ParameterMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Audit record of one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// `YYYY_MM_DD_HH_MM_SS_<schedule hash>`
    pub experiment_id: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub outcomes: Vec<ComponentOutcome>,
    pub events: Vec<EventRecord>,
    pub samples: Vec<Sample>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub safe_state: Vec<SafeStateRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancellation: Option<CancellationError>,
    pub schedule: ExecutionSchedule,
}

impl RunReport {
    /// Experiment identifier from a start time and the schedule's content hash.
    pub fn experiment_id(started_at: DateTime<Utc>, schedule: &ExecutionSchedule) -> String {
        format!(
            "{}_{}",
            started_at.format("%Y_%m_%d_%H_%M_%S"),
            schedule.fingerprint()
        )
    }

    pub fn outcome(&self, component: &str) -> Option<&ComponentOutcome> {
        self.outcomes.iter().find(|o| o.component == component)
    }

    /// Every failed event across components.
    pub fn failures(&self) -> impl Iterator<Item = (&str, &EventFailure)> {
        self.outcomes
            .iter()
            .flat_map(|o| o.failed.iter().map(move |f| (o.component.as_str(), f)))
    }

    pub fn samples_for<'a>(&'a self, component: &'a str) -> impl Iterator<Item = &'a Sample> + 'a {
        self.samples.iter().filter(move |s| s.component == component)
    }

    pub fn to_json(&self) -> FlowResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write the report as JSON, creating parent directories as needed.
    pub fn save(&self, path: impl AsRef<Path>) -> FlowResult<()> {
        let json = self.to_json()?;
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> FlowResult<Self> {
        let json = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}
