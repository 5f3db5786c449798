//! Protocol compiler.
//!
//! Turns the declarative entries of a [`Protocol`] into an
//! [`ExecutionSchedule`]:
//!
//! 1. resolve the protocol duration (explicit, or the latest explicit stop)
//! 2. resolve open stops and check every window lies within the duration
//! 3. expand continuous entries into start/stop event pairs
//! 4. expand procedures into a set event plus a restoring event at the stop
//! 5. order events by offset, ties by declaration order
//! 6. validate the schedule against the apparatus
//! 7. reject simultaneous writes of different values to one parameter
//!
//! Compilation is pure and deterministic: the same protocol always yields an
//! identical schedule.

use super::schedule::{Event, EventKind, ExecutionSchedule};
use super::{ContinuousEntry, EntryId, ProcedureEntry, Protocol, ProtocolEntry};
use crate::apparatus::{ApparatusGraph, ParamValue, ParameterMap};
use crate::error::{CompileError, ConflictError, DurationError, RangeError};
use crate::validation::{validate_apparatus, validate_schedule};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;
use tracing::{debug, info, warn};

/// How to treat procedures on one component whose windows overlap without
/// colliding at an exact instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlapPolicy {
    /// Accept; later writes win in time order
    #[default]
    LastWriteWins,
    /// Reject any overlap that shares a parameter
    Reject,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompilerOptions {
    #[serde(default)]
    pub overlap_policy: OverlapPolicy,
}

/// Compiles protocols with a fixed set of options.
#[derive(Debug, Clone, Default)]
pub struct ProtocolCompiler {
    options: CompilerOptions,
}

/// Compile with default options.
pub fn compile(protocol: &Protocol) -> Result<ExecutionSchedule, CompileError> {
    ProtocolCompiler::default().compile(protocol)
}

/// A procedure with its stop resolved.
#[derive(Debug, Clone, Copy)]
struct Window<'a> {
    id: EntryId,
    component: &'a str,
    parameters: &'a ParameterMap,
    start: Duration,
    stop: Duration,
}

impl ProtocolCompiler {
    pub fn new(options: CompilerOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &CompilerOptions {
        &self.options
    }

    pub fn compile(&self, protocol: &Protocol) -> Result<ExecutionSchedule, CompileError> {
        let apparatus = protocol.apparatus().as_ref();
        validate_apparatus(apparatus).map_err(CompileError::Apparatus)?;

        let procedures: Vec<(EntryId, &ProcedureEntry)> = protocol
            .entries()
            .filter_map(|(id, entry)| match entry {
                ProtocolEntry::Procedure(p) => Some((id, p)),
                ProtocolEntry::Continuous(_) => None,
            })
            .collect();
        let continuous: Vec<(EntryId, &ContinuousEntry)> = protocol
            .entries()
            .filter_map(|(id, entry)| match entry {
                ProtocolEntry::Continuous(c) => Some((id, c)),
                ProtocolEntry::Procedure(_) => None,
            })
            .collect();

        let duration = resolve_duration(protocol.duration(), &procedures, &continuous)?;
        let windows = resolve_windows(&procedures, duration)?;
        check_continuous(&continuous)?;
        if self.options.overlap_policy == OverlapPolicy::Reject {
            check_overlaps(&windows, &continuous, duration)?;
        }

        let mut events = expand_continuous(apparatus, &continuous, duration);
        events.extend(expand_procedures(apparatus, &windows, &continuous, duration));
        events.sort_by_key(|e| (e.offset, e.origin));

        let base_states: BTreeMap<String, ParameterMap> = apparatus
            .active_components()
            .map(|c| (c.name.clone(), c.base_state()))
            .collect();
        let schedule = ExecutionSchedule::new(protocol.name.clone(), events, duration, base_states);

        validate_schedule(&schedule, apparatus)
            .map_err(|(entry, source)| CompileError::Validation { entry, source })?;
        detect_conflicts(&schedule)?;

        let used = schedule.components();
        for idle in apparatus
            .active_components()
            .filter(|c| !used.contains(c.name.as_str()))
        {
            warn!(protocol = %protocol.name, component = %idle.name, "Component has no procedures");
        }

        info!(
            protocol = %protocol.name,
            entries = protocol.len(),
            events = schedule.len(),
            duration_ms = duration.as_millis() as u64,
            "Protocol compiled"
        );
        Ok(schedule)
    }
}

fn resolve_duration(
    explicit: Option<Duration>,
    procedures: &[(EntryId, &ProcedureEntry)],
    continuous: &[(EntryId, &ContinuousEntry)],
) -> Result<Duration, DurationError> {
    if let Some(&(first, _)) = continuous.first() {
        return match explicit {
            None => Err(DurationError::ContinuousWithoutDuration { entry: first }),
            Some(d) if d.is_zero() => Err(DurationError::ZeroWithContinuous),
            Some(d) => Ok(d),
        };
    }
    if let Some(d) = explicit {
        return Ok(d);
    }
    let inferred = procedures
        .iter()
        .filter_map(|(_, p)| p.stop)
        .max()
        .ok_or(DurationError::CannotInfer)?;
    debug!(duration_ms = inferred.as_millis() as u64, "Inferred protocol duration");
    Ok(inferred)
}

fn resolve_windows<'a>(
    procedures: &[(EntryId, &'a ProcedureEntry)],
    duration: Duration,
) -> Result<Vec<Window<'a>>, RangeError> {
    procedures
        .iter()
        .map(|&(id, p)| {
            let stop = match p.stop {
                Some(stop) => stop,
                None => {
                    let inferred = procedures
                        .iter()
                        .filter(|(_, other)| other.component == p.component && other.start > p.start)
                        .map(|(_, other)| other.start)
                        .min()
                        .unwrap_or(duration);
                    debug!(
                        entry = %id,
                        component = %p.component,
                        stop_ms = inferred.as_millis() as u64,
                        "Inferred procedure stop"
                    );
                    inferred
                }
            };
            if p.start > stop {
                return Err(RangeError::StartAfterStop {
                    entry: id,
                    start: p.start,
                    stop,
                });
            }
            if stop > duration {
                return Err(RangeError::ExceedsDuration {
                    entry: id,
                    stop,
                    duration,
                });
            }
            Ok(Window {
                id,
                component: &p.component,
                parameters: &p.parameters,
                start: p.start,
                stop,
            })
        })
        .collect()
}

fn check_continuous(continuous: &[(EntryId, &ContinuousEntry)]) -> Result<(), ConflictError> {
    let mut seen: HashMap<&str, EntryId> = HashMap::new();
    for &(id, entry) in continuous {
        if let Some(&first) = seen.get(entry.component.as_str()) {
            return Err(ConflictError::DuplicateContinuous {
                component: entry.component.clone(),
                first,
                second: id,
            });
        }
        seen.insert(&entry.component, id);
    }
    Ok(())
}

/// Strict mode: no two windows on a component may overlap on a parameter.
fn check_overlaps<'a>(
    windows: &[Window<'a>],
    continuous: &[(EntryId, &'a ContinuousEntry)],
    duration: Duration,
) -> Result<(), ConflictError> {
    let mut spans = windows.to_vec();
    spans.extend(continuous.iter().map(|&(id, c)| Window {
        id,
        component: &c.component,
        parameters: &c.parameters,
        start: Duration::ZERO,
        stop: duration,
    }));
    spans.sort_by_key(|w| w.id);

    for (i, a) in spans.iter().enumerate() {
        for b in &spans[i + 1..] {
            if a.component != b.component || !(a.start < b.stop && b.start < a.stop) {
                continue;
            }
            if let Some(shared) = a.parameters.keys().find(|k| b.parameters.contains_key(*k)) {
                return Err(ConflictError::OverlappingWindows {
                    component: a.component.to_string(),
                    parameter: shared.clone(),
                    first: a.id,
                    second: b.id,
                });
            }
        }
    }
    Ok(())
}

/// Release assignment of a continuous entry: declared defaults of the
/// parameters it holds.
fn release(apparatus: &ApparatusGraph, entry: &ContinuousEntry) -> ParameterMap {
    entry
        .parameters
        .keys()
        .filter_map(|name| {
            apparatus
                .component(&entry.component)
                .and_then(|c| c.default_of(name))
                .map(|default| (name.clone(), default.clone()))
        })
        .collect()
}

fn expand_continuous(
    apparatus: &ApparatusGraph,
    continuous: &[(EntryId, &ContinuousEntry)],
    duration: Duration,
) -> Vec<Event> {
    continuous
        .iter()
        .flat_map(|&(id, entry)| {
            [
                Event {
                    offset: Duration::ZERO,
                    component: entry.component.clone(),
                    parameters: entry.parameters.clone(),
                    kind: EventKind::ContinuousStart,
                    origin: id,
                },
                Event {
                    offset: duration,
                    component: entry.component.clone(),
                    parameters: release(apparatus, entry),
                    kind: EventKind::ContinuousStop,
                    origin: id,
                },
            ]
        })
        .collect()
}

/// Set and restore events for every procedure.
///
/// Components are replayed one at a time in (start, declaration) order to
/// learn each parameter's value just before a procedure starts. A restore is
/// left out for parameters that another procedure sets at the stop instant,
/// or that a continuous entry releases there. Zero-length procedures are
/// step changes and get no restore.
fn expand_procedures(
    apparatus: &ApparatusGraph,
    windows: &[Window<'_>],
    continuous: &[(EntryId, &ContinuousEntry)],
    duration: Duration,
) -> Vec<Event> {
    let mut by_component: BTreeMap<&str, Vec<&Window<'_>>> = BTreeMap::new();
    for window in windows {
        by_component.entry(window.component).or_default().push(window);
    }

    let mut events = Vec::new();
    for (component, mut group) in by_component {
        group.sort_by_key(|w| (w.start, w.id));

        let mut state: BTreeMap<String, ParamValue> = apparatus
            .component(component)
            .map(|c| c.base_state())
            .unwrap_or_default();
        let mut held: BTreeSet<&str> = BTreeSet::new();
        for (_, entry) in continuous.iter().filter(|(_, c)| c.component == component) {
            for (name, value) in &entry.parameters {
                state.insert(name.clone(), value.clone());
                held.insert(name.as_str());
            }
        }

        let mut pending: Vec<(Duration, EntryId, ParameterMap)> = Vec::new();
        for window in &group {
            apply_due(&mut pending, &mut state, window.start);

            let before: ParameterMap = window
                .parameters
                .keys()
                .filter_map(|name| state.get(name).map(|v| (name.clone(), v.clone())))
                .collect();
            for (name, value) in window.parameters {
                state.insert(name.clone(), value.clone());
            }

            events.push(Event {
                offset: window.start,
                component: component.to_string(),
                parameters: window.parameters.clone(),
                kind: EventKind::Set,
                origin: window.id,
            });

            if window.stop == window.start {
                continue;
            }
            let restore: ParameterMap = before
                .into_iter()
                .filter(|(name, _)| {
                    let overridden = group
                        .iter()
                        .any(|other| other.start == window.stop && other.parameters.contains_key(name));
                    let released = window.stop == duration && held.contains(name.as_str());
                    !overridden && !released
                })
                .collect();
            if restore.is_empty() {
                continue;
            }
            events.push(Event {
                offset: window.stop,
                component: component.to_string(),
                parameters: restore.clone(),
                kind: EventKind::Set,
                origin: window.id,
            });
            pending.push((window.stop, window.id, restore));
        }
    }
    events
}

/// Apply queued restores that take effect at or before `until`.
fn apply_due(
    pending: &mut Vec<(Duration, EntryId, ParameterMap)>,
    state: &mut BTreeMap<String, ParamValue>,
    until: Duration,
) {
    pending.sort_by_key(|(offset, id, _)| (*offset, *id));
    let due = pending.iter().take_while(|(offset, _, _)| *offset <= until).count();
    for (_, _, restore) in pending.drain(..due) {
        state.extend(restore);
    }
}

/// Two events at one offset writing different values to one parameter.
fn detect_conflicts(schedule: &ExecutionSchedule) -> Result<(), ConflictError> {
    let mut writes: HashMap<(Duration, &str, &str), (EntryId, &ParamValue)> = HashMap::new();
    for event in schedule.events() {
        for (name, value) in &event.parameters {
            let key = (event.offset, event.component.as_str(), name.as_str());
            match writes.get(&key) {
                Some(&(first, first_value)) if first_value != value => {
                    return Err(ConflictError::ConcurrentWrite {
                        component: event.component.clone(),
                        parameter: name.clone(),
                        offset: event.offset,
                        first,
                        first_value: first_value.clone(),
                        second: event.origin,
                        second_value: value.clone(),
                    });
                }
                Some(_) => {}
                None => {
                    writes.insert(key, (event.origin, value));
                }
            }
        }
    }
    Ok(())
}
