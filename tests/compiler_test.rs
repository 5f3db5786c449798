//! Protocol compilation through the public API.

use rust_flow::apparatus::{ApparatusGraph, Component, ParamValue, ParameterMap, Tube};
use rust_flow::error::{CompileError, ConflictError, DurationError};
use rust_flow::protocol::{
    CompilerOptions, ContinuousEntry, EntryId, EventKind, OverlapPolicy, ProcedureEntry,
    Protocol, ProtocolCompiler,
};
use std::sync::Arc;
use std::time::Duration;

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

fn apparatus() -> Arc<ApparatusGraph> {
    let mut apparatus = ApparatusGraph::new("uv_monitor");
    apparatus
        .add_component(Component::pump("pump", 10.0))
        .add_component(Component::sensor("uv"));
    apparatus.connect("pump", "uv", Tube::new(500.0, 0.8, 1.6, "PFA"));
    Arc::new(apparatus)
}

fn uv_monitor() -> Protocol {
    let mut protocol = Protocol::new("uv_monitor", apparatus()).with_duration(secs(10));
    protocol
        .add(ProcedureEntry::new("pump").set("rate", 5).start(secs(0)).stop(secs(5)))
        .unwrap();
    protocol
        .add_continuous(ContinuousEntry::new("uv").set("sampling", true))
        .unwrap();
    protocol
}

fn one(name: &str, value: impl Into<ParamValue>) -> ParameterMap {
    ParameterMap::from([(name.to_string(), value.into())])
}

#[test]
fn pump_and_sensor_schedule() {
    let schedule = uv_monitor().compile().unwrap();

    let events: Vec<(u64, &str, &ParameterMap, EventKind)> = schedule
        .events()
        .iter()
        .map(|e| (e.offset.as_secs(), e.component.as_str(), &e.parameters, e.kind))
        .collect();
    assert_eq!(
        events,
        vec![
            (0, "pump", &one("rate", 5.0), EventKind::Set),
            (0, "uv", &one("sampling", true), EventKind::ContinuousStart),
            (5, "pump", &one("rate", 0.0), EventKind::Set),
            (10, "uv", &one("sampling", false), EventKind::ContinuousStop),
        ]
    );
    assert_eq!(schedule.span(), secs(10));
    assert_eq!(schedule.protocol, "uv_monitor");
}

#[test]
fn compilation_is_deterministic() {
    let protocol = uv_monitor();
    let first = protocol.compile().unwrap();
    let second = protocol.compile().unwrap();
    assert_eq!(first, second);
    assert_eq!(first.fingerprint(), second.fingerprint());
    assert_eq!(first.to_json().unwrap(), second.to_json().unwrap());
}

#[test]
fn schedule_offsets_never_decrease() {
    let mut protocol = uv_monitor();
    protocol
        .add(ProcedureEntry::new("pump").set("rate", 2.0).start(secs(7)).lasting(secs(2)))
        .unwrap();
    protocol
        .add(ProcedureEntry::new("pump").set("rate", 8.0).start(secs(1)).stop(secs(3)))
        .unwrap();

    let schedule = protocol.compile().unwrap();
    assert!(schedule
        .events()
        .windows(2)
        .all(|pair| pair[0].offset <= pair[1].offset));
    assert!(schedule.events().iter().all(|e| e.offset <= schedule.span()));
}

#[test]
fn colliding_writes_name_both_entries() {
    let mut protocol = Protocol::new("clash", apparatus());
    let outer = protocol
        .add(ProcedureEntry::new("pump").set("rate", 5.0).stop(secs(5)))
        .unwrap();
    let inner = protocol
        .add(ProcedureEntry::new("pump").set("rate", 7.0).start(secs(3)).stop(secs(5)))
        .unwrap();

    // Both procedures end at 5s and restore different values there
    match protocol.compile() {
        Err(CompileError::Conflict(ConflictError::ConcurrentWrite {
            component,
            parameter,
            offset,
            first,
            second,
            ..
        })) => {
            assert_eq!(component, "pump");
            assert_eq!(parameter, "rate");
            assert_eq!(offset, secs(5));
            assert_eq!((first, second), (outer, inner));
        }
        other => panic!("expected a conflict, got {other:?}"),
    }
}

#[test]
fn same_start_with_different_values_conflicts() {
    let mut protocol = Protocol::new("clash", apparatus());
    protocol
        .add_each(
            ["pump"],
            ProcedureEntry::new("pump").set("rate", 1.0).start(secs(2)).stop(secs(4)),
        )
        .unwrap();
    protocol
        .add(ProcedureEntry::new("pump").set("rate", 3.0).start(secs(2)).stop(secs(4)))
        .unwrap();

    let err = protocol.compile().unwrap_err();
    assert!(err.to_string().contains("pump.rate"));
    assert_eq!(err.entry(), Some(EntryId(1)));
}

#[test]
fn continuous_entries_need_a_declared_duration() {
    let mut protocol = Protocol::new("open", apparatus());
    protocol
        .add(ProcedureEntry::new("pump").set("rate", 5.0).stop(secs(5)))
        .unwrap();
    let continuous = protocol
        .add_continuous(ContinuousEntry::new("uv").set("sampling", true))
        .unwrap();

    assert_eq!(
        protocol.compile(),
        Err(CompileError::Duration(
            DurationError::ContinuousWithoutDuration { entry: continuous }
        ))
    );
}

#[test]
fn strictness_is_configurable() {
    let mut protocol = Protocol::new("overlap", apparatus());
    protocol
        .add(ProcedureEntry::new("pump").set("rate", 5.0).stop(secs(6)))
        .unwrap();
    protocol
        .add(ProcedureEntry::new("pump").set("rate", 8.0).start(secs(4)).stop(secs(9)))
        .unwrap();

    let lenient = ProtocolCompiler::default().compile(&protocol).unwrap();
    assert_eq!(lenient.events_for("pump").count(), 4);

    let strict = ProtocolCompiler::new(CompilerOptions {
        overlap_policy: OverlapPolicy::Reject,
    });
    assert!(matches!(
        strict.compile(&protocol),
        Err(CompileError::Conflict(ConflictError::OverlappingWindows { .. }))
    ));
}
