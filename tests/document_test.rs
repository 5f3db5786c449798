//! Experiment files shipped under `demos/`, loaded, compiled and dry-run.

use rust_flow::document::ExperimentDocument;
use rust_flow::executor::{Executor, RunStatus, SimulatedClock};
use rust_flow::hardware::DriverRegistry;
use rust_flow::naming::NameAllocator;
use rust_flow::protocol::{EventKind, Protocol};
use rust_flow::validation::validate_apparatus;
use rust_flow::ParamValue;
use std::sync::Arc;
use std::time::Duration;

fn load(name: &str) -> Protocol {
    let path = format!("{}/demos/{name}", env!("CARGO_MANIFEST_DIR"));
    let document = ExperimentDocument::load(&path).unwrap();
    let apparatus = Arc::new(document.apparatus(&mut NameAllocator::for_apparatus()));
    validate_apparatus(&apparatus).unwrap();
    document
        .protocol(apparatus, &mut NameAllocator::for_protocols())
        .unwrap()
}

#[test]
fn uv_monitor_compiles_to_four_events() {
    let schedule = load("uv_monitor.toml").compile().unwrap();
    assert_eq!(schedule.len(), 4);
    assert_eq!(schedule.span(), Duration::from_secs(10));
    assert_eq!(schedule.continuous_windows().len(), 1);
}

#[test]
fn peptide_synthesis_switches_the_selector_without_restores() {
    let protocol = load("peptide_synthesis.toml");
    assert_eq!(protocol.description.as_deref(), Some("Activate, couple, wash"));

    let schedule = protocol.compile().unwrap();
    let selector: Vec<(u64, ParamValue)> = schedule
        .events_for("selector")
        .map(|e| (e.offset.as_secs(), e.parameters["setting"].clone()))
        .collect();
    assert_eq!(
        selector,
        vec![
            (0, ParamValue::from("activator")),
            (30, ParamValue::from("amino_acid")),
            (120, ParamValue::from("wash")),
            (180, ParamValue::from("amino_acid")),
        ]
    );

    let reactor_on = schedule.events_for("reactor").next().unwrap();
    assert_eq!(reactor_on.parameters["active"], ParamValue::Boolean(true));
    assert_eq!(reactor_on.kind, EventKind::Set);

    let pump_off = schedule.events_for("pump").last().unwrap();
    assert_eq!(pump_off.offset, Duration::from_secs(150));
    assert_eq!(pump_off.parameters["rate"], ParamValue::Float(0.0));
}

#[tokio::test]
async fn peptide_synthesis_dry_run() {
    let protocol = load("peptide_synthesis.toml");
    let schedule = protocol.compile().unwrap();
    let drivers = DriverRegistry::simulated(protocol.apparatus());

    let report = Executor::default()
        .execute(schedule, &drivers, Arc::new(SimulatedClock::new()))
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.samples_for("ir").count(), 180);
    assert!(report.outcomes.iter().all(|o| o.failed.is_empty()));
}

#[tokio::test]
async fn dry_runs_report_the_same_events() {
    let protocol = load("uv_monitor.toml");
    let schedule = protocol.compile().unwrap();
    let drivers = DriverRegistry::simulated(protocol.apparatus());

    let mut runs = Vec::new();
    for _ in 0..2 {
        let report = Executor::default()
            .execute(schedule.clone(), &drivers, Arc::new(SimulatedClock::new()))
            .await
            .unwrap();
        runs.push(report.events);
    }

    assert!(runs[0].iter().all(|e| e.elapsed.is_none()));
    assert_eq!(runs[0], runs[1]);
}
