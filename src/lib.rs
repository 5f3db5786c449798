//! # Rust Flow Core Library
//!
//! Procedure compiler and real-time execution engine for flow-chemistry
//! apparatus. A graph of connected devices (pumps, valves, sensors,
//! temperature controllers) is driven through a time-ordered set of
//! procedures against real or simulated hardware.
//!
//! ## Data Flow
//!
//! ```text
//! ApparatusGraph ─ validate ─┐
//!                            ├─> ProtocolCompiler ─> ExecutionSchedule ─> Executor ─> RunReport
//! Protocol (entries) ────────┘                                              │
//!                                                          DriverRegistry + Clock
//! ```
//!
//! ## Crate Structure
//!
//! - **`apparatus`**: components with declared parameter schemas, tubes, and
//!   the graph that connects them.
//! - **`validation`**: structural checks on apparatus and compiled schedules.
//! - **`protocol`**: procedure and continuous entries, the compiler, and the
//!   immutable `ExecutionSchedule` it produces.
//! - **`hardware`**: the `ComponentDriver` capability, the driver registry,
//!   and mock drivers for dry runs.
//! - **`executor`**: per-component dispatch workers, samplers, clocks,
//!   cooperative cancellation, and run reports.
//! - **`document`**: TOML experiment files describing an apparatus and a
//!   protocol together.
//! - **`config`**: Figment-based settings (`RUST_FLOW_` environment overrides).
//! - **`telemetry`**: `tracing` subscriber setup.
//! - **`naming`**: caller-owned default name allocation.
//! - **`error`**: error taxonomy and the `FlowError` umbrella type.

pub mod apparatus;
pub mod config;
pub mod document;
pub mod error;
pub mod executor;
pub mod hardware;
pub mod naming;
pub mod protocol;
pub mod telemetry;
pub mod validation;

pub use apparatus::{ApparatusGraph, Component, ParamValue, ParameterMap, ParameterSpec, Tube};
pub use error::{FlowError, FlowResult};
pub use executor::{Executor, ExecutorOptions, RunReport, RunStatus};
pub use protocol::{
    compile, ContinuousEntry, EntryId, ExecutionSchedule, ProcedureEntry, Protocol,
    ProtocolCompiler,
};
