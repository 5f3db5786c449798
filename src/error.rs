//! Error types for the procedure compiler and execution engine.
//!
//! Errors are grouped by the stage that raises them:
//!
//! - **`ValidationError`**: structural problems in an apparatus, or an
//!   assignment that does not match a component's declared schema. Always
//!   surfaced to the caller, never retried.
//! - **`CompileError`**: everything that aborts compilation. Wraps
//!   `DurationError`, `RangeError`, `ConflictError` and validation failures
//!   annotated with the entry that caused them. No partial schedule is ever
//!   returned.
//! - **`DriverError`**: a hardware call failed at execution time. Contained to
//!   the component it happened on and aggregated into the run report.
//! - **`ExecutionError`**: the executor could not start a run at all.
//! - **`CancellationError`**: a cooperative stop. Recorded in the run report,
//!   not treated as a failure.
//!
//! `FlowError` consolidates all of them so application code can use `?`
//! across stages.

use crate::apparatus::{Bounds, ParamKind, ParamValue};
use crate::protocol::EntryId;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the umbrella error type.
pub type FlowResult<T> = std::result::Result<T, FlowError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Duplicate component name '{name}'")]
    DuplicateComponent { name: String },

    #[error("Unknown component '{name}'")]
    UnknownComponent { name: String },

    #[error("Component '{component}' declares parameter '{parameter}' more than once")]
    DuplicateParameter { component: String, parameter: String },

    #[error("Tube {from} -> {to} references missing component '{missing}'")]
    DanglingTube {
        from: String,
        to: String,
        missing: String,
    },

    #[error("Tube connects component '{component}' to itself")]
    SelfLoop { component: String },

    #[error("Tube {from} -> {to} is invalid: {reason}")]
    InvalidTube {
        from: String,
        to: String,
        reason: String,
    },

    #[error("Component '{name}' is not connected to anything")]
    IsolatedComponent { name: String },

    #[error("Component '{component}' is not reachable from any entry point")]
    Unreachable { component: String },

    #[error("Component '{component}' has no parameter '{parameter}'")]
    UnknownParameter { component: String, parameter: String },

    #[error("Parameter '{component}.{parameter}' expects {expected}, got {found}")]
    TypeMismatch {
        component: String,
        parameter: String,
        expected: ParamKind,
        found: ParamKind,
    },

    #[error("Value {value} for '{component}.{parameter}' is outside {bounds}")]
    OutOfBounds {
        component: String,
        parameter: String,
        value: ParamValue,
        bounds: Bounds,
    },

    #[error("Procedure on '{component}' assigns no parameters")]
    EmptyAssignment { component: String },

    #[error("Procedure on '{component}' gives both a stop time and a duration")]
    AmbiguousStop { component: String },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DurationError {
    #[error("Continuous {entry} requires an explicit protocol duration")]
    ContinuousWithoutDuration { entry: EntryId },

    #[error("Unable to infer protocol duration: no procedure has a stop time")]
    CannotInfer,

    #[error("Protocol duration must be greater than zero when continuous procedures are present")]
    ZeroWithContinuous,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RangeError {
    #[error("{entry} starts at {start:?}, after its stop at {stop:?}")]
    StartAfterStop {
        entry: EntryId,
        start: Duration,
        stop: Duration,
    },

    #[error("{entry} stops at {stop:?}, beyond the protocol duration {duration:?}")]
    ExceedsDuration {
        entry: EntryId,
        stop: Duration,
        duration: Duration,
    },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConflictError {
    #[error(
        "Conflicting writes to '{component}.{parameter}' at {offset:?}: \
         {first} sets {first_value}, {second} sets {second_value}"
    )]
    ConcurrentWrite {
        component: String,
        parameter: String,
        offset: Duration,
        first: EntryId,
        first_value: ParamValue,
        second: EntryId,
        second_value: ParamValue,
    },

    #[error("Component '{component}' has two continuous procedures ({first} and {second})")]
    DuplicateContinuous {
        component: String,
        first: EntryId,
        second: EntryId,
    },

    #[error("Windows of {first} and {second} overlap on '{component}.{parameter}'")]
    OverlappingWindows {
        component: String,
        parameter: String,
        first: EntryId,
        second: EntryId,
    },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompileError {
    #[error(transparent)]
    Duration(#[from] DurationError),

    #[error(transparent)]
    Range(#[from] RangeError),

    #[error(transparent)]
    Conflict(#[from] ConflictError),

    #[error("Invalid apparatus: {0}")]
    Apparatus(ValidationError),

    #[error("Schedule validation failed for {entry}: {source}")]
    Validation {
        entry: EntryId,
        #[source]
        source: ValidationError,
    },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DriverError {
    #[error("Device fault: {0}")]
    Fault(String),

    #[error("Driver call exceeded deadline of {0:?}")]
    Timeout(Duration),

    #[error("Operation not supported: {0}")]
    Unsupported(String),

    #[error("Device rejected '{parameter}': {reason}")]
    Rejected { parameter: String, reason: String },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutionError {
    #[error("No driver registered for component '{component}'")]
    MissingDriver { component: String },

    #[error("Executor is already running a schedule")]
    AlreadyRunning,
}

/// Cooperative stop of a run.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("Run cancelled ({dropped_events} pending events dropped){}", .reason.as_ref().map(|r| format!(": {r}")).unwrap_or_default())]
pub struct CancellationError {
    pub reason: Option<String>,
    pub dropped_events: usize,
}

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Compile error: {0}")]
    Compile(#[from] CompileError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("Document error: {0}")]
    Document(#[from] toml::de::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for FlowError {
    fn from(value: figment::Error) -> Self {
        FlowError::Config(Box::new(value))
    }
}

impl CompileError {
    /// Entry responsible for the failure, when one can be named.
    pub fn entry(&self) -> Option<EntryId> {
        match self {
            CompileError::Duration(DurationError::ContinuousWithoutDuration { entry }) => {
                Some(*entry)
            }
            CompileError::Range(RangeError::StartAfterStop { entry, .. })
            | CompileError::Range(RangeError::ExceedsDuration { entry, .. }) => Some(*entry),
            CompileError::Conflict(ConflictError::ConcurrentWrite { second, .. })
            | CompileError::Conflict(ConflictError::DuplicateContinuous { second, .. })
            | CompileError::Conflict(ConflictError::OverlappingWindows { second, .. }) => {
                Some(*second)
            }
            CompileError::Validation { entry, .. } => Some(*entry),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_error_names_offending_entry() {
        let err = CompileError::from(RangeError::StartAfterStop {
            entry: EntryId(3),
            start: Duration::from_secs(5),
            stop: Duration::from_secs(2),
        });
        assert_eq!(err.entry(), Some(EntryId(3)));
        assert!(err.to_string().contains("entry #3"));
    }

    #[test]
    fn cancellation_message_includes_reason() {
        let err = CancellationError {
            reason: Some("operator stop".into()),
            dropped_events: 4,
        };
        assert_eq!(
            err.to_string(),
            "Run cancelled (4 pending events dropped): operator stop"
        );
    }

    #[test]
    fn validation_converts_into_flow_error() {
        let err: FlowError = ValidationError::UnknownComponent {
            name: "pump".into(),
        }
        .into();
        assert!(matches!(err, FlowError::Validation(_)));
        assert_eq!(err.to_string(), "Validation error: Unknown component 'pump'");
    }
}
