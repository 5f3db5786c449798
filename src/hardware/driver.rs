//! Driver capability consumed by the executor.
//!
//! Any device that can take a parameter assignment is schedulable. Sampling
//! and a device-specific safe state are optional capabilities with
//! conservative defaults, so a minimal driver only implements [`apply`].
//!
//! # Thread Safety
//!
//! Methods take `&self`; drivers keep their state behind interior
//! mutability. The executor never calls into one device concurrently (see
//! [`super::registry::DriverHandle`]), but drivers must still be
//! `Send + Sync` to move across worker tasks.
//!
//! [`apply`]: ComponentDriver::apply

use crate::apparatus::ParameterMap;
use crate::error::DriverError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A single sensor reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl Reading {
    pub fn new(value: f64) -> Self {
        Self { value, unit: None }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }
}

/// Runtime adapter between the executor and one device.
#[async_trait]
pub trait ComponentDriver: Send + Sync {
    /// Apply a parameter assignment.
    ///
    /// Only the parameters present in the map change; the rest keep their
    /// current values.
    async fn apply(&self, parameters: &ParameterMap) -> Result<(), DriverError>;

    /// Whether [`sample`](Self::sample) is implemented.
    fn supports_sampling(&self) -> bool {
        false
    }

    /// Take one reading.
    async fn sample(&self) -> Result<Reading, DriverError> {
        Err(DriverError::Unsupported("sampling".to_string()))
    }

    /// Assignment that puts the device in a safe state, if it has its own
    /// notion of one. `None` falls back to the component's declared defaults.
    fn safe_state(&self) -> Option<ParameterMap> {
        None
    }
}
