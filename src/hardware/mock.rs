//! Mock drivers for dry runs and tests.
//!
//! [`MockDriver`] stands in for any component kind. It records every
//! assignment it receives, can take simulated time per call, and can be told
//! to fail on chosen calls to exercise the executor's fault containment.
//!
//! Behaviour by kind (see [`MockDriver::for_component`]):
//!
//! - Pump: safe state is zero flow
//! - Sensor: samples a noisy baseline signal
//! - TempControl: samples the current setpoint with noise, safe state is off
//! - everything else: apply only
//!
//! Mocks built for a component reject parameters it does not declare.
//!
//! All waiting uses `tokio::time::sleep`, so paused-time tests stay
//! deterministic.

use crate::apparatus::{Component, ComponentKind, ParamValue, ParameterMap};
use crate::error::DriverError;
use crate::hardware::driver::{ComponentDriver, Reading};
use async_trait::async_trait;
use rand::Rng;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Clone)]
enum SampleSource {
    /// Baseline with ±1% relative noise
    Baseline { value: f64, unit: String },
    /// Current value of a numeric parameter with absolute noise
    Parameter { name: String, noise: f64, unit: String },
}

/// Simulated device.
///
/// # Example
///
/// ```
/// use rust_flow::apparatus::{ParamValue, ParameterMap};
/// use rust_flow::hardware::{ComponentDriver, MockDriver};
///
/// # tokio_test::block_on(async {
/// let pump = MockDriver::new("pump").fail_on_call(2);
/// let assignment = ParameterMap::from([("rate".to_string(), ParamValue::Float(5.0))]);
/// assert!(pump.apply(&assignment).await.is_ok());
/// assert!(pump.apply(&assignment).await.is_err());
/// assert_eq!(pump.history().await.len(), 1);
/// # })
/// ```
#[derive(Debug)]
pub struct MockDriver {
    name: String,
    state: Arc<RwLock<ParameterMap>>,
    history: Arc<RwLock<Vec<ParameterMap>>>,
    calls: AtomicUsize,
    fail_on: BTreeSet<usize>,
    fail_always: bool,
    latency: Duration,
    sampling: Option<SampleSource>,
    safe_state: Option<ParameterMap>,
    /// Accepted parameter names; `None` accepts anything
    accepts: Option<BTreeSet<String>>,
}

impl MockDriver {
    /// Apply-only mock with an empty state.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(RwLock::new(ParameterMap::new())),
            history: Arc::new(RwLock::new(Vec::new())),
            calls: AtomicUsize::new(0),
            fail_on: BTreeSet::new(),
            fail_always: false,
            latency: Duration::ZERO,
            sampling: None,
            safe_state: None,
            accepts: None,
        }
    }

    /// Mock matching a component's kind, starting from its declared defaults.
    pub fn for_component(component: &Component) -> Self {
        let base_state = component.base_state();
        let mut mock = Self::new(&component.name);
        mock.accepts = Some(base_state.keys().cloned().collect());
        mock.state = Arc::new(RwLock::new(base_state));
        match component.kind {
            ComponentKind::Pump => {
                mock = mock.with_safe_state(ParameterMap::from([(
                    "rate".to_string(),
                    ParamValue::Float(0.0),
                )]));
            }
            ComponentKind::Sensor => {
                mock = mock.with_sampling(0.5, "AU");
            }
            ComponentKind::TempControl => {
                mock.sampling = Some(SampleSource::Parameter {
                    name: "temp".to_string(),
                    noise: 0.5,
                    unit: "degC".to_string(),
                });
                mock = mock.with_safe_state(ParameterMap::from([(
                    "active".to_string(),
                    ParamValue::Boolean(false),
                )]));
            }
            _ => {}
        }
        mock
    }

    /// Simulated time taken by each `apply`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Fail the `n`th call to `apply` (1-based).
    pub fn fail_on_call(mut self, n: usize) -> Self {
        self.fail_on.insert(n);
        self
    }

    /// Fail every call to `apply`.
    pub fn fail_always(mut self) -> Self {
        self.fail_always = true;
        self
    }

    /// Enable sampling around a fixed baseline.
    pub fn with_sampling(mut self, baseline: f64, unit: impl Into<String>) -> Self {
        self.sampling = Some(SampleSource::Baseline {
            value: baseline,
            unit: unit.into(),
        });
        self
    }

    /// Assignment sent when a run is cancelled.
    pub fn with_safe_state(mut self, safe_state: ParameterMap) -> Self {
        self.safe_state = Some(safe_state);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current parameter values.
    pub async fn state(&self) -> ParameterMap {
        self.state.read().await.clone()
    }

    /// Every assignment accepted so far, oldest first.
    pub async fn history(&self) -> Vec<ParameterMap> {
        self.history.read().await.clone()
    }

    /// Number of `apply` calls, including failed ones.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ComponentDriver for MockDriver {
    async fn apply(&self, parameters: &ParameterMap) -> Result<(), DriverError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if self.fail_always || self.fail_on.contains(&call) {
            debug!(device = %self.name, call, "Injected fault");
            return Err(DriverError::Fault(format!(
                "{}: injected fault on call {call}",
                self.name
            )));
        }
        if let Some(accepts) = &self.accepts {
            if let Some(unknown) = parameters.keys().find(|name| !accepts.contains(*name)) {
                return Err(DriverError::Rejected {
                    parameter: unknown.clone(),
                    reason: format!("{} has no such parameter", self.name),
                });
            }
        }

        let mut state = self.state.write().await;
        for (name, value) in parameters {
            state.insert(name.clone(), value.clone());
        }
        self.history.write().await.push(parameters.clone());
        debug!(device = %self.name, call, ?parameters, "Applied");
        Ok(())
    }

    fn supports_sampling(&self) -> bool {
        self.sampling.is_some()
    }

    async fn sample(&self) -> Result<Reading, DriverError> {
        match &self.sampling {
            Some(SampleSource::Baseline { value, unit }) => {
                let noise = rand::thread_rng().gen_range(-0.01..0.01);
                Ok(Reading::new(value * (1.0 + noise)).with_unit(unit.clone()))
            }
            Some(SampleSource::Parameter { name, noise, unit }) => {
                let current = self
                    .state
                    .read()
                    .await
                    .get(name)
                    .and_then(ParamValue::as_f64)
                    .ok_or_else(|| {
                        DriverError::Fault(format!("{}: no numeric '{name}' to read", self.name))
                    })?;
                let jitter = rand::thread_rng().gen_range(-*noise..*noise);
                Ok(Reading::new(current + jitter).with_unit(unit.clone()))
            }
            None => Err(DriverError::Unsupported(format!(
                "{} does not sample",
                self.name
            ))),
        }
    }

    fn safe_state(&self) -> Option<ParameterMap> {
        self.safe_state.clone()
    }
}
