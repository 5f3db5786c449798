//! Registry mapping component names to live drivers.
//!
//! Each registered driver is wrapped in a [`DriverHandle`] carrying a
//! per-device async lock. The dispatch worker and the sampler of one
//! component both go through the handle, so they never call into the device
//! at the same time. Call deadlines start once the lock is held; waiting for
//! the device never counts against them.

use crate::apparatus::{ApparatusGraph, ParameterMap};
use crate::error::DriverError;
use crate::hardware::driver::{ComponentDriver, Reading};
use crate::hardware::mock::MockDriver;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::info;

/// Shared, serialised access to one driver.
#[derive(Clone)]
pub struct DriverHandle {
    name: String,
    driver: Arc<dyn ComponentDriver>,
    lock: Arc<Mutex<()>>,
}

impl DriverHandle {
    pub fn new(name: impl Into<String>, driver: Arc<dyn ComponentDriver>) -> Self {
        Self {
            name: name.into(),
            driver,
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Apply an assignment, failing with [`DriverError::Timeout`] if the
    /// driver takes longer than `deadline` once it has the device.
    pub async fn apply(
        &self,
        deadline: Duration,
        parameters: &ParameterMap,
    ) -> Result<(), DriverError> {
        let _guard = self.lock.lock().await;
        bounded(deadline, self.driver.apply(parameters)).await
    }

    /// Take one reading under the same rules as [`DriverHandle::apply`].
    pub async fn sample(&self, deadline: Duration) -> Result<Reading, DriverError> {
        let _guard = self.lock.lock().await;
        bounded(deadline, self.driver.sample()).await
    }

    pub fn supports_sampling(&self) -> bool {
        self.driver.supports_sampling()
    }

    pub fn safe_state(&self) -> Option<ParameterMap> {
        self.driver.safe_state()
    }
}

async fn bounded<T>(
    deadline: Duration,
    call: impl Future<Output = Result<T, DriverError>>,
) -> Result<T, DriverError> {
    timeout(deadline, call)
        .await
        .unwrap_or_else(|_| Err(DriverError::Timeout(deadline)))
}

impl fmt::Debug for DriverHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverHandle")
            .field("name", &self.name)
            .field("sampling", &self.driver.supports_sampling())
            .finish()
    }
}

/// Component name to driver.
#[derive(Debug, Clone, Default)]
pub struct DriverRegistry {
    drivers: BTreeMap<String, DriverHandle>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a driver, returning the one it replaces.
    pub fn register(
        &mut self,
        component: impl Into<String>,
        driver: Arc<dyn ComponentDriver>,
    ) -> Option<DriverHandle> {
        let component = component.into();
        let handle = DriverHandle::new(component.clone(), driver);
        self.drivers.insert(component, handle)
    }

    pub fn unregister(&mut self, component: &str) -> bool {
        self.drivers.remove(component).is_some()
    }

    pub fn get(&self, component: &str) -> Option<&DriverHandle> {
        self.drivers.get(component)
    }

    pub fn contains(&self, component: &str) -> bool {
        self.drivers.contains_key(component)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.drivers.keys().map(String::as_str)
    }

    pub fn handles(&self) -> impl Iterator<Item = &DriverHandle> {
        self.drivers.values()
    }

    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }

    /// A [`MockDriver`] for every parameterised component of an apparatus.
    pub fn simulated(apparatus: &ApparatusGraph) -> Self {
        let mut registry = Self::new();
        for component in apparatus.active_components() {
            registry.register(
                component.name.clone(),
                Arc::new(MockDriver::for_component(component)),
            );
        }
        info!(apparatus = %apparatus.name, drivers = registry.len(), "Simulated drivers registered");
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apparatus::{Component, Tube};

    #[test]
    fn simulated_registry_skips_passive_components() {
        let mut apparatus = ApparatusGraph::new("bench");
        apparatus
            .add_component(Component::vessel("feed"))
            .add_component(Component::pump("pump", 10.0))
            .add_component(Component::sensor("uv"));
        apparatus
            .connect("feed", "pump", Tube::new(100.0, 0.8, 1.6, "PFA"))
            .connect("pump", "uv", Tube::new(100.0, 0.8, 1.6, "PFA"));

        let registry = DriverRegistry::simulated(&apparatus);
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["pump", "uv"]);
        assert!(registry.get("uv").is_some_and(|h| h.supports_sampling()));
        assert!(!registry.contains("feed"));
    }

    #[test]
    fn register_replaces_existing_driver() {
        let mut registry = DriverRegistry::new();
        assert!(registry
            .register("pump", Arc::new(MockDriver::new("a")))
            .is_none());
        assert!(registry
            .register("pump", Arc::new(MockDriver::new("b")))
            .is_some());
        assert_eq!(registry.len(), 1);
        assert!(registry.unregister("pump"));
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn waiting_for_the_device_does_not_count_against_the_deadline() {
        let mock = Arc::new(MockDriver::new("pump").with_latency(Duration::from_millis(600)));
        let handle = DriverHandle::new("pump", mock.clone());
        let busy = handle.lock.clone().lock_owned().await;

        let call = tokio::spawn({
            let handle = handle.clone();
            async move {
                let assignment = ParameterMap::from([(
                    "rate".to_string(),
                    crate::apparatus::ParamValue::Float(1.0),
                )]);
                handle.apply(Duration::from_secs(1), &assignment).await
            }
        });
        tokio::time::sleep(Duration::from_millis(900)).await;
        drop(busy);

        assert_eq!(call.await.unwrap(), Ok(()));
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_call_hits_its_deadline() {
        let handle = DriverHandle::new(
            "pump",
            Arc::new(MockDriver::new("pump").with_latency(Duration::from_secs(3))),
        );
        assert_eq!(
            handle.apply(Duration::from_secs(1), &ParameterMap::new()).await,
            Err(DriverError::Timeout(Duration::from_secs(1)))
        );
    }
}
