//! Hardware abstraction: the driver capability, a registry of live drivers,
//! and mock drivers for dry runs.

pub mod driver;
pub mod mock;
pub mod registry;

pub use driver::{ComponentDriver, Reading};
pub use mock::MockDriver;
pub use registry::{DriverHandle, DriverRegistry};
