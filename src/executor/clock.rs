//! Time sources for the executor.
//!
//! Offsets are measured from an arbitrary epoch; the executor reads `now()`
//! once at start and schedules everything relative to that.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Monotonic time source.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Time elapsed since the clock's epoch.
    fn now(&self) -> Duration;

    /// Suspend until `now() >= deadline`. Returns at once if already past.
    async fn sleep_until(&self, deadline: Duration);

    /// Whether time is simulated rather than measured.
    fn is_virtual(&self) -> bool {
        false
    }
}

/// Wall-clock time through tokio's timer.
///
/// Under paused tokio time (`#[tokio::test(start_paused = true)]`) this
/// clock auto-advances and runs deterministically.
#[derive(Debug, Clone)]
pub struct SystemClock {
    epoch: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.epoch.elapsed()
    }

    async fn sleep_until(&self, deadline: Duration) {
        tokio::time::sleep_until(self.epoch + deadline).await;
    }
}

/// Virtual clock for dry runs.
///
/// Sleeping never waits: it advances virtual time to the deadline and yields.
/// Time only moves forward, so with several tasks sleeping concurrently
/// `now()` reports the furthest deadline reached so far. That depends on
/// task scheduling, so the executor keeps observed times out of reports
/// made on this clock.
#[derive(Debug, Default)]
pub struct SimulatedClock {
    nanos: AtomicU64,
}

impl SimulatedClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move time forward without sleeping.
    pub fn advance(&self, by: Duration) {
        self.nanos.fetch_add(to_nanos(by), Ordering::SeqCst);
    }
}

fn to_nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

#[async_trait]
impl Clock for SimulatedClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::SeqCst))
    }

    async fn sleep_until(&self, deadline: Duration) {
        self.nanos.fetch_max(to_nanos(deadline), Ordering::SeqCst);
        tokio::task::yield_now().await;
    }

    fn is_virtual(&self) -> bool {
        true
    }
}
