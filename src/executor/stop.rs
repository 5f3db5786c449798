//! Cooperative stop signal for a running schedule.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Cloneable flag that asks a run to stop.
///
/// Triggering is sticky: once set, every current and future call to
/// [`cancelled`](Self::cancelled) resolves immediately.
#[derive(Clone, Debug)]
pub struct StopSignal {
    flag: Arc<AtomicBool>,
    reason: Arc<std::sync::RwLock<Option<String>>>,
    notify: Arc<Notify>,
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl StopSignal {
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            reason: Arc::new(std::sync::RwLock::new(None)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Request a stop. The first reason given is kept.
    pub fn trigger(&self, reason: impl Into<String>) {
        if let Ok(mut r) = self.reason.write() {
            if r.is_none() {
                *r = Some(reason.into());
            }
        }
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn reason(&self) -> Option<String> {
        self.reason.read().ok().and_then(|r| r.clone())
    }

    /// Resolve once the signal has been triggered.
    pub async fn cancelled(&self) {
        loop {
            // Register interest before checking to avoid missing a trigger.
            let notified = self.notify.notified();
            if self.is_triggered() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn keeps_first_reason() {
        let stop = StopSignal::new();
        assert!(!stop.is_triggered());
        stop.trigger("operator");
        stop.trigger("watchdog");
        assert!(stop.is_triggered());
        assert_eq!(stop.reason(), Some("operator".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn wakes_pending_waiters() {
        let stop = StopSignal::new();
        let waiter = {
            let stop = stop.clone();
            tokio::spawn(async move { stop.cancelled().await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        stop.trigger("now");
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter woke")
            .unwrap();
        // Already triggered: returns at once.
        stop.cancelled().await;
    }
}
