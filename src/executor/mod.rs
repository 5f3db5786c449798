//! Real-time execution of compiled schedules.
//!
//! The [`Executor`] drives drivers through an [`ExecutionSchedule`]:
//!
//! ```text
//! ExecutionSchedule ──┬─> worker(pump)   ── apply at offset ──> DriverHandle
//!                     ├─> worker(valve)  ── apply at offset ──> DriverHandle
//!                     └─> sampler(uv)    ── sample every tick ─> DriverHandle
//!                                                  │
//!                                              RunReport
//! ```
//!
//! - One dispatch worker per component applies that component's events in
//!   schedule order. Workers for different components run concurrently.
//! - Each continuous window on a sampling-capable driver gets its own sampler
//!   task over `[start, stop)`.
//! - Driver calls are bounded by a timeout and retried per [`RetryPolicy`].
//!   The timeout covers the call itself, not the wait for the device.
//!   A failed event is recorded and dispatch carries on; faults never abort
//!   other components.
//! - A [`StopSignal`] cancels the run: pending events are dropped and every
//!   driver is sent its safe state. A stop that lands after all work is done
//!   leaves the run completed.

pub mod clock;
pub mod report;
pub mod stop;

pub use clock::{Clock, SimulatedClock, SystemClock};
pub use report::{
    ComponentOutcome, EventFailure, EventRecord, EventStatus, RunReport, RunStatus,
    SafeStateRecord, Sample,
};
pub use stop::StopSignal;

use crate::apparatus::ParameterMap;
use crate::config::ExecutorSettings;
use crate::error::{CancellationError, DriverError, ExecutionError};
use crate::hardware::{DriverHandle, DriverRegistry};
use crate::protocol::{ContinuousWindow, Event, ExecutionSchedule};
use chrono::Utc;
use futures::future::join_all;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, info_span, warn, Instrument};

/// Bounded retry of failed driver calls.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Extra attempts after the first failure
    pub max_retries: u32,
    /// Pause between attempts
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            backoff: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorOptions {
    /// Deadline for a single driver call
    pub call_timeout: Duration,
    /// Period of continuous-window sampling
    pub sample_interval: Duration,
    pub retry: RetryPolicy,
    /// Drop a component's remaining events after its first failed event
    pub halt_component_on_failure: bool,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(5),
            sample_interval: Duration::from_secs(1),
            retry: RetryPolicy::default(),
            halt_component_on_failure: false,
        }
    }
}

impl From<&ExecutorSettings> for ExecutorOptions {
    fn from(settings: &ExecutorSettings) -> Self {
        Self {
            call_timeout: settings.call_timeout,
            sample_interval: settings.sample_interval,
            retry: RetryPolicy {
                max_retries: settings.max_retries,
                backoff: settings.retry_backoff,
            },
            halt_component_on_failure: settings.halt_component_on_failure,
        }
    }
}

/// Dispatches schedules to drivers.
///
/// One executor runs one schedule at a time. Its [`StopSignal`] is sticky:
/// once triggered, later runs are cancelled as soon as they start.
#[derive(Debug, Default)]
pub struct Executor {
    options: ExecutorOptions,
    stop: StopSignal,
    running: AtomicBool,
}

/// Clears the running flag when a run ends, however it ends.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Shared per-run context handed to every task.
#[derive(Clone)]
struct RunContext {
    options: ExecutorOptions,
    clock: Arc<dyn Clock>,
    stop: StopSignal,
    t0: Duration,
}

impl Executor {
    pub fn new(options: ExecutorOptions) -> Self {
        Self {
            options,
            stop: StopSignal::new(),
            running: AtomicBool::new(false),
        }
    }

    /// Use an externally owned stop signal.
    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    pub fn options(&self) -> &ExecutorOptions {
        &self.options
    }

    /// Handle for cancelling runs from elsewhere.
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Execute a schedule to completion or cancellation.
    ///
    /// Fails up front if another run is in progress or a scheduled component
    /// has no driver. Driver faults never fail the call; they are reported in
    /// the returned [`RunReport`].
    pub async fn execute(
        &self,
        schedule: ExecutionSchedule,
        drivers: &DriverRegistry,
        clock: Arc<dyn Clock>,
    ) -> Result<RunReport, ExecutionError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ExecutionError::AlreadyRunning);
        }
        let _running = RunningGuard(&self.running);

        let mut handles = Vec::new();
        for component in schedule.components() {
            let handle = drivers
                .get(component)
                .ok_or_else(|| ExecutionError::MissingDriver {
                    component: component.to_string(),
                })?;
            handles.push(handle.clone());
        }

        let started_at = Utc::now();
        let experiment_id = RunReport::experiment_id(started_at, &schedule);
        let span = info_span!("run", experiment = %experiment_id, protocol = %schedule.protocol);
        info!(
            parent: &span,
            events = schedule.len(),
            components = handles.len(),
            span_ms = schedule.span().as_millis() as u64,
            "Run started"
        );

        let ctx = RunContext {
            options: self.options.clone(),
            t0: clock.now(),
            clock,
            stop: self.stop.clone(),
        };

        let samplers: Vec<_> = schedule
            .continuous_windows()
            .into_iter()
            .filter_map(|window| {
                let handle = drivers.get(&window.component)?;
                if !handle.supports_sampling() {
                    return None;
                }
                let task = run_sampler(handle.clone(), window, ctx.clone());
                Some(tokio::spawn(task.instrument(span.clone())))
            })
            .collect();

        let workers: Vec<_> = handles
            .iter()
            .map(|handle| {
                let events: Vec<Event> = schedule.events_for(handle.name()).cloned().collect();
                let task = run_worker(handle.clone(), events, ctx.clone());
                (
                    handle.name().to_string(),
                    tokio::spawn(task.instrument(span.clone())),
                )
            })
            .collect();

        let (names, tasks): (Vec<String>, Vec<_>) = workers.into_iter().unzip();
        let mut outcomes = Vec::with_capacity(names.len());
        let mut events = Vec::with_capacity(schedule.len());
        let mut cancelled = false;
        for (name, joined) in names.into_iter().zip(join_all(tasks).await) {
            match joined {
                Ok(WorkerResult {
                    outcome,
                    records,
                    stopped,
                }) => {
                    cancelled |= stopped;
                    outcomes.push(outcome);
                    events.extend(records);
                }
                Err(err) => {
                    error!(parent: &span, component = %name, error = %err, "Dispatch worker panicked");
                    let mut outcome = ComponentOutcome::new(&name);
                    outcome.aborted = Some(format!("dispatch worker panicked: {err}"));
                    outcomes.push(outcome);
                }
            }
        }

        let mut samples = Vec::new();
        for joined in join_all(samplers).await {
            match joined {
                Ok(SamplerResult {
                    component,
                    samples: taken,
                    failures,
                    stopped,
                }) => {
                    cancelled |= stopped;
                    samples.extend(taken);
                    if let Some(outcome) = outcomes.iter_mut().find(|o| o.component == component) {
                        outcome.sample_failures += failures;
                    }
                }
                Err(err) => error!(parent: &span, error = %err, "Sampler panicked"),
            }
        }
        samples.sort_by(|a, b| (a.offset, &a.component).cmp(&(b.offset, &b.component)));
        events.sort_by_key(|e| (e.offset, e.origin));

        if !cancelled && self.stop.is_triggered() {
            info!(parent: &span, "Stop requested after the run finished; nothing was interrupted");
        }
        let (safe_state, cancellation) = if cancelled {
            let dropped_events = outcomes.iter().map(|o| o.dropped).sum();
            let records = apply_safe_state(drivers, &schedule, &ctx)
                .instrument(span.clone())
                .await;
            (
                records,
                Some(CancellationError {
                    reason: self.stop.reason(),
                    dropped_events,
                }),
            )
        } else {
            (Vec::new(), None)
        };

        let status = if cancelled {
            RunStatus::Cancelled
        } else if outcomes.iter().any(ComponentOutcome::has_failures) {
            RunStatus::CompletedWithFailures
        } else {
            RunStatus::Completed
        };
        info!(
            parent: &span,
            status = %status,
            samples = samples.len(),
            failures = outcomes.iter().map(|o| o.failed.len()).sum::<usize>(),
            "Run finished"
        );

        Ok(RunReport {
            experiment_id,
            status,
            started_at,
            ended_at: Utc::now(),
            outcomes,
            events,
            samples,
            safe_state,
            cancellation,
            schedule,
        })
    }
}

struct WorkerResult {
    outcome: ComponentOutcome,
    records: Vec<EventRecord>,
    /// Events were dropped because of the stop signal
    stopped: bool,
}

/// Apply one component's events in order.
async fn run_worker(handle: DriverHandle, events: Vec<Event>, ctx: RunContext) -> WorkerResult {
    let mut outcome = ComponentOutcome::new(handle.name());
    let mut records = Vec::with_capacity(events.len());
    let mut pending = events.into_iter();
    let mut stopped = false;
    let virtual_time = ctx.clock.is_virtual();

    while let Some(event) = pending.next() {
        let due = ctx.t0 + event.offset;
        stopped = tokio::select! {
            biased;
            _ = ctx.stop.cancelled() => true,
            _ = ctx.clock.sleep_until(due) => ctx.stop.is_triggered(),
        };
        if stopped {
            records.push(dropped(event));
            records.extend(pending.by_ref().map(dropped));
            break;
        }

        let (attempts, result) = dispatch(&handle, &event.parameters, &ctx).await;
        let elapsed = (!virtual_time).then(|| ctx.clock.now().saturating_sub(ctx.t0));
        match result {
            Ok(()) => {
                outcome.applied += 1;
                records.push(EventRecord {
                    offset: event.offset,
                    elapsed,
                    component: event.component,
                    kind: event.kind,
                    origin: event.origin,
                    parameters: event.parameters,
                    status: EventStatus::Applied,
                    attempts,
                });
            }
            Err(err) => {
                warn!(
                    component = %handle.name(),
                    offset_ms = event.offset.as_millis() as u64,
                    entry = %event.origin,
                    attempts,
                    error = %err,
                    "Event failed"
                );
                outcome.failed.push(EventFailure {
                    offset: event.offset,
                    origin: event.origin,
                    error: err.to_string(),
                });
                records.push(EventRecord {
                    offset: event.offset,
                    elapsed,
                    component: event.component,
                    kind: event.kind,
                    origin: event.origin,
                    parameters: event.parameters,
                    status: EventStatus::Failed {
                        error: err.to_string(),
                    },
                    attempts,
                });
                if ctx.options.halt_component_on_failure {
                    warn!(component = %handle.name(), "Halting component after failure");
                    records.extend(pending.by_ref().map(dropped));
                    break;
                }
            }
        }
    }

    outcome.dropped = records
        .iter()
        .filter(|r| r.status == EventStatus::Dropped)
        .count();
    WorkerResult {
        outcome,
        records,
        stopped,
    }
}

fn dropped(event: Event) -> EventRecord {
    EventRecord {
        offset: event.offset,
        elapsed: None,
        component: event.component,
        kind: event.kind,
        origin: event.origin,
        parameters: event.parameters,
        status: EventStatus::Dropped,
        attempts: 0,
    }
}

/// One driver call with timeout and retries. Returns the attempts made.
async fn dispatch(
    handle: &DriverHandle,
    parameters: &ParameterMap,
    ctx: &RunContext,
) -> (u32, Result<(), DriverError>) {
    let retry = &ctx.options.retry;
    let mut attempts = 0;
    loop {
        attempts += 1;
        match handle.apply(ctx.options.call_timeout, parameters).await {
            Ok(()) => return (attempts, Ok(())),
            Err(err) if attempts <= retry.max_retries && !ctx.stop.is_triggered() => {
                warn!(component = %handle.name(), attempt = attempts, error = %err, "Retrying driver call");
                ctx.clock.sleep_until(ctx.clock.now() + retry.backoff).await;
            }
            Err(err) => return (attempts, Err(err)),
        }
    }
}

struct SamplerResult {
    component: String,
    samples: Vec<Sample>,
    /// Failed sample calls
    failures: usize,
    /// Ticks were skipped because of the stop signal
    stopped: bool,
}

/// Sample one continuous window.
async fn run_sampler(handle: DriverHandle, window: ContinuousWindow, ctx: RunContext) -> SamplerResult {
    let mut result = SamplerResult {
        component: window.component,
        samples: Vec::new(),
        failures: 0,
        stopped: false,
    };
    let interval = ctx.options.sample_interval;
    if interval.is_zero() {
        warn!(component = %result.component, "Sample interval is zero; sampling disabled");
        return result;
    }

    let mut at = window.start;
    while at < window.stop {
        result.stopped = tokio::select! {
            biased;
            _ = ctx.stop.cancelled() => true,
            _ = ctx.clock.sleep_until(ctx.t0 + at) => ctx.stop.is_triggered(),
        };
        if result.stopped {
            break;
        }

        match handle.sample(ctx.options.call_timeout).await {
            Ok(reading) => result.samples.push(Sample {
                component: result.component.clone(),
                offset: at,
                reading,
            }),
            Err(err) => {
                result.failures += 1;
                warn!(component = %result.component, offset_ms = at.as_millis() as u64, error = %err, "Sample failed");
            }
        }
        at += interval;
    }

    result
}

/// Best-effort safe state for every registered driver.
async fn apply_safe_state(
    drivers: &DriverRegistry,
    schedule: &ExecutionSchedule,
    ctx: &RunContext,
) -> Vec<SafeStateRecord> {
    let commands: Vec<(DriverHandle, ParameterMap)> = drivers
        .handles()
        .filter_map(|handle| {
            let parameters = handle
                .safe_state()
                .or_else(|| schedule.base_state(handle.name()).cloned())?;
            (!parameters.is_empty()).then(|| (handle.clone(), parameters))
        })
        .collect();

    let results = join_all(commands.into_iter().map(|(handle, parameters)| async move {
        let result = handle.apply(ctx.options.call_timeout, &parameters).await;
        if let Err(err) = &result {
            error!(component = %handle.name(), error = %err, "Safe state failed");
        }
        SafeStateRecord {
            component: handle.name().to_string(),
            parameters,
            error: result.err().map(|e| e.to_string()),
        }
    }))
    .await;

    info!(components = results.len(), "Safe state applied");
    results
}
