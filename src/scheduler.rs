//! Per-endpoint probe timers kept in step with the registry
//!
//! The scheduler owns one recurring timer task per active endpoint. Every
//! change to the timer set goes through [`Scheduler::reconcile`], which diffs
//! the registry's active endpoints against the live timers while holding the
//! scheduler's state lock. Each firing spawns the probe as its own task, so a
//! slow endpoint never holds up another endpoint's timer, and cancelling a
//! timer never cancels a probe that already started.

use futures::future::join_all;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, warn};

use crate::endpoint::{Endpoint, EndpointId};
use crate::errors::{MonitorError, Result};
use crate::probe::Prober;
use crate::registry::EndpointRegistry;
use crate::sink::MetricsSink;
use crate::stats::MonitorStats;

/// Timer changes applied by one reconciliation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub scheduled: Vec<EndpointId>,
    pub rescheduled: Vec<EndpointId>,
    pub cancelled: Vec<EndpointId>,
    /// Endpoints whose timer could not be created
    pub failed: Vec<EndpointId>,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        self.scheduled.is_empty()
            && self.rescheduled.is_empty()
            && self.cancelled.is_empty()
            && self.failed.is_empty()
    }
}

struct Timer {
    interval_seconds: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct SchedulerState {
    running: bool,
    timers: HashMap<EndpointId, Timer>,
    /// Per-endpoint "probe running" flags, kept across timer replacement
    busy: HashMap<EndpointId, Arc<AtomicBool>>,
}

pub struct Scheduler {
    registry: Arc<EndpointRegistry>,
    prober: Arc<dyn Prober>,
    sink: Arc<dyn MetricsSink>,
    stats: Arc<MonitorStats>,
    state: Mutex<SchedulerState>,
    in_flight: TaskTracker,
}

impl Scheduler {
    pub fn new(
        registry: Arc<EndpointRegistry>,
        prober: Arc<dyn Prober>,
        sink: Arc<dyn MetricsSink>,
        stats: Arc<MonitorStats>,
    ) -> Self {
        Self {
            registry,
            prober,
            sink,
            stats,
            state: Mutex::new(SchedulerState::default()),
            in_flight: TaskTracker::new(),
        }
    }

    /// Stopped → Running, scheduling every active endpoint.
    ///
    /// Returns `false` if already running.
    pub async fn start(&self) -> bool {
        let mut state = self.state.lock().await;
        if state.running {
            return false;
        }

        state.running = true;
        self.in_flight.reopen();
        info!("API monitoring started");

        self.reconcile_locked(&mut state).await;
        true
    }

    /// Running → Stopped, cancelling every timer.
    ///
    /// Probes already in flight keep running and still write their records.
    /// Returns `false` if already stopped.
    pub async fn stop(&self) -> bool {
        let mut state = self.state.lock().await;
        if !state.running {
            return false;
        }

        state.running = false;
        let timers: Vec<Timer> = state.timers.drain().map(|(_, timer)| timer).collect();
        let cancelled = timers.len();
        for timer in &timers {
            timer.handle.abort();
        }
        // Wait for the aborts to land so no firing happens after we return
        join_all(timers.into_iter().map(|timer| timer.handle)).await;

        info!(
            "API monitoring stopped, cancelled {} timers ({} probes in flight)",
            cancelled,
            self.in_flight.len()
        );
        true
    }

    /// Bring the timer set in line with the registry's active endpoints.
    ///
    /// Does nothing while stopped; [`Scheduler::start`] reconciles on entry.
    pub async fn reconcile(&self) -> ReconcileReport {
        let mut state = self.state.lock().await;
        if !state.running {
            debug!("Scheduler stopped, deferring reconciliation");
            return ReconcileReport::default();
        }

        self.reconcile_locked(&mut state).await
    }

    async fn reconcile_locked(&self, state: &mut SchedulerState) -> ReconcileReport {
        let desired: BTreeMap<EndpointId, Endpoint> = self
            .registry
            .list_active()
            .await
            .into_iter()
            .map(|endpoint| (endpoint.id, endpoint))
            .collect();

        let mut report = ReconcileReport::default();

        let mut stale: Vec<EndpointId> = state
            .timers
            .keys()
            .filter(|id| !desired.contains_key(id))
            .copied()
            .collect();
        stale.sort();
        for id in stale {
            if let Some(timer) = state.timers.remove(&id) {
                cancel_timer(timer).await;
                info!(endpoint_id = %id, "Cancelled checks");
                report.cancelled.push(id);
            }
            if state
                .busy
                .get(&id)
                .is_some_and(|busy| !busy.load(Ordering::Acquire))
            {
                state.busy.remove(&id);
            }
        }

        for (id, endpoint) in desired {
            let replacing = match state.timers.get(&id) {
                Some(timer) if timer.interval_seconds == endpoint.check_interval_seconds => {
                    continue;
                }
                Some(_) => true,
                None => false,
            };

            if replacing {
                if let Some(timer) = state.timers.remove(&id) {
                    cancel_timer(timer).await;
                }
            }

            let busy = Arc::clone(state.busy.entry(id).or_default());
            match self.spawn_timer(&endpoint, busy) {
                Ok(timer) => {
                    state.timers.insert(id, timer);
                    info!(
                        endpoint_id = %id,
                        "Scheduled checks for {} every {} seconds",
                        endpoint.name, endpoint.check_interval_seconds
                    );
                    if replacing {
                        report.rescheduled.push(id);
                    } else {
                        report.scheduled.push(id);
                    }
                }
                Err(e) => {
                    error!(endpoint_id = %id, "Failed to schedule {}: {}", endpoint.name, e);
                    report.failed.push(id);
                }
            }
        }

        if !report.is_noop() {
            debug!(?report, "Reconciled timers");
        }
        report
    }

    fn spawn_timer(&self, endpoint: &Endpoint, busy: Arc<AtomicBool>) -> Result<Timer> {
        if endpoint.check_interval_seconds == 0 {
            return Err(MonitorError::InvalidEndpoint(
                "check interval must be greater than 0".to_string(),
            ));
        }

        let firing = Firing {
            registry: Arc::clone(&self.registry),
            prober: Arc::clone(&self.prober),
            sink: Arc::clone(&self.sink),
            stats: Arc::clone(&self.stats),
            in_flight: self.in_flight.clone(),
            busy,
        };
        let handle = tokio::spawn(run_timer(firing, endpoint.id, endpoint.check_interval()));

        Ok(Timer {
            interval_seconds: endpoint.check_interval_seconds,
            handle,
        })
    }

    /// Wait for every in-flight probe to finish and record its result.
    ///
    /// Meant for shutdown, after [`Scheduler::stop`].
    pub async fn wait_for_in_flight(&self) {
        self.in_flight.close();
        self.in_flight.wait().await;
    }

    pub async fn is_running(&self) -> bool {
        self.state.lock().await.running
    }

    pub async fn timer_count(&self) -> usize {
        self.state.lock().await.timers.len()
    }

    /// Endpoint ids with a live timer, ascending
    pub async fn scheduled_ids(&self) -> Vec<EndpointId> {
        let mut ids: Vec<EndpointId> = self.state.lock().await.timers.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Period of the live timer for `id`, if any
    pub async fn timer_interval(&self, id: EndpointId) -> Option<Duration> {
        self.state
            .lock()
            .await
            .timers
            .get(&id)
            .map(|timer| Duration::from_secs(timer.interval_seconds))
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }
}

async fn cancel_timer(timer: Timer) {
    timer.handle.abort();
    let _ = timer.handle.await;
}

/// Everything a timer needs to fire
#[derive(Clone)]
struct Firing {
    registry: Arc<EndpointRegistry>,
    prober: Arc<dyn Prober>,
    sink: Arc<dyn MetricsSink>,
    stats: Arc<MonitorStats>,
    in_flight: TaskTracker,
    /// Set while a probe of this endpoint is running, shared by its timers
    busy: Arc<AtomicBool>,
}

/// Clears the endpoint's busy flag when the probe task ends, even by panic
struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[instrument(skip_all, fields(endpoint_id = %id))]
async fn run_timer(firing: Firing, id: EndpointId, period: Duration) {
    // First firing is one full period away
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        firing.fire(id).await;
    }
}

impl Firing {
    async fn fire(&self, id: EndpointId) {
        self.stats.record_firing();

        // The endpoint may have changed or gone since the timer was created
        let endpoint = match self.registry.get(id).await {
            Ok(endpoint) if endpoint.is_active => endpoint,
            _ => {
                debug!("Endpoint {} is gone or inactive, skipping firing", id);
                self.stats.record_skipped();
                return;
            }
        };

        if self.busy.swap(true, Ordering::AcqRel) {
            warn!(
                "Previous check of {} still running, skipping firing",
                endpoint.name
            );
            self.stats.record_skipped();
            return;
        }

        let guard = BusyGuard(Arc::clone(&self.busy));
        let firing = self.clone();
        self.in_flight.spawn(async move {
            let record = firing.prober.probe(&endpoint).await;
            drop(guard);
            firing.stats.record_probe(record.is_success);

            if let Err(e) = firing.sink.append(record).await {
                error!("Dropping metric record for {}: {}", endpoint.name, e);
                firing.stats.record_sink_failure();
            }
        });
    }
}
