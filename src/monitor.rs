//! Operational surface of the API monitor
//!
//! [`ApiMonitor`] ties the registry to the scheduler: every registry mutation
//! that affects activation or the check interval is followed by a
//! reconciliation. While monitoring is stopped the reconciliation is a no-op
//! and the next start picks the changes up.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{info, instrument};

use crate::endpoint::{Endpoint, EndpointId, EndpointUpdate, NewEndpoint};
use crate::errors::{MonitorError, Result};
use crate::metric::MetricRecord;
use crate::probe::Prober;
use crate::registry::EndpointRegistry;
use crate::scheduler::Scheduler;
use crate::sink::MetricsSink;
use crate::stats::{MonitorStats, MonitorStatsSnapshot};

pub struct ApiMonitor {
    registry: Arc<EndpointRegistry>,
    prober: Arc<dyn Prober>,
    scheduler: Scheduler,
    stats: Arc<MonitorStats>,
}

impl ApiMonitor {
    pub fn new(
        registry: Arc<EndpointRegistry>,
        prober: Arc<dyn Prober>,
        sink: Arc<dyn MetricsSink>,
    ) -> Self {
        let stats = Arc::new(MonitorStats::new());
        let scheduler = Scheduler::new(
            Arc::clone(&registry),
            Arc::clone(&prober),
            sink,
            Arc::clone(&stats),
        );

        Self {
            registry,
            prober,
            scheduler,
            stats,
        }
    }

    pub fn registry(&self) -> &Arc<EndpointRegistry> {
        &self.registry
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn stats(&self) -> MonitorStatsSnapshot {
        self.stats.snapshot()
    }

    pub async fn start_monitoring(&self) -> bool {
        self.scheduler.start().await
    }

    pub async fn stop_monitoring(&self) -> bool {
        self.scheduler.stop().await
    }

    pub async fn add_endpoint(&self, definition: NewEndpoint) -> Result<Endpoint> {
        let endpoint = self.registry.add(definition).await?;
        self.scheduler.reconcile().await;
        Ok(endpoint)
    }

    pub async fn update_endpoint(&self, id: EndpointId, update: EndpointUpdate) -> Result<Endpoint> {
        let outcome = self.registry.update(id, update).await?;
        if outcome.reschedule {
            self.scheduler.reconcile().await;
        }
        Ok(outcome.endpoint)
    }

    pub async fn remove_endpoint(&self, id: EndpointId) -> Result<Endpoint> {
        let endpoint = self.registry.remove(id).await?;
        self.scheduler.reconcile().await;
        Ok(endpoint)
    }

    pub async fn toggle_endpoint(&self, id: EndpointId) -> Result<Endpoint> {
        let endpoint = self.registry.toggle(id).await?;
        self.scheduler.reconcile().await;
        Ok(endpoint)
    }

    /// Probe one endpoint right away, outside the schedule.
    ///
    /// The record is returned, not persisted.
    pub async fn probe_now(&self, id: EndpointId) -> Result<MetricRecord> {
        let endpoint = self.registry.get(id).await?;
        Ok(self.prober.probe(&endpoint).await)
    }

    /// Register the sample endpoints if the registry is empty
    pub async fn seed_sample_endpoints(&self) -> Result<usize> {
        if !self.registry.is_empty().await {
            return Ok(0);
        }

        let samples = sample_endpoints();
        let count = samples.len();
        for sample in samples {
            self.add_endpoint(sample).await?;
        }

        info!("Added {} sample endpoints", count);
        Ok(count)
    }

    /// Stop the schedule and wait for in-flight probes to record
    pub async fn shutdown(&self) {
        info!("Performing graceful shutdown");

        self.stop_monitoring().await;
        self.scheduler.wait_for_in_flight().await;

        let stats = self.stats.snapshot();
        info!(
            "Final monitor stats - Probes: {} ({:.1}% success), Skipped firings: {}, Sink failures: {}",
            stats.probes, stats.success_rate, stats.skipped_firings, stats.sink_failures
        );
    }

    /// Start monitoring and block until Ctrl-C, then shut down
    #[instrument(skip(self))]
    pub async fn run_until_shutdown(self: Arc<Self>, stats_interval: Duration) -> Result<()> {
        self.start_monitoring().await;

        let reporter = Arc::clone(&self);
        let report_task = tokio::spawn(async move {
            reporter.report_stats(stats_interval).await;
        });

        let signal = tokio::signal::ctrl_c().await;
        report_task.abort();

        info!("Shutting down API monitor");
        self.shutdown().await;

        signal.map_err(|e| {
            MonitorError::Other(format!("Failed to wait for shutdown signal: {}", e))
        })
    }

    async fn report_stats(&self, every: Duration) {
        let mut ticker = interval(every);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;

            let stats = self.stats.snapshot();
            info!(
                "Monitor stats - Timers: {}, In flight: {}, Probes: {} ({:.1}% success), Skipped firings: {}, Sink failures: {}",
                self.scheduler.timer_count().await,
                self.scheduler.in_flight(),
                stats.probes,
                stats.success_rate,
                stats.skipped_firings,
                stats.sink_failures
            );
        }
    }
}

fn sample_endpoints() -> Vec<NewEndpoint> {
    vec![
        NewEndpoint::new("Google", "https://www.google.com")
            .with_timeout(10)
            .with_check_interval(60),
        NewEndpoint::new(
            "JSONPlaceholder API",
            "https://jsonplaceholder.typicode.com/posts/1",
        )
        .with_timeout(15)
        .with_check_interval(120),
        NewEndpoint::new("HTTPBin Status", "https://httpbin.org/status/200")
            .with_timeout(10)
            .with_check_interval(300),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryMetricsStore;
    use crate::testing::FakeProber;
    use tokio::time::sleep;

    fn monitor() -> (ApiMonitor, Arc<MemoryMetricsStore>) {
        let store = Arc::new(MemoryMetricsStore::new());
        let monitor = ApiMonitor::new(
            Arc::new(EndpointRegistry::default()),
            Arc::new(FakeProber::default()),
            store.clone(),
        );
        (monitor, store)
    }

    fn every(name: &str, seconds: u64) -> NewEndpoint {
        NewEndpoint::new(name, format!("http://{}/health", name)).with_check_interval(seconds)
    }

    #[tokio::test(start_paused = true)]
    async fn test_mutations_reconcile_while_running() {
        let (monitor, _) = monitor();
        monitor.start_monitoring().await;

        let a = monitor.add_endpoint(every("a", 10)).await.unwrap();
        let b = monitor.add_endpoint(every("b", 10)).await.unwrap();
        assert_eq!(monitor.scheduler().scheduled_ids().await, vec![a.id, b.id]);

        monitor.toggle_endpoint(a.id).await.unwrap();
        assert_eq!(monitor.scheduler().scheduled_ids().await, vec![b.id]);

        monitor
            .update_endpoint(a.id, EndpointUpdate::default().is_active(true))
            .await
            .unwrap();
        assert_eq!(monitor.scheduler().timer_count().await, 2);

        monitor
            .update_endpoint(b.id, EndpointUpdate::default().check_interval_seconds(20))
            .await
            .unwrap();
        assert_eq!(
            monitor.scheduler().timer_interval(b.id).await,
            Some(Duration::from_secs(20))
        );

        monitor.remove_endpoint(b.id).await.unwrap();
        assert_eq!(monitor.scheduler().scheduled_ids().await, vec![a.id]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mutations_while_stopped_apply_on_start() {
        let (monitor, store) = monitor();
        let a = monitor.add_endpoint(every("a", 10)).await.unwrap();
        monitor.add_endpoint(every("b", 10)).await.unwrap();
        monitor.toggle_endpoint(a.id).await.unwrap();
        assert_eq!(monitor.scheduler().timer_count().await, 0);

        monitor.start_monitoring().await;
        assert_eq!(monitor.scheduler().timer_count().await, 1);

        sleep(Duration::from_secs(11)).await;
        let records = store.records().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].endpoint_name, "b");
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_mutations_leave_state_alone() {
        let (monitor, _) = monitor();
        monitor.start_monitoring().await;
        monitor.add_endpoint(every("svc", 10)).await.unwrap();

        let err = monitor.add_endpoint(every("svc", 30)).await.unwrap_err();
        assert!(matches!(err, MonitorError::DuplicateName(_)));
        assert_eq!(monitor.registry().len().await, 1);
        assert_eq!(monitor.scheduler().timer_count().await, 1);

        let missing = EndpointId(99);
        assert!(matches!(
            monitor.remove_endpoint(missing).await,
            Err(MonitorError::NotFound(_))
        ));
        assert!(matches!(
            monitor.toggle_endpoint(missing).await,
            Err(MonitorError::NotFound(_))
        ));
        assert!(monitor.scheduler().is_running().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_records_in_flight_probe() {
        let store = Arc::new(MemoryMetricsStore::new());
        let monitor = ApiMonitor::new(
            Arc::new(EndpointRegistry::default()),
            Arc::new(FakeProber::with_delay(Duration::from_secs(3))),
            store.clone(),
        );
        monitor.add_endpoint(every("svc", 10)).await.unwrap();
        monitor.start_monitoring().await;

        sleep(Duration::from_secs(11)).await;
        monitor.shutdown().await;

        assert_eq!(store.len().await, 1);
        assert!(!monitor.scheduler().is_running().await);
        assert_eq!(monitor.stats().probes, 1);
    }

    #[tokio::test]
    async fn test_seed_only_when_empty() {
        let (monitor, _) = monitor();
        assert_eq!(monitor.seed_sample_endpoints().await.unwrap(), 3);
        assert_eq!(monitor.seed_sample_endpoints().await.unwrap(), 0);

        let names: Vec<String> = monitor
            .registry()
            .list()
            .await
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["Google", "JSONPlaceholder API", "HTTPBin Status"]);
    }

    #[tokio::test]
    async fn test_probe_now_does_not_persist() {
        let (monitor, store) = monitor();
        let svc = monitor.add_endpoint(every("svc", 10)).await.unwrap();

        let record = monitor.probe_now(svc.id).await.unwrap();
        assert!(record.is_success);
        assert!(store.is_empty().await);
    }
}
