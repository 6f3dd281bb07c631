//! Monitor counters

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct MonitorStats {
    firings: AtomicU64,
    skipped: AtomicU64,
    probes: AtomicU64,
    successes: AtomicU64,
    sink_failures: AtomicU64,
}

impl MonitorStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_firing(&self) {
        self.firings.fetch_add(1, Ordering::Relaxed);
    }

    /// A firing that produced no probe
    pub(crate) fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_probe(&self, success: bool) {
        self.probes.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successes.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_sink_failure(&self) {
        self.sink_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MonitorStatsSnapshot {
        let probes = self.probes.load(Ordering::Relaxed);
        let successes = self.successes.load(Ordering::Relaxed);

        let success_rate = if probes > 0 {
            (successes as f64 / probes as f64) * 100.0
        } else {
            0.0
        };

        MonitorStatsSnapshot {
            firings: self.firings.load(Ordering::Relaxed),
            skipped_firings: self.skipped.load(Ordering::Relaxed),
            probes,
            successes,
            failures: probes - successes,
            success_rate,
            sink_failures: self.sink_failures.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`MonitorStats`]
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorStatsSnapshot {
    pub firings: u64,
    pub skipped_firings: u64,
    pub probes: u64,
    pub successes: u64,
    pub failures: u64,
    pub success_rate: f64,
    pub sink_failures: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_rates() {
        let stats = MonitorStats::new();
        assert_eq!(stats.snapshot().success_rate, 0.0);

        stats.record_firing();
        stats.record_firing();
        stats.record_firing();
        stats.record_skipped();
        stats.record_probe(true);
        stats.record_probe(false);
        stats.record_sink_failure();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.firings, 3);
        assert_eq!(snapshot.skipped_firings, 1);
        assert_eq!(snapshot.probes, 2);
        assert_eq!(snapshot.failures, 1);
        assert_eq!(snapshot.success_rate, 50.0);
        assert_eq!(snapshot.sink_failures, 1);
    }
}
