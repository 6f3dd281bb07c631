//! Fakes shared by the scheduler and monitor tests

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::{Instant, sleep};

use crate::endpoint::Endpoint;
use crate::errors::{MonitorError, Result};
use crate::metric::MetricRecord;
use crate::probe::Prober;
use crate::sink::MetricsSink;

/// Answers 200 after a per-endpoint delay, remembering when each probe began.
#[derive(Debug, Default)]
pub struct FakeProber {
    default_delay: Duration,
    delays: HashMap<String, Duration>,
    calls: Mutex<Vec<(String, Instant)>>,
}

impl FakeProber {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            default_delay: delay,
            ..Default::default()
        }
    }

    pub fn delay_for(mut self, name: &str, delay: Duration) -> Self {
        self.delays.insert(name.to_string(), delay);
        self
    }

    pub fn calls_for(&self, name: &str) -> Vec<Instant> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, at)| *at)
            .collect()
    }
}

#[async_trait]
impl Prober for FakeProber {
    async fn probe(&self, endpoint: &Endpoint) -> MetricRecord {
        let start = Instant::now();
        self.calls
            .lock()
            .unwrap()
            .push((endpoint.name.clone(), start));

        let delay = self
            .delays
            .get(&endpoint.name)
            .copied()
            .unwrap_or(self.default_delay);
        sleep(delay).await;

        MetricRecord::from_response(endpoint, start.elapsed(), 200, "")
    }
}

/// Sink that rejects every record
#[derive(Debug, Default)]
pub struct FailingSink {
    pub attempts: AtomicUsize,
}

#[async_trait]
impl MetricsSink for FailingSink {
    async fn append(&self, _record: MetricRecord) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(MonitorError::Sink("disk full".to_string()))
    }
}
