//! In-memory metric store with the read-side queries

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use crate::errors::Result;
use crate::metric::MetricRecord;
use crate::sink::MetricsSink;

pub const DEFAULT_QUERY_HOURS: i64 = 24;
pub const DEFAULT_QUERY_LIMIT: usize = 1000;

/// Filter for [`MemoryMetricsStore::query`]
#[derive(Debug, Clone)]
pub struct MetricsQuery {
    pub endpoint_name: Option<String>,
    pub since: DateTime<Utc>,
    pub limit: usize,
}

impl Default for MetricsQuery {
    fn default() -> Self {
        Self::last_hours(DEFAULT_QUERY_HOURS)
    }
}

impl MetricsQuery {
    pub fn last_hours(hours: i64) -> Self {
        Self {
            endpoint_name: None,
            since: hours_ago(hours),
            limit: DEFAULT_QUERY_LIMIT,
        }
    }

    pub fn for_endpoint(mut self, name: impl Into<String>) -> Self {
        self.endpoint_name = Some(name.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

/// Start of a window reaching `hours` back; windows past the calendar's start
/// cover everything.
pub fn hours_ago(hours: i64) -> DateTime<Utc> {
    Duration::try_hours(hours)
        .and_then(|window| Utc::now().checked_sub_signed(window))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Per-endpoint aggregate over a time window
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EndpointSummary {
    pub endpoint_name: String,
    pub total_checks: usize,
    pub successful_checks: usize,
    pub failed_checks: usize,
    /// Percentage, two decimals
    pub success_rate: f64,
    pub avg_response_time: f64,
    pub min_response_time: f64,
    pub max_response_time: f64,
    pub last_check: Option<DateTime<Utc>>,
}

/// Thread-safe in-memory record store
#[derive(Debug, Default)]
pub struct MemoryMetricsStore {
    records: RwLock<Vec<MetricRecord>>,
}

impl MemoryMetricsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: Vec<MetricRecord>) -> Self {
        Self {
            records: RwLock::new(records),
        }
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// All records in append order
    pub async fn records(&self) -> Vec<MetricRecord> {
        self.records.read().await.clone()
    }

    /// Records matching `query`, newest first
    pub async fn query(&self, query: &MetricsQuery) -> Vec<MetricRecord> {
        let records = self.records.read().await;
        let mut matching: Vec<MetricRecord> = records
            .iter()
            .filter(|r| r.timestamp >= query.since)
            .filter(|r| {
                query
                    .endpoint_name
                    .as_deref()
                    .is_none_or(|name| r.endpoint_name == name)
            })
            .cloned()
            .collect();

        matching.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        matching.truncate(query.limit);
        matching
    }

    /// Aggregates per endpoint name for records since `since`
    pub async fn summary(&self, since: DateTime<Utc>) -> Vec<EndpointSummary> {
        let records = self.records.read().await;
        let mut groups: BTreeMap<&str, Vec<&MetricRecord>> = BTreeMap::new();
        for record in records.iter().filter(|r| r.timestamp >= since) {
            groups
                .entry(record.endpoint_name.as_str())
                .or_default()
                .push(record);
        }

        groups
            .into_iter()
            .map(|(name, group)| summarize(name, &group))
            .collect()
    }

    /// Bulk-delete every record for an endpoint name
    pub async fn delete_by_endpoint(&self, endpoint_name: &str) -> usize {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|r| r.endpoint_name != endpoint_name);
        before - records.len()
    }
}

#[async_trait]
impl MetricsSink for MemoryMetricsStore {
    async fn append(&self, record: MetricRecord) -> Result<()> {
        self.records.write().await.push(record);
        Ok(())
    }
}

fn summarize(name: &str, group: &[&MetricRecord]) -> EndpointSummary {
    let total = group.len();
    let successful = group.iter().filter(|r| r.is_success).count();
    let times = group.iter().map(|r| r.response_time_seconds);

    let sum: f64 = times.clone().sum();
    let min = times.clone().fold(f64::INFINITY, f64::min);
    let max = times.fold(0.0, f64::max);

    let (success_rate, avg, min) = if total > 0 {
        (
            successful as f64 / total as f64 * 100.0,
            sum / total as f64,
            min,
        )
    } else {
        (0.0, 0.0, 0.0)
    };

    EndpointSummary {
        endpoint_name: name.to_string(),
        total_checks: total,
        successful_checks: successful,
        failed_checks: total - successful,
        success_rate: round_to(success_rate, 2),
        avg_response_time: round_to(avg, 3),
        min_response_time: round_to(min, 3),
        max_response_time: round_to(max, 3),
        last_check: group.iter().map(|r| r.timestamp).max(),
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
