//! HTTP Endpoint Monitor Library
//!
//! This library periodically probes a set of HTTP endpoints, measures latency
//! and outcome, and appends timestamped metric records to a sink.

pub mod config;
pub mod endpoint;
pub mod errors;
pub mod metric;
pub mod monitor;
pub mod probe;
pub mod registry;
pub mod scheduler;
pub mod sink;
pub mod stats;
pub mod store;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use endpoint::{Endpoint, EndpointId, EndpointUpdate, HttpMethod, NewEndpoint};
pub use errors::{MonitorError, Result};
pub use metric::MetricRecord;
pub use monitor::ApiMonitor;
pub use probe::{HttpProber, ProbeFailure, Prober};
pub use registry::{EndpointRegistry, RegistryDefaults};
pub use scheduler::{ReconcileReport, Scheduler};
pub use sink::{JsonLinesSink, MetricsSink};
pub use store::{EndpointSummary, MemoryMetricsStore, MetricsQuery};
