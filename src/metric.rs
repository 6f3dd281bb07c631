//! Metric records produced by probes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::endpoint::Endpoint;

/// Upper bound on stored error message length, in characters.
pub const MAX_ERROR_MESSAGE_CHARS: usize = 500;

/// Status code recorded when no HTTP response was obtained.
pub const NO_RESPONSE_STATUS: u16 = 0;

/// One immutable observation of a probe attempt.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub endpoint_name: String,
    pub endpoint_url: String,
    pub response_time_seconds: f64,
    pub status_code: u16,
    pub is_success: bool,
    pub timestamp: DateTime<Utc>,
    pub error_message: Option<String>,
}

impl MetricRecord {
    /// Record for an attempt that obtained an HTTP response.
    ///
    /// `body` is only consulted for non-2xx codes.
    pub fn from_response(
        endpoint: &Endpoint,
        elapsed: Duration,
        status_code: u16,
        body: &str,
    ) -> Self {
        let is_success = (200..300).contains(&status_code);
        Self {
            endpoint_name: endpoint.name.clone(),
            endpoint_url: endpoint.url.clone(),
            response_time_seconds: elapsed.as_secs_f64(),
            status_code,
            is_success,
            timestamp: Utc::now(),
            error_message: if is_success {
                None
            } else {
                Some(truncate_message(body))
            },
        }
    }

    /// Record for an attempt that never obtained a response.
    pub fn failure(endpoint: &Endpoint, elapsed: Duration, message: &str) -> Self {
        Self {
            endpoint_name: endpoint.name.clone(),
            endpoint_url: endpoint.url.clone(),
            response_time_seconds: elapsed.as_secs_f64(),
            status_code: NO_RESPONSE_STATUS,
            is_success: false,
            timestamp: Utc::now(),
            error_message: Some(truncate_message(message)),
        }
    }
}

pub fn truncate_message(message: &str) -> String {
    message.chars().take(MAX_ERROR_MESSAGE_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::{EndpointId, HttpMethod};

    fn endpoint() -> Endpoint {
        Endpoint {
            id: EndpointId(1),
            name: "svc".to_string(),
            url: "http://x/health".to_string(),
            method: HttpMethod::Get,
            headers: Vec::new(),
            body: None,
            timeout_seconds: 5,
            check_interval_seconds: 60,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_success_has_no_error_message() {
        let record =
            MetricRecord::from_response(&endpoint(), Duration::from_millis(50), 204, "ignored");
        assert!(record.is_success);
        assert_eq!(record.status_code, 204);
        assert!(record.error_message.is_none());
        assert!((record.response_time_seconds - 0.05).abs() < 1e-9);
    }

    #[test]
    fn test_non_2xx_keeps_truncated_body() {
        let body = "é".repeat(800);
        let record = MetricRecord::from_response(&endpoint(), Duration::ZERO, 503, &body);
        assert!(!record.is_success);
        assert_eq!(
            record.error_message.as_deref().map(|m| m.chars().count()),
            Some(MAX_ERROR_MESSAGE_CHARS)
        );

        let record = MetricRecord::from_response(&endpoint(), Duration::ZERO, 301, "");
        assert!(!record.is_success);
        assert_eq!(record.error_message.as_deref(), Some(""));
    }

    #[test]
    fn test_failure_record() {
        let record = MetricRecord::failure(&endpoint(), Duration::from_secs(2), "Request timeout");
        assert_eq!(record.status_code, NO_RESPONSE_STATUS);
        assert!(!record.is_success);
        assert_eq!(record.error_message.as_deref(), Some("Request timeout"));
        assert_eq!(record.endpoint_name, "svc");
        assert_eq!(record.endpoint_url, "http://x/health");
    }
}
