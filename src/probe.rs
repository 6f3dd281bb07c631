//! HTTP probe executor
//!
//! A probe is a single request attempt against one endpoint. Every outcome,
//! including transport failures, is turned into a [`MetricRecord`].

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, RequestBuilder, Response};
use std::fmt;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::endpoint::Endpoint;
use crate::errors::{MonitorError, Result};
use crate::metric::MetricRecord;

/// Why a probe obtained no HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeFailure {
    /// The endpoint deadline elapsed first
    Timeout,

    /// DNS, refused connection, TLS or unreachable network
    Connection,

    /// Anything else, with its description
    Other(String),
}

impl ProbeFailure {
    fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            ProbeFailure::Timeout
        } else if err.is_connect() {
            ProbeFailure::Connection
        } else {
            ProbeFailure::Other(err.to_string())
        }
    }

    /// Text stored as the record's error message
    pub fn message(&self) -> &str {
        match self {
            ProbeFailure::Timeout => "Request timeout",
            ProbeFailure::Connection => "Connection error",
            ProbeFailure::Other(msg) => msg.as_str(),
        }
    }
}

impl fmt::Display for ProbeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Executes one probe against an endpoint.
///
/// Implementations must not fail: every outcome becomes a record.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, endpoint: &Endpoint) -> MetricRecord;
}

/// reqwest-backed prober
#[derive(Debug, Clone)]
pub struct HttpProber {
    client: Client,
}

impl HttpProber {
    pub fn new(user_agent: &str) -> Result<Self> {
        // No client-wide timeout: each probe carries its own deadline.
        let client = Client::builder()
            .user_agent(user_agent)
            .build()
            .map_err(MonitorError::Http)?;

        Ok(Self { client })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(&config.user_agent)
    }

    fn build_request(&self, endpoint: &Endpoint) -> RequestBuilder {
        let mut request = self
            .client
            .request(endpoint.method.to_reqwest(), endpoint.url.as_str());

        for (name, value) in &endpoint.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        if let Some(body) = endpoint.request_body() {
            if !endpoint.has_header(CONTENT_TYPE.as_str()) {
                request = request.header(CONTENT_TYPE, "application/json");
            }
            request = request.body(body.to_string());
        }

        request
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, endpoint: &Endpoint) -> MetricRecord {
        let request = self.build_request(endpoint);

        let start = Instant::now();
        let deadline = start + endpoint.timeout();
        let outcome = match timeout_at(deadline, request.send()).await {
            Err(_) => Err(ProbeFailure::Timeout),
            Ok(Err(e)) => {
                debug!(endpoint = %endpoint.name, error = %e, "Probe request failed");
                Err(ProbeFailure::from_reqwest(&e))
            }
            Ok(Ok(response)) => Ok(response),
        };
        let elapsed = start.elapsed();

        match outcome {
            Ok(response) => {
                let status = response.status();
                let body = if status.is_success() {
                    String::new()
                } else {
                    read_body(response, deadline).await
                };

                let record =
                    MetricRecord::from_response(endpoint, elapsed, status.as_u16(), &body);
                if record.is_success {
                    info!(
                        "Checked {}: {} ({:.2}s)",
                        endpoint.name, record.status_code, record.response_time_seconds
                    );
                } else {
                    warn!(
                        "Checked {}: {} ({:.2}s)",
                        endpoint.name, record.status_code, record.response_time_seconds
                    );
                }
                record
            }
            Err(failure) => {
                warn!("Error checking {}: {}", endpoint.name, failure);
                MetricRecord::failure(endpoint, elapsed, failure.message())
            }
        }
    }
}

/// Best-effort body read, bounded by the probe deadline
async fn read_body(response: Response, deadline: Instant) -> String {
    match timeout_at(deadline, response.text()).await {
        Ok(Ok(text)) => text,
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::{EndpointId, HttpMethod};
    use crate::metric::{MAX_ERROR_MESSAGE_CHARS, NO_RESPONSE_STATUS};
    use chrono::Utc;
    use std::time::Duration;
    use wiremock::matchers::{body_json, body_string, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn endpoint(url: String) -> Endpoint {
        Endpoint {
            id: EndpointId(1),
            name: "svc".to_string(),
            url,
            method: HttpMethod::Get,
            headers: Vec::new(),
            body: None,
            timeout_seconds: 5,
            check_interval_seconds: 60,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    fn prober() -> HttpProber {
        HttpProber::new("api_monitor-test").unwrap()
    }

    #[tokio::test]
    async fn test_success_measures_latency() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(50)))
            .expect(1)
            .mount(&server)
            .await;

        let record = prober()
            .probe(&endpoint(format!("{}/health", server.uri())))
            .await;

        assert!(record.is_success);
        assert_eq!(record.status_code, 200);
        assert!(record.error_message.is_none());
        assert!(record.response_time_seconds >= 0.05);
        assert!(record.response_time_seconds < 2.0);
        assert_eq!(record.endpoint_name, "svc");
    }

    #[tokio::test]
    async fn test_not_found_records_body() {
        let server = MockServer::start().await;
        Mock::given(path("/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_string("no such route"))
            .mount(&server)
            .await;

        let record = prober()
            .probe(&endpoint(format!("{}/missing", server.uri())))
            .await;

        assert!(!record.is_success);
        assert_eq!(record.status_code, 404);
        assert_eq!(record.error_message.as_deref(), Some("no such route"));
    }

    #[tokio::test]
    async fn test_error_body_is_truncated() {
        let server = MockServer::start().await;
        Mock::given(path("/boom"))
            .respond_with(ResponseTemplate::new(500).set_body_string("x".repeat(2000)))
            .mount(&server)
            .await;

        let record = prober()
            .probe(&endpoint(format!("{}/boom", server.uri())))
            .await;

        assert_eq!(record.status_code, 500);
        assert_eq!(
            record.error_message.map(|m| m.len()),
            Some(MAX_ERROR_MESSAGE_CHARS)
        );
    }

    #[tokio::test]
    async fn test_timeout() {
        let server = MockServer::start().await;
        Mock::given(path("/slow"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .mount(&server)
            .await;

        let mut slow = endpoint(format!("{}/slow", server.uri()));
        slow.timeout_seconds = 1;
        let record = prober().probe(&slow).await;

        assert_eq!(record.status_code, NO_RESPONSE_STATUS);
        assert!(!record.is_success);
        assert_eq!(record.error_message.as_deref(), Some("Request timeout"));
        assert!(record.response_time_seconds >= 0.9);
        assert!(record.response_time_seconds < 2.0);
    }

    #[tokio::test]
    async fn test_connection_refused() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let record = prober()
            .probe(&endpoint(format!("http://127.0.0.1:{}/health", port)))
            .await;

        assert_eq!(record.status_code, NO_RESPONSE_STATUS);
        assert_eq!(record.error_message.as_deref(), Some("Connection error"));
    }

    #[tokio::test]
    async fn test_unexpected_failure_keeps_description() {
        let record = prober().probe(&endpoint("http://[::1".to_string())).await;

        assert_eq!(record.status_code, NO_RESPONSE_STATUS);
        assert!(!record.is_success);
        let message = record.error_message.unwrap();
        assert!(!message.is_empty());
        assert_ne!(message, "Request timeout");
        assert_ne!(message, "Connection error");
    }

    #[tokio::test]
    async fn test_post_sends_headers_and_json_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/submit"))
            .and(header("x-api-key", "secret"))
            .and(header("content-type", "application/json"))
            .and(body_json(serde_json::json!({"ping": true})))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let mut post = endpoint(format!("{}/submit", server.uri()));
        post.method = HttpMethod::Post;
        post.headers = vec![("X-Api-Key".to_string(), "secret".to_string())];
        post.body = Some("{\"ping\": true}".to_string());

        let record = prober().probe(&post).await;
        assert!(record.is_success);
        assert_eq!(record.status_code, 201);
    }

    #[tokio::test]
    async fn test_get_ignores_configured_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(body_string(""))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let mut get = endpoint(server.uri());
        get.body = Some("{\"ignored\": true}".to_string());

        assert!(prober().probe(&get).await.is_success);
    }

    #[test]
    fn test_failure_messages() {
        assert_eq!(ProbeFailure::Timeout.message(), "Request timeout");
        assert_eq!(ProbeFailure::Connection.to_string(), "Connection error");
        assert_eq!(ProbeFailure::Other("boom".to_string()).message(), "boom");
    }
}
