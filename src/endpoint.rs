//! Endpoint definitions and their partial updates

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::errors::{MonitorError, Result};

/// Ordered header name/value pairs sent with every probe.
pub type Headers = Vec<(String, String)>;

/// Stable endpoint identifier, never reused within a registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EndpointId(pub u64);

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EndpointId {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self> {
        s.trim()
            .parse::<u64>()
            .map(EndpointId)
            .map_err(|_| MonitorError::Other(format!("invalid endpoint id: {}", s)))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }

    /// Only POST, PUT and PATCH carry the configured body.
    pub fn allows_body(&self) -> bool {
        matches!(self, HttpMethod::Post | HttpMethod::Put | HttpMethod::Patch)
    }

    pub fn to_reqwest(self) -> reqwest::Method {
        match self {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "PATCH" => Ok(HttpMethod::Patch),
            "DELETE" => Ok(HttpMethod::Delete),
            other => Err(MonitorError::InvalidEndpoint(format!(
                "unsupported method: {}",
                other
            ))),
        }
    }
}

impl TryFrom<String> for HttpMethod {
    type Error = MonitorError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<HttpMethod> for String {
    fn from(method: HttpMethod) -> Self {
        method.as_str().to_string()
    }
}

/// A monitored HTTP target as stored by the registry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    pub id: EndpointId,
    pub name: String,
    pub url: String,
    pub method: HttpMethod,
    #[serde(default)]
    pub headers: Headers,
    #[serde(default)]
    pub body: Option<String>,
    pub timeout_seconds: u64,
    pub check_interval_seconds: u64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Endpoint {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_seconds)
    }

    /// Body to attach to the request, if the method carries one.
    pub fn request_body(&self) -> Option<&str> {
        if self.method.allows_body() {
            self.body.as_deref()
        } else {
            None
        }
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.headers.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
    }
}

/// Definition used to register a new endpoint.
///
/// Timeout and interval fall back to the registry defaults when unset.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NewEndpoint {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub method: HttpMethod,
    #[serde(default)]
    pub headers: Headers,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub check_interval_seconds: Option<u64>,
}

impl NewEndpoint {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_method(mut self, method: HttpMethod) -> Self {
        self.method = method;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }

    pub fn with_check_interval(mut self, seconds: u64) -> Self {
        self.check_interval_seconds = Some(seconds);
        self
    }
}

/// Partial update; `None` leaves the field untouched.
///
/// `body` is doubly optional so an update can clear it with `Some(None)`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EndpointUpdate {
    pub name: Option<String>,
    pub url: Option<String>,
    pub method: Option<HttpMethod>,
    pub headers: Option<Headers>,
    pub body: Option<Option<String>>,
    pub timeout_seconds: Option<u64>,
    pub check_interval_seconds: Option<u64>,
    pub is_active: Option<bool>,
}

impl EndpointUpdate {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn method(mut self, method: HttpMethod) -> Self {
        self.method = Some(method);
        self
    }

    pub fn headers(mut self, headers: Headers) -> Self {
        self.headers = Some(headers);
        self
    }

    pub fn body(mut self, body: Option<String>) -> Self {
        self.body = Some(body);
        self
    }

    pub fn timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }

    pub fn check_interval_seconds(mut self, seconds: u64) -> Self {
        self.check_interval_seconds = Some(seconds);
        self
    }

    pub fn is_active(mut self, active: bool) -> Self {
        self.is_active = Some(active);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == EndpointUpdate::default()
    }
}

/// Parse a `Name: value` header argument.
pub fn parse_header(raw: &str) -> Result<(String, String)> {
    let (name, value) = raw.split_once(':').ok_or_else(|| {
        MonitorError::InvalidEndpoint(format!("header must look like 'Name: value': {}", raw))
    })?;

    let name = name.trim();
    if name.is_empty() {
        return Err(MonitorError::InvalidEndpoint(format!(
            "header name cannot be empty: {}",
            raw
        )));
    }

    Ok((name.to_string(), value.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_is_case_normalized() {
        assert_eq!("get".parse::<HttpMethod>().unwrap(), HttpMethod::Get);
        assert_eq!("Patch".parse::<HttpMethod>().unwrap(), HttpMethod::Patch);
        assert_eq!(HttpMethod::Delete.to_string(), "DELETE");
        assert!("HEAD".parse::<HttpMethod>().is_err());
    }

    #[test]
    fn test_method_serde_accepts_lowercase() {
        let method: HttpMethod = serde_json::from_str("\"post\"").unwrap();
        assert_eq!(method, HttpMethod::Post);
        assert_eq!(serde_json::to_string(&method).unwrap(), "\"POST\"");
    }

    #[test]
    fn test_body_only_for_body_methods() {
        let mut endpoint = Endpoint {
            id: EndpointId(1),
            name: "svc".to_string(),
            url: "http://localhost/health".to_string(),
            method: HttpMethod::Get,
            headers: Vec::new(),
            body: Some("{\"a\":1}".to_string()),
            timeout_seconds: 5,
            check_interval_seconds: 60,
            is_active: true,
            created_at: Utc::now(),
        };
        assert_eq!(endpoint.request_body(), None);

        endpoint.method = HttpMethod::Put;
        assert_eq!(endpoint.request_body(), Some("{\"a\":1}"));
    }

    #[test]
    fn test_parse_header() {
        assert_eq!(
            parse_header("Authorization: Bearer abc:def").unwrap(),
            ("Authorization".to_string(), "Bearer abc:def".to_string())
        );
        assert!(parse_header("no-colon").is_err());
        assert!(parse_header(": value").is_err());
    }

    #[test]
    fn test_empty_update() {
        assert!(EndpointUpdate::default().is_empty());
        assert!(!EndpointUpdate::default().is_active(false).is_empty());
    }
}
