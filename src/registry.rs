//! Authoritative set of monitored endpoints
//!
//! The registry only stores and validates definitions. Keeping the scheduler in
//! step with it is the job of [`crate::monitor::ApiMonitor`].

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::endpoint::{Endpoint, EndpointId, EndpointUpdate, Headers, NewEndpoint};
use crate::errors::{MonitorError, Result};

/// Values applied to definitions that omit them, plus the interval floor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryDefaults {
    pub timeout_seconds: u64,
    pub check_interval_seconds: u64,
    pub min_check_interval_seconds: u64,
}

impl Default for RegistryDefaults {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
            check_interval_seconds: 300,
            min_check_interval_seconds: 1,
        }
    }
}

impl From<&Config> for RegistryDefaults {
    fn from(config: &Config) -> Self {
        Self {
            timeout_seconds: config.default_timeout_seconds,
            check_interval_seconds: config.default_check_interval_seconds,
            min_check_interval_seconds: config.min_check_interval_seconds,
        }
    }
}

/// Result of a successful update.
#[derive(Debug, Clone)]
pub struct UpdateOutcome {
    pub endpoint: Endpoint,
    /// The update changed activation or the check interval.
    pub reschedule: bool,
}

/// On-disk layout of the registry file.
#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistrySnapshot {
    next_id: u64,
    endpoints: Vec<Endpoint>,
}

#[derive(Debug)]
struct RegistryState {
    next_id: u64,
    endpoints: BTreeMap<EndpointId, Endpoint>,
}

impl Default for RegistryState {
    fn default() -> Self {
        Self {
            next_id: 1,
            endpoints: BTreeMap::new(),
        }
    }
}

impl RegistryState {
    fn name_taken(&self, name: &str, except: Option<EndpointId>) -> bool {
        self.endpoints
            .values()
            .any(|e| e.name == name && Some(e.id) != except)
    }
}

/// Thread-safe endpoint store
#[derive(Debug)]
pub struct EndpointRegistry {
    state: RwLock<RegistryState>,
    defaults: RegistryDefaults,
}

impl Default for EndpointRegistry {
    fn default() -> Self {
        Self::new(RegistryDefaults::default())
    }
}

impl EndpointRegistry {
    pub fn new(defaults: RegistryDefaults) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            defaults,
        }
    }

    pub fn defaults(&self) -> RegistryDefaults {
        self.defaults
    }

    /// Register a new, active endpoint
    pub async fn add(&self, definition: NewEndpoint) -> Result<Endpoint> {
        let endpoint = Endpoint {
            id: EndpointId(0),
            name: definition.name.trim().to_string(),
            url: definition.url.trim().to_string(),
            method: definition.method,
            headers: definition.headers,
            body: definition.body,
            timeout_seconds: definition
                .timeout_seconds
                .unwrap_or(self.defaults.timeout_seconds),
            check_interval_seconds: definition
                .check_interval_seconds
                .unwrap_or(self.defaults.check_interval_seconds),
            is_active: true,
            created_at: Utc::now(),
        };
        self.validate(&endpoint)?;

        let mut state = self.state.write().await;
        if state.name_taken(&endpoint.name, None) {
            return Err(MonitorError::DuplicateName(endpoint.name));
        }

        let id = EndpointId(state.next_id);
        state.next_id += 1;

        let endpoint = Endpoint { id, ..endpoint };
        state.endpoints.insert(id, endpoint.clone());

        info!(endpoint_id = %id, name = %endpoint.name, "Added endpoint");
        Ok(endpoint)
    }

    /// Apply the provided fields, leaving the others untouched
    pub async fn update(&self, id: EndpointId, update: EndpointUpdate) -> Result<UpdateOutcome> {
        let mut state = self.state.write().await;
        let current = state
            .endpoints
            .get(&id)
            .cloned()
            .ok_or(MonitorError::NotFound(id))?;

        let mut candidate = current.clone();
        if let Some(name) = update.name {
            candidate.name = name.trim().to_string();
        }
        if let Some(url) = update.url {
            candidate.url = url.trim().to_string();
        }
        if let Some(method) = update.method {
            candidate.method = method;
        }
        if let Some(headers) = update.headers {
            candidate.headers = headers;
        }
        if let Some(body) = update.body {
            candidate.body = body;
        }
        if let Some(timeout) = update.timeout_seconds {
            candidate.timeout_seconds = timeout;
        }
        if let Some(interval) = update.check_interval_seconds {
            candidate.check_interval_seconds = interval;
        }
        if let Some(active) = update.is_active {
            candidate.is_active = active;
        }

        self.validate(&candidate)?;
        if state.name_taken(&candidate.name, Some(id)) {
            return Err(MonitorError::DuplicateName(candidate.name));
        }

        let reschedule = current.is_active != candidate.is_active
            || current.check_interval_seconds != candidate.check_interval_seconds;
        state.endpoints.insert(id, candidate.clone());

        info!(endpoint_id = %id, name = %candidate.name, reschedule, "Updated endpoint");
        Ok(UpdateOutcome {
            endpoint: candidate,
            reschedule,
        })
    }

    /// Delete an endpoint. Stored metric records are not touched.
    pub async fn remove(&self, id: EndpointId) -> Result<Endpoint> {
        let removed = self
            .state
            .write()
            .await
            .endpoints
            .remove(&id)
            .ok_or(MonitorError::NotFound(id))?;

        info!(endpoint_id = %id, name = %removed.name, "Removed endpoint");
        Ok(removed)
    }

    /// Flip the active flag
    pub async fn toggle(&self, id: EndpointId) -> Result<Endpoint> {
        let mut state = self.state.write().await;
        let endpoint = state
            .endpoints
            .get_mut(&id)
            .ok_or(MonitorError::NotFound(id))?;

        endpoint.is_active = !endpoint.is_active;
        info!(
            endpoint_id = %id,
            name = %endpoint.name,
            "Endpoint {}",
            if endpoint.is_active { "activated" } else { "deactivated" }
        );
        Ok(endpoint.clone())
    }

    pub async fn get(&self, id: EndpointId) -> Result<Endpoint> {
        self.state
            .read()
            .await
            .endpoints
            .get(&id)
            .cloned()
            .ok_or(MonitorError::NotFound(id))
    }

    pub async fn list(&self) -> Vec<Endpoint> {
        self.state.read().await.endpoints.values().cloned().collect()
    }

    pub async fn list_active(&self) -> Vec<Endpoint> {
        self.state
            .read()
            .await
            .endpoints
            .values()
            .filter(|e| e.is_active)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.endpoints.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Load a registry file; a missing file yields an empty registry.
    ///
    /// Stored endpoints that no longer pass validation, for example after the
    /// interval floor was raised, are skipped with a warning.
    pub async fn load_from_file(path: &Path, defaults: RegistryDefaults) -> Result<Self> {
        let registry = Self::new(defaults);

        if !tokio::fs::try_exists(path).await? {
            debug!("Registry file {} not found, starting empty", path.display());
            return Ok(registry);
        }

        let raw = tokio::fs::read_to_string(path).await?;
        let snapshot: RegistrySnapshot = serde_json::from_str(&raw)?;

        {
            let mut state = registry.state.write().await;
            let mut after_highest = 1;
            for endpoint in snapshot.endpoints {
                after_highest = after_highest.max(endpoint.id.0 + 1);
                if state.endpoints.contains_key(&endpoint.id) {
                    return Err(MonitorError::Config(format!(
                        "duplicate endpoint id {} in {}",
                        endpoint.id,
                        path.display()
                    )));
                }
                if state.name_taken(&endpoint.name, None) {
                    return Err(MonitorError::DuplicateName(endpoint.name));
                }
                if let Err(e) = registry.validate(&endpoint) {
                    warn!(
                        endpoint_id = %endpoint.id,
                        "Skipping stored endpoint {}: {}", endpoint.name, e
                    );
                    continue;
                }
                state.endpoints.insert(endpoint.id, endpoint);
            }

            state.next_id = snapshot.next_id.max(after_highest);
        }

        let count = registry.len().await;
        info!("Loaded {} endpoints from {}", count, path.display());
        Ok(registry)
    }

    /// Write the registry to `path`, replacing the previous file atomically
    pub async fn save_to_file(&self, path: &Path) -> Result<()> {
        let snapshot = {
            let state = self.state.read().await;
            RegistrySnapshot {
                next_id: state.next_id,
                endpoints: state.endpoints.values().cloned().collect(),
            }
        };

        let json = serde_json::to_string_pretty(&snapshot)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, path).await?;

        debug!(
            "Saved {} endpoints to {}",
            snapshot.endpoints.len(),
            path.display()
        );
        Ok(())
    }

    fn validate(&self, endpoint: &Endpoint) -> Result<()> {
        if endpoint.name.is_empty() {
            return Err(MonitorError::InvalidEndpoint("name cannot be empty".to_string()));
        }

        let url = reqwest::Url::parse(&endpoint.url).map_err(|e| {
            MonitorError::InvalidEndpoint(format!("invalid url {}: {}", endpoint.url, e))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(MonitorError::InvalidEndpoint(format!(
                "url must use http or https: {}",
                endpoint.url
            )));
        }

        validate_headers(&endpoint.headers)?;

        if let Some(body) = &endpoint.body {
            serde_json::from_str::<serde_json::Value>(body).map_err(|e| {
                MonitorError::InvalidEndpoint(format!("body is not valid JSON: {}", e))
            })?;
        }

        if endpoint.timeout_seconds == 0 {
            return Err(MonitorError::InvalidEndpoint(
                "timeout_seconds must be greater than 0".to_string(),
            ));
        }

        let min_interval = self.defaults.min_check_interval_seconds.max(1);
        if endpoint.check_interval_seconds < min_interval {
            return Err(MonitorError::InvalidEndpoint(format!(
                "check_interval_seconds must be at least {}",
                min_interval
            )));
        }

        Ok(())
    }
}

fn validate_headers(headers: &Headers) -> Result<()> {
    for (name, value) in headers {
        reqwest::header::HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
            MonitorError::InvalidEndpoint(format!("invalid header name: {}", name))
        })?;
        reqwest::header::HeaderValue::from_str(value).map_err(|_| {
            MonitorError::InvalidEndpoint(format!("invalid value for header {}", name))
        })?;
    }
    Ok(())
}
