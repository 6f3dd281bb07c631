//! Configuration management for the API monitor

use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// JSON file holding the endpoint registry
    pub endpoints_file: PathBuf,

    /// JSON Lines file receiving metric records
    pub metrics_file: PathBuf,

    /// Request deadline for endpoints registered without one
    pub default_timeout_seconds: u64,

    /// Check interval for endpoints registered without one
    pub default_check_interval_seconds: u64,

    /// Smallest check interval the registry accepts
    pub min_check_interval_seconds: u64,

    /// How often monitor statistics are logged while running
    pub stats_interval: Duration,

    /// User agent sent with every probe
    pub user_agent: String,

    /// Add sample endpoints when the registry starts empty
    pub seed_sample_endpoints: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoints_file: PathBuf::from("endpoints.json"),
            metrics_file: PathBuf::from("metrics.jsonl"),
            default_timeout_seconds: 30,
            default_check_interval_seconds: 300,
            min_check_interval_seconds: 1,
            stats_interval: Duration::from_secs(60),
            user_agent: format!("api_monitor/{}", env!("CARGO_PKG_VERSION")),
            seed_sample_endpoints: false,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Config::default();

        if let Ok(path) = env::var("ENDPOINTS_FILE") {
            config.endpoints_file = PathBuf::from(path);
        }

        if let Ok(path) = env::var("METRICS_FILE") {
            config.metrics_file = PathBuf::from(path);
        }

        if let Ok(timeout) = env::var("DEFAULT_TIMEOUT_SECONDS") {
            if let Ok(seconds) = timeout.parse() {
                config.default_timeout_seconds = seconds;
            }
        }

        if let Ok(interval) = env::var("DEFAULT_CHECK_INTERVAL_SECONDS") {
            if let Ok(seconds) = interval.parse() {
                config.default_check_interval_seconds = seconds;
            }
        }

        if let Ok(interval) = env::var("MIN_CHECK_INTERVAL_SECONDS") {
            if let Ok(seconds) = interval.parse() {
                config.min_check_interval_seconds = seconds;
            }
        }

        if let Ok(interval) = env::var("STATS_INTERVAL_SECONDS") {
            if let Ok(seconds) = interval.parse::<u64>() {
                config.stats_interval = Duration::from_secs(seconds);
            }
        }

        if let Ok(user_agent) = env::var("USER_AGENT") {
            config.user_agent = user_agent;
        }

        if let Ok(seed) = env::var("SEED_SAMPLE_ENDPOINTS") {
            config.seed_sample_endpoints = seed.to_lowercase() == "true";
        }

        config
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.endpoints_file.as_os_str().is_empty() {
            return Err("endpoints_file cannot be empty".to_string());
        }

        if self.metrics_file.as_os_str().is_empty() {
            return Err("metrics_file cannot be empty".to_string());
        }

        if self.default_timeout_seconds == 0 {
            return Err("default_timeout_seconds must be greater than 0".to_string());
        }

        if self.min_check_interval_seconds == 0 {
            return Err("min_check_interval_seconds must be greater than 0".to_string());
        }

        if self.default_check_interval_seconds < self.min_check_interval_seconds {
            return Err(format!(
                "default_check_interval_seconds must be at least {}",
                self.min_check_interval_seconds
            ));
        }

        if self.stats_interval.is_zero() {
            return Err("stats_interval must be greater than 0".to_string());
        }

        Ok(())
    }
}
