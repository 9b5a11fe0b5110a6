//! Application configuration with layered loading.
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded in this order (later overrides earlier):
//!
//! 1. **Compiled defaults**: `Default` implementations and `set_default` calls
//! 2. **Config file**: TOML file named by the `MULTICLIENT_CONFIG` env var
//! 3. **Environment variables**: `MULTICLIENT__*` env vars override single fields
//!
//! # Configuration Sections
//!
//! - [`ServerConfig`]: HTTP front-end bind address and request limits
//! - `engines`: ordered list of [`EngineTarget`]s connected at startup
//! - [`PolicyConfig`]: health probing, debounce thresholds and dispatch policy
//! - [`LoggingConfig`]: log level and format
//! - [`MetricsConfig`]: Prometheus endpoint
//!
//! # Example
//!
//! ```toml
//! [server]
//! bind_address = "0.0.0.0"
//! bind_port = 8080
//!
//! [[engines]]
//! name = "ls-1"
//! address = "http://10.0.0.1:8081"
//!
//! [policy]
//! probe_interval_ms = 1000
//! retry_budget = 3
//! broadcast_policy = "all_results"
//! ```

use crate::{
    engine::{DispatchPolicy, HealthThresholds, MonitorConfig, PoolBounds},
    types::{BroadcastPolicy, EngineTarget},
};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{collections::HashSet, path::Path, time::Duration};

/// HTTP front-end settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    #[serde(default = "default_bind_port")]
    pub bind_port: u16,

    /// Maximum accepted request body in bytes.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_bind_port() -> u16 {
    8080
}

fn default_max_body_bytes() -> usize {
    1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            bind_port: default_bind_port(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

/// Health and dispatch policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    #[serde(default = "default_probe_interval_ms")]
    pub probe_interval_ms: u64,

    #[serde(default = "default_dead_probe_interval_ms")]
    pub dead_probe_interval_ms: u64,

    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    #[serde(default = "default_archival_check_interval_secs")]
    pub archival_check_interval_secs: u64,

    #[serde(default = "default_probe_request")]
    pub probe_request: Value,

    /// JSON pointer to the masterchain height in the probe response.
    #[serde(default = "default_height_pointer")]
    pub height_pointer: String,

    #[serde(default = "default_archival_request")]
    pub archival_request: Value,

    #[serde(default = "default_recovery_successes")]
    pub recovery_successes: u32,

    #[serde(default = "default_degrade_after_failures")]
    pub degrade_after_failures: u32,

    #[serde(default = "default_dead_after_failures")]
    pub dead_after_failures: u32,

    #[serde(default = "default_max_height_lag")]
    pub max_height_lag: u64,

    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,

    #[serde(default = "default_retry_budget")]
    pub retry_budget: u32,

    #[serde(default)]
    pub broadcast_policy: BroadcastPolicy,

    #[serde(default = "default_exclude_dead")]
    pub exclude_dead: bool,

    #[serde(default)]
    pub min_engines: usize,

    #[serde(default = "default_max_engines")]
    pub max_engines: usize,
}

fn default_probe_interval_ms() -> u64 {
    2_000
}

fn default_dead_probe_interval_ms() -> u64 {
    10_000
}

fn default_probe_timeout_ms() -> u64 {
    3_000
}

fn default_archival_check_interval_secs() -> u64 {
    120
}

fn default_probe_request() -> Value {
    MonitorConfig::default().probe_request
}

fn default_height_pointer() -> String {
    "/last/seqno".to_string()
}

fn default_archival_request() -> Value {
    MonitorConfig::default().archival_request
}

fn default_recovery_successes() -> u32 {
    3
}

fn default_degrade_after_failures() -> u32 {
    2
}

fn default_dead_after_failures() -> u32 {
    10
}

fn default_max_height_lag() -> u64 {
    10
}

fn default_timeout_ms() -> u64 {
    5_000
}

fn default_retry_budget() -> u32 {
    3
}

fn default_exclude_dead() -> bool {
    true
}

fn default_max_engines() -> usize {
    64
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            probe_interval_ms: default_probe_interval_ms(),
            dead_probe_interval_ms: default_dead_probe_interval_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
            archival_check_interval_secs: default_archival_check_interval_secs(),
            probe_request: default_probe_request(),
            height_pointer: default_height_pointer(),
            archival_request: default_archival_request(),
            recovery_successes: default_recovery_successes(),
            degrade_after_failures: default_degrade_after_failures(),
            dead_after_failures: default_dead_after_failures(),
            max_height_lag: default_max_height_lag(),
            default_timeout_ms: default_timeout_ms(),
            retry_budget: default_retry_budget(),
            broadcast_policy: BroadcastPolicy::default(),
            exclude_dead: default_exclude_dead(),
            min_engines: 0,
            max_engines: default_max_engines(),
        }
    }
}

impl PolicyConfig {
    #[must_use]
    pub fn thresholds(&self) -> HealthThresholds {
        HealthThresholds {
            recovery_successes: self.recovery_successes,
            degrade_after_failures: self.degrade_after_failures,
            dead_after_failures: self.dead_after_failures,
            max_height_lag: self.max_height_lag,
        }
    }

    #[must_use]
    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            probe_interval: Duration::from_millis(self.probe_interval_ms),
            dead_probe_interval: Duration::from_millis(self.dead_probe_interval_ms),
            probe_timeout: Duration::from_millis(self.probe_timeout_ms),
            archival_check_interval: Duration::from_secs(self.archival_check_interval_secs),
            probe_request: self.probe_request.clone(),
            height_pointer: self.height_pointer.clone(),
            archival_request: self.archival_request.clone(),
            thresholds: self.thresholds(),
        }
    }

    #[must_use]
    pub fn dispatch_policy(&self) -> DispatchPolicy {
        DispatchPolicy {
            default_timeout: Duration::from_millis(self.default_timeout_ms),
            retry_budget: self.retry_budget,
            broadcast_policy: self.broadcast_policy,
            exclude_dead: self.exclude_dead,
        }
    }

    #[must_use]
    pub fn bounds(&self) -> PoolBounds {
        PoolBounds { min_engines: self.min_engines, max_engines: self.max_engines }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// `json` or `pretty`.
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level(), format: default_log_format() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: default_metrics_enabled() }
    }
}

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub engines: Vec<EngineTarget>,

    #[serde(default)]
    pub policy: PolicyConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl AppConfig {
    /// Loads configuration from a TOML file with environment variable overrides.
    ///
    /// Use `__` as a separator for nested fields, e.g.
    /// `MULTICLIENT__POLICY__RETRY_BUDGET=5`. A missing file is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be parsed or deserialized.
    pub fn from_file<P: AsRef<Path>>(config_path: P) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .set_default("server.bind_address", default_bind_address())?
            .set_default("server.bind_port", i64::from(default_bind_port()))?
            .set_default("logging.level", default_log_level())?
            .set_default("logging.format", default_log_format())?
            .set_default("metrics.enabled", default_metrics_enabled())?
            .add_source(File::with_name(&config_path.as_ref().to_string_lossy()).required(false))
            .add_source(Environment::with_prefix("MULTICLIENT").separator("__"))
            .build()?;

        config.try_deserialize()
    }

    /// Loads configuration from `MULTICLIENT_CONFIG`, defaulting to `config/config.toml`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration cannot be loaded or parsed.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = std::env::var("MULTICLIENT_CONFIG")
            .unwrap_or_else(|_| "config/config.toml".to_string());
        Self::from_file(&config_path)
    }

    /// Returns the parsed socket address of the HTTP front-end.
    ///
    /// # Errors
    ///
    /// Returns an error string if the address cannot be parsed.
    pub fn socket_addr(&self) -> Result<std::net::SocketAddr, String> {
        let address = format!("{}:{}", self.server.bind_address, self.server.bind_port);
        address.parse().map_err(|_| format!("Invalid socket address: {address}"))
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns a descriptive error string if validation fails.
    pub fn validate(&self) -> Result<(), String> {
        let mut names = HashSet::new();
        for engine in &self.engines {
            if engine.name.is_empty() {
                return Err(format!("Engine with address {} has no name", engine.address));
            }
            if engine.address.is_empty() {
                return Err(format!("Empty address for engine: {}", engine.name));
            }
            if !names.insert(engine.name.as_str()) {
                return Err(format!("Duplicate engine name: {}", engine.name));
            }
        }

        let policy = &self.policy;
        if policy.probe_interval_ms == 0 || policy.dead_probe_interval_ms == 0 {
            return Err("Probe intervals must be greater than 0".to_string());
        }
        if policy.probe_timeout_ms == 0 || policy.default_timeout_ms == 0 {
            return Err("Timeouts must be greater than 0".to_string());
        }
        if policy.retry_budget == 0 {
            return Err("Retry budget must be at least 1".to_string());
        }
        if policy.recovery_successes == 0 {
            return Err("Recovery successes must be at least 1".to_string());
        }
        if policy.degrade_after_failures == 0 ||
            policy.degrade_after_failures > policy.dead_after_failures
        {
            return Err(
                "degrade_after_failures must be between 1 and dead_after_failures".to_string()
            );
        }
        if !policy.height_pointer.is_empty() && !policy.height_pointer.starts_with('/') {
            return Err(format!("Invalid height pointer: {}", policy.height_pointer));
        }
        if policy.min_engines > policy.max_engines {
            return Err(format!(
                "min_engines ({}) exceeds max_engines ({})",
                policy.min_engines, policy.max_engines
            ));
        }
        if self.engines.len() > policy.max_engines || self.engines.len() < policy.min_engines {
            return Err(format!(
                "{} engines configured, pool bounds are {}..={}",
                self.engines.len(),
                policy.min_engines,
                policy.max_engines
            ));
        }

        if self.server.bind_port == 0 {
            return Err("Bind port must be greater than 0".to_string());
        }

        if !["json", "pretty"].contains(&self.logging.format.as_str()) {
            return Err("Logging format must be 'json' or 'pretty'".to_string());
        }

        Ok(())
    }
}
