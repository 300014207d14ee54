//! Configuration management for the query engine
//!
//! TOML file support, environment variable overrides and defaults that match
//! the alerting platform's behaviour.

use crate::types::max_period;
use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Graph building defaults
    #[serde(default)]
    pub query: QueryConfig,

    /// Alert evaluator defaults
    #[serde(default)]
    pub alerts: AlertConfig,

    /// Execution driver tuning
    #[serde(default)]
    pub executor: ExecutorSettings,

    /// Monitoring and observability
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

/// Graph building defaults
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueryConfig {
    /// Lookback used when no select in the program has an explicit range
    #[serde(default = "default_lookback_minutes")]
    pub default_lookback_minutes: i64,

    /// Bucket size attached to aggregators that don't name one
    #[serde(default = "default_sampling_period_secs")]
    pub default_sampling_period_secs: i64,
}

/// Alert evaluator defaults
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AlertConfig {
    /// Recovery period applied when an alert stage doesn't set one
    #[serde(default)]
    pub default_recovery_period_secs: i64,

    /// Threshold dwell applied when an alert stage doesn't set one
    #[serde(default)]
    pub default_dwell_period_secs: i64,

    /// Dwell period for data-absence stages
    #[serde(default = "default_data_absent_dwell_secs")]
    pub data_absent_dwell_secs: i64,

    /// Staleness margin for the data-absence "no recent data" check
    #[serde(default = "default_freshness_cutoff_secs")]
    pub freshness_cutoff_secs: i64,
}

/// Execution driver tuning
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExecutorSettings {
    /// Upper bound on concurrently running stages (0 = unbounded)
    #[serde(default)]
    pub max_concurrent_stages: usize,

    /// Deadline used by `QueryEngine::run_with_config_timeout`
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Monitoring configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitoringConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit JSON log lines
    #[serde(default)]
    pub structured_logging: bool,

    /// Record Prometheus metrics
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
}

// Default value functions
fn default_lookback_minutes() -> i64 { 60 }
fn default_sampling_period_secs() -> i64 { 60 }
fn default_data_absent_dwell_secs() -> i64 { 60 }
fn default_freshness_cutoff_secs() -> i64 { 120 }
fn default_timeout_secs() -> u64 { 30 }
fn default_log_level() -> String { "info".to_string() }
fn default_true() -> bool { true }

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_lookback_minutes: default_lookback_minutes(),
            default_sampling_period_secs: default_sampling_period_secs(),
        }
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            default_recovery_period_secs: 0,
            default_dwell_period_secs: 0,
            data_absent_dwell_secs: default_data_absent_dwell_secs(),
            freshness_cutoff_secs: default_freshness_cutoff_secs(),
        }
    }
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            max_concurrent_stages: 0,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            structured_logging: false,
            metrics_enabled: true,
        }
    }
}

impl QueryConfig {
    /// Default lookback as a duration
    pub fn default_lookback(&self) -> Duration {
        Duration::minutes(self.default_lookback_minutes)
    }

    /// Default sampling period as a duration
    pub fn default_sampling_period(&self) -> Duration {
        Duration::seconds(self.default_sampling_period_secs)
    }
}

impl AlertConfig {
    /// Default recovery period as a duration
    pub fn default_recovery_period(&self) -> Duration {
        Duration::seconds(self.default_recovery_period_secs)
    }

    /// Default threshold dwell as a duration
    pub fn default_dwell_period(&self) -> Duration {
        Duration::seconds(self.default_dwell_period_secs)
    }

    /// Data-absence dwell as a duration
    pub fn data_absent_dwell(&self) -> Duration {
        Duration::seconds(self.data_absent_dwell_secs)
    }

    /// Freshness cutoff as a duration
    pub fn freshness_cutoff(&self) -> Duration {
        Duration::seconds(self.freshness_cutoff_secs)
    }
}

impl EngineConfig {
    /// Load configuration from TOML file
    pub fn from_file(path: &str) -> Result<Self, String> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {}", path, e))?;

        toml::from_str(&contents)
            .map_err(|e| format!("Failed to parse config file {}: {}", path, e))
    }

    /// Load configuration with environment variable overrides
    pub fn from_file_with_env(path: &str) -> Result<Self, String> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from environment variables only
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        // Query
        override_parsed("MQL_DEFAULT_LOOKBACK_MINUTES", &mut self.query.default_lookback_minutes);
        override_parsed("MQL_DEFAULT_SAMPLING_SECS", &mut self.query.default_sampling_period_secs);

        // Alerts
        override_parsed("MQL_RECOVERY_PERIOD_SECS", &mut self.alerts.default_recovery_period_secs);
        override_parsed("MQL_DATA_ABSENT_DWELL_SECS", &mut self.alerts.data_absent_dwell_secs);
        override_parsed("MQL_FRESHNESS_CUTOFF_SECS", &mut self.alerts.freshness_cutoff_secs);

        // Executor
        override_parsed("MQL_MAX_CONCURRENT_STAGES", &mut self.executor.max_concurrent_stages);
        override_parsed("MQL_TIMEOUT_SECS", &mut self.executor.timeout_secs);

        // Monitoring
        if let Ok(log_level) = std::env::var("RUST_LOG") {
            self.monitoring.log_level = log_level;
        }
        override_parsed("MQL_STRUCTURED_LOGGING", &mut self.monitoring.structured_logging);
        override_parsed("MQL_METRICS_ENABLED", &mut self.monitoring.metrics_enabled);
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.query.default_lookback_minutes <= 0 {
            return Err("Default lookback must be > 0 minutes".to_string());
        }
        if self.query.default_sampling_period_secs <= 0 {
            return Err("Default sampling period must be > 0 seconds".to_string());
        }

        if self.alerts.default_recovery_period_secs < 0 {
            return Err("Recovery period cannot be negative".to_string());
        }
        if self.alerts.default_dwell_period_secs < 0 {
            return Err("Dwell period cannot be negative".to_string());
        }
        if self.alerts.data_absent_dwell_secs < 0 {
            return Err("Data-absent dwell period cannot be negative".to_string());
        }
        if self.alerts.freshness_cutoff_secs <= 0 {
            return Err("Freshness cutoff must be > 0 seconds".to_string());
        }

        let max_secs = max_period().num_seconds();
        let periods = [
            ("Default sampling period", self.query.default_sampling_period_secs),
            ("Recovery period", self.alerts.default_recovery_period_secs),
            ("Dwell period", self.alerts.default_dwell_period_secs),
            ("Data-absent dwell period", self.alerts.data_absent_dwell_secs),
            ("Freshness cutoff", self.alerts.freshness_cutoff_secs),
        ];
        for (name, secs) in periods {
            if secs > max_secs {
                return Err(format!("{} must be <= {} seconds", name, max_secs));
            }
        }
        if self.query.default_lookback_minutes > max_period().num_minutes() {
            return Err(format!(
                "Default lookback must be <= {} minutes",
                max_period().num_minutes()
            ));
        }

        if self.executor.timeout_secs == 0 {
            return Err("Executor timeout must be > 0".to_string());
        }

        Ok(())
    }

    /// Save configuration to TOML file
    pub fn save_to_file(&self, path: &str) -> Result<(), String> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize config: {}", e))?;

        std::fs::write(path, contents)
            .map_err(|e| format!("Failed to write config file {}: {}", path, e))
    }
}

fn override_parsed<T: std::str::FromStr>(var: &str, target: &mut T) {
    if let Ok(raw) = std::env::var(var) {
        match raw.parse() {
            Ok(value) => *target = value,
            Err(_) => tracing::warn!(variable = var, value = %raw, "Ignoring unparseable override"),
        }
    }
}
