//! Configuration loading from TOML with environment variable overrides.
//!
//! Looks for `smarthome.toml` in the working directory, or the file named by
//! `SMARTHOME_CONFIG`. Every field has a default so the file is optional.

use automation_engine::{AutomationConfig, RuleSpec};
use home_monitoring::{MonitorConfig, PowerConfig};
use home_runtime::EventBusConfig;
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;

const DEFAULT_PATH: &str = "smarthome.toml";

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub events: EventsConfig,
    pub automation: AutomationSection,
    pub monitor: MonitorSection,
    pub power: PowerSection,
    pub home: HomeConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive (`RUST_LOG` syntax).
    pub filter: String,
}

/// Event bus sizing.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    pub capacity: usize,
    pub workers: usize,
    pub publish_timeout_ms: u64,
    pub dispatch_timeout_ms: u64,
    /// Start the worker pool at launch.
    pub autostart: bool,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AutomationSection {
    pub interval_ms: u64,
    pub rule_timeout_ms: u64,
    /// Rules installed by the first `automate start`.
    pub default_rules: Vec<RuleSpec>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct MonitorSection {
    pub interval_ms: u64,
    pub long_running_secs: u64,
    pub frequent_change_threshold: u64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PowerSection {
    pub sample_interval_ms: u64,
    pub report_interval_secs: u64,
    pub threshold_watts: u32,
    pub cost_per_kwh: f64,
    pub optimization_pacing_ms: u64,
}

/// Devices created at launch.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct HomeConfig {
    /// Create the standard set of lights, thermostat and cameras.
    pub standard_setup: bool,
    /// Prefix joined to standard device names; empty for none.
    pub prefix: String,
}

impl Config {
    /// Load the config file (if present) then apply environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but is malformed or invalid.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("SMARTHOME_CONFIG").unwrap_or_else(|_| DEFAULT_PATH.to_string());
        let mut config = Self::from_file(&path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(ConfigError::Parse),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(ConfigError::Io(err)),
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("SMARTHOME_LOG") {
            self.logging.filter = val;
        }
        if let Ok(val) = std::env::var("RUST_LOG") {
            self.logging.filter = val;
        }
        if let Ok(val) = std::env::var("SMARTHOME_POWER_THRESHOLD") {
            if let Ok(watts) = val.parse() {
                self.power.threshold_watts = watts;
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Validation(msg.to_string()));

        if self.events.capacity == 0 {
            return invalid("events.capacity must be non-zero");
        }
        if self.events.workers == 0 {
            return invalid("events.workers must be non-zero");
        }
        if self.automation.interval_ms == 0 || self.automation.rule_timeout_ms == 0 {
            return invalid("automation intervals must be non-zero");
        }
        if self.monitor.interval_ms == 0 {
            return invalid("monitor.interval_ms must be non-zero");
        }
        if self.power.sample_interval_ms == 0 || self.power.report_interval_secs == 0 {
            return invalid("power intervals must be non-zero");
        }
        if !self.power.cost_per_kwh.is_finite() || self.power.cost_per_kwh < 0.0 {
            return invalid("power.cost_per_kwh must be a non-negative number");
        }

        let mut names = HashSet::new();
        for spec in &self.automation.default_rules {
            if !names.insert(spec.name().to_ascii_lowercase()) {
                return Err(ConfigError::Validation(format!(
                    "duplicate default rule: {}",
                    spec.name()
                )));
            }
            spec.build()
                .map_err(|e| ConfigError::Validation(format!("rule {}: {}", spec.name(), e)))?;
        }
        Ok(())
    }

    pub fn event_bus_config(&self) -> EventBusConfig {
        EventBusConfig {
            capacity: self.events.capacity,
            workers: self.events.workers,
            publish_timeout: Duration::from_millis(self.events.publish_timeout_ms),
            dispatch_timeout: Duration::from_millis(self.events.dispatch_timeout_ms),
            ..EventBusConfig::default()
        }
    }

    pub fn automation_config(&self) -> AutomationConfig {
        AutomationConfig {
            interval: Duration::from_millis(self.automation.interval_ms),
            rule_timeout: Duration::from_millis(self.automation.rule_timeout_ms),
            ..AutomationConfig::default()
        }
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            interval: Duration::from_millis(self.monitor.interval_ms),
            long_running_threshold: Duration::from_secs(self.monitor.long_running_secs),
            frequent_change_threshold: self.monitor.frequent_change_threshold,
            ..MonitorConfig::default()
        }
    }

    pub fn power_config(&self) -> PowerConfig {
        PowerConfig {
            sample_interval: Duration::from_millis(self.power.sample_interval_ms),
            report_interval: Duration::from_secs(self.power.report_interval_secs),
            threshold_watts: self.power.threshold_watts,
            cost_per_kwh: self.power.cost_per_kwh,
            optimization_pacing: Duration::from_millis(self.power.optimization_pacing_ms),
            ..PowerConfig::default()
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "smarthome=debug,smarthome_shell=debug,info".to_string(),
        }
    }
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            workers: 3,
            publish_timeout_ms: 100,
            dispatch_timeout_ms: 500,
            autostart: true,
        }
    }
}

impl Default for AutomationSection {
    fn default() -> Self {
        Self {
            interval_ms: 5000,
            rule_timeout_ms: 2000,
            default_rules: vec![
                RuleSpec::Temperature {
                    name: "Comfort Maintenance".to_string(),
                    target: 22,
                    tolerance: 2,
                },
                RuleSpec::Security {
                    name: "Security Response".to_string(),
                    cooldown_secs: 30,
                },
            ],
        }
    }
}

impl Default for MonitorSection {
    fn default() -> Self {
        Self {
            interval_ms: 5000,
            long_running_secs: 3600,
            frequent_change_threshold: 10,
        }
    }
}

impl Default for PowerSection {
    fn default() -> Self {
        Self {
            sample_interval_ms: 2000,
            report_interval_secs: 30,
            threshold_watts: 500,
            cost_per_kwh: 0.12,
            optimization_pacing_ms: 500,
        }
    }
}

impl Default for HomeConfig {
    fn default() -> Self {
        Self {
            standard_setup: true,
            prefix: String::new(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse config file")]
    Parse(#[from] toml::de::Error),
    #[error("failed to read config file")]
    Io(#[from] std::io::Error),
    #[error("invalid configuration: {0}")]
    Validation(String),
}
