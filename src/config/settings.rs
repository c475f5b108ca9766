use crate::alerts::LifecycleConfig;
use crate::error::ConfigError;
use crate::records::SensorDefinition;
use crate::scheduler::{SchedulerConfig, TickSettings};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Upper bound for `alerts.escalation_minutes` (about 19 years)
const MAX_ESCALATION_MINUTES: u64 = 10_000_000;

/// Upper bound for `storage.retention_days` (100 years)
const MAX_RETENTION_DAYS: u32 = 36_500;

/// Application configuration loaded from a TOML file
///
/// Every section and field has a default, so an empty file is a valid
/// configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scheduler: SchedulerSettings,
    pub alerts: AlertSettings,
    pub notifications: NotificationSettings,
    pub storage: StorageSettings,
    pub source: SourceSettings,
    /// Sensors registered at startup
    pub sensors: Vec<SensorDefinition>,
}

/// Sampling cadence and per-tick limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    pub interval_seconds: u64,
    pub max_concurrency: usize,
    pub acquisition_timeout_ms: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            interval_seconds: 30,
            max_concurrency: 8,
            acquisition_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertSettings {
    /// Minutes an alert may stay active before it is reported as critical
    pub escalation_minutes: u64,
    pub auto_resolve_on_recovery: bool,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            escalation_minutes: 30,
            auto_resolve_on_recovery: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationSettings {
    pub rate_limit_per_minute: usize,
    /// Send newly raised alerts to every destination automatically
    pub auto_notify: bool,
    pub destinations: Vec<String>,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            rate_limit_per_minute: 10,
            auto_notify: false,
            destinations: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// JSON-lines history file; readings stay in memory when unset
    pub path: Option<PathBuf>,
    pub retention_days: Option<u32>,
    pub max_in_memory_readings: usize,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            path: None,
            retention_days: None,
            max_in_memory_readings: 20_160,
        }
    }
}

/// Synthetic source used when no hardware driver is wired in
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceSettings {
    pub seed: u64,
    /// One out-of-range sample per this many; 0 disables excursions
    pub excursion_every: u64,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            seed: 0x5eed,
            excursion_every: 20,
        }
    }
}

impl Config {
    /// Load and validate configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ReadError` if the file cannot be read,
    /// `ConfigError::TomlError` if it is not valid TOML for this schema, and
    /// `ConfigError::ValidationError` if a value is out of range.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;
        contents.parse()
    }

    /// Check every section for out-of-range values
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: &str| Err(ConfigError::ValidationError(message.to_string()));

        if self.scheduler.interval_seconds == 0 {
            return invalid("scheduler.interval_seconds must be greater than 0");
        }
        if self.scheduler.max_concurrency == 0 {
            return invalid("scheduler.max_concurrency must be greater than 0");
        }
        if self.scheduler.acquisition_timeout_ms == 0 {
            return invalid("scheduler.acquisition_timeout_ms must be greater than 0");
        }
        if self.alerts.escalation_minutes == 0
            || self.alerts.escalation_minutes > MAX_ESCALATION_MINUTES
        {
            return invalid("alerts.escalation_minutes must be between 1 and 10000000");
        }
        if self.notifications.rate_limit_per_minute == 0 {
            return invalid("notifications.rate_limit_per_minute must be greater than 0");
        }
        if self
            .notifications
            .destinations
            .iter()
            .any(|destination| destination.trim().is_empty())
        {
            return invalid("notifications.destinations must not contain empty entries");
        }
        if self.notifications.auto_notify && self.notifications.destinations.is_empty() {
            return invalid("notifications.auto_notify requires at least one destination");
        }
        if let Some(days) = self.storage.retention_days {
            if days == 0 || days > MAX_RETENTION_DAYS {
                return invalid("storage.retention_days must be between 1 and 36500");
            }
        }
        if self.storage.max_in_memory_readings == 0 {
            return invalid("storage.max_in_memory_readings must be greater than 0");
        }

        let mut ids = HashSet::new();
        for sensor in &self.sensors {
            if sensor.name.trim().is_empty() {
                return invalid("sensors entries must have a name");
            }
            sensor.thresholds.validate().map_err(|e| {
                ConfigError::ValidationError(format!("sensor '{}': {}", sensor.name, e))
            })?;
            if let Some(id) = sensor.id {
                if !ids.insert(id) {
                    return Err(ConfigError::ValidationError(format!(
                        "sensor id {} is configured more than once",
                        id
                    )));
                }
            }
        }

        Ok(())
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            interval: Duration::from_secs(self.scheduler.interval_seconds),
            tick: TickSettings {
                max_concurrency: self.scheduler.max_concurrency,
                acquisition_timeout: Duration::from_millis(self.scheduler.acquisition_timeout_ms),
            },
            retention: self
                .storage
                .retention_days
                .map(|days| chrono::Duration::days(i64::from(days))),
            auto_notify: self.notifications.auto_notify,
            destinations: self.notifications.destinations.clone(),
            ..SchedulerConfig::default()
        }
    }

    pub fn lifecycle_config(&self) -> LifecycleConfig {
        LifecycleConfig {
            escalation: chrono::Duration::minutes(
                self.alerts.escalation_minutes.min(MAX_ESCALATION_MINUTES) as i64,
            ),
            auto_resolve_on_recovery: self.alerts.auto_resolve_on_recovery,
        }
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    /// Parse and validate configuration from TOML text
    fn from_str(contents: &str) -> Result<Self, Self::Err> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = r#"
[scheduler]
interval_seconds = 15
max_concurrency = 4

[alerts]
escalation_minutes = 45
auto_resolve_on_recovery = true

[notifications]
rate_limit_per_minute = 5
auto_notify = true
destinations = ["pharmacist-on-call@example.com"]

[storage]
path = "readings.jsonl"
retention_days = 90

[[sensors]]
id = "9f3c2a4e-1d2b-4c5e-8f70-123456789abc"
name = "Vaccine fridge"
location = "Pharmacy"
temp_min = 2.0
temp_max = 8.0
humidity_min = 30.0
humidity_max = 60.0

[[sensors]]
name = "Freezer"
tempMin = -25
tempMax = -15
humidityMin = 10
humidityMax = 70
"#;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.scheduler.interval_seconds, 30);
        assert!(config.sensors.is_empty());
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config: Config = "".parse().unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_parse_full_config() {
        let config: Config = SAMPLE.parse().unwrap();

        assert_eq!(config.scheduler.interval_seconds, 15);
        assert_eq!(config.scheduler.max_concurrency, 4);
        assert_eq!(config.scheduler.acquisition_timeout_ms, 10_000);
        assert!(config.alerts.auto_resolve_on_recovery);
        assert_eq!(config.notifications.destinations.len(), 1);
        assert_eq!(config.storage.path, Some(PathBuf::from("readings.jsonl")));

        assert_eq!(config.sensors.len(), 2);
        assert!(config.sensors[0].id.is_some());
        assert_eq!(config.sensors[0].thresholds.temp_max, 8.0);
        assert_eq!(config.sensors[1].thresholds.temp_min, -25.0);
        assert_eq!(config.sensors[1].location, "");
    }

    #[test]
    fn test_derived_runtime_configs() {
        let config: Config = SAMPLE.parse().unwrap();

        let scheduler = config.scheduler_config();
        assert_eq!(scheduler.interval, Duration::from_secs(15));
        assert_eq!(scheduler.tick.max_concurrency, 4);
        assert_eq!(scheduler.retention, Some(chrono::Duration::days(90)));
        assert!(scheduler.auto_notify);

        let lifecycle = config.lifecycle_config();
        assert_eq!(lifecycle.escalation, chrono::Duration::minutes(45));
        assert!(lifecycle.auto_resolve_on_recovery);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        for contents in [
            "[scheduler]\ninterval_seconds = 0",
            "[scheduler]\nmax_concurrency = 0",
            "[alerts]\nescalation_minutes = 0",
            "[notifications]\nrate_limit_per_minute = 0",
            "[notifications]\nauto_notify = true",
            "[storage]\nretention_days = 0",
            "[storage]\nretention_days = 4000000000",
            "[[sensors]]\nname = \"Inverted\"\ntemp_min = 8.0\ntemp_max = 2.0\nhumidity_min = 30.0\nhumidity_max = 60.0",
            "[[sensors]]\nname = \" \"\ntemp_min = 2.0\ntemp_max = 8.0\nhumidity_min = 30.0\nhumidity_max = 60.0",
        ] {
            let result: Result<Config, _> = contents.parse();
            assert!(
                matches!(result, Err(ConfigError::ValidationError(_))),
                "expected validation error for {:?}",
                contents
            );
        }
    }

    #[test]
    fn test_malformed_toml_is_a_toml_error() {
        let result: Result<Config, _> = "[scheduler\ninterval_seconds = ".parse();
        assert!(matches!(result, Err(ConfigError::TomlError(_))));
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.sensors[0].name, "Vaccine fridge");
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let result = Config::from_file(Path::new("/nonexistent/coldwatch.toml"));
        assert!(matches!(result, Err(ConfigError::ReadError(_))));
    }
}
