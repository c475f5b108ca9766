use crate::records::{AlertId, Dimension, SensorId};
use thiserror::Error;

/// Errors raised when sensor threshold configuration is rejected
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    #[error("Invalid {dimension} range: min {min} must be below max {max}")]
    InvalidRange {
        dimension: Dimension,
        min: f64,
        max: f64,
    },

    #[error("Non-finite {dimension} bound")]
    NonFiniteBound { dimension: Dimension },

    #[error("Sensor name must not be empty")]
    EmptyName,

    #[error("Sensor {0} is already registered")]
    DuplicateSensor(SensorId),
}

/// Errors raised when an action references an unknown record
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotFoundError {
    #[error("Sensor not found: {0}")]
    Sensor(SensorId),

    #[error("Alert not found: {0}")]
    Alert(AlertId),
}

/// Errors that can occur while reading or writing historical readings
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Failed to write reading: {0}")]
    WriteFailed(String),

    #[error("Failed to read readings: {0}")]
    ReadFailed(String),

    #[error("Reading for sensor {sensor_id} at {captured_at} is older than the last stored reading")]
    OutOfOrder {
        sensor_id: SensorId,
        captured_at: String,
    },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Errors that can occur while acquiring a reading from a sensor source
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AcquisitionError {
    #[error("Reading source unavailable for sensor {sensor_id}: {reason}")]
    SourceUnavailable { sensor_id: SensorId, reason: String },

    #[error("Timed out acquiring reading for sensor {0}")]
    Timeout(SensorId),

    #[error("Invalid sample for sensor {sensor_id}: {reason}")]
    InvalidSample { sensor_id: SensorId, reason: String },
}

/// Errors returned by the sensor settings update operation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SettingsError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    NotFound(#[from] NotFoundError),
}

/// Reason one sensor's sample was skipped during a tick
#[derive(Error, Debug)]
pub enum SampleError {
    #[error(transparent)]
    Acquisition(#[from] AcquisitionError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

/// Errors raised by scheduler state transitions
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("Scheduler must be started from within a tokio runtime")]
    NoRuntime,

    #[error("Sampling interval must be greater than zero")]
    ZeroInterval,
}

/// Errors that can occur during configuration loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Invalid configuration value: {0}")]
    ValidationError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_error_wraps_both_kinds() {
        let config: SettingsError = ConfigurationError::EmptyName.into();
        assert!(matches!(config, SettingsError::Configuration(_)));

        let id = SensorId::new();
        let missing: SettingsError = NotFoundError::Sensor(id).into();
        assert_eq!(missing.to_string(), format!("Sensor not found: {}", id));
    }

    #[test]
    fn test_invalid_range_message() {
        let err = ConfigurationError::InvalidRange {
            dimension: Dimension::Temperature,
            min: 8.0,
            max: 2.0,
        };
        assert_eq!(
            err.to_string(),
            "Invalid temperature range: min 8 must be below max 2"
        );
    }
}
