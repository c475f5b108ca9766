//! Core record types for the cold-chain monitor
//!
//! This module defines the typed records shared by every component: sensors and
//! their acceptable ranges, readings, alerts and the derived alert severity.
//! All records serialize with camelCase field names, matching the persisted
//! layout of the sensors, readings and alerts record sets.

use crate::error::{AcquisitionError, ConfigurationError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Timestamp type for consistent time handling across the engine
pub type Timestamp = DateTime<Utc>;

/// Generated identifier of a registered sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SensorId(Uuid);

impl SensorId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SensorId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SensorId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Generated identifier of an alert instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlertId(Uuid);

impl AlertId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AlertId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AlertId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for AlertId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Measured quantity a threshold or alert concerns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    Temperature,
    Humidity,
}

impl Dimension {
    pub const ALL: [Dimension; 2] = [Dimension::Temperature, Dimension::Humidity];

    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::Temperature => "temperature",
            Dimension::Humidity => "humidity",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inclusive acceptable range for one dimension
///
/// Constructed through [`Range::new`], which enforces finite bounds and
/// `min < max`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Range {
    pub min: f64,
    pub max: f64,
}

impl Range {
    /// Create a validated range for the given dimension
    pub fn new(dimension: Dimension, min: f64, max: f64) -> Result<Self, ConfigurationError> {
        if !min.is_finite() || !max.is_finite() {
            return Err(ConfigurationError::NonFiniteBound { dimension });
        }
        if min >= max {
            return Err(ConfigurationError::InvalidRange {
                dimension,
                min,
                max,
            });
        }
        Ok(Self { min, max })
    }

    /// Whether `value` lies within the range, bounds included
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Raw threshold bounds as supplied by an operator or a config file
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdSettings {
    #[serde(alias = "temp_min")]
    pub temp_min: f64,
    #[serde(alias = "temp_max")]
    pub temp_max: f64,
    #[serde(alias = "humidity_min")]
    pub humidity_min: f64,
    #[serde(alias = "humidity_max")]
    pub humidity_max: f64,
}

impl ThresholdSettings {
    /// Validate both ranges; nothing is returned unless both are valid
    pub fn validate(&self) -> Result<(Range, Range), ConfigurationError> {
        let temperature = Range::new(Dimension::Temperature, self.temp_min, self.temp_max)?;
        let humidity = Range::new(Dimension::Humidity, self.humidity_min, self.humidity_max)?;
        Ok((temperature, humidity))
    }
}

/// Definition used to register a new sensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorDefinition {
    /// Stable identifier; generated when absent
    #[serde(default)]
    pub id: Option<SensorId>,
    pub name: String,
    #[serde(default)]
    pub location: String,
    #[serde(flatten)]
    pub thresholds: ThresholdSettings,
}

impl SensorDefinition {
    pub fn new(
        name: impl Into<String>,
        location: impl Into<String>,
        thresholds: ThresholdSettings,
    ) -> Self {
        Self {
            id: None,
            name: name.into(),
            location: location.into(),
            thresholds,
        }
    }

    pub fn with_id(mut self, id: SensorId) -> Self {
        self.id = Some(id);
        self
    }
}

/// A monitored storage unit with its acceptable ranges
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sensor {
    pub id: SensorId,
    pub name: String,
    pub location: String,
    pub temperature: Range,
    pub humidity: Range,
    /// Disabled sensors are kept but excluded from sampling
    pub enabled: bool,
}

impl Sensor {
    pub fn range(&self, dimension: Dimension) -> Range {
        match dimension {
            Dimension::Temperature => self.temperature,
            Dimension::Humidity => self.humidity,
        }
    }
}

/// One timestamped temperature and humidity sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reading {
    pub sensor_id: SensorId,
    pub temperature: f64,
    pub humidity: f64,
    pub captured_at: Timestamp,
}

impl Reading {
    /// Create a reading, rejecting non-finite values
    pub fn new(
        sensor_id: SensorId,
        temperature: f64,
        humidity: f64,
        captured_at: Timestamp,
    ) -> Result<Self, AcquisitionError> {
        if !temperature.is_finite() || !humidity.is_finite() {
            return Err(AcquisitionError::InvalidSample {
                sensor_id,
                reason: format!(
                    "non-finite values (temperature={}, humidity={})",
                    temperature, humidity
                ),
            });
        }
        Ok(Self {
            sensor_id,
            temperature,
            humidity,
            captured_at,
        })
    }

    pub fn value(&self, dimension: Dimension) -> f64 {
        match dimension {
            Dimension::Temperature => self.temperature,
            Dimension::Humidity => self.humidity,
        }
    }
}

/// Lifecycle status of an alert instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Active,
    Resolved,
}

/// Record of an out-of-range condition for one sensor and dimension
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: AlertId,
    pub sensor_id: SensorId,
    pub dimension: Dimension,
    /// Most recent out-of-range value
    pub observed_value: f64,
    /// Bound that was crossed by `observed_value`
    pub violated_threshold: f64,
    pub status: AlertStatus,
    pub raised_at: Timestamp,
    pub last_observed_at: Timestamp,
    /// Number of sampled violations folded into this alert
    pub occurrences: u32,
    pub resolved_at: Option<Timestamp>,
}

impl Alert {
    pub fn is_active(&self) -> bool {
        self.status == AlertStatus::Active
    }
}

/// Severity derived from how long an alert has stayed unresolved
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Critical,
}

/// Alert together with its severity computed at read time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertView {
    #[serde(flatten)]
    pub alert: Alert,
    pub severity: Severity,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fridge_thresholds() -> ThresholdSettings {
        ThresholdSettings {
            temp_min: 2.0,
            temp_max: 8.0,
            humidity_min: 30.0,
            humidity_max: 60.0,
        }
    }

    #[test]
    fn test_range_rejects_inverted_and_equal_bounds() {
        assert!(Range::new(Dimension::Temperature, 8.0, 2.0).is_err());
        assert!(Range::new(Dimension::Temperature, 5.0, 5.0).is_err());
        assert!(Range::new(Dimension::Humidity, f64::NAN, 5.0).is_err());
        assert!(Range::new(Dimension::Humidity, 0.0, f64::INFINITY).is_err());
        assert!(Range::new(Dimension::Humidity, 30.0, 60.0).is_ok());
    }

    #[test]
    fn test_range_is_inclusive() {
        let range = Range::new(Dimension::Temperature, 2.0, 8.0).unwrap();
        assert!(range.contains(2.0));
        assert!(range.contains(8.0));
        assert!(!range.contains(8.0001));
        assert!(!range.contains(1.9999));
    }

    #[test]
    fn test_threshold_settings_validate_reports_first_bad_dimension() {
        let mut settings = fridge_thresholds();
        settings.humidity_min = 70.0;
        let err = settings.validate().unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::InvalidRange {
                dimension: Dimension::Humidity,
                min: 70.0,
                max: 60.0
            }
        );
    }

    #[test]
    fn test_reading_rejects_non_finite_values() {
        let id = SensorId::new();
        assert!(Reading::new(id, f64::NAN, 40.0, Utc::now()).is_err());
        assert!(Reading::new(id, 4.0, f64::NEG_INFINITY, Utc::now()).is_err());
        assert!(Reading::new(id, 4.0, 40.0, Utc::now()).is_ok());
    }

    #[test]
    fn test_reading_serializes_camel_case() {
        let reading = Reading::new(SensorId::new(), 4.5, 41.0, Utc::now()).unwrap();
        let json = serde_json::to_value(&reading).unwrap();
        assert!(json.get("sensorId").is_some());
        assert!(json.get("capturedAt").is_some());
    }

    #[test]
    fn test_alert_view_flattens_alert_fields() {
        let now = Utc::now();
        let view = AlertView {
            alert: Alert {
                id: AlertId::new(),
                sensor_id: SensorId::new(),
                dimension: Dimension::Temperature,
                observed_value: 9.5,
                violated_threshold: 8.0,
                status: AlertStatus::Active,
                raised_at: now,
                last_observed_at: now,
                occurrences: 1,
                resolved_at: None,
            },
            severity: Severity::Warning,
        };

        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["dimension"], "temperature");
        assert_eq!(json["status"], "active");
        assert_eq!(json["severity"], "warning");
        assert_eq!(json["violatedThreshold"], 8.0);
    }

    #[test]
    fn test_sensor_definition_from_toml() {
        let definition: SensorDefinition = toml::from_str(
            r#"
            name = "Vaccine fridge"
            location = "Back room"
            temp_min = 2.0
            temp_max = 8.0
            humidity_min = 30.0
            humidity_max = 60.0
            "#,
        )
        .unwrap();

        assert_eq!(definition.name, "Vaccine fridge");
        assert_eq!(definition.thresholds, fridge_thresholds());
        assert!(definition.id.is_none());
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Warning < Severity::Critical);
    }
}
