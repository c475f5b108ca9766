use crate::error::{ConfigurationError, NotFoundError, SettingsError};
use crate::records::{Sensor, SensorDefinition, SensorId, ThresholdSettings};
use log::{debug, info};
use std::sync::RwLock;

/// Registry of monitored sensors
///
/// The registry is the single owner of sensor records. Every scheduler tick
/// takes a snapshot of the enabled sensors, while writes only happen on
/// registration, threshold updates and enable/disable. Sensors are never
/// removed; disabling excludes them from sampling but keeps their history
/// addressable.
#[derive(Debug, Default)]
pub struct SensorRegistry {
    /// Sensors in registration order
    sensors: RwLock<Vec<Sensor>>,
}

impl SensorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new sensor
    ///
    /// Both ranges are validated before anything is stored. A caller-supplied id
    /// is kept so configured sensors retain their identity across restarts.
    ///
    /// # Arguments
    ///
    /// * `definition` - Name, location, ranges and optional id of the sensor
    ///
    /// # Returns
    ///
    /// The id of the registered sensor, generated when the definition has none.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError` for an empty name, invalid ranges or an id
    /// that is already registered.
    pub fn register(&self, definition: SensorDefinition) -> Result<SensorId, ConfigurationError> {
        let name = definition.name.trim();
        if name.is_empty() {
            return Err(ConfigurationError::EmptyName);
        }
        let (temperature, humidity) = definition.thresholds.validate()?;

        let mut sensors = self.sensors.write().unwrap_or_else(|e| e.into_inner());
        let id = definition.id.unwrap_or_default();
        if sensors.iter().any(|sensor| sensor.id == id) {
            return Err(ConfigurationError::DuplicateSensor(id));
        }

        sensors.push(Sensor {
            id,
            name: name.to_string(),
            location: definition.location.trim().to_string(),
            temperature,
            humidity,
            enabled: true,
        });

        info!(
            "Registered sensor {} ({}) temperature=[{}, {}] humidity=[{}, {}]",
            name, id, temperature.min, temperature.max, humidity.min, humidity.max
        );
        Ok(id)
    }

    /// Look up a sensor by id
    ///
    /// # Errors
    ///
    /// Returns `NotFoundError::Sensor` if no sensor has this id.
    pub fn get(&self, id: SensorId) -> Result<Sensor, NotFoundError> {
        self.sensors
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|sensor| sensor.id == id)
            .cloned()
            .ok_or(NotFoundError::Sensor(id))
    }

    /// Every sensor, enabled or not, in registration order
    pub fn list_all(&self) -> Vec<Sensor> {
        self.sensors.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Sensors the scheduler should sample
    pub fn list_enabled(&self) -> Vec<Sensor> {
        self.sensors
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|sensor| sensor.enabled)
            .cloned()
            .collect()
    }

    /// Replace both acceptable ranges of a sensor
    ///
    /// Validation happens before the write lock is taken, so a rejected update
    /// leaves the sensor untouched. A successful update is visible to the next
    /// snapshot taken by the scheduler.
    ///
    /// # Returns
    ///
    /// The sensor with its new ranges.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError::Configuration` for invalid ranges and
    /// `SettingsError::NotFound` for an unknown sensor.
    pub fn update_thresholds(
        &self,
        id: SensorId,
        settings: ThresholdSettings,
    ) -> Result<Sensor, SettingsError> {
        let (temperature, humidity) = settings.validate()?;

        let mut sensors = self.sensors.write().unwrap_or_else(|e| e.into_inner());
        let sensor = sensors
            .iter_mut()
            .find(|sensor| sensor.id == id)
            .ok_or(NotFoundError::Sensor(id))?;

        sensor.temperature = temperature;
        sensor.humidity = humidity;

        info!(
            "Updated thresholds for sensor {} ({}): temperature=[{}, {}] humidity=[{}, {}]",
            sensor.name, id, temperature.min, temperature.max, humidity.min, humidity.max
        );
        Ok(sensor.clone())
    }

    /// Enable or disable sampling for a sensor
    ///
    /// # Returns
    ///
    /// `true` if the flag changed, `false` if it already had this value.
    ///
    /// # Errors
    ///
    /// Returns `NotFoundError::Sensor` for an unknown sensor.
    pub fn set_enabled(&self, id: SensorId, enabled: bool) -> Result<bool, NotFoundError> {
        let mut sensors = self.sensors.write().unwrap_or_else(|e| e.into_inner());
        let sensor = sensors
            .iter_mut()
            .find(|sensor| sensor.id == id)
            .ok_or(NotFoundError::Sensor(id))?;

        if sensor.enabled == enabled {
            debug!("Sensor {} already has enabled={}", id, enabled);
            return Ok(false);
        }
        sensor.enabled = enabled;
        info!(
            "Sensor {} ({}) {}",
            sensor.name,
            id,
            if enabled { "enabled" } else { "disabled" }
        );
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.sensors.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
