/// Sensor definitions and acceptable-range configuration
pub mod sensor_registry;

pub use sensor_registry::SensorRegistry;
