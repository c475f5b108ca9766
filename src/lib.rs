/// Error types for the monitoring engine
pub mod error;

/// Sensors, readings, alerts and their identifiers
pub mod records;

/// Injectable time source
pub mod clock;

/// Registered sensors and their thresholds
pub mod registry;

/// Threshold evaluation of readings
pub mod evaluator;

/// Historical reading persistence
pub mod store;

/// Reading acquisition from sensors
pub mod acquisition;

/// Alert lifecycle and notification delivery
pub mod alerts;

/// Topic-based change broadcasting
pub mod hub;

/// Periodic sampling pipeline
pub mod scheduler;

/// Monitoring engine facade
pub mod engine;

/// Configuration management
pub mod config;

/// Boxed future returned by the async collaborator traits
pub type BoxFuture<T> = std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send>>;

// Re-export commonly used types
pub use engine::{MonitorEngine, MonitorEngineBuilder};
pub use error::{
    AcquisitionError, ConfigError, ConfigurationError, NotFoundError, PersistenceError,
    SchedulerError, SettingsError,
};
pub use records::{
    Alert, AlertId, AlertStatus, AlertView, Dimension, Reading, Sensor, SensorDefinition,
    SensorId, Severity, ThresholdSettings, Timestamp,
};
