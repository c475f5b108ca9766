/// Periodic sampling of enabled sensors
pub mod pipeline;
pub mod sampling_scheduler;

pub use pipeline::{Pipeline, SensorFailure, TickReport, TickSettings};
pub use sampling_scheduler::{SamplingScheduler, SchedulerConfig};
