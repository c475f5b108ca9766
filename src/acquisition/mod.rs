//! Reading acquisition sources
//!
//! The scheduler never talks to hardware directly. It asks an injected
//! [`ReadingSource`] for one [`Sample`] per sensor and tick; production wires
//! in a physical driver, while demos and tests use the synthetic or scripted
//! sources provided here.

pub mod scripted;
pub mod synthetic;

pub use scripted::ScriptedSource;
pub use synthetic::SyntheticSource;

use crate::error::AcquisitionError;
use crate::records::Sensor;
use crate::BoxFuture;
use serde::{Deserialize, Serialize};

/// Raw values returned by a source, before they are stamped into a reading
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub temperature: f64,
    pub humidity: f64,
}

impl Sample {
    pub fn new(temperature: f64, humidity: f64) -> Self {
        Self {
            temperature,
            humidity,
        }
    }
}

/// Pluggable source of sensor samples
#[cfg_attr(test, mockall::automock)]
pub trait ReadingSource: Send + Sync {
    /// Acquire one sample for `sensor`
    fn acquire(&self, sensor: &Sensor) -> BoxFuture<Result<Sample, AcquisitionError>>;
}
