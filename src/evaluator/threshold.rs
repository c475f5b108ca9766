//! Threshold evaluation
//!
//! Evaluation is a pure function of a sensor's current ranges and one reading.
//! It performs no I/O and keeps no state, so a verdict for a past reading never
//! changes when thresholds are updated later.

use crate::records::{Dimension, Range, Reading, Sensor};
use serde::{Deserialize, Serialize};

/// Validity of a reading per dimension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    pub temperature_valid: bool,
    pub humidity_valid: bool,
}

impl Verdict {
    pub fn is_valid(&self, dimension: Dimension) -> bool {
        match dimension {
            Dimension::Temperature => self.temperature_valid,
            Dimension::Humidity => self.humidity_valid,
        }
    }

    pub fn all_valid(&self) -> bool {
        self.temperature_valid && self.humidity_valid
    }
}

/// An out-of-range value and the bound it crossed
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Violation {
    pub dimension: Dimension,
    pub observed: f64,
    pub threshold: f64,
}

/// Evaluate a reading against the sensor's inclusive ranges
pub fn evaluate(sensor: &Sensor, reading: &Reading) -> Verdict {
    Verdict {
        temperature_valid: sensor.temperature.contains(reading.temperature),
        humidity_valid: sensor.humidity.contains(reading.humidity),
    }
}

/// Bound crossed by `value`: max when above, min when below, none when inside
pub fn crossed_bound(range: &Range, value: f64) -> Option<f64> {
    if value > range.max {
        Some(range.max)
    } else if value < range.min {
        Some(range.min)
    } else {
        None
    }
}

impl Verdict {
    /// Violations for every dimension this verdict marks invalid
    pub fn violations(&self, sensor: &Sensor, reading: &Reading) -> Vec<Violation> {
        Dimension::ALL
            .iter()
            .filter(|dimension| !self.is_valid(**dimension))
            .filter_map(|&dimension| {
                let observed = reading.value(dimension);
                crossed_bound(&sensor.range(dimension), observed).map(|threshold| Violation {
                    dimension,
                    observed,
                    threshold,
                })
            })
            .collect()
    }
}
