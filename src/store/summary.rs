//! Aggregate statistics over a window of historical readings
//!
//! Used for cold-chain reports: how many samples were taken, the extremes and
//! the mean of each dimension, and the time span covered.

use crate::records::{Dimension, Reading, Timestamp};
use serde::Serialize;

/// Extremes and mean of one dimension
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DimensionSummary {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
}

/// Summary of a set of readings
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadingSummary {
    pub count: usize,
    pub first_captured_at: Timestamp,
    pub last_captured_at: Timestamp,
    pub temperature: DimensionSummary,
    pub humidity: DimensionSummary,
}

/// Summarize readings; `None` when there is nothing to summarize
pub fn summarize(readings: &[Reading]) -> Option<ReadingSummary> {
    let first = readings.first()?;

    let mut first_captured_at = first.captured_at;
    let mut last_captured_at = first.captured_at;
    for reading in readings {
        first_captured_at = first_captured_at.min(reading.captured_at);
        last_captured_at = last_captured_at.max(reading.captured_at);
    }

    Some(ReadingSummary {
        count: readings.len(),
        first_captured_at,
        last_captured_at,
        temperature: dimension_summary(readings, Dimension::Temperature),
        humidity: dimension_summary(readings, Dimension::Humidity),
    })
}

fn dimension_summary(readings: &[Reading], dimension: Dimension) -> DimensionSummary {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    let mut total = 0.0;

    for value in readings.iter().map(|r| r.value(dimension)) {
        min = min.min(value);
        max = max.max(value);
        total += value;
    }

    DimensionSummary {
        min,
        max,
        mean: total / readings.len() as f64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::SensorId;
    use chrono::{Duration, Utc};

    #[test]
    fn test_empty_input() {
        assert!(summarize(&[]).is_none());
    }

    #[test]
    fn test_summary_values() {
        let sensor = SensorId::new();
        let now = Utc::now();
        let readings = vec![
            Reading::new(sensor, 4.0, 40.0, now + Duration::seconds(60)).unwrap(),
            Reading::new(sensor, 2.0, 50.0, now).unwrap(),
            Reading::new(sensor, 9.0, 45.0, now + Duration::seconds(30)).unwrap(),
        ];

        let summary = summarize(&readings).unwrap();
        assert_eq!(summary.count, 3);
        assert_eq!(summary.first_captured_at, now);
        assert_eq!(summary.last_captured_at, now + Duration::seconds(60));
        assert_eq!(summary.temperature.min, 2.0);
        assert_eq!(summary.temperature.max, 9.0);
        assert!((summary.temperature.mean - 5.0).abs() < 1e-9);
        assert!((summary.humidity.mean - 45.0).abs() < 1e-9);
    }
}
