use crate::acquisition::{ReadingSource, Sample};
use crate::error::AcquisitionError;
use crate::records::{Range, Sensor, SensorId};
use crate::BoxFuture;
use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::future;
use std::sync::Mutex;

/// Synthetic sample generator for demo mode
///
/// Produces pseudo-random but reproducible values around the middle of each
/// sensor's acceptable range. Roughly one sample in `excursion_every` drifts
/// past the upper bound so the alerting path can be exercised without
/// hardware.
///
/// Each sensor draws from its own generator seeded from `seed` and the sensor
/// id, so a sensor's sequence does not depend on how ticks interleave sensors.
#[derive(Debug)]
pub struct SyntheticSource {
    seed: u64,
    /// One excursion per this many samples; 0 disables excursions
    excursion_every: u64,
    generators: Mutex<HashMap<SensorId, StdRng>>,
}

impl SyntheticSource {
    pub fn new(seed: u64, excursion_every: u64) -> Self {
        Self {
            seed,
            excursion_every,
            generators: Mutex::new(HashMap::new()),
        }
    }

    fn sensor_seed(&self, sensor_id: SensorId) -> u64 {
        let (high, low) = sensor_id.as_uuid().as_u64_pair();
        self.seed ^ high ^ low.rotate_left(32)
    }

    /// Value within the middle 60% of `range`, `unit` in `[0, 1)`
    fn within(range: &Range, unit: f64) -> f64 {
        let width = range.max - range.min;
        range.min + width * (0.2 + 0.6 * unit)
    }

    fn generate(&self, sensor: &Sensor) -> Sample {
        let mut generators = self.generators.lock().unwrap_or_else(|e| e.into_inner());
        let rng = generators
            .entry(sensor.id)
            .or_insert_with(|| StdRng::seed_from_u64(self.sensor_seed(sensor.id)));

        let mut temperature = Self::within(&sensor.temperature, rng.random::<f64>());
        let humidity = Self::within(&sensor.humidity, rng.random::<f64>());

        if self.excursion_every > 0 && rng.random_range(0..self.excursion_every) == 0 {
            let width = sensor.temperature.max - sensor.temperature.min;
            temperature = sensor.temperature.max + width * 0.25;
            debug!(
                "Synthetic excursion for sensor {}: temperature={:.2}",
                sensor.id, temperature
            );
        }

        // Two decimals, like a typical logger display
        Sample::new(
            (temperature * 100.0).round() / 100.0,
            (humidity * 100.0).round() / 100.0,
        )
    }
}

impl Default for SyntheticSource {
    fn default() -> Self {
        Self::new(0x5eed, 20)
    }
}

impl ReadingSource for SyntheticSource {
    fn acquire(&self, sensor: &Sensor) -> BoxFuture<Result<Sample, AcquisitionError>> {
        Box::pin(future::ready(Ok(self.generate(sensor))))
    }
}
