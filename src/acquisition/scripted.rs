use crate::acquisition::{ReadingSource, Sample};
use crate::error::AcquisitionError;
use crate::records::{Sensor, SensorId};
use crate::BoxFuture;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Source that replays queued results per sensor
///
/// Results are returned in order; the last queued result keeps being returned
/// once the queue is down to one entry, so a scripted value holds until the
/// script is extended. A sensor with nothing queued reports the source as
/// unavailable.
#[derive(Debug, Clone, Default)]
pub struct ScriptedSource {
    scripts: Arc<Mutex<HashMap<SensorId, VecDeque<Result<Sample, AcquisitionError>>>>>,
    delays: Arc<Mutex<HashMap<SensorId, Duration>>>,
    call_count: Arc<Mutex<usize>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a sample for `sensor_id`
    pub fn push(&self, sensor_id: SensorId, temperature: f64, humidity: f64) {
        self.push_result(sensor_id, Ok(Sample::new(temperature, humidity)));
    }

    /// Replace the script for `sensor_id` with a single held sample
    pub fn set(&self, sensor_id: SensorId, temperature: f64, humidity: f64) {
        self.scripts.lock().unwrap_or_else(|e| e.into_inner()).insert(
            sensor_id,
            VecDeque::from([Ok(Sample::new(temperature, humidity))]),
        );
    }

    /// Queue an acquisition failure for `sensor_id`
    pub fn push_failure(&self, sensor_id: SensorId, reason: &str) {
        self.push_result(
            sensor_id,
            Err(AcquisitionError::SourceUnavailable {
                sensor_id,
                reason: reason.to_string(),
            }),
        );
    }

    pub fn push_result(&self, sensor_id: SensorId, result: Result<Sample, AcquisitionError>) {
        self.scripts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(sensor_id)
            .or_default()
            .push_back(result);
    }

    /// Delay every acquisition for `sensor_id`
    pub fn set_delay(&self, sensor_id: SensorId, delay: Duration) {
        self.delays.lock().unwrap_or_else(|e| e.into_inner()).insert(sensor_id, delay);
    }

    /// Number of acquire calls so far
    pub fn call_count(&self) -> usize {
        *self.call_count.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn next_result(&self, sensor_id: SensorId) -> Result<Sample, AcquisitionError> {
        let mut scripts = self.scripts.lock().unwrap_or_else(|e| e.into_inner());
        let queue = scripts.entry(sensor_id).or_default();
        let next = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        next.unwrap_or_else(|| {
            Err(AcquisitionError::SourceUnavailable {
                sensor_id,
                reason: "no scripted sample".to_string(),
            })
        })
    }
}

impl ReadingSource for ScriptedSource {
    fn acquire(&self, sensor: &Sensor) -> BoxFuture<Result<Sample, AcquisitionError>> {
        *self.call_count.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        let result = self.next_result(sensor.id);
        let delay = self.delays.lock().unwrap_or_else(|e| e.into_inner()).get(&sensor.id).copied();

        Box::pin(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            result
        })
    }
}
