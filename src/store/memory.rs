use crate::error::PersistenceError;
use crate::records::{Reading, SensorId, Timestamp};
use crate::store::ReadingStore;
use crate::BoxFuture;
use log::debug;
use std::collections::{HashMap, VecDeque};
use std::future;
use std::sync::Mutex;

/// In-memory reading store with a per-sensor capacity limit
///
/// Each sensor keeps its readings in a time-ordered buffer. When a buffer
/// reaches `max_per_sensor`, the oldest reading is dropped to make room.
#[derive(Debug)]
pub struct InMemoryReadingStore {
    buffers: Mutex<HashMap<SensorId, VecDeque<Reading>>>,
    max_per_sensor: usize,
}

impl InMemoryReadingStore {
    /// Create a store keeping at most `max_per_sensor` readings per sensor
    pub fn new(max_per_sensor: usize) -> Self {
        Self {
            buffers: Mutex::new(HashMap::new()),
            max_per_sensor: max_per_sensor.max(1),
        }
    }

    /// Total number of readings currently held
    pub fn len(&self) -> usize {
        self.buffers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .map(VecDeque::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn append_now(&self, reading: Reading) -> Result<(), PersistenceError> {
        let mut buffers = self
            .buffers
            .lock()
            .map_err(|e| PersistenceError::WriteFailed(format!("Lock error: {}", e)))?;
        let buffer = buffers.entry(reading.sensor_id).or_default();

        if let Some(last) = buffer.back() {
            if reading.captured_at < last.captured_at {
                return Err(PersistenceError::OutOfOrder {
                    sensor_id: reading.sensor_id,
                    captured_at: reading.captured_at.to_rfc3339(),
                });
            }
        }

        buffer.push_back(reading);
        while buffer.len() > self.max_per_sensor {
            buffer.pop_front();
        }
        Ok(())
    }

    fn query_now(
        &self,
        sensor_id: Option<SensorId>,
        start: Timestamp,
        end: Timestamp,
    ) -> Result<Vec<Reading>, PersistenceError> {
        let buffers = self
            .buffers
            .lock()
            .map_err(|e| PersistenceError::ReadFailed(format!("Lock error: {}", e)))?;

        let in_window =
            |reading: &&Reading| reading.captured_at >= start && reading.captured_at <= end;

        let mut readings: Vec<Reading> = match sensor_id {
            Some(id) => buffers
                .get(&id)
                .map(|buffer| buffer.iter().filter(in_window).cloned().collect())
                .unwrap_or_default(),
            None => buffers
                .values()
                .flat_map(|buffer| buffer.iter().filter(in_window).cloned())
                .collect(),
        };

        // Stable sort keeps each sensor's append order for equal timestamps
        readings.sort_by_key(|reading| reading.captured_at);
        Ok(readings)
    }

    fn prune_now(&self, cutoff: Timestamp) -> Result<usize, PersistenceError> {
        let mut buffers = self
            .buffers
            .lock()
            .map_err(|e| PersistenceError::WriteFailed(format!("Lock error: {}", e)))?;

        let mut removed = 0;
        for buffer in buffers.values_mut() {
            while let Some(front) = buffer.front() {
                if front.captured_at < cutoff {
                    buffer.pop_front();
                    removed += 1;
                } else {
                    break;
                }
            }
        }

        debug!("Pruned {} readings captured before {}", removed, cutoff);
        Ok(removed)
    }
}

impl Default for InMemoryReadingStore {
    fn default() -> Self {
        // Default: one week of 30 second samples per sensor
        Self::new(20_160)
    }
}

impl ReadingStore for InMemoryReadingStore {
    fn append(&self, reading: Reading) -> BoxFuture<Result<(), PersistenceError>> {
        Box::pin(future::ready(self.append_now(reading)))
    }

    fn query(
        &self,
        sensor_id: Option<SensorId>,
        start: Timestamp,
        end: Timestamp,
    ) -> BoxFuture<Result<Vec<Reading>, PersistenceError>> {
        Box::pin(future::ready(self.query_now(sensor_id, start, end)))
    }

    fn prune_before(&self, cutoff: Timestamp) -> BoxFuture<Result<usize, PersistenceError>> {
        Box::pin(future::ready(self.prune_now(cutoff)))
    }
}
