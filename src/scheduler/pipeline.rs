//! One sampling tick
//!
//! A [`Pipeline`] bundles the collaborators a tick touches and runs the
//! per-sensor sequence acquire, persist, evaluate, apply, publish. Sensors are
//! processed concurrently up to a fixed limit; one sensor's failure is logged,
//! counted and otherwise ignored.

use crate::acquisition::ReadingSource;
use crate::alerts::{AlertChanges, AlertLifecycleManager, Notifier};
use crate::clock::Clock;
use crate::error::{AcquisitionError, SampleError};
use crate::evaluator::evaluate;
use crate::hub::{BroadcastHub, Snapshot};
use crate::records::{Reading, Sensor, SensorId};
use crate::registry::SensorRegistry;
use crate::store::ReadingStore;
use log::{debug, error, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Limits applied to every tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickSettings {
    /// Upper bound on sensors sampled at the same time
    pub max_concurrency: usize,
    /// Upper bound on one acquisition
    pub acquisition_timeout: Duration,
}

impl Default for TickSettings {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            acquisition_timeout: Duration::from_secs(10),
        }
    }
}

/// A sensor whose sample was skipped in a tick
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorFailure {
    pub sensor_id: SensorId,
    pub sensor_name: String,
    pub reason: String,
}

/// What happened during one tick
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickReport {
    /// Sensors whose reading was stored and evaluated
    pub sampled: usize,
    pub failures: Vec<SensorFailure>,
    pub alerts_raised: usize,
    pub alerts_resolved: usize,
}

impl TickReport {
    pub fn failed(&self) -> usize {
        self.failures.len()
    }
}

/// Collaborators shared by ticks, the scheduler and the engine facade
pub struct Pipeline {
    pub registry: Arc<SensorRegistry>,
    pub source: Arc<dyn ReadingSource>,
    pub store: Arc<dyn ReadingStore>,
    pub alerts: Arc<AlertLifecycleManager>,
    pub notifier: Arc<Notifier>,
    pub hub: BroadcastHub,
    pub clock: Arc<dyn Clock>,
    latest: RwLock<HashMap<SensorId, Reading>>,
}

impl Pipeline {
    pub fn new(
        registry: Arc<SensorRegistry>,
        source: Arc<dyn ReadingSource>,
        store: Arc<dyn ReadingStore>,
        alerts: Arc<AlertLifecycleManager>,
        notifier: Arc<Notifier>,
        hub: BroadcastHub,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry,
            source,
            store,
            alerts,
            notifier,
            hub,
            clock,
            latest: RwLock::new(HashMap::new()),
        }
    }

    /// Latest reading of every sensor that has one, in registration order
    pub fn latest_readings(&self) -> Vec<Reading> {
        let latest = self.latest.read().unwrap_or_else(|e| e.into_inner());
        self.registry
            .list_all()
            .iter()
            .filter_map(|sensor| latest.get(&sensor.id).cloned())
            .collect()
    }

    pub fn sensors_snapshot(&self) -> Snapshot {
        Snapshot::Sensors(self.registry.list_all())
    }

    pub fn readings_snapshot(&self) -> Snapshot {
        Snapshot::Readings(self.latest_readings())
    }

    pub fn alerts_snapshot(&self) -> Snapshot {
        Snapshot::Alerts(self.alerts.list())
    }

    pub fn publish_sensors(&self) {
        self.hub.publish_latest(|| self.sensors_snapshot());
    }

    pub fn publish_alerts(&self) {
        self.hub.publish_latest(|| self.alerts_snapshot());
    }

    /// Sample every enabled sensor once
    pub async fn run_tick(self: &Arc<Self>, settings: TickSettings) -> TickReport {
        let sensors = self.registry.list_enabled();
        let mut report = TickReport::default();
        if sensors.is_empty() {
            debug!("Tick skipped: no enabled sensors");
            return report;
        }

        let semaphore = Arc::new(Semaphore::new(settings.max_concurrency.max(1)));
        let mut tasks = JoinSet::new();
        for sensor in sensors {
            let pipeline = Arc::clone(self);
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                // The semaphore is never closed, so acquisition only waits
                let _permit = semaphore.acquire_owned().await.ok();
                let result = pipeline.sample_sensor(&sensor, settings.acquisition_timeout).await;
                (sensor, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(changes))) => {
                    report.sampled += 1;
                    report.alerts_raised += changes.raised.len();
                    report.alerts_resolved += changes.resolved.len();
                }
                Ok((sensor, Err(e))) => {
                    warn!("Skipping sensor '{}' ({}) this tick: {}", sensor.name, sensor.id, e);
                    report.failures.push(SensorFailure {
                        sensor_id: sensor.id,
                        sensor_name: sensor.name,
                        reason: e.to_string(),
                    });
                }
                Err(e) => error!("Sensor task failed: {}", e),
            }
        }

        debug!(
            "Tick complete: {} sampled, {} failed, {} alerts raised",
            report.sampled,
            report.failed(),
            report.alerts_raised
        );
        report
    }

    async fn sample_sensor(
        &self,
        sensor: &Sensor,
        acquisition_timeout: Duration,
    ) -> Result<AlertChanges, SampleError> {
        let sample = tokio::time::timeout(acquisition_timeout, self.source.acquire(sensor))
            .await
            .map_err(|_| AcquisitionError::Timeout(sensor.id))??;

        let reading = Reading::new(
            sensor.id,
            sample.temperature,
            sample.humidity,
            self.clock.now(),
        )?;
        self.store.append(reading.clone()).await?;

        // Ranges may have changed while acquiring
        let sensor = self.registry.get(sensor.id).unwrap_or_else(|_| sensor.clone());
        let verdict = evaluate(&sensor, &reading);
        let changes = self.alerts.apply(&sensor, &reading, &verdict);

        self.latest
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(sensor.id, reading);

        self.hub.publish_latest(|| self.readings_snapshot());
        if !changes.is_empty() {
            self.publish_alerts();
        }
        Ok(changes)
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("sensors", &self.registry.len())
            .field("alerts", &self.alerts)
            .field("hub", &self.hub)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::{MockReadingSource, Sample, ScriptedSource};
    use crate::alerts::{LifecycleConfig, MockGateway, RateLimiter};
    use crate::clock::ManualClock;
    use crate::error::PersistenceError;
    use crate::hub::Topic;
    use crate::records::{Dimension, SensorDefinition, ThresholdSettings};
    use crate::store::{InMemoryReadingStore, MockReadingStore};
    use chrono::Duration as ChronoDuration;
    use std::sync::Mutex;
    use std::time::Instant;

    fn thresholds() -> ThresholdSettings {
        ThresholdSettings {
            temp_min: 2.0,
            temp_max: 8.0,
            humidity_min: 30.0,
            humidity_max: 60.0,
        }
    }

    fn pipeline(source: Arc<dyn ReadingSource>, store: Arc<dyn ReadingStore>) -> Arc<Pipeline> {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::default());
        Arc::new(Pipeline::new(
            Arc::new(SensorRegistry::new()),
            source,
            store,
            Arc::new(AlertLifecycleManager::new(LifecycleConfig::default(), clock.clone())),
            Arc::new(Notifier::new(
                Arc::new(MockGateway::new()),
                RateLimiter::default(),
                clock.clone(),
            )),
            BroadcastHub::new(),
            clock,
        ))
    }

    fn register(pipeline: &Pipeline, name: &str) -> SensorId {
        pipeline
            .registry
            .register(SensorDefinition::new(name, "", thresholds()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_tick_persists_evaluates_and_publishes() {
        let source = ScriptedSource::new();
        let store = Arc::new(InMemoryReadingStore::default());
        let pipeline = pipeline(Arc::new(source.clone()), store.clone());
        let fridge = register(&pipeline, "Fridge");
        source.push(fridge, 9.5, 45.0);

        let published = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&published);
        let _subscription = pipeline.hub.subscribe(Topic::Alerts, move |snapshot| {
            if let Snapshot::Alerts(views) = snapshot {
                sink.lock().unwrap().push(views.clone());
            }
        });

        let report = pipeline.run_tick(TickSettings::default()).await;
        assert_eq!(report.sampled, 1);
        assert_eq!(report.alerts_raised, 1);
        assert!(report.failures.is_empty());

        let now = pipeline.clock.now();
        let stored = store
            .query(Some(fridge), now - ChronoDuration::minutes(1), now)
            .await
            .unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].temperature, 9.5);
        assert_eq!(pipeline.latest_readings(), stored);

        let published = published.lock().unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0][0].alert.dimension, Dimension::Temperature);
        assert_eq!(published[0][0].alert.violated_threshold, 8.0);
    }

    #[tokio::test]
    async fn test_in_range_tick_publishes_no_alerts() {
        let source = ScriptedSource::new();
        let pipeline = pipeline(
            Arc::new(source.clone()),
            Arc::new(InMemoryReadingStore::default()),
        );
        let fridge = register(&pipeline, "Fridge");
        source.push(fridge, 5.0, 45.0);

        let alert_deliveries = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&alert_deliveries);
        let _subscription = pipeline.hub.subscribe(Topic::Alerts, move |_| {
            *counter.lock().unwrap() += 1;
        });

        let report = pipeline.run_tick(TickSettings::default()).await;
        assert_eq!(report.sampled, 1);
        assert_eq!(*alert_deliveries.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failing_sensor_is_isolated() {
        let source = ScriptedSource::new();
        let pipeline = pipeline(
            Arc::new(source.clone()),
            Arc::new(InMemoryReadingStore::default()),
        );
        let broken = register(&pipeline, "Broken probe");
        let healthy = register(&pipeline, "Healthy probe");
        source.push_failure(broken, "probe disconnected");
        source.push(healthy, 4.0, 40.0);

        let report = pipeline.run_tick(TickSettings::default()).await;
        assert_eq!(report.sampled, 1);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.failures[0].sensor_id, broken);
        assert!(report.failures[0].reason.contains("probe disconnected"));

        let latest = pipeline.latest_readings();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].sensor_id, healthy);
    }

    #[tokio::test]
    async fn test_slow_sensor_times_out_without_stalling_others() {
        let source = ScriptedSource::new();
        let pipeline = pipeline(
            Arc::new(source.clone()),
            Arc::new(InMemoryReadingStore::default()),
        );
        let slow = register(&pipeline, "Slow");
        let fast = register(&pipeline, "Fast");
        source.push(slow, 4.0, 40.0);
        source.set_delay(slow, Duration::from_secs(30));
        source.push(fast, 4.0, 40.0);

        let settings = TickSettings {
            max_concurrency: 4,
            acquisition_timeout: Duration::from_millis(100),
        };
        let started = Instant::now();
        let report = pipeline.run_tick(settings).await;

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(report.sampled, 1);
        assert_eq!(report.failures[0].sensor_id, slow);
        assert!(report.failures[0].reason.contains("Timed out"));
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let source = ScriptedSource::new();
        let pipeline = pipeline(
            Arc::new(source.clone()),
            Arc::new(InMemoryReadingStore::default()),
        );
        for name in ["a", "b", "c"] {
            let id = register(&pipeline, name);
            source.push(id, 4.0, 40.0);
            source.set_delay(id, Duration::from_millis(100));
        }

        let settings = TickSettings {
            max_concurrency: 1,
            acquisition_timeout: Duration::from_secs(5),
        };
        let started = Instant::now();
        let report = pipeline.run_tick(settings).await;

        assert_eq!(report.sampled, 3);
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_persistence_failure_skips_evaluation() {
        let source = ScriptedSource::new();
        let mut store = MockReadingStore::new();
        let flaky = SensorId::new();
        store.expect_append().returning(move |reading| {
            let result = if reading.sensor_id == flaky {
                Err(PersistenceError::WriteFailed("disk full".to_string()))
            } else {
                Ok(())
            };
            Box::pin(async move { result })
        });

        let pipeline = pipeline(Arc::new(source.clone()), Arc::new(store));
        pipeline
            .registry
            .register(SensorDefinition::new("Flaky", "", thresholds()).with_id(flaky))
            .unwrap();
        let steady = register(&pipeline, "Steady");
        source.push(flaky, 20.0, 45.0);
        source.push(steady, 20.0, 45.0);

        let report = pipeline.run_tick(TickSettings::default()).await;
        assert_eq!(report.sampled, 1);
        assert!(report.failures[0].reason.contains("disk full"));

        let active = pipeline.alerts.active();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].alert.sensor_id, steady);
    }

    #[tokio::test]
    async fn test_disabled_sensor_is_not_sampled() {
        let source = ScriptedSource::new();
        let pipeline = pipeline(
            Arc::new(source.clone()),
            Arc::new(InMemoryReadingStore::default()),
        );
        let id = register(&pipeline, "Spare freezer");
        source.push(id, 4.0, 40.0);
        pipeline.registry.set_enabled(id, false).unwrap();

        let report = pipeline.run_tick(TickSettings::default()).await;
        assert_eq!(report, TickReport::default());
        assert_eq!(source.call_count(), 0);
    }

    #[tokio::test]
    async fn test_non_finite_sample_is_a_sensor_failure() {
        let mut source = MockReadingSource::new();
        source
            .expect_acquire()
            .times(1)
            .returning(|_| Box::pin(async { Ok(Sample::new(f64::NAN, 45.0)) }));
        let store = Arc::new(InMemoryReadingStore::default());
        let pipeline = pipeline(Arc::new(source), store.clone());
        let probe = register(&pipeline, "Broken probe");

        let report = pipeline.run_tick(TickSettings::default()).await;
        assert_eq!(report.sampled, 0);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.failures[0].sensor_id, probe);
        assert!(store.is_empty());
        assert!(pipeline.alerts.is_empty());
    }
}
