//! Monitoring engine facade
//!
//! [`MonitorEngine`] is the one entry point callers need: it owns the sensor
//! registry, alert lifecycle, broadcast hub and scheduler, and wires them to
//! the injected clock, reading source, reading store and notification
//! gateway. Every mutating call publishes the affected collection to
//! subscribers.

use crate::acquisition::{ReadingSource, SyntheticSource};
use crate::alerts::{
    AlertLifecycleManager, AlertPayload, DeliveryOutcome, LifecycleConfig, LogGateway,
    NotificationGateway, Notifier, RateLimiter,
};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::{
    ConfigurationError, NotFoundError, PersistenceError, SchedulerError, SettingsError,
};
use crate::hub::{BroadcastHub, Snapshot, Subscription, Topic};
use crate::records::{
    AlertId, AlertView, Reading, Sensor, SensorDefinition, SensorId, ThresholdSettings, Timestamp,
};
use crate::registry::SensorRegistry;
use crate::scheduler::{Pipeline, SamplingScheduler, SchedulerConfig, TickReport};
use crate::store::{
    summarize, InMemoryReadingStore, JsonLinesReadingStore, ReadingStore, ReadingSummary,
};
use log::{debug, info};
use std::sync::Arc;

/// Builder for [`MonitorEngine`]
///
/// Unset collaborators default to the system clock, a synthetic source, an
/// in-memory store and a logging gateway.
pub struct MonitorEngineBuilder {
    clock: Option<Arc<dyn Clock>>,
    source: Option<Arc<dyn ReadingSource>>,
    store: Option<Arc<dyn ReadingStore>>,
    gateway: Option<Arc<dyn NotificationGateway>>,
    scheduler: SchedulerConfig,
    lifecycle: LifecycleConfig,
    rate_limit_per_minute: usize,
}

impl Default for MonitorEngineBuilder {
    fn default() -> Self {
        Self {
            clock: None,
            source: None,
            store: None,
            gateway: None,
            scheduler: SchedulerConfig::default(),
            lifecycle: LifecycleConfig::default(),
            rate_limit_per_minute: RateLimiter::default().max_per_minute(),
        }
    }
}

impl MonitorEngineBuilder {
    /// Builder with every collaborator left at its default
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder preconfigured from application settings
    ///
    /// Opens the JSON-lines history file when `storage.path` is set; otherwise
    /// readings are kept in memory. The synthetic source is seeded from the
    /// `[source]` section.
    ///
    /// # Errors
    ///
    /// Returns `PersistenceError` if the history file exists but cannot be read.
    pub fn from_config(config: &Config) -> Result<Self, PersistenceError> {
        let store: Arc<dyn ReadingStore> = match &config.storage.path {
            Some(path) => Arc::new(JsonLinesReadingStore::open(path)?),
            None => Arc::new(InMemoryReadingStore::new(config.storage.max_in_memory_readings)),
        };

        Ok(Self::new()
            .store(store)
            .source(Arc::new(SyntheticSource::new(
                config.source.seed,
                config.source.excursion_every,
            )))
            .scheduler_config(config.scheduler_config())
            .lifecycle_config(config.lifecycle_config())
            .rate_limit(config.notifications.rate_limit_per_minute))
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn source(mut self, source: Arc<dyn ReadingSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn store(mut self, store: Arc<dyn ReadingStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn gateway(mut self, gateway: Arc<dyn NotificationGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    pub fn scheduler_config(mut self, config: SchedulerConfig) -> Self {
        self.scheduler = config;
        self
    }

    pub fn lifecycle_config(mut self, config: LifecycleConfig) -> Self {
        self.lifecycle = config;
        self
    }

    /// Maximum notification attempts per minute across all destinations
    pub fn rate_limit(mut self, max_per_minute: usize) -> Self {
        self.rate_limit_per_minute = max_per_minute;
        self
    }

    /// Wire the collaborators into an idle engine
    pub fn build(self) -> MonitorEngine {
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let source = self
            .source
            .unwrap_or_else(|| Arc::new(SyntheticSource::default()));
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryReadingStore::default()));
        let gateway = self.gateway.unwrap_or_else(|| Arc::new(LogGateway));

        let alerts = Arc::new(AlertLifecycleManager::new(self.lifecycle, Arc::clone(&clock)));
        let notifier = Arc::new(Notifier::new(
            gateway,
            RateLimiter::new(self.rate_limit_per_minute),
            Arc::clone(&clock),
        ));
        let pipeline = Arc::new(Pipeline::new(
            Arc::new(SensorRegistry::new()),
            source,
            store,
            alerts,
            notifier,
            BroadcastHub::new(),
            clock,
        ));

        MonitorEngine {
            scheduler: SamplingScheduler::new(Arc::clone(&pipeline), self.scheduler),
            pipeline,
        }
    }
}

/// Cold-chain monitoring engine
pub struct MonitorEngine {
    pipeline: Arc<Pipeline>,
    scheduler: SamplingScheduler,
}

impl Default for MonitorEngine {
    fn default() -> Self {
        MonitorEngineBuilder::new().build()
    }
}

impl MonitorEngine {
    pub fn builder() -> MonitorEngineBuilder {
        MonitorEngineBuilder::new()
    }

    /// Register a sensor; subscribers receive the new sensor list
    ///
    /// # Arguments
    ///
    /// * `definition` - Name, location, ranges and optional id of the sensor
    ///
    /// # Returns
    ///
    /// The id of the new sensor.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError` for an empty name, invalid ranges or a
    /// duplicate id; nothing is registered in that case.
    pub fn register_sensor(
        &self,
        definition: SensorDefinition,
    ) -> Result<SensorId, ConfigurationError> {
        let id = self.pipeline.registry.register(definition)?;
        self.pipeline.publish_sensors();
        Ok(id)
    }

    /// Replace a sensor's ranges; takes effect from the next tick
    ///
    /// # Errors
    ///
    /// Returns `SettingsError::Configuration` for invalid ranges (nothing is
    /// changed) and `SettingsError::NotFound` for an unknown sensor.
    pub fn update_sensor_settings(
        &self,
        sensor_id: SensorId,
        settings: ThresholdSettings,
    ) -> Result<(), SettingsError> {
        self.pipeline.registry.update_thresholds(sensor_id, settings)?;
        self.pipeline.publish_sensors();
        Ok(())
    }

    /// Include or exclude a sensor from sampling
    ///
    /// Disabled sensors keep their history and alerts.
    ///
    /// # Errors
    ///
    /// Returns `NotFoundError::Sensor` for an unknown sensor.
    pub fn set_sensor_enabled(
        &self,
        sensor_id: SensorId,
        enabled: bool,
    ) -> Result<(), NotFoundError> {
        if self.pipeline.registry.set_enabled(sensor_id, enabled)? {
            self.pipeline.publish_sensors();
        }
        Ok(())
    }

    /// Observe the sensor list; the current list is delivered immediately
    pub fn subscribe_sensors<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&Snapshot) + Send + Sync + 'static,
    {
        let pipeline = &self.pipeline;
        pipeline
            .hub
            .subscribe_with_current(Topic::Sensors, || pipeline.sensors_snapshot(), handler)
    }

    /// Observe the latest reading of every sensor
    pub fn subscribe_readings<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&Snapshot) + Send + Sync + 'static,
    {
        let pipeline = &self.pipeline;
        pipeline
            .hub
            .subscribe_with_current(Topic::Readings, || pipeline.readings_snapshot(), handler)
    }

    /// Observe every alert with its current severity
    pub fn subscribe_alerts<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&Snapshot) + Send + Sync + 'static,
    {
        let pipeline = &self.pipeline;
        pipeline
            .hub
            .subscribe_with_current(Topic::Alerts, || pipeline.alerts_snapshot(), handler)
    }

    /// Stored readings captured within `[start, end]`, oldest first
    ///
    /// An inverted window yields no readings.
    ///
    /// # Arguments
    ///
    /// * `sensor_id` - Restrict to one sensor; `None` returns every sensor
    /// * `start` - Earliest `captured_at`, inclusive
    /// * `end` - Latest `captured_at`, inclusive
    ///
    /// # Errors
    ///
    /// Returns `PersistenceError` if the store cannot be read.
    pub async fn get_historical_readings(
        &self,
        sensor_id: Option<SensorId>,
        start: Timestamp,
        end: Timestamp,
    ) -> Result<Vec<Reading>, PersistenceError> {
        if start > end {
            debug!("Empty history window: start {} is after end {}", start, end);
            return Ok(Vec::new());
        }
        self.pipeline.store.query(sensor_id, start, end).await
    }

    /// Summary statistics over one sensor's stored readings
    ///
    /// # Returns
    ///
    /// `None` when the sensor has no readings in `[start, end]`.
    pub async fn report(
        &self,
        sensor_id: SensorId,
        start: Timestamp,
        end: Timestamp,
    ) -> Result<Option<ReadingSummary>, PersistenceError> {
        let readings = self.get_historical_readings(Some(sensor_id), start, end).await?;
        Ok(summarize(&readings))
    }

    /// Mark an alert resolved
    ///
    /// Resolving an already resolved alert changes nothing, including its
    /// `resolved_at`.
    ///
    /// # Errors
    ///
    /// Returns `NotFoundError::Alert` for an unknown alert.
    pub fn resolve_alert(&self, alert_id: AlertId) -> Result<(), NotFoundError> {
        if self.pipeline.alerts.resolve(alert_id)? {
            self.pipeline.publish_alerts();
        }
        Ok(())
    }

    /// Remove an alert regardless of its status
    ///
    /// # Errors
    ///
    /// Returns `NotFoundError::Alert` for an unknown alert.
    pub fn delete_alert(&self, alert_id: AlertId) -> Result<(), NotFoundError> {
        self.pipeline.alerts.delete(alert_id)?;
        self.pipeline.publish_alerts();
        Ok(())
    }

    /// Send one alert to `destination` through the notification gateway
    ///
    /// Delivery is attempted once; a failure or rate-limited attempt is
    /// reported in the outcome and not retried.
    ///
    /// # Arguments
    ///
    /// * `alert_id` - Alert to send
    /// * `destination` - Gateway-specific address, such as an email address
    ///
    /// # Errors
    ///
    /// Returns `NotFoundError` if the alert or its sensor no longer exists.
    pub async fn notify(
        &self,
        alert_id: AlertId,
        destination: &str,
    ) -> Result<DeliveryOutcome, NotFoundError> {
        let view = self.pipeline.alerts.get(alert_id)?;
        let sensor = self.pipeline.registry.get(view.alert.sensor_id)?;
        let payload = AlertPayload::new(&view, &sensor);
        Ok(self.pipeline.notifier.send(payload, destination).await)
    }

    /// Start periodic sampling; a no-op when already running
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::ZeroInterval` for a zero sampling interval and
    /// `SchedulerError::NoRuntime` outside a tokio runtime.
    pub fn start(&self) -> Result<(), SchedulerError> {
        if self.scheduler.start()? {
            info!("Monitoring started");
        }
        Ok(())
    }

    /// Stop periodic sampling; no tick runs once this returns
    pub async fn stop(&self) {
        if self.scheduler.stop().await {
            info!("Monitoring stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.scheduler.is_running()
    }

    /// Run one sampling tick immediately, independent of the scheduler
    pub async fn tick(&self) -> TickReport {
        self.pipeline.run_tick(self.scheduler.config().tick).await
    }

    pub fn sensors(&self) -> Vec<Sensor> {
        self.pipeline.registry.list_all()
    }

    pub fn sensor(&self, sensor_id: SensorId) -> Result<Sensor, NotFoundError> {
        self.pipeline.registry.get(sensor_id)
    }

    pub fn alerts(&self) -> Vec<AlertView> {
        self.pipeline.alerts.list()
    }

    pub fn active_alerts(&self) -> Vec<AlertView> {
        self.pipeline.alerts.active()
    }

    pub fn alert(&self, alert_id: AlertId) -> Result<AlertView, NotFoundError> {
        self.pipeline.alerts.get(alert_id)
    }

    pub fn latest_readings(&self) -> Vec<Reading> {
        self.pipeline.latest_readings()
    }
}

impl std::fmt::Debug for MonitorEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorEngine")
            .field("pipeline", &self.pipeline)
            .field("scheduler", &self.scheduler)
            .finish()
    }
}
