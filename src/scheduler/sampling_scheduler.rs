use crate::alerts::AlertPayload;
use crate::error::SchedulerError;
use crate::hub::{Snapshot, Subscription, Topic};
use crate::records::{AlertId, AlertView, Timestamp};
use crate::scheduler::pipeline::{Pipeline, TickSettings};
use log::{debug, error, info, warn};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Queued alerts waiting for the notification dispatcher
const DISPATCH_QUEUE_SIZE: usize = 256;

/// Scheduler tuning
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    pub interval: Duration,
    pub tick: TickSettings,
    /// Readings older than this are pruned from the store
    pub retention: Option<chrono::Duration>,
    /// Minimum time between two retention passes
    pub prune_every: chrono::Duration,
    /// Forward newly raised alerts to `destinations`
    pub auto_notify: bool,
    pub destinations: Vec<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            tick: TickSettings::default(),
            retention: None,
            prune_every: chrono::Duration::hours(1),
            auto_notify: false,
            destinations: Vec::new(),
        }
    }
}

/// Tasks owned by a running scheduler
struct RunningTasks {
    driver: JoinHandle<()>,
    dispatcher: Option<JoinHandle<()>>,
    listener: Option<Subscription>,
}

enum SchedulerState {
    Idle,
    Running(RunningTasks),
}

/// Periodic driver of sampling ticks
///
/// `start` spawns a single driver task on the current tokio runtime and is a
/// no-op while running. `stop` cancels the driver and waits for it, so no tick
/// is in progress once it returns. Stopping never touches stored readings or
/// alerts.
pub struct SamplingScheduler {
    pipeline: Arc<Pipeline>,
    config: SchedulerConfig,
    state: Mutex<SchedulerState>,
}

impl SamplingScheduler {
    pub fn new(pipeline: Arc<Pipeline>, config: SchedulerConfig) -> Self {
        Self {
            pipeline,
            config,
            state: Mutex::new(SchedulerState::Idle),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Whether the driver task is alive
    ///
    /// A driver that exited unexpectedly no longer counts as running; a later
    /// `start` replaces it.
    pub fn is_running(&self) -> bool {
        match &*self.state.lock().unwrap_or_else(|e| e.into_inner()) {
            SchedulerState::Running(tasks) => !tasks.driver.is_finished(),
            SchedulerState::Idle => false,
        }
    }

    /// Start ticking
    ///
    /// # Returns
    ///
    /// `Ok(true)` when the driver was spawned, `Ok(false)` when it is already
    /// running.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::ZeroInterval` for a zero sampling interval and
    /// `SchedulerError::NoRuntime` when called outside a tokio runtime.
    pub fn start(&self) -> Result<bool, SchedulerError> {
        if self.config.interval.is_zero() {
            return Err(SchedulerError::ZeroInterval);
        }

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let SchedulerState::Running(tasks) = &mut *state {
            if !tasks.driver.is_finished() {
                info!("Scheduler already running, skipping start");
                return Ok(false);
            }
            warn!("Scheduler driver exited unexpectedly, restarting");
            if let Some(listener) = tasks.listener.take() {
                listener.unsubscribe();
            }
            if let Some(dispatcher) = &tasks.dispatcher {
                dispatcher.abort();
            }
        }
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| SchedulerError::NoRuntime)?;

        let notify = self.config.auto_notify && !self.config.destinations.is_empty();
        let (dispatcher, listener) = if notify {
            let (sender, receiver) = mpsc::channel(DISPATCH_QUEUE_SIZE);
            let listener = self.subscribe_new_alerts(sender);
            let dispatcher = runtime.spawn(dispatch_notifications(
                Arc::clone(&self.pipeline),
                self.config.destinations.clone(),
                receiver,
            ));
            (Some(dispatcher), Some(listener))
        } else {
            (None, None)
        };

        let driver = runtime.spawn(drive(Arc::clone(&self.pipeline), self.config.clone()));

        *state = SchedulerState::Running(RunningTasks {
            driver,
            dispatcher,
            listener,
        });
        info!(
            "Scheduler started with interval {:?} ({} sensors enabled)",
            self.config.interval,
            self.pipeline.registry.list_enabled().len()
        );
        Ok(true)
    }

    /// Stop ticking and wait for the driver to finish
    ///
    /// Returns `false` when already idle.
    pub async fn stop(&self) -> bool {
        let tasks = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            match std::mem::replace(&mut *state, SchedulerState::Idle) {
                SchedulerState::Idle => {
                    debug!("Scheduler already idle, skipping stop");
                    return false;
                }
                SchedulerState::Running(mut tasks) => {
                    if let Some(listener) = tasks.listener.take() {
                        listener.unsubscribe();
                    }
                    tasks.driver.abort();
                    if let Some(dispatcher) = &tasks.dispatcher {
                        dispatcher.abort();
                    }
                    tasks
                }
            }
        };

        await_cancelled(tasks.driver, "driver").await;
        if let Some(dispatcher) = tasks.dispatcher {
            await_cancelled(dispatcher, "notification dispatcher").await;
        }
        info!("Scheduler stopped");
        true
    }

    /// Listener that queues every alert it has not seen before
    ///
    /// Alerts that exist when the listener is installed count as seen, so a
    /// restart does not notify them again.
    fn subscribe_new_alerts(&self, sender: mpsc::Sender<AlertView>) -> Subscription {
        let seen: HashSet<AlertId> = self
            .pipeline
            .alerts
            .list()
            .into_iter()
            .map(|view| view.alert.id)
            .collect();
        let seen = Mutex::new(seen);

        self.pipeline.hub.subscribe(Topic::Alerts, move |snapshot| {
            let Snapshot::Alerts(views) = snapshot else {
                return;
            };
            let mut seen = seen.lock().unwrap_or_else(|e| e.into_inner());
            for view in views.iter().filter(|view| view.alert.is_active()) {
                if !seen.insert(view.alert.id) {
                    continue;
                }
                if let Err(e) = sender.try_send(view.clone()) {
                    warn!("Dropping notification for alert {}: {}", view.alert.id, e);
                }
            }
        })
    }
}

impl std::fmt::Debug for SamplingScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SamplingScheduler")
            .field("config", &self.config)
            .field("running", &self.is_running())
            .finish()
    }
}

async fn await_cancelled(handle: JoinHandle<()>, name: &str) {
    match handle.await {
        Ok(()) => debug!("Scheduler {} finished", name),
        Err(e) if e.is_cancelled() => debug!("Scheduler {} cancelled", name),
        Err(e) => error!("Scheduler {} failed: {}", name, e),
    }
}

/// Driver loop: one tick per interval, plus periodic retention
async fn drive(pipeline: Arc<Pipeline>, config: SchedulerConfig) {
    let mut interval = tokio::time::interval(config.interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_prune: Option<Timestamp> = None;

    loop {
        interval.tick().await;
        let report = pipeline.run_tick(config.tick).await;
        if report.failed() > 0 {
            warn!(
                "Tick finished with {} of {} sensors failing",
                report.failed(),
                report.failed() + report.sampled
            );
        }

        if let Some(retention) = config.retention {
            let now = pipeline.clock.now();
            let due = last_prune.map_or(true, |last| {
                now.signed_duration_since(last) >= config.prune_every
            });
            if due {
                last_prune = Some(now);
                let Some(cutoff) = now.checked_sub_signed(retention) else {
                    warn!("Retention window {} reaches past the earliest timestamp", retention);
                    continue;
                };
                match pipeline.store.prune_before(cutoff).await {
                    Ok(0) => debug!("Retention pass removed nothing"),
                    Ok(removed) => info!("Retention pass removed {} readings", removed),
                    Err(e) => warn!("Retention pass failed: {}", e),
                }
            }
        }
    }
}

/// Deliver queued alerts to every destination
async fn dispatch_notifications(
    pipeline: Arc<Pipeline>,
    destinations: Vec<String>,
    mut receiver: mpsc::Receiver<AlertView>,
) {
    while let Some(view) = receiver.recv().await {
        let sensor = match pipeline.registry.get(view.alert.sensor_id) {
            Ok(sensor) => sensor,
            Err(e) => {
                warn!("Not notifying alert {}: {}", view.alert.id, e);
                continue;
            }
        };
        let payload = AlertPayload::new(&view, &sensor);
        for destination in &destinations {
            pipeline.notifier.send(payload.clone(), destination).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::{ReadingSource, ScriptedSource};
    use crate::alerts::{
        AlertLifecycleManager, LifecycleConfig, MockGateway, NotificationGateway, Notifier,
        RateLimiter,
    };
    use crate::clock::{Clock, ManualClock};
    use crate::hub::BroadcastHub;
    use crate::records::{SensorDefinition, SensorId, ThresholdSettings};
    use crate::registry::SensorRegistry;
    use crate::store::{InMemoryReadingStore, MockReadingStore, ReadingStore};

    fn pipeline(
        source: Arc<dyn ReadingSource>,
        store: Arc<dyn ReadingStore>,
        gateway: Arc<dyn NotificationGateway>,
    ) -> Arc<Pipeline> {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::default());
        Arc::new(Pipeline::new(
            Arc::new(SensorRegistry::new()),
            source,
            store,
            Arc::new(AlertLifecycleManager::new(LifecycleConfig::default(), clock.clone())),
            Arc::new(Notifier::new(gateway, RateLimiter::new(100), clock.clone())),
            BroadcastHub::new(),
            clock,
        ))
    }

    fn register(pipeline: &Pipeline) -> SensorId {
        pipeline
            .registry
            .register(SensorDefinition::new(
                "Walk-in cooler",
                "Back room",
                ThresholdSettings {
                    temp_min: 2.0,
                    temp_max: 8.0,
                    humidity_min: 30.0,
                    humidity_max: 60.0,
                },
            ))
            .unwrap()
    }

    fn fast_config() -> SchedulerConfig {
        SchedulerConfig {
            interval: Duration::from_millis(20),
            ..SchedulerConfig::default()
        }
    }

    #[test]
    fn test_start_outside_runtime_fails() {
        let pipeline = pipeline(
            Arc::new(ScriptedSource::new()),
            Arc::new(InMemoryReadingStore::default()),
            Arc::new(MockGateway::new()),
        );
        let scheduler = SamplingScheduler::new(pipeline, fast_config());
        assert_eq!(scheduler.start(), Err(SchedulerError::NoRuntime));
        assert!(!scheduler.is_running());
    }

    #[tokio::test]
    async fn test_start_is_idempotent_and_stop_halts_ticks() {
        let source = ScriptedSource::new();
        let pipeline = pipeline(
            Arc::new(source.clone()),
            Arc::new(InMemoryReadingStore::default()),
            Arc::new(MockGateway::new()),
        );
        let sensor = register(&pipeline);
        source.push(sensor, 4.0, 40.0);

        let scheduler = SamplingScheduler::new(pipeline, fast_config());
        assert_eq!(scheduler.start(), Ok(true));
        assert_eq!(scheduler.start(), Ok(false));
        assert!(scheduler.is_running());

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(scheduler.stop().await);
        assert!(!scheduler.is_running());

        let calls = source.call_count();
        assert!(calls >= 2);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(source.call_count(), calls);

        assert!(!scheduler.stop().await);
    }

    #[tokio::test]
    async fn test_auto_notify_forwards_new_alerts_once() {
        let source = ScriptedSource::new();
        let gateway = MockGateway::new();
        let pipeline = pipeline(
            Arc::new(source.clone()),
            Arc::new(InMemoryReadingStore::default()),
            Arc::new(gateway.clone()),
        );
        let sensor = register(&pipeline);
        source.push(sensor, 9.5, 45.0);

        let config = SchedulerConfig {
            auto_notify: true,
            destinations: vec!["ops@example.com".to_string(), "pager".to_string()],
            ..fast_config()
        };
        let scheduler = SamplingScheduler::new(Arc::clone(&pipeline), config);
        scheduler.start().unwrap();
        assert_eq!(pipeline.hub.subscriber_count(Topic::Alerts), 1);

        tokio::time::sleep(Duration::from_millis(150)).await;
        scheduler.stop().await;

        // Several ticks updated the same alert, but it is only sent once per destination
        let deliveries = gateway.deliveries();
        assert_eq!(deliveries.len(), 2);
        assert_eq!(deliveries[0].1, "ops@example.com");
        assert_eq!(deliveries[1].1, "pager");
        assert_eq!(deliveries[0].0.sensor_id, sensor);
        assert_eq!(pipeline.hub.subscriber_count(Topic::Alerts), 0);
    }

    #[tokio::test]
    async fn test_restart_does_not_renotify_existing_alerts() {
        let source = ScriptedSource::new();
        let gateway = MockGateway::new();
        let pipeline = pipeline(
            Arc::new(source.clone()),
            Arc::new(InMemoryReadingStore::default()),
            Arc::new(gateway.clone()),
        );
        let sensor = register(&pipeline);
        source.push(sensor, 9.5, 45.0);

        let config = SchedulerConfig {
            auto_notify: true,
            destinations: vec!["ops".to_string()],
            ..fast_config()
        };
        let scheduler = SamplingScheduler::new(Arc::clone(&pipeline), config);

        scheduler.start().unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;
        scheduler.stop().await;
        scheduler.start().unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;
        scheduler.stop().await;

        assert_eq!(gateway.delivery_count(), 1);
        assert_eq!(pipeline.alerts.list().len(), 1);
    }

    #[tokio::test]
    async fn test_retention_prunes_at_most_once_per_window() {
        let source = ScriptedSource::new();
        let mut store = MockReadingStore::new();
        store
            .expect_append()
            .returning(|_| Box::pin(async { Ok(()) }));
        store
            .expect_prune_before()
            .times(1)
            .returning(|_| Box::pin(async { Ok(3) }));

        let pipeline = pipeline(
            Arc::new(source.clone()),
            Arc::new(store),
            Arc::new(MockGateway::new()),
        );
        let sensor = register(&pipeline);
        source.push(sensor, 4.0, 40.0);

        let config = SchedulerConfig {
            retention: Some(chrono::Duration::days(7)),
            ..fast_config()
        };
        let scheduler = SamplingScheduler::new(pipeline, config);
        scheduler.start().unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;
        scheduler.stop().await;

        assert!(source.call_count() >= 2);
    }

    #[tokio::test]
    async fn test_zero_interval_is_rejected() {
        let source = ScriptedSource::new();
        let pipeline = pipeline(
            Arc::new(source.clone()),
            Arc::new(InMemoryReadingStore::default()),
            Arc::new(MockGateway::new()),
        );
        register(&pipeline);

        let config = SchedulerConfig {
            interval: Duration::ZERO,
            ..SchedulerConfig::default()
        };
        let scheduler = SamplingScheduler::new(pipeline, config);
        assert_eq!(scheduler.start(), Err(SchedulerError::ZeroInterval));
        assert!(!scheduler.is_running());

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(source.call_count(), 0);
    }

    #[tokio::test]
    async fn test_oversized_retention_keeps_ticking() {
        let source = ScriptedSource::new();
        let mut store = MockReadingStore::new();
        store
            .expect_append()
            .returning(|_| Box::pin(async { Ok(()) }));
        store.expect_prune_before().never();

        let pipeline = pipeline(
            Arc::new(source.clone()),
            Arc::new(store),
            Arc::new(MockGateway::new()),
        );
        let sensor = register(&pipeline);
        source.push(sensor, 4.0, 40.0);

        let config = SchedulerConfig {
            retention: Some(chrono::Duration::days(4_000_000_000)),
            prune_every: chrono::Duration::zero(),
            ..fast_config()
        };
        let scheduler = SamplingScheduler::new(pipeline, config);
        scheduler.start().unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(scheduler.is_running());
        assert!(source.call_count() >= 3);
        scheduler.stop().await;
    }
}
