//! Alert lifecycle
//!
//! Each (sensor, dimension) pair moves through
//! `no active alert -> active -> resolved`, and a new violation after
//! resolution opens a fresh alert instance. Repeat violations while an alert
//! is active update that alert in place instead of raising duplicates.

use crate::clock::Clock;
use crate::error::NotFoundError;
use crate::evaluator::Verdict;
use crate::records::{
    Alert, AlertId, AlertStatus, AlertView, Dimension, Reading, Sensor, SensorId, Severity,
    Timestamp,
};
use chrono::Duration;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Lifecycle tuning
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LifecycleConfig {
    /// Active alerts older than this are reported as critical
    pub escalation: Duration,
    /// Resolve an active alert when its dimension reads in range again
    pub auto_resolve_on_recovery: bool,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            escalation: Duration::minutes(30),
            auto_resolve_on_recovery: false,
        }
    }
}

/// Alert transitions caused by one applied reading
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlertChanges {
    pub raised: Vec<Alert>,
    pub updated: Vec<Alert>,
    pub resolved: Vec<Alert>,
}

impl AlertChanges {
    pub fn is_empty(&self) -> bool {
        self.raised.is_empty() && self.updated.is_empty() && self.resolved.is_empty()
    }
}

/// Severity of `alert` at `now`
///
/// Critical only while active and strictly older than `escalation`.
pub fn severity_at(alert: &Alert, now: Timestamp, escalation: Duration) -> Severity {
    if alert.is_active() && now - alert.raised_at > escalation {
        Severity::Critical
    } else {
        Severity::Warning
    }
}

#[derive(Debug, Default)]
struct AlertTable {
    alerts: HashMap<AlertId, Alert>,
    /// Alert ids in the order they were raised
    order: Vec<AlertId>,
    active: HashMap<(SensorId, Dimension), AlertId>,
}

impl AlertTable {
    fn ordered(&self) -> impl Iterator<Item = &Alert> {
        self.order.iter().filter_map(|id| self.alerts.get(id))
    }

    fn raise(
        &mut self,
        sensor_id: SensorId,
        dimension: Dimension,
        observed: f64,
        threshold: f64,
        at: Timestamp,
    ) -> Alert {
        let alert = Alert {
            id: AlertId::new(),
            sensor_id,
            dimension,
            observed_value: observed,
            violated_threshold: threshold,
            status: AlertStatus::Active,
            raised_at: at,
            last_observed_at: at,
            occurrences: 1,
            resolved_at: None,
        };
        self.active.insert((sensor_id, dimension), alert.id);
        self.order.push(alert.id);
        self.alerts.insert(alert.id, alert.clone());
        alert
    }

    /// Mark `id` resolved; `None` when unknown, unchanged when already resolved
    fn resolve(&mut self, id: AlertId, at: Timestamp) -> Option<(Alert, bool)> {
        let alert = self.alerts.get_mut(&id)?;
        if !alert.is_active() {
            return Some((alert.clone(), false));
        }
        alert.status = AlertStatus::Resolved;
        alert.resolved_at = Some(at.max(alert.raised_at));
        self.active.remove(&(alert.sensor_id, alert.dimension));
        Some((alert.clone(), true))
    }
}

/// Owner of every alert instance
///
/// A single mutex guards the alert table and the active index together, so
/// raise, update and resolve for the same key never interleave.
pub struct AlertLifecycleManager {
    config: LifecycleConfig,
    clock: Arc<dyn Clock>,
    table: Mutex<AlertTable>,
}

impl AlertLifecycleManager {
    pub fn new(config: LifecycleConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            table: Mutex::new(AlertTable::default()),
        }
    }

    pub fn config(&self) -> LifecycleConfig {
        self.config
    }

    /// Fold one evaluated reading into the alert table
    ///
    /// Out-of-range dimensions raise a new alert or update the active one;
    /// in-range dimensions resolve the active alert only when
    /// `auto_resolve_on_recovery` is set.
    pub fn apply(&self, sensor: &Sensor, reading: &Reading, verdict: &Verdict) -> AlertChanges {
        let mut changes = AlertChanges::default();
        if sensor.id != reading.sensor_id {
            warn!(
                "Ignoring reading for sensor {} applied to sensor {}",
                reading.sensor_id, sensor.id
            );
            return changes;
        }

        let violations = verdict.violations(sensor, reading);
        let mut guard = self.table.lock().unwrap_or_else(|e| e.into_inner());
        let table = &mut *guard;

        for violation in &violations {
            let key = (sensor.id, violation.dimension);
            let active_id = table.active.get(&key).copied();
            match active_id.and_then(|id| table.alerts.get_mut(&id)) {
                Some(alert) => {
                    alert.observed_value = violation.observed;
                    alert.violated_threshold = violation.threshold;
                    alert.last_observed_at = reading.captured_at.max(alert.last_observed_at);
                    alert.occurrences = alert.occurrences.saturating_add(1);
                    debug!(
                        "Updated alert {} for {} {}: {} (x{})",
                        alert.id,
                        sensor.name,
                        violation.dimension,
                        violation.observed,
                        alert.occurrences
                    );
                    changes.updated.push(alert.clone());
                }
                None => {
                    let alert = table.raise(
                        sensor.id,
                        violation.dimension,
                        violation.observed,
                        violation.threshold,
                        reading.captured_at,
                    );
                    info!(
                        "Raised {} alert {} for sensor '{}': {} outside bound {}",
                        violation.dimension,
                        alert.id,
                        sensor.name,
                        violation.observed,
                        violation.threshold
                    );
                    changes.raised.push(alert);
                }
            }
        }

        if self.config.auto_resolve_on_recovery {
            for dimension in Dimension::ALL {
                if !verdict.is_valid(dimension) {
                    continue;
                }
                let Some(id) = table.active.get(&(sensor.id, dimension)).copied() else {
                    continue;
                };
                if let Some((alert, true)) = table.resolve(id, reading.captured_at) {
                    info!(
                        "Resolved {} alert {} for sensor '{}' on recovery",
                        dimension, alert.id, sensor.name
                    );
                    changes.resolved.push(alert);
                }
            }
        }

        changes
    }

    /// Resolve an alert
    ///
    /// Idempotent: resolving an already resolved alert keeps its original
    /// `resolved_at`. Returns whether the status changed.
    pub fn resolve(&self, id: AlertId) -> Result<bool, NotFoundError> {
        let now = self.clock.now();
        let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        let (alert, changed) = table.resolve(id, now).ok_or(NotFoundError::Alert(id))?;
        if changed {
            info!("Resolved alert {} for sensor {}", alert.id, alert.sensor_id);
        }
        Ok(changed)
    }

    /// Remove an alert regardless of status
    pub fn delete(&self, id: AlertId) -> Result<Alert, NotFoundError> {
        let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        let alert = table.alerts.remove(&id).ok_or(NotFoundError::Alert(id))?;
        table.order.retain(|existing| *existing != id);
        if alert.is_active() {
            table.active.remove(&(alert.sensor_id, alert.dimension));
        }
        info!("Deleted alert {} for sensor {}", id, alert.sensor_id);
        Ok(alert)
    }

    pub fn severity(&self, alert: &Alert, now: Timestamp) -> Severity {
        severity_at(alert, now, self.config.escalation)
    }

    fn view(&self, alert: &Alert, now: Timestamp) -> AlertView {
        AlertView {
            alert: alert.clone(),
            severity: self.severity(alert, now),
        }
    }

    pub fn get(&self, id: AlertId) -> Result<AlertView, NotFoundError> {
        let now = self.clock.now();
        let table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        table
            .alerts
            .get(&id)
            .map(|alert| self.view(alert, now))
            .ok_or(NotFoundError::Alert(id))
    }

    /// Every alert in raise order
    pub fn list(&self) -> Vec<AlertView> {
        let now = self.clock.now();
        let table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        table.ordered().map(|alert| self.view(alert, now)).collect()
    }

    /// Active alerts in raise order
    pub fn active(&self) -> Vec<AlertView> {
        let now = self.clock.now();
        let table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        table
            .ordered()
            .filter(|alert| alert.is_active())
            .map(|alert| self.view(alert, now))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.table.lock().unwrap_or_else(|e| e.into_inner()).alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for AlertLifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertLifecycleManager")
            .field("config", &self.config)
            .field("alerts", &self.len())
            .finish()
    }
}
