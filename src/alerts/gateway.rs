//! Outbound alert notifications
//!
//! The engine hands a formatted [`AlertPayload`] and a destination string to
//! a [`NotificationGateway`] and reports whatever outcome the gateway returns.
//! There is no retry or delivery tracking beyond that outcome.

use crate::records::{AlertId, AlertView, Dimension, Sensor, SensorId, Severity, Timestamp};
use crate::BoxFuture;
use log::{info, warn};
use serde::Serialize;
use std::future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const MAX_TITLE_LENGTH: usize = 256;
const MAX_BODY_LENGTH: usize = 1024;

/// Alert details formatted for delivery
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertPayload {
    pub alert_id: AlertId,
    pub sensor_id: SensorId,
    pub sensor_name: String,
    pub location: String,
    pub dimension: Dimension,
    pub observed_value: f64,
    pub violated_threshold: f64,
    pub severity: Severity,
    pub raised_at: Timestamp,
    pub title: String,
    pub body: String,
}

impl AlertPayload {
    pub fn new(view: &AlertView, sensor: &Sensor) -> Self {
        let alert = &view.alert;
        let unit = match alert.dimension {
            Dimension::Temperature => "°C",
            Dimension::Humidity => "%RH",
        };
        let direction = if alert.observed_value > alert.violated_threshold {
            "above maximum"
        } else {
            "below minimum"
        };

        let title = truncate_text(
            &format!("Cold-chain {:?}: {} {}", view.severity, sensor.name, alert.dimension),
            MAX_TITLE_LENGTH,
        );

        let mut body = format!(
            "{} reads {}{} ({} {}{}).\nRaised: {}",
            alert.dimension,
            alert.observed_value,
            unit,
            direction,
            alert.violated_threshold,
            unit,
            alert.raised_at.format("%Y-%m-%d %H:%M:%S UTC"),
        );
        if !sensor.location.is_empty() {
            body.push_str(&format!("\nLocation: {}", sensor.location));
        }
        if alert.occurrences > 1 {
            body.push_str(&format!("\nObserved {} times", alert.occurrences));
        }

        Self {
            alert_id: alert.id,
            sensor_id: sensor.id,
            sensor_name: sensor.name.clone(),
            location: sensor.location.clone(),
            dimension: alert.dimension,
            observed_value: alert.observed_value,
            violated_threshold: alert.violated_threshold,
            severity: view.severity,
            raised_at: alert.raised_at,
            title,
            body: truncate_text(&body, MAX_BODY_LENGTH),
        }
    }
}

/// Truncate to at most `max_length` bytes on a character boundary
fn truncate_text(text: &str, max_length: usize) -> String {
    if text.len() <= max_length {
        return text.to_string();
    }

    let mut truncate_at = max_length.saturating_sub(3);
    while truncate_at > 0 && !text.is_char_boundary(truncate_at) {
        truncate_at -= 1;
    }
    format!("{}...", &text[..truncate_at])
}

/// Result reported by a gateway for one delivery attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "lowercase")]
pub enum DeliveryOutcome {
    Accepted,
    Failed(String),
}

impl DeliveryOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, DeliveryOutcome::Accepted)
    }
}

/// Channel that carries alert notifications to people or systems
#[cfg_attr(test, mockall::automock)]
pub trait NotificationGateway: Send + Sync {
    /// Deliver `payload` to `destination`
    fn deliver(&self, payload: AlertPayload, destination: String) -> BoxFuture<DeliveryOutcome>;
}

/// Gateway that writes notifications to the log and accepts them all
#[derive(Debug, Default, Clone, Copy)]
pub struct LogGateway;

impl NotificationGateway for LogGateway {
    fn deliver(&self, payload: AlertPayload, destination: String) -> BoxFuture<DeliveryOutcome> {
        info!("[notify {}] {}", destination, payload.title);
        for line in payload.body.lines() {
            info!("[notify {}]   {}", destination, line);
        }
        Box::pin(future::ready(DeliveryOutcome::Accepted))
    }
}

/// Recording gateway for tests and dry runs
///
/// Keeps every delivery it receives. It can be configured to fail every
/// delivery or to take some time per delivery.
#[derive(Debug, Clone, Default)]
pub struct MockGateway {
    deliveries: Arc<Mutex<Vec<(AlertPayload, String)>>>,
    failure: Option<String>,
    delay: Option<Duration>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Gateway that rejects every delivery with `reason`
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            failure: Some(reason.into()),
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn deliveries(&self) -> Vec<(AlertPayload, String)> {
        self.deliveries.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn delivery_count(&self) -> usize {
        self.deliveries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl NotificationGateway for MockGateway {
    fn deliver(&self, payload: AlertPayload, destination: String) -> BoxFuture<DeliveryOutcome> {
        let deliveries = Arc::clone(&self.deliveries);
        let failure = self.failure.clone();
        let delay = self.delay;

        Box::pin(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            deliveries
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push((payload, destination.clone()));
            match failure {
                Some(reason) => {
                    warn!("Mock delivery to {} failed: {}", destination, reason);
                    DeliveryOutcome::Failed(reason)
                }
                None => DeliveryOutcome::Accepted,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{Alert, AlertStatus, Range};
    use chrono::Utc;

    fn sensor(name: &str, location: &str) -> Sensor {
        Sensor {
            id: SensorId::new(),
            name: name.to_string(),
            location: location.to_string(),
            temperature: Range::new(Dimension::Temperature, 2.0, 8.0).unwrap(),
            humidity: Range::new(Dimension::Humidity, 30.0, 60.0).unwrap(),
            enabled: true,
        }
    }

    fn view(sensor: &Sensor, observed: f64, threshold: f64, occurrences: u32) -> AlertView {
        let now = Utc::now();
        AlertView {
            alert: Alert {
                id: AlertId::new(),
                sensor_id: sensor.id,
                dimension: Dimension::Temperature,
                observed_value: observed,
                violated_threshold: threshold,
                status: AlertStatus::Active,
                raised_at: now,
                last_observed_at: now,
                occurrences,
                resolved_at: None,
            },
            severity: Severity::Warning,
        }
    }

    #[test]
    fn test_payload_formatting() {
        let sensor = sensor("Vaccine fridge", "Pharmacy, level 2");
        let payload = AlertPayload::new(&view(&sensor, 9.5, 8.0, 3), &sensor);

        assert_eq!(payload.title, "Cold-chain Warning: Vaccine fridge temperature");
        assert!(payload.body.contains("9.5°C"));
        assert!(payload.body.contains("above maximum 8°C"));
        assert!(payload.body.contains("Location: Pharmacy, level 2"));
        assert!(payload.body.contains("Observed 3 times"));
    }

    #[test]
    fn test_payload_below_minimum_without_location() {
        let sensor = sensor("Freezer", "");
        let payload = AlertPayload::new(&view(&sensor, 1.0, 2.0, 1), &sensor);

        assert!(payload.body.contains("below minimum"));
        assert!(!payload.body.contains("Location"));
        assert!(!payload.body.contains("Observed"));
    }

    #[test]
    fn test_long_title_is_truncated() {
        let sensor = sensor(&"é".repeat(300), "");
        let payload = AlertPayload::new(&view(&sensor, 9.5, 8.0, 1), &sensor);

        assert!(payload.title.len() <= MAX_TITLE_LENGTH);
        assert!(payload.title.ends_with("..."));
    }

    #[test]
    fn test_truncate_text_respects_char_boundaries() {
        assert_eq!(truncate_text("short", 10), "short");
        let truncated = truncate_text("ééééé", 7);
        assert!(truncated.len() <= 7);
        assert_eq!(truncated, "éé...");
    }

    #[tokio::test]
    async fn test_log_gateway_accepts() {
        let sensor = sensor("Fridge", "");
        let payload = AlertPayload::new(&view(&sensor, 9.5, 8.0, 1), &sensor);
        assert_eq!(
            LogGateway.deliver(payload, "ops".to_string()).await,
            DeliveryOutcome::Accepted
        );
    }

    #[tokio::test]
    async fn test_mock_gateway_records_and_fails() {
        let sensor = sensor("Fridge", "");
        let payload = AlertPayload::new(&view(&sensor, 9.5, 8.0, 1), &sensor);

        let gateway = MockGateway::failing("smtp down");
        let outcome = gateway.deliver(payload.clone(), "ops@example.com".to_string()).await;

        assert_eq!(outcome, DeliveryOutcome::Failed("smtp down".to_string()));
        assert_eq!(gateway.delivery_count(), 1);
        assert_eq!(gateway.deliveries()[0].1, "ops@example.com");
    }

    #[test]
    fn test_outcome_serialization() {
        let json = serde_json::to_value(DeliveryOutcome::Failed("rate limited".into())).unwrap();
        assert_eq!(json["outcome"], "failed");
        assert_eq!(json["reason"], "rate limited");
    }
}
