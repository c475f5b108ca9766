use crate::alerts::gateway::{AlertPayload, DeliveryOutcome, NotificationGateway};
use crate::alerts::RateLimiter;
use crate::clock::Clock;
use log::{info, warn};
use std::sync::{Arc, Mutex};

/// Rate-limited front of a [`NotificationGateway`]
///
/// Every attempt that passes the limiter uses up a slot, whatever the gateway
/// answers. Limited attempts are not queued or retried.
pub struct Notifier {
    gateway: Arc<dyn NotificationGateway>,
    rate_limiter: Mutex<RateLimiter>,
    clock: Arc<dyn Clock>,
}

impl Notifier {
    pub fn new(
        gateway: Arc<dyn NotificationGateway>,
        rate_limiter: RateLimiter,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            gateway,
            rate_limiter: Mutex::new(rate_limiter),
            clock,
        }
    }

    pub async fn send(&self, payload: AlertPayload, destination: &str) -> DeliveryOutcome {
        let admitted = self
            .rate_limiter
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .try_acquire(self.clock.now());
        if !admitted {
            warn!(
                "Notification for alert {} to {} rate limited",
                payload.alert_id, destination
            );
            return DeliveryOutcome::Failed("rate limited".to_string());
        }

        let alert_id = payload.alert_id;
        let outcome = self.gateway.deliver(payload, destination.to_string()).await;
        match &outcome {
            DeliveryOutcome::Accepted => {
                info!("Notification for alert {} accepted by {}", alert_id, destination)
            }
            DeliveryOutcome::Failed(reason) => warn!(
                "Notification for alert {} to {} failed: {}",
                alert_id, destination, reason
            ),
        }
        outcome
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("rate_limiter", &self.rate_limiter)
            .finish()
    }
}
