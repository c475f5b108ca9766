/// Alert lifecycle, notification delivery and rate limiting
pub mod gateway;
pub mod lifecycle;
pub mod notifier;
pub mod rate_limiter;

pub use gateway::{AlertPayload, DeliveryOutcome, LogGateway, MockGateway, NotificationGateway};
pub use lifecycle::{severity_at, AlertChanges, AlertLifecycleManager, LifecycleConfig};
pub use notifier::Notifier;
pub use rate_limiter::RateLimiter;
