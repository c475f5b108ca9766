/// Publish/subscribe fan-out of sensor, reading and alert snapshots
pub mod broadcast;

pub use broadcast::{BroadcastHub, Handler, Snapshot, Subscription, Topic};
