//! Historical reading store
//!
//! The engine consumes persistence through the [`ReadingStore`] trait. Two
//! adapters ship with the crate: a bounded in-memory store and an append-only
//! JSON-lines file.

pub mod json_lines;
pub mod memory;
pub mod summary;

pub use json_lines::JsonLinesReadingStore;
pub use memory::InMemoryReadingStore;
pub use summary::{summarize, DimensionSummary, ReadingSummary};

use crate::error::PersistenceError;
use crate::records::{Reading, SensorId, Timestamp};
use crate::BoxFuture;

/// Append-only, time-ordered persistence of readings
#[cfg_attr(test, mockall::automock)]
pub trait ReadingStore: Send + Sync {
    /// Persist one reading
    ///
    /// Readings of one sensor must arrive in non-decreasing `captured_at` order;
    /// an older reading is rejected with `PersistenceError::OutOfOrder`.
    fn append(&self, reading: Reading) -> BoxFuture<Result<(), PersistenceError>>;

    /// Readings captured within `[start, end]`, ordered by `captured_at`
    fn query(
        &self,
        sensor_id: Option<SensorId>,
        start: Timestamp,
        end: Timestamp,
    ) -> BoxFuture<Result<Vec<Reading>, PersistenceError>>;

    /// Drop readings captured before `cutoff`, returning how many were removed
    fn prune_before(&self, cutoff: Timestamp) -> BoxFuture<Result<usize, PersistenceError>>;
}
