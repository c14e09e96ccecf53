//! The materialization persistence contract.
//!
//! A store owns all durable sticky-assignment state. The coordinator only
//! ever bulk-loads a unit's records and writes merged sets back; it never
//! deletes. Retention/TTL is the backing store's concern.

use thiserror::Error;

use crate::record::UnitRecordSet;

/// Errors that can occur during store operations.
///
/// A store failure never fails a whole resolution: the coordinator converts
/// it into per-flag degradation for the materialization ids in flight.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend error.
    #[error("Store backend error: {0}")]
    Backend(String),

    /// File or transport I/O failed.
    #[error("Store I/O error: {0}")]
    Io(String),

    /// Persisted data failed integrity or format checks.
    #[error("Store data corrupted: {0}")]
    Corrupted(String),

    /// Serialization failed.
    #[error("Store serialization error: {0}")]
    Serialization(String),

    /// Operation on a closed store.
    #[error("Store is closed")]
    Closed,
}

impl StoreError {
    /// Creates a backend error.
    #[must_use]
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }
}

/// Pluggable persistence strategy for sticky assignments.
///
/// # Safety Considerations
/// - Implementations must handle concurrent access safely
/// - `save` must merge at rule granularity so concurrent writers for the
///   same unit cannot erase each other's decisions for different rules
pub trait MaterializationStore: Send + Sync {
    /// Loads every record known for `unit`.
    ///
    /// The whole unit is returned in one call — not just `requested` — so
    /// the sticky path costs one round trip per unit per request. The result
    /// always contains an entry for `requested`: when the unit or the id is
    /// unknown, that entry is the empty/default record. Never returns an
    /// empty set; unknown units are not an error.
    ///
    /// # Errors
    /// Returns a [`StoreError`] when the backend cannot serve the load.
    fn load_all(&self, unit: &str, requested: &str) -> Result<UnitRecordSet, StoreError>;

    /// Merges `records` into the stored state for `unit`.
    ///
    /// Materialization ids absent from `records` are untouched. For each id
    /// present, rule entries are unioned with incoming values winning per
    /// rule id; callers are expected to have folded prior `load_all` results
    /// into `records` first, making the union a plain replacement outside a
    /// genuine write race.
    ///
    /// An empty `unit` is a no-op, not an error (guard against orphaned
    /// state keyed by nothing).
    ///
    /// # Errors
    /// Returns a [`StoreError`] when the backend cannot accept the write.
    fn save(&self, unit: &str, records: &UnitRecordSet) -> Result<(), StoreError>;

    /// Releases backing resources. Idempotent: the second and later calls
    /// are error-free and have no further side effects.
    ///
    /// # Errors
    /// Returns a [`StoreError`] when releasing resources fails.
    fn close(&self) -> Result<(), StoreError>;
}
