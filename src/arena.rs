//! Coordinator-owned materialization cache.
//!
//! The local resolver is pure and holds no state of its own, so the records
//! it already "knows" live here: one append-only map of unit id to record
//! set, owned by the coordinator and passed by reference into every resolver
//! call. Sharing is per-process; durable state stays with the active store.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::FlagstickError;
use crate::record::UnitRecordSet;

fn lock_err(context: &'static str) -> FlagstickError {
    FlagstickError::internal(format!("poisoned arena lock: {context}"))
}

/// Append-only per-unit cache of materialization records.
///
/// Snapshots are cheap shared handles; `absorb` swaps in a merged copy, so a
/// snapshot taken earlier never changes underneath its holder.
#[derive(Debug, Default)]
pub struct MaterializationArena {
    state: RwLock<HashMap<String, Arc<UnitRecordSet>>>,
    empty: Arc<UnitRecordSet>,
}

impl MaterializationArena {
    /// Creates an empty arena.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the records currently known for `unit`.
    ///
    /// # Errors
    /// Returns an internal error if the arena lock is poisoned.
    pub fn snapshot(&self, unit: &str) -> Result<Arc<UnitRecordSet>, FlagstickError> {
        let state = self.state.read().map_err(|_| lock_err("snapshot"))?;
        Ok(state
            .get(unit)
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.empty)))
    }

    /// Folds `incoming` into the records known for `unit`.
    ///
    /// Existing decisions win; the arena only ever gains entries.
    ///
    /// # Errors
    /// Returns an internal error if the arena lock is poisoned.
    pub fn absorb(&self, unit: &str, incoming: &UnitRecordSet) -> Result<(), FlagstickError> {
        if unit.is_empty() || incoming.is_empty() {
            return Ok(());
        }

        let mut state = self.state.write().map_err(|_| lock_err("absorb"))?;
        let merged = match state.get(unit) {
            Some(existing) => {
                let mut copy = (**existing).clone();
                copy.absorb(incoming);
                copy
            }
            None => incoming.clone(),
        };
        state.insert(unit.to_owned(), Arc::new(merged));
        Ok(())
    }

    /// Returns the number of units with cached records.
    ///
    /// # Errors
    /// Returns an internal error if the arena lock is poisoned.
    pub fn unit_count(&self) -> Result<usize, FlagstickError> {
        let state = self.state.read().map_err(|_| lock_err("unit_count"))?;
        Ok(state.len())
    }
}
