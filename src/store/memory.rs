//! In-memory materialization store.
//!
//! Thread-safe reference implementation of [`MaterializationStore`], intended
//! for embedded usage, tests, and as the cache layer under the file-backed
//! adapter. State is a map of unit id to a shared record set; `save` builds a
//! merged copy and swaps it in wholesale, so a reader holding the previous
//! set never observes a half-written merge.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::record::UnitRecordSet;
use crate::store::traits::{MaterializationStore, StoreError};

fn lock_err(context: &'static str) -> StoreError {
    StoreError::backend(format!("poisoned lock: {context}"))
}

#[derive(Debug, Default)]
struct StoreState {
    units: HashMap<String, Arc<UnitRecordSet>>,
    closed: bool,
}

/// In-process [`MaterializationStore`] over a unit-keyed map.
///
/// # Examples
///
/// ```
/// use flagstick::{InMemoryMaterializationStore, MaterializationStore, UnitRecordSet};
///
/// let store = InMemoryMaterializationStore::new();
/// let records = store.load_all("user-1", "exp-1").unwrap();
/// assert!(records.get("exp-1").unwrap().is_empty());
/// ```
#[derive(Debug, Default)]
pub struct InMemoryMaterializationStore {
    state: RwLock<StoreState>,
}

impl InMemoryMaterializationStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of units with stored records.
    ///
    /// # Errors
    /// Returns a [`StoreError`] if the state lock is poisoned.
    pub fn unit_count(&self) -> Result<usize, StoreError> {
        let state = self.state.read().map_err(|_| lock_err("unit_count"))?;
        Ok(state.units.len())
    }

    /// Returns true once `close` has run.
    ///
    /// # Errors
    /// Returns a [`StoreError`] if the state lock is poisoned.
    pub fn is_closed(&self) -> Result<bool, StoreError> {
        let state = self.state.read().map_err(|_| lock_err("is_closed"))?;
        Ok(state.closed)
    }

    /// Replaces all state wholesale. Used by the file adapter when replaying
    /// a snapshot into memory.
    pub(crate) fn replace_all(
        &self,
        units: HashMap<String, UnitRecordSet>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().map_err(|_| lock_err("replace_all"))?;
        state.units = units
            .into_iter()
            .map(|(unit, set)| (unit, Arc::new(set)))
            .collect();
        Ok(())
    }

    /// Clones out all state. Used by the file adapter when writing a snapshot.
    pub(crate) fn snapshot_all(&self) -> Result<HashMap<String, UnitRecordSet>, StoreError> {
        let state = self.state.read().map_err(|_| lock_err("snapshot_all"))?;
        Ok(state
            .units
            .iter()
            .map(|(unit, set)| (unit.clone(), (**set).clone()))
            .collect())
    }
}

impl MaterializationStore for InMemoryMaterializationStore {
    fn load_all(&self, unit: &str, requested: &str) -> Result<UnitRecordSet, StoreError> {
        let state = self.state.read().map_err(|_| lock_err("load_all"))?;
        if state.closed {
            return Err(StoreError::Closed);
        }

        let mut records = state
            .units
            .get(unit)
            .map(|set| (**set).clone())
            .unwrap_or_default();
        records.ensure_default(requested);
        Ok(records)
    }

    fn save(&self, unit: &str, records: &UnitRecordSet) -> Result<(), StoreError> {
        // Guard against orphaned state keyed by nothing.
        if unit.trim().is_empty() || records.is_empty() {
            return Ok(());
        }

        let mut state = self.state.write().map_err(|_| lock_err("save"))?;
        if state.closed {
            return Err(StoreError::Closed);
        }

        let merged = match state.units.get(unit) {
            Some(existing) => {
                let mut copy = (**existing).clone();
                copy.overlay(records);
                copy
            }
            None => records.clone(),
        };
        state.units.insert(unit.to_owned(), Arc::new(merged));
        Ok(())
    }

    fn close(&self) -> Result<(), StoreError> {
        let mut state = self.state.write().map_err(|_| lock_err("close"))?;
        if !state.closed {
            state.closed = true;
            state.units.clear();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::MaterializationRecord;

    fn set_with(materialization: &str, rules: &[(&str, &str)]) -> UnitRecordSet {
        let mut record = MaterializationRecord::seen();
        for (rule, variant) in rules {
            record.assign(*rule, *variant);
        }
        let mut set = UnitRecordSet::new();
        set.insert(materialization, record);
        set
    }

    #[test]
    fn test_default_record_for_unknown_unit() {
        let store = InMemoryMaterializationStore::new();
        let records = store.load_all("never-seen", "mX").unwrap();

        assert_eq!(records.len(), 1);
        let Some(record) = records.get("mX") else {
            panic!("requested id missing from load_all result");
        };
        assert!(record.is_empty());
    }

    #[test]
    fn test_default_record_added_for_known_unit_unknown_id() {
        let store = InMemoryMaterializationStore::new();
        store.save("u", &set_with("m1", &[("r1", "a")])).unwrap();

        let records = store.load_all("u", "m2").unwrap();
        assert!(records.contains("m1"));
        assert!(records.get("m2").unwrap().is_empty());
    }

    #[test]
    fn test_save_unions_rule_entries() {
        let store = InMemoryMaterializationStore::new();
        store.save("u", &set_with("m1", &[("r1", "a")])).unwrap();
        store.save("u", &set_with("m1", &[("r2", "b")])).unwrap();

        let records = store.load_all("u", "m1").unwrap();
        let Some(m1) = records.get("m1") else {
            panic!("m1 missing");
        };
        assert_eq!(m1.variant_for("r1"), Some("a"));
        assert_eq!(m1.variant_for("r2"), Some("b"));
    }

    #[test]
    fn test_save_leaves_other_materializations_untouched() {
        let store = InMemoryMaterializationStore::new();
        store.save("u", &set_with("m1", &[("r1", "a")])).unwrap();
        store.save("u", &set_with("m2", &[("r1", "x")])).unwrap();

        let records = store.load_all("u", "m1").unwrap();
        assert_eq!(records.get("m1").unwrap().variant_for("r1"), Some("a"));
        assert_eq!(records.get("m2").unwrap().variant_for("r1"), Some("x"));
    }

    #[test]
    fn test_sticky_across_loads() {
        let store = InMemoryMaterializationStore::new();
        store.save("u", &set_with("m1", &[("r1", "v1")])).unwrap();

        for _ in 0..3 {
            let records = store.load_all("u", "m1").unwrap();
            assert_eq!(records.get("m1").unwrap().variant_for("r1"), Some("v1"));
        }
    }

    #[test]
    fn test_empty_unit_save_is_noop() {
        let store = InMemoryMaterializationStore::new();
        store.save("u", &set_with("m1", &[("r1", "a")])).unwrap();

        store.save("", &set_with("m9", &[("r9", "z")])).unwrap();
        store.save("  ", &set_with("m9", &[("r9", "z")])).unwrap();

        assert_eq!(store.unit_count().unwrap(), 1);
        let records = store.load_all("u", "m1").unwrap();
        assert_eq!(records.get("m1").unwrap().variant_for("r1"), Some("a"));
    }

    #[test]
    fn test_empty_records_save_is_noop() {
        let store = InMemoryMaterializationStore::new();
        store.save("u", &UnitRecordSet::new()).unwrap();
        assert_eq!(store.unit_count().unwrap(), 0);
    }

    #[test]
    fn test_close_is_idempotent() {
        let store = InMemoryMaterializationStore::new();
        store.save("u", &set_with("m1", &[("r1", "a")])).unwrap();

        store.close().unwrap();
        assert!(store.is_closed().unwrap());
        store.close().unwrap();
        assert!(store.is_closed().unwrap());
    }

    #[test]
    fn test_operations_fail_after_close() {
        let store = InMemoryMaterializationStore::new();
        store.close().unwrap();

        let Err(StoreError::Closed) = store.load_all("u", "m1") else {
            panic!("expected Closed on load_all");
        };
        let Err(StoreError::Closed) = store.save("u", &set_with("m1", &[("r1", "a")])) else {
            panic!("expected Closed on save");
        };
    }

    #[test]
    fn test_loaded_set_is_a_snapshot() {
        let store = InMemoryMaterializationStore::new();
        store.save("u", &set_with("m1", &[("r1", "a")])).unwrap();

        let before = store.load_all("u", "m1").unwrap();
        store.save("u", &set_with("m1", &[("r2", "b")])).unwrap();

        // The set handed out earlier does not change under later writes.
        assert!(before.get("m1").unwrap().variant_for("r2").is_none());
    }
}
