//! Durability tests for the file-backed materialization store.
//!
//! These tests verify:
//! - Full snapshot round trip across close/reopen
//! - Union merge at save time (existing rule decisions survive)
//! - Corruption detection on reopen
//! - Single-writer locking

use flagstick::{FileMaterializationStore, MaterializationStore, StoreError, UnitRecordSet};

use std::fs;
use tempfile::tempdir;

fn records_with(materialization: &str, rule: &str, variant: &str) -> UnitRecordSet {
    let mut records = UnitRecordSet::new();
    records.ensure_default(materialization).assign(rule, variant);
    records
}

/// Everything saved before `close` must reproduce exactly on a fresh
/// adapter over the same file.
#[test]
fn test_snapshot_round_trip_across_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("records.fstk");

    {
        let store = FileMaterializationStore::open(&path).unwrap();
        store
            .save("u1", &records_with("exp-a", "rule-1", "red"))
            .unwrap();
        store
            .save("u2", &records_with("exp-b", "rule-9", "blue"))
            .unwrap();
        store.close().unwrap();
    }

    let store = FileMaterializationStore::open(&path).unwrap();

    let u1 = store.load_all("u1", "exp-a").unwrap();
    let record = u1.get("exp-a").unwrap();
    assert!(record.unit_in_info);
    assert_eq!(record.variant_for("rule-1"), Some("red"));

    let u2 = store.load_all("u2", "exp-b").unwrap();
    assert_eq!(u2.get("exp-b").unwrap().variant_for("rule-9"), Some("blue"));
}

/// Two saves touching different rules of the same materialization must
/// union, and the union must survive a restart.
#[test]
fn test_union_merge_survives_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("records.fstk");

    {
        let store = FileMaterializationStore::open(&path).unwrap();
        store
            .save("u1", &records_with("exp-a", "rule-1", "red"))
            .unwrap();
        store
            .save("u1", &records_with("exp-a", "rule-2", "blue"))
            .unwrap();
        store.close().unwrap();
    }

    let store = FileMaterializationStore::open(&path).unwrap();
    let loaded = store.load_all("u1", "exp-a").unwrap();
    let record = loaded.get("exp-a").unwrap();
    assert_eq!(record.variant_for("rule-1"), Some("red"));
    assert_eq!(record.variant_for("rule-2"), Some("blue"));
}

/// A never-seen unit gets exactly one default record for the requested id.
#[test]
fn test_default_record_for_unknown_unit() {
    let dir = tempdir().unwrap();
    let store = FileMaterializationStore::open(dir.path().join("records.fstk")).unwrap();

    let loaded = store.load_all("ghost", "exp-x").unwrap();
    assert_eq!(loaded.len(), 1);
    let record = loaded.get("exp-x").unwrap();
    assert!(!record.unit_in_info);
    assert_eq!(record.rule_count(), 0);
}

/// A bit flip in the snapshot body must be detected on reopen.
#[test]
fn test_corrupted_snapshot_is_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("records.fstk");

    {
        let store = FileMaterializationStore::open(&path).unwrap();
        store
            .save("u1", &records_with("exp-a", "rule-1", "red"))
            .unwrap();
        store.close().unwrap();
    }

    let mut bytes = fs::read(&path).unwrap();
    let mid = bytes.len() / 2;
    bytes[mid] ^= 0xFF;
    fs::write(&path, &bytes).unwrap();

    let err = FileMaterializationStore::open(&path).unwrap_err();
    assert!(
        matches!(err, StoreError::Corrupted(_)),
        "expected corruption error, got {err:?}"
    );
}

/// The snapshot file admits one writer at a time.
#[test]
fn test_second_opener_is_rejected_while_locked() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("records.fstk");

    let first = FileMaterializationStore::open(&path).unwrap();
    assert!(FileMaterializationStore::open(&path).is_err());

    // The holder keeps working, and release makes the path reusable.
    first
        .save("u1", &records_with("exp-a", "rule-1", "red"))
        .unwrap();
    first.close().unwrap();

    let second = FileMaterializationStore::open(&path).unwrap();
    assert_eq!(
        second
            .load_all("u1", "exp-a")
            .unwrap()
            .get("exp-a")
            .unwrap()
            .variant_for("rule-1"),
        Some("red")
    );
}

/// Dropping the adapter without an explicit close must still persist.
#[test]
fn test_drop_persists_unsaved_state() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("records.fstk");

    {
        let store = FileMaterializationStore::open(&path).unwrap();
        store
            .save("u1", &records_with("exp-a", "rule-1", "red"))
            .unwrap();
        // No close; Drop runs here.
    }

    let store = FileMaterializationStore::open(&path).unwrap();
    assert_eq!(
        store
            .load_all("u1", "exp-a")
            .unwrap()
            .get("exp-a")
            .unwrap()
            .variant_for("rule-1"),
        Some("red")
    );
}

/// Closing twice is error-free; operations after close fail closed.
#[test]
fn test_close_is_idempotent() {
    let dir = tempdir().unwrap();
    let store = FileMaterializationStore::open(dir.path().join("records.fstk")).unwrap();

    store.close().unwrap();
    store.close().unwrap();

    let err = store
        .save("u1", &records_with("exp-a", "rule-1", "red"))
        .unwrap_err();
    assert!(matches!(err, StoreError::Closed));
}
