//! File-backed materialization store.
//!
//! A write-through wrapper over [`InMemoryMaterializationStore`]: the full
//! snapshot loads into memory on open, every read and write thereafter hits
//! memory only, and `close` serializes the complete state back to disk with a
//! write-to-temp-then-rename commit. The trade-off is explicit: assignments
//! are durable only across an orderly close; a crash mid-process loses writes
//! since the last successful close.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Error as IoError, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use uuid::Uuid;

use crate::record::UnitRecordSet;
use crate::store::codec;
use crate::store::file_lock::SnapshotLock;
use crate::store::memory::InMemoryMaterializationStore;
use crate::store::traits::{MaterializationStore, StoreError};

fn io_err(context: &str, err: &IoError) -> StoreError {
    if err.kind() == ErrorKind::InvalidData {
        StoreError::Corrupted(format!("{context}: {err}"))
    } else {
        StoreError::Io(format!("{context}: {err}"))
    }
}

fn lock_err(context: &'static str) -> StoreError {
    StoreError::backend(format!("poisoned lock: {context}"))
}

#[derive(Debug)]
struct FileState {
    lock: Option<SnapshotLock>,
    closed: bool,
}

/// File-persisted [`MaterializationStore`].
///
/// One snapshot file holds the whole map of unit id to records. An exclusive
/// `.lock` sibling rejects a second process opening the same snapshot.
#[derive(Debug)]
pub struct FileMaterializationStore {
    path: PathBuf,
    cache: InMemoryMaterializationStore,
    state: Mutex<FileState>,
}

impl FileMaterializationStore {
    /// Opens the snapshot at `path`, creating an empty store when the file
    /// does not exist yet.
    ///
    /// # Errors
    /// - [`StoreError::Io`] when the lock cannot be acquired or the file
    ///   cannot be read
    /// - [`StoreError::Corrupted`] when the snapshot fails header, checksum
    ///   or format checks
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();

        let lock = SnapshotLock::acquire(&path)
            .map_err(|e| io_err(&format!("locking {}", path.display()), &e))?;

        let cache = InMemoryMaterializationStore::new();
        if path.exists() {
            let units = Self::read_snapshot(&path)?;
            let unit_count = units.len();
            cache.replace_all(units)?;
            tracing::info!(
                path = %path.display(),
                units = unit_count,
                "loaded materialization snapshot"
            );
        }

        Ok(Self {
            path,
            cache,
            state: Mutex::new(FileState {
                lock: Some(lock),
                closed: false,
            }),
        })
    }

    /// Returns the snapshot path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_snapshot(path: &Path) -> Result<HashMap<String, UnitRecordSet>, StoreError> {
        let file = File::open(path).map_err(|e| io_err("opening snapshot", &e))?;
        let mut reader = BufReader::new(file);

        codec::read_header(&mut reader).map_err(|e| io_err("reading snapshot header", &e))?;
        codec::decode(&mut reader).map_err(|e| io_err("reading snapshot body", &e))
    }

    fn write_snapshot(
        path: &Path,
        units: &HashMap<String, UnitRecordSet>,
    ) -> Result<(), StoreError> {
        let temp_path = path.with_extension(format!("tmp.{}", Uuid::new_v4()));

        let result = (|| -> Result<(), StoreError> {
            let file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&temp_path)
                .map_err(|e| io_err("creating snapshot temp file", &e))?;
            let mut writer = BufWriter::new(file);

            codec::write_header(&mut writer)
                .map_err(|e| io_err("writing snapshot header", &e))?;
            let body = codec::encode(units).map_err(|e| io_err("encoding snapshot", &e))?;
            writer
                .write_all(&body)
                .map_err(|e| io_err("writing snapshot body", &e))?;

            writer.flush().map_err(|e| io_err("flushing snapshot", &e))?;
            writer
                .get_ref()
                .sync_all()
                .map_err(|e| io_err("syncing snapshot", &e))?;

            // Atomic rename is the commit point
            fs::rename(&temp_path, path).map_err(|e| io_err("committing snapshot", &e))?;
            Ok(())
        })();

        if result.is_err() && temp_path.exists() {
            let _ = fs::remove_file(&temp_path);
        }
        result
    }
}

impl MaterializationStore for FileMaterializationStore {
    fn load_all(&self, unit: &str, requested: &str) -> Result<UnitRecordSet, StoreError> {
        self.cache.load_all(unit, requested)
    }

    fn save(&self, unit: &str, records: &UnitRecordSet) -> Result<(), StoreError> {
        self.cache.save(unit, records)
    }

    fn close(&self) -> Result<(), StoreError> {
        let mut state = self.state.lock().map_err(|_| lock_err("close"))?;
        if state.closed {
            return Ok(());
        }

        let units = self.cache.snapshot_all()?;
        Self::write_snapshot(&self.path, &units)?;
        tracing::info!(
            path = %self.path.display(),
            units = units.len(),
            "persisted materialization snapshot"
        );

        self.cache.close()?;
        state.closed = true;
        state.lock = None;
        Ok(())
    }
}

impl Drop for FileMaterializationStore {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            tracing::warn!(
                path = %self.path.display(),
                error = %err,
                "failed to persist snapshot on drop"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

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
    fn test_open_without_file_starts_empty() {
        let dir = tempdir().unwrap();
        let store = FileMaterializationStore::open(dir.path().join("records.fstk")).unwrap();

        let records = store.load_all("u", "m1").unwrap();
        assert_eq!(records.len(), 1);
        assert!(records.get("m1").unwrap().is_empty());
    }

    #[test]
    fn test_round_trip_across_close() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("records.fstk");

        {
            let store = FileMaterializationStore::open(&path).unwrap();
            store.save("u1", &set_with("m1", &[("r1", "a")])).unwrap();
            store.save("u2", &set_with("m2", &[("r1", "b")])).unwrap();
            store.close().unwrap();
        }

        let store = FileMaterializationStore::open(&path).unwrap();
        let u1 = store.load_all("u1", "m1").unwrap();
        assert_eq!(u1.get("m1").unwrap().variant_for("r1"), Some("a"));
        let u2 = store.load_all("u2", "m2").unwrap();
        assert_eq!(u2.get("m2").unwrap().variant_for("r1"), Some("b"));
    }

    #[test]
    fn test_close_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = FileMaterializationStore::open(dir.path().join("records.fstk")).unwrap();
        store.save("u", &set_with("m1", &[("r1", "a")])).unwrap();

        store.close().unwrap();
        store.close().unwrap();
    }

    #[test]
    fn test_operations_fail_after_close() {
        let dir = tempdir().unwrap();
        let store = FileMaterializationStore::open(dir.path().join("records.fstk")).unwrap();
        store.close().unwrap();

        let Err(StoreError::Closed) = store.load_all("u", "m1") else {
            panic!("expected Closed");
        };
    }

    #[test]
    fn test_second_opener_rejected_while_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("records.fstk");

        let _store = FileMaterializationStore::open(&path).unwrap();
        let result = FileMaterializationStore::open(&path);
        assert!(result.is_err());
    }

    #[test]
    fn test_drop_persists_snapshot() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("records.fstk");

        {
            let store = FileMaterializationStore::open(&path).unwrap();
            store.save("u", &set_with("m1", &[("r1", "a")])).unwrap();
            // No explicit close
        }

        let store = FileMaterializationStore::open(&path).unwrap();
        let records = store.load_all("u", "m1").unwrap();
        assert_eq!(records.get("m1").unwrap().variant_for("r1"), Some("a"));
    }

    #[test]
    fn test_corrupted_snapshot_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("records.fstk");

        {
            let store = FileMaterializationStore::open(&path).unwrap();
            store.save("u", &set_with("m1", &[("r1", "a")])).unwrap();
            store.close().unwrap();
        }

        // Flip one byte inside the body
        let mut bytes = fs::read(&path).unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xFF;
        fs::write(&path, bytes).unwrap();

        let result = FileMaterializationStore::open(&path);
        let Err(StoreError::Corrupted(_)) = result else {
            panic!("expected Corrupted, got {result:?}");
        };
    }
}
