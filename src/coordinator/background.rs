//! Write-behind persistence for store-backed coordinators.
//!
//! In background mode the coordinator returns as soon as decisions are
//! merged in memory; a single writer thread applies the saves. Failures
//! happen after the response has left, so they surface on a report channel
//! instead of the call path.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use crate::record::UnitRecordSet;
use crate::store::{MaterializationStore, StoreError};

/// Maximum queued saves before `enqueue` applies backpressure.
const WRITE_QUEUE_CAPACITY: usize = 1024;

/// Maximum buffered failure reports before new ones are dropped.
const FAILURE_CAPACITY: usize = 256;

/// A save that failed after its response was already returned.
#[derive(Debug)]
pub struct WriteFailure {
    /// Unit whose records were being persisted.
    pub unit: String,
    /// Materialization ids carried by the failed save.
    pub materializations: Vec<String>,
    /// The underlying store error.
    pub error: StoreError,
}

struct SaveJob {
    unit: String,
    records: UnitRecordSet,
}

pub(crate) struct BackgroundWriter {
    tx: Option<Sender<SaveJob>>,
    failures: Receiver<WriteFailure>,
    worker: Option<JoinHandle<()>>,
}

impl BackgroundWriter {
    pub(crate) fn start(store: Arc<dyn MaterializationStore>) -> Self {
        let (tx, rx) = bounded::<SaveJob>(WRITE_QUEUE_CAPACITY);
        let (failure_tx, failures) = bounded::<WriteFailure>(FAILURE_CAPACITY);

        let worker = thread::Builder::new()
            .name("flagstick-write".to_string())
            .spawn(move || loop {
                match rx.recv() {
                    Ok(job) => {
                        if let Err(error) = store.save(&job.unit, &job.records) {
                            tracing::warn!(unit = %job.unit, error = %error, "Background save failed");
                            let failure = WriteFailure {
                                unit: job.unit,
                                materializations: job
                                    .records
                                    .materialization_ids()
                                    .map(str::to_owned)
                                    .collect(),
                                error,
                            };
                            if let Err(TrySendError::Full(failure)) = failure_tx.try_send(failure) {
                                tracing::warn!(
                                    unit = %failure.unit,
                                    "Write failure channel full, dropping report"
                                );
                            }
                        }
                    }
                    Err(_) => break,
                }
            })
            .expect("failed to spawn flagstick write worker");

        Self {
            tx: Some(tx),
            failures,
            worker: Some(worker),
        }
    }

    /// Queues a save. Blocks when the writer has fallen behind by
    /// [`WRITE_QUEUE_CAPACITY`] jobs.
    pub(crate) fn enqueue(&self, unit: String, records: UnitRecordSet) -> Result<(), StoreError> {
        let Some(tx) = self.tx.as_ref() else {
            return Err(StoreError::Closed);
        };
        tx.send(SaveJob { unit, records })
            .map_err(|_| StoreError::Closed)
    }

    pub(crate) fn failures(&self) -> Receiver<WriteFailure> {
        self.failures.clone()
    }

    /// Drains queued saves and joins the writer thread.
    pub(crate) fn shutdown(&mut self) {
        // Closing the channel lets the worker finish the queue, then exit.
        drop(self.tx.take());
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for BackgroundWriter {
    fn drop(&mut self) {
        self.shutdown();
    }
}
