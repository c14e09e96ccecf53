//! Request orchestration.
//!
//! The coordinator ties the local rule evaluator to exactly one backing
//! strategy and enforces the sticky guarantee: once a (unit, rule) pair has
//! a decided variant, every later resolution observes that variant.
//!
//! A resolution makes at most one strategy round trip. When the evaluator
//! completes every flag from records already cached for the unit, the
//! request finishes with zero I/O. Otherwise the missing records are loaded
//! from the store (or the whole request is delegated to the authority),
//! the evaluator runs once more, and newly decided assignments are merged
//! back and persisted.

mod background;
mod runtime;

pub use background::WriteFailure;
pub use runtime::{ExecutionHandle, ResolveRuntime, ResolveRuntimeConfig};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam_channel::Receiver;

use crate::arena::MaterializationArena;
use crate::authority::{AuthorityError, RemoteAuthority};
use crate::error::{FlagstickError, FlagstickResult};
use crate::record::UnitRecordSet;
use crate::request::{FlagDecision, ResolveRequest, ResolveResponse};
use crate::resolver::{FlagResolver, LocalOutcome, MissingMaterialization};
use crate::store::{MaterializationStore, StoreError};
use crate::strategy::Strategy;

use background::BackgroundWriter;

/// When store saves happen relative to the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    /// Save before returning; a failed save degrades the affected flags.
    #[default]
    Synchronous,
    /// Return once decisions are merged in memory and save on a writer
    /// thread. Failures surface on
    /// [`ResolutionCoordinator::write_failures`].
    Background,
}

/// Builder for [`ResolutionCoordinator`].
pub struct CoordinatorBuilder {
    resolver: Arc<dyn FlagResolver>,
    store: Option<Arc<dyn MaterializationStore>>,
    authority: Option<Arc<dyn RemoteAuthority>>,
    write_mode: WriteMode,
}

impl CoordinatorBuilder {
    fn new(resolver: Arc<dyn FlagResolver>) -> Self {
        Self {
            resolver,
            store: None,
            authority: None,
            write_mode: WriteMode::Synchronous,
        }
    }

    /// Backs the coordinator with a local materialization store.
    #[must_use]
    pub fn store(mut self, store: Arc<dyn MaterializationStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Backs the coordinator with a remote authority.
    #[must_use]
    pub fn authority(mut self, authority: Arc<dyn RemoteAuthority>) -> Self {
        self.authority = Some(authority);
        self
    }

    /// Selects when store saves happen. Ignored for authority-backed
    /// coordinators.
    #[must_use]
    pub const fn write_mode(mut self, write_mode: WriteMode) -> Self {
        self.write_mode = write_mode;
        self
    }

    /// Classifies the configured strategy and builds the coordinator.
    ///
    /// # Errors
    /// Returns a configuration error when both or neither backing strategy
    /// is configured and no built-in fallback exists.
    pub fn build(self) -> FlagstickResult<ResolutionCoordinator> {
        let strategy = Strategy::classify(self.store, self.authority)?;

        let writer = match (&strategy, self.write_mode) {
            (Strategy::Store(store), WriteMode::Background) => {
                Some(BackgroundWriter::start(Arc::clone(store)))
            }
            _ => None,
        };

        Ok(ResolutionCoordinator {
            resolver: self.resolver,
            strategy,
            write_mode: self.write_mode,
            arena: MaterializationArena::new(),
            writer: Mutex::new(writer),
            closed: AtomicBool::new(false),
        })
    }
}

/// Orchestrates flag resolutions over one backing strategy.
///
/// The coordinator owns the cross-request materialization cache (the
/// arena), so concurrent resolutions for the same unit converge on the
/// same assignments without re-entering the store once records are warm.
pub struct ResolutionCoordinator {
    resolver: Arc<dyn FlagResolver>,
    strategy: Strategy,
    write_mode: WriteMode,
    arena: MaterializationArena,
    writer: Mutex<Option<BackgroundWriter>>,
    closed: AtomicBool,
}

impl ResolutionCoordinator {
    /// Starts building a coordinator around the given evaluator.
    #[must_use]
    pub fn builder(resolver: Arc<dyn FlagResolver>) -> CoordinatorBuilder {
        CoordinatorBuilder::new(resolver)
    }

    /// Resolves the requested flags for one unit.
    ///
    /// Returns one decision per requested flag, in request order. Flags
    /// whose materialization records could not be loaded or saved come back
    /// with an unresolved reason while the rest of the batch is unaffected.
    ///
    /// # Errors
    /// Propagates validation errors, evaluator failures and authority
    /// failures. Store failures never error the batch; they degrade the
    /// affected flags instead.
    pub fn resolve(&self, request: &ResolveRequest) -> FlagstickResult<ResolveResponse> {
        request.validate()?;
        self.ensure_open()?;

        let known = self.arena.snapshot(&request.unit)?;
        let first = self.resolver.resolve_flags(request, &known)?;

        if first.is_final() {
            self.arena.absorb(&request.unit, &first.updates)?;
            return Ok(ResolveResponse::from_decisions(first.decisions));
        }

        match &self.strategy {
            Strategy::Authority(authority) => Ok(authority.resolve(request)?),
            Strategy::Store(store) => {
                self.resolve_against_store(store.as_ref(), request, &known, first)
            }
        }
    }

    /// Flushes pending writes and releases the backing strategy.
    ///
    /// Idempotent; later `resolve` calls fail with the strategy's closed
    /// error.
    ///
    /// # Errors
    /// Propagates the strategy's teardown error.
    pub fn close(&self) -> FlagstickResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let mut guard = self
            .writer
            .lock()
            .map_err(|_| FlagstickError::internal("poisoned writer lock: close"))?;
        if let Some(mut writer) = guard.take() {
            writer.shutdown();
        }
        drop(guard);

        self.strategy.close()
    }

    /// Failure reports for background saves.
    ///
    /// `None` unless the coordinator is store-backed in
    /// [`WriteMode::Background`]. Grab the receiver before `close`; reports
    /// already queued stay readable afterwards.
    #[must_use]
    pub fn write_failures(&self) -> Option<Receiver<WriteFailure>> {
        self.writer
            .lock()
            .ok()?
            .as_ref()
            .map(BackgroundWriter::failures)
    }

    /// The configured write mode.
    #[must_use]
    pub const fn write_mode(&self) -> WriteMode {
        self.write_mode
    }

    /// The active backing strategy.
    #[must_use]
    pub fn strategy(&self) -> &Strategy {
        &self.strategy
    }

    /// Number of units with cached materialization records.
    ///
    /// # Errors
    /// Returns an internal error if the arena lock is poisoned.
    pub fn cached_units(&self) -> FlagstickResult<usize> {
        self.arena.unit_count()
    }

    fn ensure_open(&self) -> FlagstickResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(match &self.strategy {
                Strategy::Store(_) => StoreError::Closed.into(),
                Strategy::Authority(_) => AuthorityError::Closed.into(),
            });
        }
        Ok(())
    }

    fn resolve_against_store(
        &self,
        store: &dyn MaterializationStore,
        request: &ResolveRequest,
        known: &UnitRecordSet,
        first: LocalOutcome,
    ) -> FlagstickResult<ResolveResponse> {
        let missing_ids: Vec<String> = first
            .missing_materialization_ids()
            .into_iter()
            .map(str::to_owned)
            .collect();
        let Some(primary) = missing_ids.first() else {
            return Ok(ResolveResponse::from_decisions(first.decisions));
        };

        // One round trip: the load is keyed by the first missing id and the
        // store returns every record it knows for the unit.
        let mut working = match store.load_all(&request.unit, primary) {
            Ok(loaded) => loaded,
            Err(error) => {
                tracing::warn!(
                    unit = %request.unit,
                    error = %error,
                    "Materialization load failed, degrading affected flags"
                );
                let detail = format!("materialization load failed: {error}");
                return Ok(ResolveResponse::from_decisions(degrade_missing(
                    first.decisions,
                    &first.missing,
                    &detail,
                )));
            }
        };

        for id in &missing_ids {
            working.ensure_default(id);
        }
        // Stored records win over the in-process cache for a raced rule id.
        working.absorb(known);

        let second = self.resolver.resolve_flags(request, &working)?;
        working.absorb(&second.updates);

        match self.write_mode {
            WriteMode::Synchronous => {
                if let Err(error) = store.save(&request.unit, &working) {
                    tracing::warn!(
                        unit = %request.unit,
                        error = %error,
                        "Materialization save failed, degrading affected flags"
                    );
                    let detail = format!("materialization save failed: {error}");
                    return Ok(ResolveResponse::from_decisions(degrade_missing(
                        second.decisions,
                        &first.missing,
                        &detail,
                    )));
                }
            }
            WriteMode::Background => {
                if let Err(error) = self.enqueue_save(&request.unit, working.clone()) {
                    tracing::warn!(
                        unit = %request.unit,
                        error = %error,
                        "Materialization save could not be queued, degrading affected flags"
                    );
                    let detail = format!("materialization save failed: {error}");
                    return Ok(ResolveResponse::from_decisions(degrade_missing(
                        second.decisions,
                        &first.missing,
                        &detail,
                    )));
                }
            }
        }

        // Assignments enter the arena only once they are durable (or queued
        // for the writer); a failed save leaves the next attempt on the
        // store path instead of fast-pathing unsaved state.
        self.arena.absorb(&request.unit, &working)?;

        Ok(ResolveResponse::from_decisions(second.decisions))
    }

    fn enqueue_save(&self, unit: &str, records: UnitRecordSet) -> Result<(), StoreError> {
        let guard = self
            .writer
            .lock()
            .map_err(|_| StoreError::backend("poisoned writer lock: enqueue"))?;
        let Some(writer) = guard.as_ref() else {
            return Err(StoreError::Closed);
        };
        writer.enqueue(unit.to_string(), records)
    }
}

impl std::fmt::Debug for ResolutionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolutionCoordinator")
            .field("strategy", &self.strategy)
            .field("write_mode", &self.write_mode)
            .finish_non_exhaustive()
    }
}

fn degrade_missing(
    decisions: Vec<FlagDecision>,
    missing: &[MissingMaterialization],
    detail: &str,
) -> Vec<FlagDecision> {
    decisions
        .into_iter()
        .map(|decision| {
            if missing.iter().any(|signal| signal.flag == decision.flag) {
                FlagDecision::unresolved(decision.flag, detail)
            } else {
                decision
            }
        })
        .collect()
}
