//! End-to-end resolution-path tests for the coordinator.
//!
//! These tests verify:
//! - Fast path: zero strategy I/O once records are warm
//! - Strategy exclusivity: store-backed coordinators never delegate,
//!   authority-backed ones never load or save
//! - Sticky assignments across coordinator restarts over one file store
//! - Per-flag degradation on store failure
//! - Background write mode with its failure channel

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use flagstick::{
    AuthorityError, DecisionReason, FileMaterializationStore, FlagDecision, FlagResolver,
    InMemoryMaterializationStore, LocalOutcome, MaterializationStore, MissingMaterialization,
    RemoteAuthority, ResolutionCoordinator, ResolveRequest, ResolveResponse, ResolveRuntime,
    ResolveRuntimeConfig, ResolverError, StoreError, UnitRecordSet, WriteMode,
};
use tempfile::tempdir;

/// Evaluates a fixed routing table: flag -> (materialization, rule, variant
/// to assign when the rule is undecided). Existing decisions always win.
struct RouteResolver {
    routes: HashMap<String, (String, String, String)>,
    calls: AtomicUsize,
}

impl RouteResolver {
    fn new(routes: &[(&str, &str, &str, &str)]) -> Self {
        Self {
            routes: routes
                .iter()
                .map(|(flag, materialization, rule, variant)| {
                    (
                        (*flag).to_string(),
                        (
                            (*materialization).to_string(),
                            (*rule).to_string(),
                            (*variant).to_string(),
                        ),
                    )
                })
                .collect(),
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl FlagResolver for RouteResolver {
    fn resolve_flags(
        &self,
        request: &ResolveRequest,
        known: &UnitRecordSet,
    ) -> Result<LocalOutcome, ResolverError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut outcome = LocalOutcome::default();

        for flag in &request.flags {
            let Some((materialization, rule, variant)) = self.routes.get(flag) else {
                outcome.decisions.push(FlagDecision::no_match(flag));
                continue;
            };
            match known.get(materialization) {
                Some(record) => {
                    if let Some(existing) = record.variant_for(rule) {
                        outcome.decisions.push(FlagDecision::matched(flag, existing));
                    } else {
                        outcome.decisions.push(FlagDecision::matched(flag, variant));
                        outcome
                            .updates
                            .ensure_default(materialization)
                            .assign(rule, variant);
                    }
                }
                None => {
                    outcome
                        .decisions
                        .push(FlagDecision::unresolved(flag, "missing materialization"));
                    outcome
                        .missing
                        .push(MissingMaterialization::new(flag, materialization));
                }
            }
        }
        Ok(outcome)
    }
}

/// Assigns a different variant on every undecided evaluation, to expose
/// any path that re-decides instead of honoring stored state.
struct DriftingResolver {
    assignments: AtomicUsize,
}

impl DriftingResolver {
    fn new() -> Self {
        Self {
            assignments: AtomicUsize::new(0),
        }
    }
}

impl FlagResolver for DriftingResolver {
    fn resolve_flags(
        &self,
        request: &ResolveRequest,
        known: &UnitRecordSet,
    ) -> Result<LocalOutcome, ResolverError> {
        let mut outcome = LocalOutcome::default();
        for flag in &request.flags {
            match known.get("exp-drift") {
                Some(record) => {
                    if let Some(existing) = record.variant_for("rule-1") {
                        outcome.decisions.push(FlagDecision::matched(flag, existing));
                    } else {
                        let n = self.assignments.fetch_add(1, Ordering::SeqCst);
                        let variant = format!("v{n}");
                        outcome
                            .decisions
                            .push(FlagDecision::matched(flag, variant.clone()));
                        outcome
                            .updates
                            .ensure_default("exp-drift")
                            .assign("rule-1", variant);
                    }
                }
                None => {
                    outcome
                        .decisions
                        .push(FlagDecision::unresolved(flag, "missing materialization"));
                    outcome
                        .missing
                        .push(MissingMaterialization::new(flag, "exp-drift"));
                }
            }
        }
        Ok(outcome)
    }
}

struct CountingStore {
    inner: InMemoryMaterializationStore,
    loads: AtomicUsize,
    saves: AtomicUsize,
    fail_loads: bool,
    fail_saves: bool,
}

impl CountingStore {
    fn new() -> Self {
        Self {
            inner: InMemoryMaterializationStore::new(),
            loads: AtomicUsize::new(0),
            saves: AtomicUsize::new(0),
            fail_loads: false,
            fail_saves: false,
        }
    }

    fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

impl MaterializationStore for CountingStore {
    fn load_all(&self, unit: &str, requested: &str) -> Result<UnitRecordSet, StoreError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.fail_loads {
            return Err(StoreError::backend("load refused"));
        }
        self.inner.load_all(unit, requested)
    }

    fn save(&self, unit: &str, records: &UnitRecordSet) -> Result<(), StoreError> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        if self.fail_saves {
            return Err(StoreError::backend("save refused"));
        }
        self.inner.save(unit, records)
    }

    fn close(&self) -> Result<(), StoreError> {
        self.inner.close()
    }
}

struct CountingAuthority {
    calls: AtomicUsize,
}

impl CountingAuthority {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl RemoteAuthority for CountingAuthority {
    fn resolve(&self, request: &ResolveRequest) -> Result<ResolveResponse, AuthorityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let decisions = request
            .flags
            .iter()
            .map(|flag| FlagDecision::matched(flag, "remote"))
            .collect();
        Ok(ResolveResponse::from_decisions(decisions))
    }

    fn close(&self) -> Result<(), AuthorityError> {
        Ok(())
    }
}

fn checkout_resolver() -> Arc<RouteResolver> {
    Arc::new(RouteResolver::new(&[(
        "checkout",
        "exp-checkout",
        "rule-1",
        "treatment",
    )]))
}

/// One store round trip warms the unit; every later request for the same
/// flags completes with no further loads or saves.
#[test]
fn test_fast_path_zero_io_once_warm() {
    let resolver = checkout_resolver();
    let store = Arc::new(CountingStore::new());
    let coordinator = ResolutionCoordinator::builder(Arc::<RouteResolver>::clone(&resolver))
        .store(Arc::<CountingStore>::clone(&store))
        .build()
        .unwrap();

    let request = ResolveRequest::new("user-1", ["checkout"]);
    let first = coordinator.resolve(&request).unwrap();
    for _ in 0..5 {
        let repeat = coordinator.resolve(&request).unwrap();
        assert_eq!(
            repeat.decision_for("checkout").unwrap().variant,
            first.decision_for("checkout").unwrap().variant
        );
    }

    assert_eq!(store.loads(), 1);
    assert_eq!(store.saves(), 1);
    // Two passes on the cold request, one per warm request.
    assert_eq!(resolver.calls(), 7);
}

/// Wiring both a store and an authority is rejected at construction, so a
/// running coordinator can only ever touch one of them.
#[test]
fn test_strategy_exclusivity_is_structural() {
    let err = ResolutionCoordinator::builder(checkout_resolver())
        .store(Arc::new(InMemoryMaterializationStore::new()))
        .authority(Arc::new(CountingAuthority::new()))
        .build()
        .unwrap_err();
    assert!(err.is_configuration());
}

/// An authority-backed coordinator delegates the whole request and returns
/// the answer verbatim; the local evaluator runs exactly once.
#[test]
fn test_authority_backed_delegates_verbatim() {
    let resolver = checkout_resolver();
    let authority = Arc::new(CountingAuthority::new());
    let coordinator = ResolutionCoordinator::builder(Arc::<RouteResolver>::clone(&resolver))
        .authority(Arc::<CountingAuthority>::clone(&authority))
        .build()
        .unwrap();

    let response = coordinator
        .resolve(&ResolveRequest::new("user-1", ["checkout", "banner"]))
        .unwrap();

    assert_eq!(authority.calls(), 1);
    assert_eq!(resolver.calls(), 1);
    assert_eq!(
        response.decision_for("checkout").unwrap().variant.as_deref(),
        Some("remote")
    );
    assert_eq!(
        response.decision_for("banner").unwrap().variant.as_deref(),
        Some("remote")
    );
}

/// A decided assignment must survive a full process restart: new store
/// handle, new coordinator, an evaluator that would now choose otherwise.
#[test]
fn test_sticky_across_restart_with_file_store() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("records.fstk");

    {
        let store = Arc::new(FileMaterializationStore::open(&path).unwrap());
        let resolver = Arc::new(RouteResolver::new(&[(
            "checkout",
            "exp-checkout",
            "rule-1",
            "first-run",
        )]));
        let coordinator = ResolutionCoordinator::builder(resolver)
            .store(store)
            .build()
            .unwrap();

        let response = coordinator
            .resolve(&ResolveRequest::new("user-1", ["checkout"]))
            .unwrap();
        assert_eq!(
            response.decision_for("checkout").unwrap().variant.as_deref(),
            Some("first-run")
        );
        coordinator.close().unwrap();
    }

    let store = Arc::new(FileMaterializationStore::open(&path).unwrap());
    let resolver = Arc::new(RouteResolver::new(&[(
        "checkout",
        "exp-checkout",
        "rule-1",
        "second-run",
    )]));
    let coordinator = ResolutionCoordinator::builder(resolver)
        .store(store)
        .build()
        .unwrap();

    let response = coordinator
        .resolve(&ResolveRequest::new("user-1", ["checkout"]))
        .unwrap();
    assert_eq!(
        response.decision_for("checkout").unwrap().variant.as_deref(),
        Some("first-run")
    );
}

/// Store failure degrades only the flags that needed the store; the batch
/// still returns one decision per requested flag, in request order.
#[test]
fn test_degraded_batch_returns_every_flag() {
    let resolver = checkout_resolver();
    let store = Arc::new(CountingStore {
        fail_loads: true,
        ..CountingStore::new()
    });
    let coordinator = ResolutionCoordinator::builder(resolver)
        .store(store)
        .build()
        .unwrap();

    let response = coordinator
        .resolve(&ResolveRequest::new("user-1", ["banner", "checkout", "footer"]))
        .unwrap();

    assert_eq!(response.decisions.len(), 3);
    assert_eq!(response.decisions[0].flag, "banner");
    assert_eq!(response.decisions[1].flag, "checkout");
    assert_eq!(response.decisions[2].flag, "footer");

    assert_eq!(response.decisions[0].reason, DecisionReason::NoMatch);
    assert!(response.decisions[1].reason.is_unresolved());
    assert_eq!(response.decisions[2].reason, DecisionReason::NoMatch);
}

/// In background mode the response is optimistic and save failures arrive
/// on the report channel.
#[test]
fn test_background_write_failures_reported() {
    let store = Arc::new(CountingStore {
        fail_saves: true,
        ..CountingStore::new()
    });
    let coordinator = ResolutionCoordinator::builder(checkout_resolver())
        .store(store)
        .write_mode(WriteMode::Background)
        .build()
        .unwrap();
    let failures = coordinator.write_failures().unwrap();

    let response = coordinator
        .resolve(&ResolveRequest::new("user-1", ["checkout"]))
        .unwrap();
    assert_eq!(
        response.decision_for("checkout").unwrap().variant.as_deref(),
        Some("treatment")
    );

    let failure = failures.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(failure.unit, "user-1");
    assert_eq!(failure.materializations, vec!["exp-checkout".to_string()]);
}

/// Concurrent requests for the same undecided unit may race, but the
/// system settles on exactly one variant and every later request agrees.
#[test]
fn test_concurrent_same_unit_requests_converge() {
    let store = Arc::new(InMemoryMaterializationStore::new());
    let coordinator = Arc::new(
        ResolutionCoordinator::builder(Arc::new(DriftingResolver::new()))
            .store(Arc::<InMemoryMaterializationStore>::clone(&store))
            .build()
            .unwrap(),
    );
    let runtime = ResolveRuntime::start(
        Arc::<ResolutionCoordinator>::clone(&coordinator),
        ResolveRuntimeConfig {
            workers: 4,
            queue_capacity: 64,
        },
    )
    .unwrap();

    let handles: Vec<_> = (0..16)
        .map(|_| {
            runtime
                .resolve_async(ResolveRequest::new("user-1", ["drifty"]))
                .unwrap()
        })
        .collect();
    for handle in handles {
        let response = handle.join().unwrap();
        let decision = response.decision_for("drifty").unwrap();
        assert!(decision.reason.is_match());
        assert!(decision.variant.is_some());
    }

    // Racing saves may overwrite each other, but only one rule entry can
    // be durable at the end.
    let persisted = store.load_all("user-1", "exp-drift").unwrap();
    let record = persisted.get("exp-drift").unwrap();
    assert_eq!(record.rule_count(), 1);
    assert!(record.variant_for("rule-1").is_some());

    // Once a winner is cached, later requests all agree with each other.
    let settled = runtime
        .resolve(ResolveRequest::new("user-1", ["drifty"]))
        .unwrap()
        .decision_for("drifty")
        .unwrap()
        .variant
        .clone();
    for _ in 0..4 {
        let response = runtime
            .resolve(ResolveRequest::new("user-1", ["drifty"]))
            .unwrap();
        assert_eq!(response.decision_for("drifty").unwrap().variant, settled);
    }
}
