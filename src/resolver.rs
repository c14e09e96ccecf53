//! The seam to the local rule evaluator.
//!
//! The evaluator itself is out of scope here; the coordinator only needs a
//! pure, synchronous call that takes the request plus whatever materialization
//! records are already known for the unit, and reports back three things: the
//! per-flag decisions, which requested flags could not be decided for lack of
//! materialization data, and the assignments it newly decided.

use crate::error::ResolverError;
use crate::record::UnitRecordSet;
use crate::request::{FlagDecision, ResolveRequest};

/// A flag the local resolver could not decide without materialization data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingMaterialization {
    /// The requested flag that is blocked.
    pub flag: String,
    /// The materialization id whose record is needed.
    pub materialization: String,
}

impl MissingMaterialization {
    /// Creates a missing-materialization signal.
    #[must_use]
    pub fn new(flag: impl Into<String>, materialization: impl Into<String>) -> Self {
        Self {
            flag: flag.into(),
            materialization: materialization.into(),
        }
    }
}

/// Outcome of one local evaluation pass.
#[derive(Debug, Clone, Default)]
pub struct LocalOutcome {
    /// One decision per requested flag, in request order. Flags listed in
    /// `missing` carry placeholder decisions that the caller will replace.
    pub decisions: Vec<FlagDecision>,

    /// Flags blocked on materialization data, with the ids they need.
    /// Empty means the evaluation is final and no store or authority call
    /// is required.
    pub missing: Vec<MissingMaterialization>,

    /// Assignments decided during this pass, to be folded into durable
    /// state by the caller. Only ever adds rule entries.
    pub updates: UnitRecordSet,
}

impl LocalOutcome {
    /// Creates a final outcome with no missing materializations.
    #[must_use]
    pub fn decided(decisions: Vec<FlagDecision>) -> Self {
        Self {
            decisions,
            missing: Vec::new(),
            updates: UnitRecordSet::new(),
        }
    }

    /// Returns true when no flag is blocked on materialization data.
    #[must_use]
    pub fn is_final(&self) -> bool {
        self.missing.is_empty()
    }

    /// Returns the distinct missing materialization ids, first-seen order.
    #[must_use]
    pub fn missing_materialization_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = Vec::new();
        for signal in &self.missing {
            let id = signal.materialization.as_str();
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        ids
    }
}

/// The local rule evaluator consumed by the coordinator.
///
/// `resolve_flags` must be pure and CPU-only: same request plus same known
/// records gives the same outcome, and the call never blocks on I/O. Known
/// records are handed in explicitly on every call; implementations must not
/// keep their own materialization cache.
pub trait FlagResolver: Send + Sync {
    /// Evaluates the requested flags against `known` materialization records.
    ///
    /// # Errors
    ///
    /// Returns a [`ResolverError`] when evaluation itself fails. This is
    /// fatal for the whole request; per-flag degradation is reserved for
    /// store failures and expressed via `missing`, not via this error.
    fn resolve_flags(
        &self,
        request: &ResolveRequest,
        known: &UnitRecordSet,
    ) -> Result<LocalOutcome, ResolverError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    // Compile-time test: ensure the trait is object-safe
    fn _assert_flag_resolver_object_safe(_: &dyn FlagResolver) {}

    #[test]
    fn test_missing_ids_deduplicated_in_order() {
        let outcome = LocalOutcome {
            decisions: Vec::new(),
            missing: vec![
                MissingMaterialization::new("flags/a", "m2"),
                MissingMaterialization::new("flags/b", "m1"),
                MissingMaterialization::new("flags/c", "m2"),
            ],
            updates: UnitRecordSet::new(),
        };
        assert_eq!(outcome.missing_materialization_ids(), vec!["m2", "m1"]);
        assert!(!outcome.is_final());
    }

    #[test]
    fn test_decided_outcome_is_final() {
        let outcome = LocalOutcome::decided(vec![FlagDecision::no_match("flags/a")]);
        assert!(outcome.is_final());
        assert!(outcome.missing_materialization_ids().is_empty());
    }
}
