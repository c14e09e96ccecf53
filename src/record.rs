//! Materialization records and per-unit record sets.
//!
//! A materialization record is the unit of stickiness: it remembers, for one
//! (unit, materialization) pair, which variant every rule has already decided.
//! Records only ever grow. Once a rule id holds a variant for a unit, later
//! evaluations must keep returning that variant, so nothing in this module
//! removes or rewrites an existing entry except the explicit save-time
//! [`MaterializationRecord::overlay`] path.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// One (unit, materialization) decision record.
///
/// `unit_in_info` distinguishes "this unit was never evaluated for this
/// materialization" from "evaluated, but no rule matched". `rule_to_variant`
/// holds every variant already decided, keyed by rule id.
///
/// # Examples
///
/// ```
/// use flagstick::MaterializationRecord;
///
/// let mut record = MaterializationRecord::default();
/// assert!(record.is_empty());
///
/// record.assign("rule-1", "control");
/// assert_eq!(record.variant_for("rule-1"), Some("control"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterializationRecord {
    /// Whether this unit has ever been evaluated for this materialization.
    #[serde(rename = "unitInInfo")]
    pub unit_in_info: bool,

    /// Decided variant per rule id. Entries are only ever added.
    #[serde(rename = "ruleToVariant", default)]
    pub rule_to_variant: HashMap<String, String>,
}

impl MaterializationRecord {
    /// Creates a record marking the unit as evaluated, with no rule decisions yet.
    #[must_use]
    pub fn seen() -> Self {
        Self {
            unit_in_info: true,
            rule_to_variant: HashMap::new(),
        }
    }

    /// Returns the decided variant for `rule`, if any.
    #[must_use]
    pub fn variant_for(&self, rule: &str) -> Option<&str> {
        self.rule_to_variant.get(rule).map(String::as_str)
    }

    /// Records a decision for `rule` unless one already exists.
    ///
    /// Returns `true` if the entry was added. An existing decision is never
    /// overwritten here; that is the sticky guarantee every caller relies on.
    pub fn assign(&mut self, rule: impl Into<String>, variant: impl Into<String>) -> bool {
        self.unit_in_info = true;
        match self.rule_to_variant.entry(rule.into()) {
            std::collections::hash_map::Entry::Occupied(_) => false,
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(variant.into());
                true
            }
        }
    }

    /// Folds `other` into this record, keeping existing decisions.
    ///
    /// Entries already present win; entries only in `other` are added.
    /// `unit_in_info` is ORed, so a unit once seen stays seen.
    pub fn absorb(&mut self, other: &Self) {
        self.unit_in_info |= other.unit_in_info;
        for (rule, variant) in &other.rule_to_variant {
            self.rule_to_variant
                .entry(rule.clone())
                .or_insert_with(|| variant.clone());
        }
    }

    /// Merges `incoming` into this record, letting `incoming` win per rule id.
    ///
    /// This is the save-time merge: the result is the union of rule entries,
    /// with `incoming`'s value taken for a rule id present in both. Callers
    /// are expected to have folded prior state into `incoming` first, which
    /// makes the two sides differ only under a genuine write race.
    pub fn overlay(&mut self, incoming: &Self) {
        self.unit_in_info |= incoming.unit_in_info;
        for (rule, variant) in &incoming.rule_to_variant {
            self.rule_to_variant.insert(rule.clone(), variant.clone());
        }
    }

    /// Returns the number of decided rules.
    #[must_use]
    pub fn rule_count(&self) -> usize {
        self.rule_to_variant.len()
    }

    /// Returns true if this is the empty/default record.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.unit_in_info && self.rule_to_variant.is_empty()
    }
}

/// Every [`MaterializationRecord`] known for one unit, keyed by
/// materialization id.
///
/// Key order carries no meaning. The set-level merge operations apply their
/// record-level counterparts per materialization id, so ids present on only
/// one side are carried over untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitRecordSet {
    records: HashMap<String, MaterializationRecord>,
}

impl UnitRecordSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the record for `materialization`, if present.
    #[must_use]
    pub fn get(&self, materialization: &str) -> Option<&MaterializationRecord> {
        self.records.get(materialization)
    }

    /// Inserts or replaces the record for `materialization`.
    pub fn insert(&mut self, materialization: impl Into<String>, record: MaterializationRecord) {
        self.records.insert(materialization.into(), record);
    }

    /// Returns the record for `materialization`, inserting the empty/default
    /// record first if absent.
    pub fn ensure_default(&mut self, materialization: &str) -> &mut MaterializationRecord {
        self.records
            .entry(materialization.to_owned())
            .or_default()
    }

    /// Returns true if a record exists for `materialization`.
    #[must_use]
    pub fn contains(&self, materialization: &str) -> bool {
        self.records.contains_key(materialization)
    }

    /// Folds `other` in, record by record, keeping existing decisions.
    pub fn absorb(&mut self, other: &Self) {
        for (id, incoming) in &other.records {
            match self.records.get_mut(id) {
                Some(existing) => existing.absorb(incoming),
                None => {
                    self.records.insert(id.clone(), incoming.clone());
                }
            }
        }
    }

    /// Merges `incoming` in, record by record, with incoming entries winning
    /// per rule id. Ids absent from `incoming` are untouched.
    pub fn overlay(&mut self, incoming: &Self) {
        for (id, record) in &incoming.records {
            match self.records.get_mut(id) {
                Some(existing) => existing.overlay(record),
                None => {
                    self.records.insert(id.clone(), record.clone());
                }
            }
        }
    }

    /// Iterates over (materialization id, record) pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &MaterializationRecord)> {
        self.records.iter().map(|(id, r)| (id.as_str(), r))
    }

    /// Returns the materialization ids present in this set.
    pub fn materialization_ids(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }

    /// Returns the number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if the set holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl From<HashMap<String, MaterializationRecord>> for UnitRecordSet {
    fn from(records: HashMap<String, MaterializationRecord>) -> Self {
        Self { records }
    }
}

impl FromIterator<(String, MaterializationRecord)> for UnitRecordSet {
    fn from_iter<I: IntoIterator<Item = (String, MaterializationRecord)>>(iter: I) -> Self {
        Self {
            records: iter.into_iter().collect(),
        }
    }
}
