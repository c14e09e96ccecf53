//! Resolution request and response models.
//!
//! A request names a targeting unit, the flags to decide, and the evaluation
//! context. Responses carry one decision per requested flag plus a resolution
//! id; responses coming back from a remote authority additionally carry the
//! opaque continuation token the authority issued.

use std::fmt;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

/// Conservative upper bound for unit id length.
///
/// Targeting keys are caller-supplied; this is a safety limit against
/// adversarial input, not a format constraint.
pub const MAX_UNIT_LEN: usize = 1024;

/// Conservative upper bound for flags per request.
pub const MAX_FLAGS_PER_REQUEST: usize = 256;

/// Allowed flag-name shape: path-style ids such as `flags/checkout-v2`.
const FLAG_NAME_PATTERN: &str = r"^[A-Za-z0-9][A-Za-z0-9._/-]*$";

fn valid_flag_shape(name: &str) -> bool {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(FLAG_NAME_PATTERN).ok())
        .as_ref()
        .is_some_and(|re| re.is_match(name))
}

/// Identifier assigned to one resolution.
///
/// Local resolutions mint a fresh v4 id; authority responses carry the id the
/// authority assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResolutionId(Uuid);

impl ResolutionId {
    /// Creates a new random resolution id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a resolution id from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ResolutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ResolutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One resolution request.
///
/// # Examples
///
/// ```
/// use flagstick::ResolveRequest;
///
/// let request = ResolveRequest::new("user-42", ["flags/checkout-v2"])
///     .with_apply(true);
/// assert!(request.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveRequest {
    /// Caller-side correlation id for this request.
    pub request_id: Uuid,

    /// Targeting unit the decisions bind to.
    pub unit: String,

    /// Requested flag ids.
    pub flags: Vec<String>,

    /// Evaluation context (arbitrary targeting attributes).
    #[serde(default)]
    pub context: serde_json::Value,

    /// When true, the resolving side also records assignment/exposure.
    #[serde(default)]
    pub apply: bool,

    /// When the request was created.
    pub timestamp: DateTime<Utc>,
}

impl ResolveRequest {
    /// Creates a request for `unit` over the given flags.
    #[must_use]
    pub fn new<I, S>(unit: impl Into<String>, flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            request_id: Uuid::new_v4(),
            unit: unit.into(),
            flags: flags.into_iter().map(Into::into).collect(),
            context: serde_json::Value::Null,
            apply: false,
            timestamp: Utc::now(),
        }
    }

    /// Sets the evaluation context.
    #[must_use]
    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = context;
        self
    }

    /// Sets the apply-and-log flag.
    #[must_use]
    pub const fn with_apply(mut self, apply: bool) -> Self {
        self.apply = apply;
        self
    }

    /// Validates this request.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] when the unit id is empty or oversized,
    /// no flags are requested, too many flags are requested, or a flag name
    /// has an invalid shape.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.unit.trim().is_empty() {
            return Err(ValidationError::EmptyUnit);
        }
        if self.unit.len() > MAX_UNIT_LEN {
            return Err(ValidationError::UnitTooLong {
                max_length: MAX_UNIT_LEN,
            });
        }
        if self.flags.is_empty() {
            return Err(ValidationError::NoFlagsRequested);
        }
        if self.flags.len() > MAX_FLAGS_PER_REQUEST {
            return Err(ValidationError::TooManyFlags {
                max: MAX_FLAGS_PER_REQUEST,
                actual: self.flags.len(),
            });
        }
        for flag in &self.flags {
            if !valid_flag_shape(flag) {
                return Err(ValidationError::InvalidFlagName { name: flag.clone() });
            }
        }
        Ok(())
    }
}

/// Why a flag decided the way it did.
///
/// `Unresolved` is the degraded outcome: the flag needed materialization data
/// that could not be loaded or saved. It is deliberately distinct from
/// `NoMatch`, which is a normal decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DecisionReason {
    /// A targeting rule matched and a variant was assigned.
    Match,
    /// Evaluation ran; no rule matched this unit.
    NoMatch,
    /// The flag exists but has been archived.
    Archived,
    /// The flag could not be decided; `detail` names the failure.
    Unresolved { detail: String },
}

impl DecisionReason {
    /// Returns true for a rule match.
    #[must_use]
    pub const fn is_match(&self) -> bool {
        matches!(self, Self::Match)
    }

    /// Returns true for the degraded outcome.
    #[must_use]
    pub const fn is_unresolved(&self) -> bool {
        matches!(self, Self::Unresolved { .. })
    }
}

impl fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Match => write!(f, "match"),
            Self::NoMatch => write!(f, "no_match"),
            Self::Archived => write!(f, "archived"),
            Self::Unresolved { detail } => write!(f, "unresolved: {detail}"),
        }
    }
}

/// One per-flag decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagDecision {
    /// The flag this decision answers.
    pub flag: String,

    /// Decided variant id; `None` when no rule matched or the flag degraded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,

    pub reason: DecisionReason,
}

impl FlagDecision {
    /// Creates a matched decision.
    #[must_use]
    pub fn matched(flag: impl Into<String>, variant: impl Into<String>) -> Self {
        Self {
            flag: flag.into(),
            variant: Some(variant.into()),
            reason: DecisionReason::Match,
        }
    }

    /// Creates a no-match decision.
    #[must_use]
    pub fn no_match(flag: impl Into<String>) -> Self {
        Self {
            flag: flag.into(),
            variant: None,
            reason: DecisionReason::NoMatch,
        }
    }

    /// Creates an archived decision.
    #[must_use]
    pub fn archived(flag: impl Into<String>) -> Self {
        Self {
            flag: flag.into(),
            variant: None,
            reason: DecisionReason::Archived,
        }
    }

    /// Creates a degraded decision.
    #[must_use]
    pub fn unresolved(flag: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            flag: flag.into(),
            variant: None,
            reason: DecisionReason::Unresolved {
                detail: detail.into(),
            },
        }
    }
}

/// The answer to one [`ResolveRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveResponse {
    /// Identifier for this resolution.
    pub resolution_id: ResolutionId,

    /// One decision per requested flag, in request order.
    pub decisions: Vec<FlagDecision>,

    /// Opaque token from the remote authority; empty for local resolutions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub continuation_token: Option<Vec<u8>>,

    /// When the resolution completed.
    pub timestamp: DateTime<Utc>,
}

impl ResolveResponse {
    /// Creates a locally produced response with a fresh resolution id.
    #[must_use]
    pub fn from_decisions(decisions: Vec<FlagDecision>) -> Self {
        Self {
            resolution_id: ResolutionId::new(),
            decisions,
            continuation_token: None,
            timestamp: Utc::now(),
        }
    }

    /// Returns the decision for `flag`, if present.
    #[must_use]
    pub fn decision_for(&self, flag: &str) -> Option<&FlagDecision> {
        self.decisions.iter().find(|d| d.flag == flag)
    }
}
