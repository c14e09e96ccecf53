//! Error types for flagstick.
//!
//! All errors are strongly typed using thiserror. Module-local kinds
//! ([`StoreError`](crate::store::StoreError),
//! [`AuthorityError`](crate::authority::AuthorityError)) live beside their
//! traits; this module holds the remaining kinds and the top-level
//! [`FlagstickError`] they all aggregate into.

use thiserror::Error;

use crate::authority::AuthorityError;
use crate::store::StoreError;

/// Validation errors raised before a request is orchestrated.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Unit id cannot be empty")]
    EmptyUnit,

    #[error("Unit id exceeds maximum length of {max_length}")]
    UnitTooLong { max_length: usize },

    #[error("At least one flag must be requested")]
    NoFlagsRequested,

    #[error("Request holds {actual} flags, maximum is {max}")]
    TooManyFlags { max: usize, actual: usize },

    #[error("Invalid flag name: '{name}'")]
    InvalidFlagName { name: String },
}

/// Configuration errors, raised once at construction, never per-request.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Both a materialization store and a remote authority are configured; exactly one strategy may be active")]
    AmbiguousStrategy,

    #[error("No strategy configured and no built-in authority available: {reason}")]
    NoStrategy { reason: String },

    #[error("Invalid authority endpoint '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("Worker count must be at least {min}, got {actual}")]
    InvalidWorkerCount { min: usize, actual: usize },

    #[error("Queue capacity must be at least {min}, got {actual}")]
    InvalidQueueCapacity { min: usize, actual: usize },
}

/// Failures of the local rule evaluator itself.
///
/// These are fatal for the request and propagate unchanged; the coordinator
/// never converts them into per-flag degradation.
#[derive(Debug, Error)]
pub enum ResolverError {
    #[error("Local resolver failed: {message}")]
    Failed { message: String },

    #[error("Local resolver produced an invalid outcome: {reason}")]
    InvalidOutcome { reason: String },
}

/// Errors of the concurrent execution front end.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Resolve queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },

    #[error("Resolve runtime is shut down")]
    Disconnected,

    #[error("Resolution timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },
}

/// Top-level error type for flagstick.
///
/// This enum encompasses every error a caller can observe from the
/// coordinator, the adapters, or the runtime.
#[derive(Debug, Error)]
pub enum FlagstickError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Authority error: {0}")]
    Authority(#[from] AuthorityError),

    #[error("Resolver error: {0}")]
    Resolver(#[from] ResolverError),

    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl FlagstickError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is a configuration error.
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    /// Returns true if this is a store error.
    #[must_use]
    pub const fn is_store(&self) -> bool {
        matches!(self, Self::Store(_))
    }

    /// Returns true if this is an authority error.
    #[must_use]
    pub const fn is_authority(&self) -> bool {
        matches!(self, Self::Authority(_))
    }

    /// Returns true if this is a local-resolver error.
    #[must_use]
    pub const fn is_resolver(&self) -> bool {
        matches!(self, Self::Resolver(_))
    }

    /// Returns true if this error is retryable.
    ///
    /// Validation, configuration and resolver errors won't change on retry.
    /// Store errors degrade per-flag instead of failing the request, so a
    /// surfaced one means the adapter itself is broken.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Validation(_)
            | Self::Configuration(_)
            | Self::Resolver(_)
            | Self::Store(_)
            | Self::Internal { .. } => false,
            Self::Authority(e) => match e {
                AuthorityError::ConnectionFailed { .. } => true,
                // DEADLINE_EXCEEDED, RESOURCE_EXHAUSTED, UNAVAILABLE
                AuthorityError::Rejected { code, .. } => matches!(*code, 4 | 8 | 14),
                _ => false,
            },
            Self::Runtime(e) => matches!(
                e,
                RuntimeError::QueueFull { .. } | RuntimeError::Timeout { .. }
            ),
        }
    }
}

/// Result type alias for flagstick operations.
pub type FlagstickResult<T> = Result<T, FlagstickError>;
