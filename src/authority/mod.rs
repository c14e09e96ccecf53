//! Remote authority contract and the built-in gRPC adapter.
//!
//! An authority is the other backing strategy: instead of loading and saving
//! materialization records locally, the whole request is handed to an
//! external authoritative resolver that owns durable assignment state and
//! TTL policy. Nothing is written locally for flags handled this way.

use thiserror::Error;

use crate::request::{ResolveRequest, ResolveResponse};

#[cfg(feature = "transport-grpc")]
mod grpc;

#[cfg(feature = "transport-grpc")]
pub use grpc::GrpcAuthority;

/// Endpoint the built-in authority adapter targets when none is configured.
pub const DEFAULT_AUTHORITY_ENDPOINT: &str = "https://resolver.flagstick.io";

/// Errors that can occur while delegating to a remote authority.
///
/// There is no per-flag granularity on this path: any failure fails the
/// whole batch.
#[derive(Debug, Error)]
pub enum AuthorityError {
    /// The remote endpoint could not be reached.
    #[error("Authority connection failed: {message}")]
    ConnectionFailed { message: String },

    /// The authority answered with a non-success status. `code` is the gRPC
    /// status code.
    #[error("Authority rejected the batch (code {code}): {message}")]
    Rejected { code: u32, message: String },

    /// The authority answered, but the payload could not be interpreted.
    #[error("Authority response invalid: {message}")]
    InvalidResponse { message: String },

    /// Delegation attempted after `close`.
    #[error("Authority is closed")]
    Closed,
}

/// Pluggable delegation strategy for sticky assignments.
///
/// The external resolver owns all materialization persistence for requests
/// routed here, so implementations forward the request as-is and return the
/// answer verbatim.
pub trait RemoteAuthority: Send + Sync {
    /// Forwards `request` to the authoritative resolver synchronously.
    ///
    /// # Errors
    /// Returns an [`AuthorityError`] for the entire batch when the call
    /// fails; callers must not retry per-flag.
    fn resolve(&self, request: &ResolveRequest) -> Result<ResolveResponse, AuthorityError>;

    /// Releases transport resources. Idempotent.
    ///
    /// # Errors
    /// Returns an [`AuthorityError`] when teardown fails.
    fn close(&self) -> Result<(), AuthorityError>;
}
