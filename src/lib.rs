//! # flagstick - Sticky flag resolution
//!
//! flagstick keeps feature-flag and experiment assignments consistent: once
//! a targeting unit (a user, a session) has a decided variant for a rule,
//! every later evaluation returns that same variant, no matter how the
//! targeting context changes afterwards.
//!
//! ## Core Concepts
//!
//! - **Targeting unit**: The identity flag decisions are bound to
//! - **Materialization**: A named experiment or rollout whose per-unit variant must stay stable once decided
//! - **MaterializationRecord**: What is durably known for one (unit, materialization) pair
//! - **ResolutionCoordinator**: Orchestrates the local rule evaluator over exactly one backing strategy, a local store or a remote authority
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//!
//! use flagstick::{InMemoryMaterializationStore, ResolutionCoordinator, ResolveRequest};
//!
//! // MyResolver implements flagstick::FlagResolver.
//! let coordinator = ResolutionCoordinator::builder(Arc::new(MyResolver))
//!     .store(Arc::new(InMemoryMaterializationStore::new()))
//!     .build()?;
//!
//! let request = ResolveRequest::new("user-42", ["checkout.redesign"]);
//! let response = coordinator.resolve(&request)?;
//! let decision = response.decision_for("checkout.redesign");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Records and request surface
pub mod error;
pub mod record;
pub mod request;
pub mod resolver;

// Backing strategies and adapters
pub mod authority;
pub mod store;
pub mod strategy;

// Orchestration
pub mod coordinator;

mod arena;

// Re-export primary types at crate root for convenience
pub use authority::{AuthorityError, RemoteAuthority, DEFAULT_AUTHORITY_ENDPOINT};
pub use coordinator::{
    CoordinatorBuilder, ExecutionHandle, ResolutionCoordinator, ResolveRuntime,
    ResolveRuntimeConfig, WriteFailure, WriteMode,
};
pub use error::{
    ConfigurationError, FlagstickError, FlagstickResult, ResolverError, RuntimeError,
    ValidationError,
};
pub use record::{MaterializationRecord, UnitRecordSet};
pub use request::{DecisionReason, FlagDecision, ResolutionId, ResolveRequest, ResolveResponse};
pub use resolver::{FlagResolver, LocalOutcome, MissingMaterialization};
pub use store::{
    FileMaterializationStore, InMemoryMaterializationStore, MaterializationStore, StoreError,
};
pub use strategy::Strategy;

#[cfg(feature = "transport-grpc")]
pub use authority::GrpcAuthority;
