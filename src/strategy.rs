//! Backing strategy selection.
//!
//! Exactly one strategy backs a coordinator: a local materialization store
//! or a remote authority. The choice is made once, at construction, and the
//! running coordinator dispatches on a tagged sum rather than re-inspecting
//! a pair of optional handles per request.

use std::fmt;
use std::sync::Arc;

use crate::authority::RemoteAuthority;
use crate::error::{ConfigurationError, FlagstickError};
use crate::store::MaterializationStore;

/// The backing strategy a coordinator runs with.
pub enum Strategy {
    /// Missing materializations load from and save to a local store.
    Store(Arc<dyn MaterializationStore>),
    /// Requests that cannot complete locally delegate to a remote resolver.
    Authority(Arc<dyn RemoteAuthority>),
}

impl Strategy {
    /// Classifies a pair of optional handles into a single strategy.
    ///
    /// Configuring both is ambiguous and rejected. Configuring neither falls
    /// back to the built-in authority adapter when the `transport-grpc`
    /// feature is enabled.
    ///
    /// # Errors
    /// Returns [`ConfigurationError::AmbiguousStrategy`] when both handles
    /// are present and [`ConfigurationError::NoStrategy`] when neither is
    /// and no built-in fallback exists.
    pub fn classify(
        store: Option<Arc<dyn MaterializationStore>>,
        authority: Option<Arc<dyn RemoteAuthority>>,
    ) -> Result<Self, FlagstickError> {
        match (store, authority) {
            (Some(_), Some(_)) => Err(ConfigurationError::AmbiguousStrategy.into()),
            (Some(store), None) => Ok(Self::Store(store)),
            (None, Some(authority)) => Ok(Self::Authority(authority)),
            (None, None) => Self::default_authority(),
        }
    }

    #[cfg(feature = "transport-grpc")]
    fn default_authority() -> Result<Self, FlagstickError> {
        let authority = crate::authority::GrpcAuthority::connect_default("")?;
        Ok(Self::Authority(Arc::new(authority)))
    }

    #[cfg(not(feature = "transport-grpc"))]
    fn default_authority() -> Result<Self, FlagstickError> {
        Err(ConfigurationError::NoStrategy {
            reason: "configure a store or an authority, or enable the transport-grpc feature"
                .to_string(),
        }
        .into())
    }

    /// Returns true when backed by a local store.
    #[must_use]
    pub const fn is_store(&self) -> bool {
        matches!(self, Self::Store(_))
    }

    /// Returns true when backed by a remote authority.
    #[must_use]
    pub const fn is_authority(&self) -> bool {
        matches!(self, Self::Authority(_))
    }

    pub(crate) fn close(&self) -> Result<(), FlagstickError> {
        match self {
            Self::Store(store) => store.close().map_err(FlagstickError::from),
            Self::Authority(authority) => authority.close().map_err(FlagstickError::from),
        }
    }
}

impl fmt::Debug for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Store(_) => f.write_str("Strategy::Store"),
            Self::Authority(_) => f.write_str("Strategy::Authority"),
        }
    }
}
