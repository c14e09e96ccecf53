//! gRPC adapter for [`RemoteAuthority`].
//!
//! Bridges the synchronous authority contract onto tonic: the adapter owns
//! a small private tokio runtime and blocks the calling thread for the
//! duration of each delegation. The channel is built lazily, so
//! construction never touches the network.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::RwLock;
use std::time::Duration;

use chrono::Utc;
use tokio::runtime::Runtime;
use tonic::transport::{Channel, Endpoint};
use tonic::{Code, Status};
use uuid::Uuid;

use crate::error::{ConfigurationError, FlagstickError};
use crate::request::{FlagDecision, ResolutionId, ResolveRequest, ResolveResponse};

use super::{AuthorityError, RemoteAuthority};

pub mod proto {
    tonic::include_proto!("flagstick.v1");
}

use proto::flag_resolver_service_client::FlagResolverServiceClient;
use proto::resolved_flag::Reason;

// ----------------------------------------------------------------------------
// Transport limits
// ----------------------------------------------------------------------------

/// Per-call deadline for one delegation round trip.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Bound on establishing the underlying connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum decoded response message size.
const MAX_RESPONSE_BYTES: usize = 4 * 1024 * 1024; // 4 MiB

/// [`RemoteAuthority`] backed by a tonic channel.
///
/// `resolve` calls may run concurrently; `close` waits for in-flight
/// delegations before tearing the runtime down.
pub struct GrpcAuthority {
    client: FlagResolverServiceClient<Channel>,
    credential: String,
    runtime: RwLock<Option<Runtime>>,
}

impl GrpcAuthority {
    /// Builds an adapter for `endpoint` with a lazily-connected channel.
    ///
    /// `credential` is attached to every wire request; pass an empty string
    /// when the authority does not authenticate callers.
    ///
    /// # Errors
    /// Returns [`ConfigurationError::InvalidEndpoint`] for a malformed
    /// endpoint and an internal error if the transport runtime cannot start.
    pub fn connect(
        endpoint: impl Into<String>,
        credential: impl Into<String>,
    ) -> Result<Self, FlagstickError> {
        let endpoint = endpoint.into();
        let target = Endpoint::from_shared(endpoint.clone())
            .map_err(|e| ConfigurationError::InvalidEndpoint {
                endpoint,
                reason: e.to_string(),
            })?
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT);

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("flagstick-grpc")
            .enable_all()
            .build()
            .map_err(|e| {
                FlagstickError::internal(format!("failed to start transport runtime: {e}"))
            })?;

        // The lazy channel spawns its buffer worker onto the ambient
        // runtime, so it must be built inside this runtime's context.
        let channel = {
            let _guard = runtime.enter();
            target.connect_lazy()
        };

        let client =
            FlagResolverServiceClient::new(channel).max_decoding_message_size(MAX_RESPONSE_BYTES);

        Ok(Self {
            client,
            credential: credential.into(),
            runtime: RwLock::new(Some(runtime)),
        })
    }

    /// Builds an adapter for [`DEFAULT_AUTHORITY_ENDPOINT`](super::DEFAULT_AUTHORITY_ENDPOINT).
    ///
    /// # Errors
    /// Returns an internal error if the transport runtime cannot start.
    pub fn connect_default(credential: impl Into<String>) -> Result<Self, FlagstickError> {
        Self::connect(super::DEFAULT_AUTHORITY_ENDPOINT, credential)
    }
}

impl fmt::Debug for GrpcAuthority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Credential stays out of logs.
        f.debug_struct("GrpcAuthority").finish_non_exhaustive()
    }
}

impl RemoteAuthority for GrpcAuthority {
    fn resolve(&self, request: &ResolveRequest) -> Result<ResolveResponse, AuthorityError> {
        let wire = to_wire_request(request, &self.credential);

        let guard = self
            .runtime
            .read()
            .map_err(|_| AuthorityError::ConnectionFailed {
                message: "poisoned transport runtime lock".to_string(),
            })?;
        let Some(runtime) = guard.as_ref() else {
            return Err(AuthorityError::Closed);
        };

        let mut client = self.client.clone();
        let reply = runtime
            .block_on(async move { client.resolve_flags(wire).await })
            .map_err(authority_error_from_status)?;

        from_wire_response(reply.into_inner())
    }

    fn close(&self) -> Result<(), AuthorityError> {
        let mut guard = self
            .runtime
            .write()
            .map_err(|_| AuthorityError::ConnectionFailed {
                message: "poisoned transport runtime lock".to_string(),
            })?;
        if let Some(runtime) = guard.take() {
            runtime.shutdown_background();
        }
        Ok(())
    }
}

impl Drop for GrpcAuthority {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

// ----------------------------------------------------------------------------
// Wire conversions
// ----------------------------------------------------------------------------

fn to_wire_request(request: &ResolveRequest, credential: &str) -> proto::ResolveFlagsRequest {
    proto::ResolveFlagsRequest {
        unit: request.unit.clone(),
        flags: request.flags.clone(),
        context: context_to_struct(&request.context),
        client_credential: credential.to_string(),
        apply: request.apply,
    }
}

fn context_to_struct(context: &serde_json::Value) -> Option<prost_types::Struct> {
    match context {
        serde_json::Value::Null => None,
        serde_json::Value::Object(fields) => Some(prost_types::Struct {
            fields: fields
                .iter()
                .map(|(k, v)| (k.clone(), json_to_proto_value(v)))
                .collect(),
        }),
        other => {
            // Scalar and array contexts ride under a single synthetic key.
            let mut fields = BTreeMap::new();
            fields.insert("value".to_string(), json_to_proto_value(other));
            Some(prost_types::Struct { fields })
        }
    }
}

fn json_to_proto_value(value: &serde_json::Value) -> prost_types::Value {
    use prost_types::value::Kind;

    let kind = match value {
        serde_json::Value::Null => Kind::NullValue(0),
        serde_json::Value::Bool(v) => Kind::BoolValue(*v),
        // Struct numbers are doubles; integers beyond 2^53 lose precision.
        serde_json::Value::Number(v) => Kind::NumberValue(v.as_f64().unwrap_or(0.0)),
        serde_json::Value::String(v) => Kind::StringValue(v.clone()),
        serde_json::Value::Array(items) => Kind::ListValue(prost_types::ListValue {
            values: items.iter().map(json_to_proto_value).collect(),
        }),
        serde_json::Value::Object(fields) => Kind::StructValue(prost_types::Struct {
            fields: fields
                .iter()
                .map(|(k, v)| (k.clone(), json_to_proto_value(v)))
                .collect(),
        }),
    };
    prost_types::Value { kind: Some(kind) }
}

fn authority_error_from_status(status: Status) -> AuthorityError {
    match status.code() {
        Code::Unavailable => AuthorityError::ConnectionFailed {
            message: status.message().to_string(),
        },
        code => AuthorityError::Rejected {
            code: code as u32,
            message: status.message().to_string(),
        },
    }
}

fn from_wire_response(
    reply: proto::ResolveFlagsResponse,
) -> Result<ResolveResponse, AuthorityError> {
    let resolution_id = if reply.resolution_id.is_empty() {
        ResolutionId::new()
    } else {
        let uuid = reply.resolution_id.parse::<Uuid>().map_err(|e| {
            AuthorityError::InvalidResponse {
                message: format!("bad resolution id '{}': {e}", reply.resolution_id),
            }
        })?;
        ResolutionId::from_uuid(uuid)
    };

    let decisions = reply.flags.into_iter().map(from_wire_flag).collect();
    let continuation_token = if reply.continuation_token.is_empty() {
        None
    } else {
        Some(reply.continuation_token)
    };

    Ok(ResolveResponse {
        resolution_id,
        decisions,
        continuation_token,
        timestamp: Utc::now(),
    })
}

fn from_wire_flag(resolved: proto::ResolvedFlag) -> FlagDecision {
    let reason = Reason::try_from(resolved.reason).unwrap_or(Reason::Unspecified);
    match reason {
        Reason::Match if !resolved.variant.is_empty() => {
            FlagDecision::matched(resolved.flag, resolved.variant)
        }
        Reason::Match => {
            FlagDecision::unresolved(resolved.flag, "authority sent a match without a variant")
        }
        Reason::NoMatch => FlagDecision::no_match(resolved.flag),
        Reason::Archived => FlagDecision::archived(resolved.flag),
        Reason::Error => {
            FlagDecision::unresolved(resolved.flag, "authority reported an evaluation error")
        }
        Reason::Unspecified => FlagDecision::unresolved(
            resolved.flag,
            "authority sent an unspecified decision reason",
        ),
    }
}
