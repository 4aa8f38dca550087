//! Moves the session token and deadline between a [`CallContext`] and gRPC
//! call metadata.
//!
//! Outgoing calls carry the token under `authorization` and the remaining
//! time budget as `grpc-timeout`. On the receiving side,
//! [`SessionInterceptor`] rebuilds a context from the same metadata so a
//! handler can hand it to further session calls.

use std::time::Duration;

use tonic::metadata::{MetadataMap, MetadataValue};
use tonic::service::Interceptor;
use tonic::{Request, Status};
use tracing::{debug, warn};
use uuid::Uuid;

use super::CallContext;
use crate::error::SessionResult;
use crate::token::SessionToken;

/// Metadata key carrying the session token.
pub const ACCESS_TOKEN_METADATA_KEY: &str = "authorization";

/// Metadata key tagging each outgoing request.
pub const REQUEST_ID_METADATA_KEY: &str = "x-request-id";

const GRPC_TIMEOUT_METADATA_KEY: &str = "grpc-timeout";

/// Derive a context carrying `token`; the input context is left untouched.
pub fn inject(ctx: &CallContext, token: SessionToken) -> CallContext {
    ctx.with_token(token)
}

/// Token propagated in `ctx`, or `None` when the chain has no session yet.
pub fn extract(ctx: &CallContext) -> Option<SessionToken> {
    ctx.token().cloned()
}

/// Write the token into call metadata, replacing any previous value.
pub fn inject_metadata(metadata: &mut MetadataMap, token: &SessionToken) -> SessionResult<()> {
    metadata.insert(ACCESS_TOKEN_METADATA_KEY, token.encode_metadata()?);
    Ok(())
}

/// Read the token from call metadata.
///
/// Missing metadata is `Ok(None)`; a value that is present but not a valid
/// token is a [`crate::SessionError::MalformedToken`].
pub fn extract_metadata(metadata: &MetadataMap) -> SessionResult<Option<SessionToken>> {
    metadata.get(ACCESS_TOKEN_METADATA_KEY).map(SessionToken::decode_metadata).transpose()
}

/// Build an outgoing request for `message` under `ctx`.
///
/// The request timeout is the smaller of the context's remaining time and
/// `default_timeout`.
pub fn outgoing_request<T>(
    ctx: &CallContext,
    message: T,
    default_timeout: Option<Duration>,
) -> SessionResult<Request<T>> {
    let mut request = Request::new(message);
    if let Some(token) = ctx.token() {
        inject_metadata(request.metadata_mut(), token)?;
    }

    let timeout = match (ctx.remaining(), default_timeout) {
        (Some(remaining), Some(default)) => Some(remaining.min(default)),
        (remaining, default) => remaining.or(default),
    };
    if let Some(timeout) = timeout {
        request.set_timeout(timeout);
    }

    let request_id = Uuid::new_v4().to_string();
    if let Ok(value) = MetadataValue::try_from(request_id.as_str()) {
        request.metadata_mut().insert(REQUEST_ID_METADATA_KEY, value);
    }

    Ok(request)
}

/// Request ID assigned by [`outgoing_request`], if any.
pub fn request_id<T>(request: &Request<T>) -> Option<&str> {
    request.metadata().get(REQUEST_ID_METADATA_KEY).and_then(|v| v.to_str().ok())
}

/// Rebuild the caller's context from incoming metadata.
fn incoming_context(metadata: &MetadataMap) -> SessionResult<CallContext> {
    let mut ctx = CallContext::new();
    if let Some(timeout) = metadata
        .get(GRPC_TIMEOUT_METADATA_KEY)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_grpc_timeout)
    {
        ctx = ctx.with_timeout(timeout);
    }
    if let Some(token) = extract_metadata(metadata)? {
        ctx = inject(&ctx, token);
    }
    Ok(ctx)
}

/// Context of an incoming request.
///
/// Uses the context stored by [`SessionInterceptor`] when present, otherwise
/// reads the metadata directly.
pub fn context_from_request<T>(request: &Request<T>) -> SessionResult<CallContext> {
    if let Some(ctx) = request.extensions().get::<CallContext>() {
        return Ok(ctx.clone());
    }
    incoming_context(request.metadata())
}

/// Parse a `grpc-timeout` header value (`<digits><unit>`, at most 8 digits).
fn parse_grpc_timeout(value: &str) -> Option<Duration> {
    if value.len() < 2 || value.len() > 9 {
        return None;
    }
    let (digits, unit) = value.split_at(value.len() - 1);
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let amount: u64 = digits.parse().ok()?;
    match unit {
        "H" => Some(Duration::from_secs(amount * 3600)),
        "M" => Some(Duration::from_secs(amount * 60)),
        "S" => Some(Duration::from_secs(amount)),
        "m" => Some(Duration::from_millis(amount)),
        "u" => Some(Duration::from_micros(amount)),
        "n" => Some(Duration::from_nanos(amount)),
        _ => None,
    }
}

/// Server-side interceptor storing the caller's [`CallContext`] in the
/// request extensions.
///
/// Requests without a token pass through with an empty context; a malformed
/// token is rejected with `INVALID_ARGUMENT`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionInterceptor;

impl Interceptor for SessionInterceptor {
    fn call(&mut self, mut request: Request<()>) -> Result<Request<()>, Status> {
        let ctx = incoming_context(request.metadata()).map_err(|err| {
            warn!(error = %err, "Rejecting request with malformed session token");
            Status::invalid_argument(err.to_string())
        })?;
        debug!(
            has_session = ctx.token().is_some(),
            remaining_ms = ctx.remaining().map(|d| d.as_millis()),
            "Session context extracted"
        );
        request.extensions_mut().insert(ctx);
        Ok(request)
    }
}
