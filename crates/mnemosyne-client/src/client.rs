//! Session client facade.
//!
//! [`SessionClient`] wraps a [`SessionTransport`] with typed operations. Every
//! operation runs the shared retry loop, honours the [`CallContext`] deadline
//! and cancellation, and reports failures as [`SessionError`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tonic::Request;
use tracing::debug;

use crate::config::{BagPolicy, ClientConfig};
use crate::context::propagation::request_id;
use crate::context::{CallContext, extract, outgoing_request};
use crate::error::{Failure, Operation, Result, SessionError, SessionResult};
use crate::proto;
use crate::retry::{RetryPolicy, execute};
use crate::session::{DeleteQuery, ListQuery, NewSession, SessionRecord, timestamp_from_datetime};
use crate::token::SessionToken;
use crate::transport::{GrpcTransport, SessionTransport, TransportError, TransportErrorKind};

/// Read-only settings captured at construction.
#[derive(Debug)]
struct Settings {
    retry: RetryPolicy,
    bag: BagPolicy,
    request_timeout: Option<Duration>,
}

/// Typed, retrying client of the session service.
///
/// Cheap to clone; clones share the transport and settings. Safe to use from
/// many tasks at once.
#[derive(Debug)]
pub struct SessionClient<T = GrpcTransport> {
    transport: Arc<T>,
    settings: Arc<Settings>,
}

impl<T> Clone for SessionClient<T> {
    fn clone(&self) -> Self {
        Self { transport: Arc::clone(&self.transport), settings: Arc::clone(&self.settings) }
    }
}

impl SessionClient<GrpcTransport> {
    /// Validate `config`, connect, and build a client.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the service cannot
    /// be reached.
    pub async fn connect(config: &ClientConfig) -> Result<Self> {
        config.validate()?;
        let transport = GrpcTransport::connect(config).await?;
        Ok(Self::new(transport, config))
    }

    /// Like [`SessionClient::connect`], but the connection is established on
    /// the first call.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn connect_lazy(config: &ClientConfig) -> Result<Self> {
        config.validate()?;
        let transport = GrpcTransport::connect_lazy(config)?;
        Ok(Self::new(transport, config))
    }
}

impl<T: SessionTransport> SessionClient<T> {
    /// Build a client over `transport`.
    ///
    /// `config` is not validated here; see [`ClientConfig::validate`].
    ///
    /// # Arguments
    /// * `transport` - Transport every operation is issued through
    /// * `config` - Retry, bag and request timeout settings
    ///
    /// # Returns
    /// A new `SessionClient` sharing nothing with other clients.
    #[must_use]
    pub fn new(transport: T, config: &ClientConfig) -> Self {
        let settings = Settings {
            retry: config.retry.to_policy(),
            bag: config.bag,
            request_timeout: config.request_timeout(),
        };
        Self { transport: Arc::new(transport), settings: Arc::new(settings) }
    }

    /// Retry policy applied to every operation.
    ///
    /// # Returns
    /// The policy built from the client's `RetryConfig`.
    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.settings.retry
    }

    /// Limits checked before a bag is sent.
    ///
    /// # Returns
    /// The client's `BagPolicy`.
    #[must_use]
    pub fn bag_policy(&self) -> &BagPolicy {
        &self.settings.bag
    }

    /// Underlying transport, shared by all clones of this client.
    ///
    /// # Returns
    /// A reference to the transport.
    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Create an anonymous session holding `bag` and return its token.
    pub async fn create(
        &self,
        ctx: &CallContext,
        bag: HashMap<String, String>,
    ) -> SessionResult<SessionToken> {
        let op = Operation::Create;
        self.settings.bag.validate(&bag).map_err(|msg| invalid_argument(op, None, msg))?;

        let session = proto::Session { bag, ..proto::Session::default() };
        let record = execute(&self.settings.retry, op, ctx, None, |attempt| {
            let message = proto::StartRequest { session: Some(session.clone()) };
            let request = self.request(op, attempt, ctx, message);
            async move { session_from_reply(self.transport.start(request?).await?.session) }
        })
        .await?;
        Ok(record.token)
    }

    /// Start a session for a subject.
    pub async fn start(&self, ctx: &CallContext, new: &NewSession) -> SessionResult<SessionRecord> {
        let op = Operation::Start;
        self.settings.bag.validate(&new.bag).map_err(|msg| invalid_argument(op, None, msg))?;

        let session = new.to_proto();
        execute(&self.settings.retry, op, ctx, None, |attempt| {
            let message = proto::StartRequest { session: Some(session.clone()) };
            let request = self.request(op, attempt, ctx, message);
            async move { session_from_reply(self.transport.start(request?).await?.session) }
        })
        .await
    }

    /// Fetch a session. A missing or expired session is
    /// [`SessionError::NotFound`].
    pub async fn get(&self, ctx: &CallContext, token: &SessionToken) -> SessionResult<SessionRecord> {
        self.fetch(Operation::Get, ctx, token).await
    }

    /// Fetch the session whose token is propagated in `ctx`.
    pub async fn current(&self, ctx: &CallContext) -> SessionResult<SessionRecord> {
        let op = Operation::Current;
        let Some(token) = extract(ctx) else {
            return Err(invalid_argument(op, None, "no session token in the call context"));
        };

        execute(&self.settings.retry, op, ctx, Some(&token), |attempt| {
            let request = self.request(op, attempt, ctx, proto::Empty {});
            async move { session_from_reply(self.transport.context(request?).await?.session) }
        })
        .await
    }

    /// Move the expiry of a session to `new_expiry` and return the updated
    /// record.
    pub async fn touch(
        &self,
        ctx: &CallContext,
        token: &SessionToken,
        new_expiry: DateTime<Utc>,
    ) -> SessionResult<SessionRecord> {
        let op = Operation::Touch;
        execute(&self.settings.retry, op, ctx, Some(token), |attempt| {
            let message = proto::TouchRequest {
                access_token: token.as_str().to_string(),
                expire_at: Some(timestamp_from_datetime(new_expiry)),
            };
            let request = self.request(op, attempt, ctx, message);
            async move { session_from_reply(self.transport.touch(request?).await?.session) }
        })
        .await
    }

    /// Delete a session. Deleting a session that does not exist succeeds.
    pub async fn delete(&self, ctx: &CallContext, token: &SessionToken) -> SessionResult<()> {
        let query = DeleteQuery::by_token(token.clone());
        match self.remove(Operation::Delete, ctx, Some(token), &query).await {
            Ok(affected) => {
                debug!(token = %token.redacted(), affected, "Session deleted");
                Ok(())
            }
            Err(SessionError::NotFound(_)) => {
                debug!(token = %token.redacted(), "Session already absent");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Delete every session matching `query` and return how many were
    /// removed.
    pub async fn delete_matching(&self, ctx: &CallContext, query: &DeleteQuery) -> SessionResult<i64> {
        let op = Operation::DeleteMatching;
        if query.is_empty() {
            return Err(invalid_argument(op, None, "delete query has no filter"));
        }
        match self.remove(op, ctx, query.token.as_ref(), query).await {
            Err(SessionError::NotFound(_)) => Ok(0),
            result => result,
        }
    }

    /// Whether a session exists. `NotFound` becomes `false`.
    pub async fn exists(&self, ctx: &CallContext, token: &SessionToken) -> SessionResult<bool> {
        match self.fetch(Operation::Exists, ctx, token).await {
            Ok(_) => Ok(true),
            Err(SessionError::NotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// List sessions page by page.
    pub async fn list(&self, ctx: &CallContext, query: &ListQuery) -> SessionResult<Vec<SessionRecord>> {
        let op = Operation::List;
        let message = query.to_proto();
        execute(&self.settings.retry, op, ctx, None, |attempt| {
            let request = self.request(op, attempt, ctx, message.clone());
            async move {
                let reply = self.transport.list(request?).await?;
                reply
                    .sessions
                    .into_iter()
                    .map(|session| session_from_reply(Some(session)))
                    .collect::<std::result::Result<Vec<_>, TransportError>>()
            }
        })
        .await
    }

    /// Abandon a session. Returns whether the service abandoned it.
    pub async fn abandon(&self, ctx: &CallContext, token: &SessionToken) -> SessionResult<bool> {
        let op = Operation::Abandon;
        execute(&self.settings.retry, op, ctx, Some(token), |attempt| {
            let message = proto::AbandonRequest { access_token: token.as_str().to_string() };
            let request = self.request(op, attempt, ctx, message);
            async move { Ok::<_, TransportError>(self.transport.abandon(request?).await?.value) }
        })
        .await
    }

    /// Set one bag entry and return the resulting bag.
    pub async fn set_value(
        &self,
        ctx: &CallContext,
        token: &SessionToken,
        key: &str,
        value: &str,
    ) -> SessionResult<HashMap<String, String>> {
        let op = Operation::SetValue;
        if key.is_empty() {
            return Err(invalid_argument(op, Some(token), "bag key must not be empty"));
        }
        self.settings
            .bag
            .validate_entry(key, value)
            .map_err(|msg| invalid_argument(op, Some(token), msg))?;

        execute(&self.settings.retry, op, ctx, Some(token), |attempt| {
            let message = proto::SetValueRequest {
                access_token: token.as_str().to_string(),
                key: key.to_string(),
                value: value.to_string(),
            };
            let request = self.request(op, attempt, ctx, message);
            async move { Ok::<_, TransportError>(self.transport.set_value(request?).await?.bag) }
        })
        .await
    }

    async fn fetch(
        &self,
        op: Operation,
        ctx: &CallContext,
        token: &SessionToken,
    ) -> SessionResult<SessionRecord> {
        execute(&self.settings.retry, op, ctx, Some(token), |attempt| {
            let message = proto::GetRequest { access_token: token.as_str().to_string() };
            let request = self.request(op, attempt, ctx, message);
            async move { session_from_reply(self.transport.get(request?).await?.session) }
        })
        .await
    }

    async fn remove(
        &self,
        op: Operation,
        ctx: &CallContext,
        token: Option<&SessionToken>,
        query: &DeleteQuery,
    ) -> SessionResult<i64> {
        let message = query.to_proto();
        execute(&self.settings.retry, op, ctx, token, |attempt| {
            let request = self.request(op, attempt, ctx, message.clone());
            async move { Ok::<_, TransportError>(self.transport.delete(request?).await?.value) }
        })
        .await
    }

    fn request<M>(
        &self,
        op: Operation,
        attempt: u32,
        ctx: &CallContext,
        message: M,
    ) -> std::result::Result<Request<M>, TransportError> {
        let request = outgoing_request(ctx, message, self.settings.request_timeout)
            .map_err(|e| TransportError::new(TransportErrorKind::InvalidArgument, e.to_string()))?;
        debug!(op = %op, attempt, request_id = request_id(&request), "Sending request");
        Ok(request)
    }
}

fn invalid_argument(
    op: Operation,
    token: Option<&SessionToken>,
    message: impl Into<String>,
) -> SessionError {
    let failure = Failure::local(op, token, message);
    debug!(op = %op, error = %failure, "Rejected before any remote call");
    SessionError::InvalidArgument(failure)
}

fn session_from_reply(
    session: Option<proto::Session>,
) -> std::result::Result<SessionRecord, TransportError> {
    let session = session.ok_or_else(|| {
        TransportError::new(TransportErrorKind::Unknown, "reply carried no session")
    })?;
    SessionRecord::from_proto(session)
        .map_err(|e| TransportError::new(TransportErrorKind::Unknown, e.to_string()))
}
