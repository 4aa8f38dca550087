//! Transport stub consumed by the session facade.
//!
//! [`SessionTransport`] is the seam between the facade and the wire: one
//! method per `mnemosynerpc.SessionManager` RPC, failures reduced to a closed
//! [`TransportErrorKind`]. [`GrpcTransport`] is the tonic implementation.

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;
use tonic::transport::{Channel, Endpoint};
use tonic::{Code, Request, Status};
use tracing::info;

use crate::config::{ClientConfig, ConfigError};
use crate::error::{ClientError, Result};
use crate::package::PACKAGE;
use crate::proto;
use crate::proto::session_manager_client::SessionManagerClient;

/// Transport-level failure tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportErrorKind {
    /// Expected to succeed if retried unchanged.
    Transient,
    NotFound,
    InvalidArgument,
    Canceled,
    DeadlineExceeded,
    Unknown,
}

impl TransportErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::NotFound => "not_found",
            Self::InvalidArgument => "invalid_argument",
            Self::Canceled => "canceled",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::Unknown => "unknown",
        }
    }

    pub fn is_transient(self) -> bool {
        matches!(self, Self::Transient)
    }
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Code> for TransportErrorKind {
    fn from(code: Code) -> Self {
        match code {
            Code::Unavailable | Code::ResourceExhausted | Code::Aborted => Self::Transient,
            Code::NotFound => Self::NotFound,
            Code::InvalidArgument | Code::OutOfRange => Self::InvalidArgument,
            Code::Cancelled => Self::Canceled,
            Code::DeadlineExceeded => Self::DeadlineExceeded,
            _ => Self::Unknown,
        }
    }
}

/// A failed remote call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }
}

impl From<Status> for TransportError {
    fn from(status: Status) -> Self {
        Self::new(status.code().into(), status.message())
    }
}

/// Remote session operations.
///
/// Requests arrive with metadata (session token, request ID) and timeout
/// already set from the caller's [`crate::CallContext`].
#[async_trait]
pub trait SessionTransport: Send + Sync {
    async fn get(
        &self,
        request: Request<proto::GetRequest>,
    ) -> std::result::Result<proto::GetResponse, TransportError>;

    /// Session identified by the token in the request metadata.
    async fn context(
        &self,
        request: Request<proto::Empty>,
    ) -> std::result::Result<proto::ContextResponse, TransportError>;

    async fn list(
        &self,
        request: Request<proto::ListRequest>,
    ) -> std::result::Result<proto::ListResponse, TransportError>;

    async fn start(
        &self,
        request: Request<proto::StartRequest>,
    ) -> std::result::Result<proto::StartResponse, TransportError>;

    async fn touch(
        &self,
        request: Request<proto::TouchRequest>,
    ) -> std::result::Result<proto::TouchResponse, TransportError>;

    async fn abandon(
        &self,
        request: Request<proto::AbandonRequest>,
    ) -> std::result::Result<proto::BoolValue, TransportError>;

    async fn set_value(
        &self,
        request: Request<proto::SetValueRequest>,
    ) -> std::result::Result<proto::SetValueResponse, TransportError>;

    /// Returns the number of deleted sessions.
    async fn delete(
        &self,
        request: Request<proto::DeleteRequest>,
    ) -> std::result::Result<proto::Int64Value, TransportError>;
}

/// [`SessionTransport`] over a tonic channel.
///
/// Cloning is cheap and clones share the underlying HTTP/2 connection.
#[derive(Debug, Clone)]
pub struct GrpcTransport {
    client: SessionManagerClient<Channel>,
}

impl GrpcTransport {
    pub fn new(channel: Channel) -> Self {
        Self { client: SessionManagerClient::new(channel) }
    }

    /// Connect to the configured address and wait for the connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid or the connection fails.
    pub async fn connect(config: &ClientConfig) -> Result<Self> {
        let channel = endpoint(config)?.connect().await?;
        info!(address = %config.address, "Connected to session service");
        Ok(Self::new(channel))
    }

    /// Build a transport that connects on first use.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid.
    pub fn connect_lazy(config: &ClientConfig) -> Result<Self> {
        let channel = endpoint(config)?.connect_lazy();
        info!(address = %config.address, "Session service channel created");
        Ok(Self::new(channel))
    }
}

fn endpoint(config: &ClientConfig) -> Result<Endpoint> {
    let endpoint = Endpoint::from_shared(config.address.clone()).map_err(|e| {
        ClientError::Config(ConfigError::InvalidValue(format!(
            "Invalid session service address {:?}: {}",
            config.address, e
        )))
    })?;
    Ok(endpoint.connect_timeout(config.connect_timeout()).user_agent(PACKAGE.user_agent())?)
}

#[async_trait]
impl SessionTransport for GrpcTransport {
    async fn get(
        &self,
        request: Request<proto::GetRequest>,
    ) -> std::result::Result<proto::GetResponse, TransportError> {
        let response = self.client.clone().get(request).await?;
        Ok(response.into_inner())
    }

    async fn context(
        &self,
        request: Request<proto::Empty>,
    ) -> std::result::Result<proto::ContextResponse, TransportError> {
        let response = self.client.clone().context(request).await?;
        Ok(response.into_inner())
    }

    async fn list(
        &self,
        request: Request<proto::ListRequest>,
    ) -> std::result::Result<proto::ListResponse, TransportError> {
        let response = self.client.clone().list(request).await?;
        Ok(response.into_inner())
    }

    async fn start(
        &self,
        request: Request<proto::StartRequest>,
    ) -> std::result::Result<proto::StartResponse, TransportError> {
        let response = self.client.clone().start(request).await?;
        Ok(response.into_inner())
    }

    async fn touch(
        &self,
        request: Request<proto::TouchRequest>,
    ) -> std::result::Result<proto::TouchResponse, TransportError> {
        let response = self.client.clone().touch(request).await?;
        Ok(response.into_inner())
    }

    async fn abandon(
        &self,
        request: Request<proto::AbandonRequest>,
    ) -> std::result::Result<proto::BoolValue, TransportError> {
        let response = self.client.clone().abandon(request).await?;
        Ok(response.into_inner())
    }

    async fn set_value(
        &self,
        request: Request<proto::SetValueRequest>,
    ) -> std::result::Result<proto::SetValueResponse, TransportError> {
        let response = self.client.clone().set_value(request).await?;
        Ok(response.into_inner())
    }

    async fn delete(
        &self,
        request: Request<proto::DeleteRequest>,
    ) -> std::result::Result<proto::Int64Value, TransportError> {
        let response = self.client.clone().delete(request).await?;
        Ok(response.into_inner())
    }
}
