//! Error types for the mnemosyne client.

use std::fmt;

use thiserror::Error;

use crate::config::ConfigError;
use crate::token::SessionToken;
use crate::transport::TransportErrorKind;

/// Facade operation names, carried by every remote failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Start,
    Get,
    Current,
    Touch,
    Delete,
    DeleteMatching,
    Exists,
    List,
    Abandon,
    SetValue,
}

impl Operation {
    /// Stable lowercase name used in logs and error messages.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Start => "start",
            Self::Get => "get",
            Self::Current => "current",
            Self::Touch => "touch",
            Self::Delete => "delete",
            Self::DeleteMatching => "delete_matching",
            Self::Exists => "exists",
            Self::List => "list",
            Self::Abandon => "abandon",
            Self::SetValue => "set_value",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Diagnostic detail attached to a failed facade operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    /// Operation that failed.
    pub op: Operation,
    /// Session token the operation targeted, if any.
    pub token: Option<SessionToken>,
    /// Number of remote calls issued before giving up.
    pub attempts: u32,
    /// Last message reported by the transport or by local validation.
    pub message: String,
}

impl Failure {
    pub fn new(
        op: Operation,
        token: Option<&SessionToken>,
        attempts: u32,
        message: impl Into<String>,
    ) -> Self {
        Self { op, token: token.cloned(), attempts, message: message.into() }
    }

    /// Failure detected before any remote call was issued.
    pub fn local(op: Operation, token: Option<&SessionToken>, message: impl Into<String>) -> Self {
        Self::new(op, token, 0, message)
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} after {} attempt(s)", self.op, self.attempts)?;
        if let Some(token) = &self.token {
            write!(f, " (token {})", token.redacted())?;
        }
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        Ok(())
    }
}

/// Errors surfaced by session operations.
///
/// Only `Unavailable` is ever recovered from internally (by retrying); every
/// other variant reaches the caller on first occurrence.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Token value rejected locally: empty, too long or non-visible ASCII.
    #[error("Invalid session token: {0}")]
    InvalidToken(String),

    /// Bytes that the token codec could not have produced.
    #[error("Malformed session token: {0}")]
    MalformedToken(String),

    /// The request was rejected, locally or by the service.
    #[error("Invalid argument: {0}")]
    InvalidArgument(Failure),

    /// The session does not exist (never created, deleted or expired).
    #[error("Session not found: {0}")]
    NotFound(Failure),

    /// Transient failures persisted through every allowed attempt.
    #[error("Session service unavailable: {0}")]
    Unavailable(Failure),

    /// The call context deadline elapsed.
    #[error("Deadline exceeded: {0}")]
    DeadlineExceeded(Failure),

    /// The call context was canceled.
    #[error("Canceled: {0}")]
    Canceled(Failure),

    /// The service failed in a way the transport could not classify.
    #[error("Unknown session service error: {0}")]
    Unknown(Failure),
}

impl SessionError {
    /// Maps a terminal transport tag onto the session taxonomy.
    pub(crate) fn from_kind(kind: TransportErrorKind, failure: Failure) -> Self {
        match kind {
            TransportErrorKind::Transient => Self::Unavailable(failure),
            TransportErrorKind::NotFound => Self::NotFound(failure),
            TransportErrorKind::InvalidArgument => Self::InvalidArgument(failure),
            TransportErrorKind::Canceled => Self::Canceled(failure),
            TransportErrorKind::DeadlineExceeded => Self::DeadlineExceeded(failure),
            TransportErrorKind::Unknown => Self::Unknown(failure),
        }
    }

    /// Operation detail, absent for codec-level errors.
    pub fn failure(&self) -> Option<&Failure> {
        match self {
            Self::InvalidToken(_) | Self::MalformedToken(_) => None,
            Self::InvalidArgument(failure)
            | Self::NotFound(failure)
            | Self::Unavailable(failure)
            | Self::DeadlineExceeded(failure)
            | Self::Canceled(failure)
            | Self::Unknown(failure) => Some(failure),
        }
    }

    /// Remote calls issued by the failed operation (0 for local failures).
    pub fn attempts(&self) -> u32 {
        self.failure().map_or(0, |failure| failure.attempts)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Result type alias for session operations.
pub type SessionResult<T> = std::result::Result<T, SessionError>;

/// Top-level error for client construction and use.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Connection-level errors from the gRPC transport.
    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Session operation errors
    #[error("Session error: {0}")]
    Session(#[from] SessionError),
}

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
