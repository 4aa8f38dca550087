//! Per-call context carrying session identity, deadline and cancellation.
//!
//! A [`CallContext`] is an immutable snapshot owned by the caller for one
//! logical operation. Deriving a new context (with a token, a deadline or a
//! child cancellation scope) never changes the original.

pub mod propagation;

pub use propagation::{
    ACCESS_TOKEN_METADATA_KEY, REQUEST_ID_METADATA_KEY, SessionInterceptor, context_from_request,
    extract, extract_metadata, inject, inject_metadata, outgoing_request,
};

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::token::SessionToken;

/// Why a context no longer allows remote calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interruption {
    Canceled,
    DeadlineExceeded,
}

/// Propagation carrier for one logical operation.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    token: Option<SessionToken>,
    deadline: Option<Instant>,
    cancellation: CancellationToken,
}

impl CallContext {
    /// Context with no session, no deadline and a fresh cancellation scope.
    pub fn new() -> Self {
        Self::default()
    }

    /// Same context, bound to the given cancellation token.
    #[must_use]
    pub fn with_cancellation(&self, cancellation: CancellationToken) -> Self {
        Self { cancellation, ..self.clone() }
    }

    /// Same context with an absolute deadline.
    ///
    /// An existing earlier deadline is kept: a derived context can only
    /// shorten the time budget of its parent.
    #[must_use]
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(current) if current < deadline => current,
            _ => deadline,
        };
        Self { deadline: Some(deadline), ..self.clone() }
    }

    /// Same context with a deadline `timeout` from now.
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Child context: canceling the parent cancels the child, not the reverse.
    #[must_use]
    pub fn child(&self) -> Self {
        Self { cancellation: self.cancellation.child_token(), ..self.clone() }
    }

    pub(crate) fn with_token(&self, token: SessionToken) -> Self {
        Self { token: Some(token), ..self.clone() }
    }

    pub fn token(&self) -> Option<&SessionToken> {
        self.token.as_ref()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline; `Some(ZERO)` once it has elapsed.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline.map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_canceled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// Reason this context forbids further remote calls, cancellation first.
    pub fn interruption(&self) -> Option<Interruption> {
        if self.is_canceled() {
            Some(Interruption::Canceled)
        } else if self.is_expired() {
            Some(Interruption::DeadlineExceeded)
        } else {
            None
        }
    }

    /// Resolves once the context is canceled.
    pub async fn canceled(&self) {
        self.cancellation.cancelled().await;
    }

    /// Resolves once the deadline elapses; never resolves without one.
    pub async fn deadline_elapsed(&self) {
        match self.deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }
}
