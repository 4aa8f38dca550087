//! Retry loop shared by every facade operation.
//!
//! One operation moves through `Attempting -> (Backoff -> Attempting)* ->
//! Succeeded | FailedTerminal`. [`RetryPolicy::transition`] is the pure
//! state function; [`execute`] drives it against a transport call, the
//! context deadline and cancellation.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::context::{CallContext, Interruption};
use crate::error::{Failure, Operation, SessionError, SessionResult};
use crate::token::SessionToken;
use crate::transport::{TransportError, TransportErrorKind};

/// Retry policy for remote calls.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of remote calls per operation, first attempt included.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Backoff multiplier (2.0 doubles the delay after every retry).
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Create a retry policy.
    ///
    /// # Arguments
    ///
    /// * `max_attempts` - Remote calls per operation, first attempt included
    /// * `base_delay` - Delay before the first retry
    /// * `max_delay` - Upper bound on any single delay
    /// * `multiplier` - Growth factor applied after every retry
    #[must_use]
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration, multiplier: f64) -> Self {
        Self { max_attempts, base_delay, max_delay, multiplier }
    }

    /// Calculate the delay for a given retry.
    ///
    /// Uses exponential backoff: base_delay * multiplier^retry_count, capped at max_delay.
    pub fn calculate_delay(&self, retry_count: u32) -> Duration {
        let exponent = i32::try_from(retry_count).unwrap_or(i32::MAX);
        let delay_ms = (self.base_delay.as_millis() as f64 * self.multiplier.powi(exponent))
            .min(self.max_delay.as_millis() as f64) as u64;
        Duration::from_millis(delay_ms)
    }

    /// Next state of the retry loop.
    ///
    /// `remaining` is the time left before the context deadline, if any. A
    /// backoff that would outlast it ends the operation instead.
    pub fn transition(
        &self,
        state: RetryState,
        event: RetryEvent,
        remaining: Option<Duration>,
    ) -> RetryState {
        match (state, event) {
            (RetryState::Attempting { attempt }, RetryEvent::Replied(Ok(()))) => {
                RetryState::Succeeded { attempts: attempt }
            }
            (RetryState::Attempting { attempt }, RetryEvent::Replied(Err(kind))) => {
                if !kind.is_transient() {
                    return RetryState::FailedTerminal {
                        attempts: attempt,
                        reason: TerminalReason::Rejected(kind),
                    };
                }
                if attempt >= self.max_attempts {
                    return RetryState::FailedTerminal {
                        attempts: attempt,
                        reason: TerminalReason::Exhausted,
                    };
                }
                let delay = self.calculate_delay(attempt - 1);
                if remaining.is_some_and(|remaining| delay >= remaining) {
                    return RetryState::FailedTerminal {
                        attempts: attempt,
                        reason: TerminalReason::Interrupted(Interruption::DeadlineExceeded),
                    };
                }
                RetryState::Backoff { attempt, delay }
            }
            // Interrupted before the call went out.
            (RetryState::Attempting { attempt }, RetryEvent::Interrupted(interruption)) => {
                RetryState::FailedTerminal {
                    attempts: attempt - 1,
                    reason: TerminalReason::Interrupted(interruption),
                }
            }
            (RetryState::Backoff { attempt, .. }, RetryEvent::BackoffElapsed) => {
                RetryState::Attempting { attempt: attempt + 1 }
            }
            (RetryState::Backoff { attempt, .. }, RetryEvent::Interrupted(interruption)) => {
                RetryState::FailedTerminal {
                    attempts: attempt,
                    reason: TerminalReason::Interrupted(interruption),
                }
            }
            (state, _) => state,
        }
    }
}

/// State of one operation's retry loop. `attempt` counts from 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    Attempting { attempt: u32 },
    Backoff { attempt: u32, delay: Duration },
    Succeeded { attempts: u32 },
    FailedTerminal { attempts: u32, reason: TerminalReason },
}

impl RetryState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded { .. } | Self::FailedTerminal { .. })
    }
}

/// Input to [`RetryPolicy::transition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryEvent {
    /// The remote call completed.
    Replied(Result<(), TransportErrorKind>),
    /// The context was canceled or its deadline elapsed.
    Interrupted(Interruption),
    /// The backoff delay is over.
    BackoffElapsed,
}

/// Why an operation stopped without success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalReason {
    /// A non-transient transport error.
    Rejected(TransportErrorKind),
    /// Every allowed attempt failed transiently.
    Exhausted,
    /// The context forbade another attempt.
    Interrupted(Interruption),
}

impl TerminalReason {
    fn into_error(self, failure: Failure) -> SessionError {
        match self {
            Self::Rejected(kind) => SessionError::from_kind(kind, failure),
            Self::Exhausted => SessionError::Unavailable(failure),
            Self::Interrupted(Interruption::Canceled) => SessionError::Canceled(failure),
            Self::Interrupted(Interruption::DeadlineExceeded) => {
                SessionError::DeadlineExceeded(failure)
            }
        }
    }

    fn default_message(self) -> &'static str {
        match self {
            Self::Interrupted(Interruption::Canceled) => "call context canceled",
            Self::Interrupted(Interruption::DeadlineExceeded) => "call context deadline elapsed",
            Self::Rejected(_) | Self::Exhausted => "",
        }
    }
}

/// Run `call` under `policy` until it succeeds or the loop reaches a
/// terminal failure.
///
/// `call` receives the attempt number. An in-flight call is dropped as soon
/// as the context is canceled or its deadline elapses.
pub(crate) async fn execute<R, F, Fut>(
    policy: &RetryPolicy,
    op: Operation,
    ctx: &CallContext,
    token: Option<&SessionToken>,
    mut call: F,
) -> SessionResult<R>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<R, TransportError>>,
{
    let mut state = RetryState::Attempting { attempt: 1 };
    let mut reply = None;
    let mut last_message = String::new();

    loop {
        state = match state {
            RetryState::Attempting { attempt } => {
                if let Some(interruption) = ctx.interruption() {
                    policy.transition(state, RetryEvent::Interrupted(interruption), ctx.remaining())
                } else {
                    debug!(op = %op, attempt, "Issuing remote call");
                    let outcome = tokio::select! {
                        biased;
                        () = ctx.canceled() => Err(TransportError::new(
                            TransportErrorKind::Canceled,
                            "call context canceled",
                        )),
                        () = ctx.deadline_elapsed() => Err(TransportError::new(
                            TransportErrorKind::DeadlineExceeded,
                            "call context deadline elapsed",
                        )),
                        result = call(attempt) => result,
                    };
                    match outcome {
                        Ok(value) => {
                            reply = Some(value);
                            policy.transition(state, RetryEvent::Replied(Ok(())), ctx.remaining())
                        }
                        Err(err) => {
                            let kind = retry_kind(err.kind, ctx);
                            let next = policy.transition(
                                state,
                                RetryEvent::Replied(Err(kind)),
                                ctx.remaining(),
                            );
                            if let RetryState::Backoff { delay, .. } = next {
                                warn!(
                                    op = %op,
                                    attempt,
                                    delay_ms = delay.as_millis(),
                                    error = %err,
                                    "Transient failure, retrying after backoff"
                                );
                            }
                            last_message = err.message;
                            next
                        }
                    }
                }
            }
            RetryState::Backoff { delay, .. } => {
                let event = tokio::select! {
                    biased;
                    () = ctx.canceled() => RetryEvent::Interrupted(Interruption::Canceled),
                    () = tokio::time::sleep(delay) => RetryEvent::BackoffElapsed,
                };
                policy.transition(state, event, ctx.remaining())
            }
            RetryState::Succeeded { attempts } => {
                debug!(op = %op, attempts, "Remote call succeeded");
                return reply.ok_or_else(|| {
                    SessionError::Unknown(Failure::new(op, token, attempts, "no reply recorded"))
                });
            }
            RetryState::FailedTerminal { attempts, reason } => {
                if last_message.is_empty() {
                    last_message = reason.default_message().to_string();
                }
                debug!(op = %op, attempts, reason = ?reason, "Operation failed");
                return Err(reason.into_error(Failure::new(op, token, attempts, last_message)));
            }
        };
    }
}

/// Kind an attempt's failure is judged by.
///
/// A `DeadlineExceeded` reply while the context still has time left comes
/// from the per-attempt timeout and is retried like any transient failure.
fn retry_kind(kind: TransportErrorKind, ctx: &CallContext) -> TransportErrorKind {
    if kind == TransportErrorKind::DeadlineExceeded && ctx.interruption().is_none() {
        TransportErrorKind::Transient
    } else {
        kind
    }
}
