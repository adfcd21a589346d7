//! Request State
//!
//! A request moves `Pending -> {Completed, Failed, TimedOut}` exactly once.
//! [`RequestState::advance`] enforces that: any transition out of a terminal
//! state, or back to `Pending`, is refused.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::correlation::CorrelationId;
use super::event::Payload;

/// Completion state of a one-shot request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    /// Awaiting a response.
    #[default]
    Pending,
    /// Final response received.
    Completed,
    /// Provider error or session teardown.
    Failed,
    /// Caller's bound elapsed first.
    TimedOut,
}

impl RequestState {
    /// True for every state except `Pending`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Move to `next`. Returns `false` and leaves the state untouched when
    /// the transition is not allowed.
    pub const fn advance(&mut self, next: Self) -> bool {
        if self.is_terminal() || !next.is_terminal() {
            return false;
        }
        *self = next;
        true
    }

    /// Label for logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
        }
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resolved response handed back to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Correlation id the response was matched on.
    pub correlation_id: CorrelationId,
    /// All partial and final messages, in arrival order.
    pub payload: Payload,
    /// Number of provider events that contributed to the payload.
    pub partials: usize,
    /// When the request was issued.
    pub issued_at: DateTime<Utc>,
    /// When the final response arrived.
    pub completed_at: DateTime<Utc>,
}

impl Response {
    /// Time between issue and completion.
    #[must_use]
    pub fn elapsed(&self) -> chrono::Duration {
        self.completed_at - self.issued_at
    }
}
