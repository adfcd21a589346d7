//! Session Errors
//!
//! Error taxonomy surfaced by the session facade. Connection-level failures
//! cascade to every dependent; request and subscription failures surface only
//! to the caller or listener that owns the correlation id.

use std::time::Duration;

use super::correlation::CorrelationId;
use super::event::ErrorDetail;
use super::query::QueryError;

/// Errors returned by session, request and subscription operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// Session could not be established.
    #[error("connection error: {0}")]
    Connection(String),

    /// A session is already active on this manager.
    #[error("a session is already open")]
    AlreadyOpen,

    /// Operation attempted after or during teardown.
    #[error("session closed")]
    SessionClosed,

    /// No response within the caller's bound.
    #[error("request {correlation_id} timed out after {timeout:?}")]
    RequestTimeout {
        /// Request that timed out.
        correlation_id: CorrelationId,
        /// Bound that elapsed.
        timeout: Duration,
    },

    /// Provider answered with an error payload.
    #[error("request {correlation_id} failed: {detail}")]
    RequestFailed {
        /// Failed request.
        correlation_id: CorrelationId,
        /// Provider error detail.
        detail: ErrorDetail,
    },

    /// Session was lost while the subscription was active.
    #[error("subscription {correlation_id} interrupted by session loss")]
    SubscriptionInterrupted {
        /// Interrupted subscription.
        correlation_id: CorrelationId,
    },

    /// Provider rejected or dropped the subscription.
    #[error("subscription {correlation_id} failed: {detail}")]
    SubscriptionFailed {
        /// Failed subscription.
        correlation_id: CorrelationId,
        /// Provider error detail.
        detail: ErrorDetail,
    },

    /// Query arguments failed validation; nothing was sent.
    #[error("invalid query: {0}")]
    InvalidQuery(#[from] QueryError),

    /// Concurrent subscription limit reached.
    #[error("subscription limit of {limit} reached")]
    SubscriptionLimit {
        /// Configured limit.
        limit: usize,
    },
}

impl SessionError {
    /// True for errors caused by the session going away.
    #[must_use]
    pub const fn is_session_level(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::SessionClosed | Self::SubscriptionInterrupted { .. }
        )
    }
}
