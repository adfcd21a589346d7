//! Provider Events
//!
//! Inbound messages from the provider as seen by the dispatch loop. An
//! event carries an optional correlation id (absent for session-level
//! status), a kind, and a [`Payload`] of provider messages.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::correlation::CorrelationId;

// =============================================================================
// Payload
// =============================================================================

/// Ordered provider messages carried by one or more events.
///
/// Partial responses are concatenated with [`Payload::extend`], so the final
/// payload preserves arrival order across partials.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(Vec<Value>);

impl Payload {
    /// Empty payload.
    #[must_use]
    pub const fn empty() -> Self {
        Self(Vec::new())
    }

    /// Payload from a list of messages.
    #[must_use]
    pub const fn from_messages(messages: Vec<Value>) -> Self {
        Self(messages)
    }

    /// Single-message payload.
    #[must_use]
    pub fn single(message: Value) -> Self {
        Self(vec![message])
    }

    /// Append another payload's messages in order.
    pub fn extend(&mut self, other: Self) {
        self.0.extend(other.0);
    }

    /// Messages in arrival order.
    #[must_use]
    pub fn messages(&self) -> &[Value] {
        &self.0
    }

    /// Consume into the message list.
    #[must_use]
    pub fn into_messages(self) -> Vec<Value> {
        self.0
    }

    /// Number of messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when no messages are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// First `responseError` element found on a top-level message, if any.
    /// The element is fatal whatever its shape; one that does not decode as
    /// an `ErrorDetail` is carried as the detail's message.
    #[must_use]
    pub fn response_error(&self) -> Option<ErrorDetail> {
        let element = self
            .0
            .iter()
            .find_map(|message| message.get("responseError"))?;
        Some(
            serde_json::from_value(element.clone()).unwrap_or_else(|_| match element {
                Value::String(text) => ErrorDetail::message(text.clone()),
                other => ErrorDetail::message(other.to_string()),
            }),
        )
    }
}

impl From<Vec<Value>> for Payload {
    fn from(messages: Vec<Value>) -> Self {
        Self(messages)
    }
}

// =============================================================================
// Error Detail
// =============================================================================

/// Provider error detail (category, subcategory, message).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Broad error category, e.g. `BAD_SEC`.
    #[serde(default)]
    pub category: String,
    /// Finer-grained subcategory.
    #[serde(default)]
    pub subcategory: String,
    /// Human-readable message.
    #[serde(default)]
    pub message: String,
}

impl ErrorDetail {
    /// Build a detail record.
    #[must_use]
    pub fn new(
        category: impl Into<String>,
        subcategory: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category: category.into(),
            subcategory: subcategory.into(),
            message: message.into(),
        }
    }

    /// Detail with only a message.
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }
}

impl fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.category.is_empty(), self.subcategory.is_empty()) {
            (true, true) => write!(f, "{}", self.message),
            (false, true) => write!(f, "{}: {}", self.category, self.message),
            _ => write!(
                f,
                "{}: {}: {}",
                self.category, self.subcategory, self.message
            ),
        }
    }
}

// =============================================================================
// Event Kinds
// =============================================================================

/// Session-level status reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Session is up.
    Up,
    /// Connection to the provider was lost.
    Lost,
    /// Provider terminated the session.
    Terminated,
}

impl SessionStatus {
    /// True when the status means the session is gone.
    #[must_use]
    pub const fn is_loss(self) -> bool {
        matches!(self, Self::Lost | Self::Terminated)
    }
}

/// Kind of an inbound event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Partial response to a request.
    ResponseData,
    /// Final response to a request.
    ResponseComplete,
    /// Push update for a subscription.
    SubscriptionData,
    /// Session status change.
    SessionStatus(SessionStatus),
    /// Error scoped to a request or subscription, or to the session when
    /// no correlation id is present.
    Error,
}

impl EventKind {
    /// Short label for logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ResponseData => "response_data",
            Self::ResponseComplete => "response_complete",
            Self::SubscriptionData => "subscription_data",
            Self::SessionStatus(_) => "session_status",
            Self::Error => "error",
        }
    }
}

// =============================================================================
// Provider Event
// =============================================================================

/// An inbound message from the provider, consumed once by the dispatch loop.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderEvent {
    /// Correlation id, absent for session-level events.
    pub correlation_id: Option<CorrelationId>,
    /// Event kind.
    pub kind: EventKind,
    /// Messages carried by the event.
    pub payload: Payload,
}

impl ProviderEvent {
    /// Partial response data.
    #[must_use]
    pub const fn response_data(correlation_id: CorrelationId, payload: Payload) -> Self {
        Self {
            correlation_id: Some(correlation_id),
            kind: EventKind::ResponseData,
            payload,
        }
    }

    /// Final response.
    #[must_use]
    pub const fn response_complete(correlation_id: CorrelationId, payload: Payload) -> Self {
        Self {
            correlation_id: Some(correlation_id),
            kind: EventKind::ResponseComplete,
            payload,
        }
    }

    /// Subscription push update.
    #[must_use]
    pub const fn subscription_data(correlation_id: CorrelationId, payload: Payload) -> Self {
        Self {
            correlation_id: Some(correlation_id),
            kind: EventKind::SubscriptionData,
            payload,
        }
    }

    /// Session status change.
    #[must_use]
    pub const fn session_status(status: SessionStatus) -> Self {
        Self {
            correlation_id: None,
            kind: EventKind::SessionStatus(status),
            payload: Payload::empty(),
        }
    }

    /// Error event. The detail is carried as a `responseError` message.
    #[must_use]
    pub fn error(correlation_id: Option<CorrelationId>, detail: &ErrorDetail) -> Self {
        Self {
            correlation_id,
            kind: EventKind::Error,
            payload: Payload::single(serde_json::json!({ "responseError": detail })),
        }
    }

    /// Error detail for an `Error` event, falling back to a generic message.
    #[must_use]
    pub fn error_detail(&self) -> ErrorDetail {
        self.payload
            .response_error()
            .unwrap_or_else(|| ErrorDetail::message("provider reported an error"))
    }
}
