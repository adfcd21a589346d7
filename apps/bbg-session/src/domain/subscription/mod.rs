//! Subscription Types
//!
//! A subscription is a standing registration for push updates on a topic
//! and field set. Listeners receive a stream of [`SubscriptionEvent`]s that
//! ends with at most one terminal event.

use serde::{Deserialize, Serialize};

use super::correlation::CorrelationId;
use super::errors::SessionError;
use super::event::{ErrorDetail, Payload};
use super::query::{QueryError, clean_list};

/// Validated topic and field set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionSpec {
    topic: String,
    fields: Vec<String>,
}

impl SubscriptionSpec {
    /// Validate a topic and field list. Blank fields are dropped; a blank
    /// topic or an empty field list is rejected.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError`] when the topic or field list is empty.
    pub fn new<S: AsRef<str>>(
        topic: impl Into<String>,
        fields: impl IntoIterator<Item = S>,
    ) -> Result<Self, QueryError> {
        let topic = topic.into().trim().to_string();
        if topic.is_empty() {
            return Err(QueryError::EmptyValue("topic"));
        }
        let fields = clean_list("fields", fields)?;
        Ok(Self { topic, fields })
    }

    /// Subscribed topic.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Subscribed fields.
    #[must_use]
    pub fn fields(&self) -> &[String] {
        &self.fields
    }
}

/// Caller's handle to an active subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    correlation_id: CorrelationId,
    topic: String,
}

impl SubscriptionHandle {
    /// Create a handle.
    #[must_use]
    pub fn new(correlation_id: CorrelationId, topic: impl Into<String>) -> Self {
        Self {
            correlation_id,
            topic: topic.into(),
        }
    }

    /// Correlation id of the subscription.
    #[must_use]
    pub const fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    /// Subscribed topic.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

/// Event delivered to a subscription listener.
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionEvent {
    /// Push update.
    Data(Payload),
    /// The session was lost; no further events follow.
    Interrupted,
    /// The session was closed; no further events follow.
    Closed,
    /// The provider rejected or dropped the subscription.
    Failed(ErrorDetail),
}

impl SubscriptionEvent {
    /// True for events after which the stream ends.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Data(_))
    }

    /// Error value for terminal events, `None` for data.
    #[must_use]
    pub fn to_error(&self, correlation_id: CorrelationId) -> Option<SessionError> {
        match self {
            Self::Data(_) => None,
            Self::Interrupted => Some(SessionError::SubscriptionInterrupted { correlation_id }),
            Self::Closed => Some(SessionError::SessionClosed),
            Self::Failed(detail) => Some(SessionError::SubscriptionFailed {
                correlation_id,
                detail: detail.clone(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_drops_blank_fields() {
        let spec = SubscriptionSpec::new("IBM US Equity", ["LAST_PRICE", "", "  ", "BID"]).unwrap();
        assert_eq!(spec.topic(), "IBM US Equity");
        assert_eq!(spec.fields(), ["LAST_PRICE", "BID"]);
    }

    #[test]
    fn spec_rejects_blank_topic() {
        let err = SubscriptionSpec::new("  ", ["LAST_PRICE"]).unwrap_err();
        assert_eq!(err, QueryError::EmptyValue("topic"));
    }

    #[test]
    fn spec_rejects_empty_fields() {
        let err = SubscriptionSpec::new("T", [""]).unwrap_err();
        assert_eq!(err, QueryError::EmptyList("fields"));
    }

    #[test]
    fn terminal_events_map_to_errors() {
        let cid = CorrelationId::new(9);
        assert!(SubscriptionEvent::Data(Payload::empty()).to_error(cid).is_none());
        assert_eq!(
            SubscriptionEvent::Interrupted.to_error(cid),
            Some(SessionError::SubscriptionInterrupted { correlation_id: cid })
        );
        assert!(SubscriptionEvent::Closed.is_terminal());
        assert!(matches!(
            SubscriptionEvent::Failed(ErrorDetail::message("x")).to_error(cid),
            Some(SessionError::SubscriptionFailed { .. })
        ));
    }
}
