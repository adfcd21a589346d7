//! Provider Port (Driven Port)
//!
//! Interface to the external market-data API: session open and close,
//! service opening, request and subscription submission, and a pollable
//! event queue.
//!
//! All methods take `&mut self`. The dispatch loop owns the provider
//! outright, so only one task can ever poll its event queue.

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::correlation::CorrelationId;
use crate::domain::event::ProviderEvent;
use crate::domain::query::Query;
use crate::domain::session::ProviderHandle;

/// Errors reported by provider adapters.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// Provider could not be reached.
    #[error("provider unreachable: {0}")]
    Unreachable(String),

    /// Credentials were rejected.
    #[error("authentication rejected: {0}")]
    AuthRejected(String),

    /// Service could not be opened.
    #[error("unable to open service {0}")]
    ServiceUnavailable(String),

    /// Operation needs an open session.
    #[error("provider session is not open")]
    NotConnected,

    /// Transport failed after the session was established.
    #[error("transport error: {0}")]
    Transport(String),

    /// Outbound or inbound message could not be encoded or decoded.
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Port to the vendor session.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProviderPort: Send {
    /// Connect and authenticate. Returns the provider-assigned handle.
    async fn connect(&mut self) -> Result<ProviderHandle, ProviderError>;

    /// Open a service such as `//blp/refdata`.
    async fn open_service(&mut self, service: &str) -> Result<(), ProviderError>;

    /// Submit a one-shot request tagged with `correlation_id`.
    async fn send_request(
        &mut self,
        correlation_id: CorrelationId,
        query: &Query,
    ) -> Result<(), ProviderError>;

    /// Start a subscription tagged with `correlation_id`.
    async fn subscribe(
        &mut self,
        correlation_id: CorrelationId,
        topic: &str,
        fields: &[String],
    ) -> Result<(), ProviderError>;

    /// Stop the subscription tagged with `correlation_id`.
    async fn unsubscribe(&mut self, correlation_id: CorrelationId) -> Result<(), ProviderError>;

    /// Wait up to `max_wait` for the next event. `Ok(None)` means the wait
    /// elapsed with nothing queued.
    ///
    /// Implementations must be cancel-safe: dropping the future before it
    /// completes must not lose an event.
    async fn next_event(
        &mut self,
        max_wait: Duration,
    ) -> Result<Option<ProviderEvent>, ProviderError>;

    /// Close the session.
    async fn close(&mut self) -> Result<(), ProviderError>;
}
