//! Simulated Provider
//!
//! In-process [`ProviderPort`] driven by a [`SimulatedController`]. The
//! controller scripts connect outcomes and service failures, observes what
//! the session submitted, and pushes events into the provider's queue. Used
//! by the integration tests and by hosts that want to exercise the session
//! without a live endpoint.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::application::ports::{ProviderError, ProviderPort};
use crate::domain::correlation::CorrelationId;
use crate::domain::event::{ErrorDetail, Payload, ProviderEvent, SessionStatus};
use crate::domain::query::Query;
use crate::domain::session::ProviderHandle;

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

// =============================================================================
// Types
// =============================================================================

/// How the next `connect` call behaves.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ConnectBehavior {
    /// Connect and authenticate.
    #[default]
    Accept,
    /// Reject the credentials with the given message.
    RejectAuth(String),
    /// Fail as if the endpoint could not be reached.
    Unreachable,
    /// Never complete.
    Hang,
}

/// A request the session submitted.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmittedRequest {
    /// Correlation id the response must carry.
    pub correlation_id: CorrelationId,
    /// The query as sent.
    pub query: Query,
}

/// A subscription the session started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedSubscription {
    /// Correlation id updates must carry.
    pub correlation_id: CorrelationId,
    /// Subscribed topic.
    pub topic: String,
    /// Subscribed fields.
    pub fields: Vec<String>,
}

#[derive(Debug, Default)]
struct ScriptState {
    behavior: ConnectBehavior,
    failing_services: HashSet<String>,
    opened_services: Vec<String>,
    unsubscribed: Vec<CorrelationId>,
    connects: u32,
    closed: bool,
}

/// Create a connected provider/controller pair.
#[must_use]
pub fn simulated() -> (SimulatedProvider, SimulatedController) {
    let script = Arc::new(Mutex::new(ScriptState::default()));
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (requests_tx, requests_rx) = mpsc::unbounded_channel();
    let (subscriptions_tx, subscriptions_rx) = mpsc::unbounded_channel();

    (
        SimulatedProvider {
            script: Arc::clone(&script),
            events: events_rx,
            requests: requests_tx,
            subscriptions: subscriptions_tx,
            connected: false,
        },
        SimulatedController {
            script,
            events: events_tx,
            requests: requests_rx,
            subscriptions: subscriptions_rx,
        },
    )
}

// =============================================================================
// Provider
// =============================================================================

/// Provider half, handed to `SessionManager::open`.
#[derive(Debug)]
pub struct SimulatedProvider {
    script: Arc<Mutex<ScriptState>>,
    events: mpsc::UnboundedReceiver<ProviderEvent>,
    requests: mpsc::UnboundedSender<SubmittedRequest>,
    subscriptions: mpsc::UnboundedSender<SubmittedSubscription>,
    connected: bool,
}

impl SimulatedProvider {
    const fn ensure_connected(&self) -> Result<(), ProviderError> {
        if self.connected {
            Ok(())
        } else {
            Err(ProviderError::NotConnected)
        }
    }
}

#[async_trait]
impl ProviderPort for SimulatedProvider {
    async fn connect(&mut self) -> Result<ProviderHandle, ProviderError> {
        let behavior = {
            let mut script = self.script.lock();
            script.connects += 1;
            script.behavior.clone()
        };
        match behavior {
            ConnectBehavior::Accept => {
                self.connected = true;
                let n = NEXT_HANDLE.fetch_add(1, Ordering::Relaxed);
                Ok(ProviderHandle::new(format!("simulated-{n}")))
            }
            ConnectBehavior::RejectAuth(message) => Err(ProviderError::AuthRejected(message)),
            ConnectBehavior::Unreachable => Err(ProviderError::Unreachable(
                "simulated endpoint unreachable".into(),
            )),
            ConnectBehavior::Hang => std::future::pending().await,
        }
    }

    async fn open_service(&mut self, service: &str) -> Result<(), ProviderError> {
        self.ensure_connected()?;
        let mut script = self.script.lock();
        if script.failing_services.contains(service) {
            return Err(ProviderError::ServiceUnavailable(service.to_string()));
        }
        script.opened_services.push(service.to_string());
        Ok(())
    }

    async fn send_request(
        &mut self,
        correlation_id: CorrelationId,
        query: &Query,
    ) -> Result<(), ProviderError> {
        self.ensure_connected()?;
        // Controller gone means nobody will answer; the request just hangs.
        let _ = self.requests.send(SubmittedRequest {
            correlation_id,
            query: query.clone(),
        });
        Ok(())
    }

    async fn subscribe(
        &mut self,
        correlation_id: CorrelationId,
        topic: &str,
        fields: &[String],
    ) -> Result<(), ProviderError> {
        self.ensure_connected()?;
        let _ = self.subscriptions.send(SubmittedSubscription {
            correlation_id,
            topic: topic.to_string(),
            fields: fields.to_vec(),
        });
        Ok(())
    }

    async fn unsubscribe(&mut self, correlation_id: CorrelationId) -> Result<(), ProviderError> {
        self.ensure_connected()?;
        self.script.lock().unsubscribed.push(correlation_id);
        Ok(())
    }

    async fn next_event(
        &mut self,
        max_wait: Duration,
    ) -> Result<Option<ProviderEvent>, ProviderError> {
        self.ensure_connected()?;
        match tokio::time::timeout(max_wait, self.events.recv()).await {
            Ok(Some(event)) => Ok(Some(event)),
            Ok(None) => {
                // Controller dropped: behave like an idle provider.
                tokio::time::sleep(max_wait).await;
                Ok(None)
            }
            Err(_) => Ok(None),
        }
    }

    async fn close(&mut self) -> Result<(), ProviderError> {
        self.connected = false;
        self.script.lock().closed = true;
        Ok(())
    }
}

// =============================================================================
// Controller
// =============================================================================

/// Scripting half of a simulated provider.
#[derive(Debug)]
pub struct SimulatedController {
    script: Arc<Mutex<ScriptState>>,
    events: mpsc::UnboundedSender<ProviderEvent>,
    requests: mpsc::UnboundedReceiver<SubmittedRequest>,
    subscriptions: mpsc::UnboundedReceiver<SubmittedSubscription>,
}

impl SimulatedController {
    /// Set how the next `connect` behaves.
    pub fn set_connect_behavior(&self, behavior: ConnectBehavior) {
        self.script.lock().behavior = behavior;
    }

    /// Make `open_service` fail for `service`.
    pub fn fail_service(&self, service: impl Into<String>) {
        self.script.lock().failing_services.insert(service.into());
    }

    /// Next request the session submitted, waiting if none yet.
    pub async fn next_request(&mut self) -> Option<SubmittedRequest> {
        self.requests.recv().await
    }

    /// Next subscription the session started, waiting if none yet.
    pub async fn next_subscription(&mut self) -> Option<SubmittedSubscription> {
        self.subscriptions.recv().await
    }

    /// Queue a raw event. Returns `false` once the provider is gone.
    pub fn push(&self, event: ProviderEvent) -> bool {
        self.events.send(event).is_ok()
    }

    /// Queue a partial response.
    pub fn respond_partial(
        &self,
        correlation_id: CorrelationId,
        message: serde_json::Value,
    ) -> bool {
        self.push(ProviderEvent::response_data(
            correlation_id,
            Payload::single(message),
        ))
    }

    /// Queue a final response.
    pub fn respond(&self, correlation_id: CorrelationId, message: serde_json::Value) -> bool {
        self.push(ProviderEvent::response_complete(
            correlation_id,
            Payload::single(message),
        ))
    }

    /// Queue an error scoped to `correlation_id`.
    pub fn reject(&self, correlation_id: CorrelationId, detail: &ErrorDetail) -> bool {
        self.push(ProviderEvent::error(Some(correlation_id), detail))
    }

    /// Queue a subscription update.
    pub fn publish(&self, correlation_id: CorrelationId, message: serde_json::Value) -> bool {
        self.push(ProviderEvent::subscription_data(
            correlation_id,
            Payload::single(message),
        ))
    }

    /// Report the session as lost.
    pub fn lose_session(&self) -> bool {
        self.push(ProviderEvent::session_status(SessionStatus::Lost))
    }

    /// Services opened so far, in order.
    #[must_use]
    pub fn opened_services(&self) -> Vec<String> {
        self.script.lock().opened_services.clone()
    }

    /// Correlation ids unsubscribed so far, in order.
    #[must_use]
    pub fn unsubscribed(&self) -> Vec<CorrelationId> {
        self.script.lock().unsubscribed.clone()
    }

    /// Number of `connect` calls.
    #[must_use]
    pub fn connects(&self) -> u32 {
        self.script.lock().connects
    }

    /// True once the session closed the provider.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.script.lock().closed
    }
}
