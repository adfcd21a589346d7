//! Session Handle
//!
//! [`Session`] is the caller-facing handle to one open provider session. It
//! is cheap to clone and safe to use from many tasks at once: every
//! operation registers its bookkeeping locally and hands the provider work
//! to the dispatch loop over a bounded channel, so callers never touch the
//! provider's event queue themselves.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_stream::Stream;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use super::correlator::{RequestCorrelator, RequestOutcomeResult};
use super::dispatch::{Command, DispatchLoop};
use super::health::{DispatchStats, HealthReport, HealthStatus};
use super::subscriptions::{SubscriptionInfo, SubscriptionRegistry};
use crate::application::ports::ProviderPort;
use crate::domain::correlation::{CorrelationId, CorrelationIdAllocator};
use crate::domain::errors::SessionError;
use crate::domain::query::Query;
use crate::domain::request::{RequestState, Response};
use crate::domain::session::{ProviderHandle, SessionInfo, SessionState};
use crate::domain::subscription::{SubscriptionEvent, SubscriptionHandle, SubscriptionSpec};
use crate::infrastructure::config::SessionConfig;
use crate::infrastructure::metrics;

// =============================================================================
// Shared State
// =============================================================================

/// State shared between session handles and the dispatch loop.
#[derive(Debug)]
pub(crate) struct SessionShared {
    pub(crate) info: SessionInfo,
    state: RwLock<SessionState>,
    pub(crate) ids: CorrelationIdAllocator,
    pub(crate) correlator: RequestCorrelator,
    pub(crate) subscriptions: SubscriptionRegistry,
    pub(crate) stats: DispatchStats,
    started: Instant,
    default_timeout: Duration,
    pub(crate) cancel: CancellationToken,
    pub(crate) finished: watch::Sender<bool>,
}

impl SessionShared {
    pub(crate) fn new(info: SessionInfo, config: &SessionConfig) -> Self {
        metrics::set_session_state(SessionState::Connected);
        Self {
            info,
            state: RwLock::new(SessionState::Connected),
            ids: CorrelationIdAllocator::new(),
            correlator: RequestCorrelator::new(),
            subscriptions: SubscriptionRegistry::new(
                config.subscriptions.buffer,
                config.subscriptions.max_subscriptions,
            ),
            stats: DispatchStats::default(),
            started: Instant::now(),
            default_timeout: config.session.request_timeout,
            cancel: CancellationToken::new(),
            finished: watch::channel(false).0,
        }
    }

    pub(crate) fn state(&self) -> SessionState {
        *self.state.read()
    }

    pub(crate) fn set_state(&self, next: SessionState) {
        let previous = std::mem::replace(&mut *self.state.write(), next);
        if previous != next {
            tracing::info!(
                session_id = %self.info.id,
                from = %previous,
                to = %next,
                "session state changed"
            );
        }
        metrics::set_session_state(next);
    }

    /// Tear down after the dispatch loop died without running its own
    /// shutdown, so waiters and `Session::close` are never left hanging.
    fn abort(&self) {
        self.set_state(SessionState::Failed);
        let failed = self.correlator.shutdown();
        let terminated = self
            .subscriptions
            .shutdown(|| SubscriptionEvent::Interrupted);
        tracing::error!(
            session_id = %self.info.id,
            failed_requests = failed,
            terminated_subscriptions = terminated,
            "session aborted"
        );
        self.finished.send_replace(true);
    }
}

// =============================================================================
// Session
// =============================================================================

/// Handle to an open provider session.
#[derive(Debug, Clone)]
pub struct Session {
    shared: Arc<SessionShared>,
    commands: mpsc::Sender<Command>,
}

impl Session {
    /// Spawn the dispatch loop for a connected provider.
    pub(crate) fn start(
        handle: ProviderHandle,
        config: &SessionConfig,
        provider: Box<dyn ProviderPort>,
    ) -> Self {
        let shared = Arc::new(SessionShared::new(SessionInfo::new(handle), config));
        let (commands, rx) = mpsc::channel(config.session.command_buffer.max(1));

        tracing::info!(
            session_id = %shared.info.id,
            handle = %shared.info.handle,
            "session opened"
        );
        let dispatch = tokio::spawn(
            DispatchLoop::new(provider, rx, Arc::clone(&shared), config.session.poll_interval)
                .run(),
        );
        tokio::spawn({
            let shared = Arc::clone(&shared);
            async move {
                if let Err(e) = dispatch.await {
                    tracing::error!(
                        session_id = %shared.info.id,
                        error = %e,
                        "dispatch loop terminated abnormally"
                    );
                    shared.abort();
                }
            }
        });

        Self { shared, commands }
    }

    /// Identity of this session.
    #[must_use]
    pub fn info(&self) -> &SessionInfo {
        &self.shared.info
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// True while the session is open and routing events.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    /// Send `query` and wait for the response using the configured default
    /// request timeout.
    ///
    /// # Errors
    ///
    /// See [`Self::send`].
    pub async fn request(&self, query: Query) -> Result<Response, SessionError> {
        self.send(query, self.shared.default_timeout).await
    }

    /// Send `query` and wait up to `timeout` for the complete response.
    /// Partial responses are accumulated in arrival order.
    ///
    /// # Errors
    ///
    /// - [`SessionError::SessionClosed`] if the session is closed or lost
    ///   before the response completes
    /// - [`SessionError::RequestTimeout`] if `timeout` elapses first
    /// - [`SessionError::RequestFailed`] if the provider returns an error
    pub async fn send(&self, query: Query, timeout: Duration) -> Result<Response, SessionError> {
        self.send_async(query, timeout).await?.wait().await
    }

    /// Submit `query` without waiting for the response. The returned ticket
    /// resolves exactly once.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::SessionClosed`] when the session is not open,
    /// or [`SessionError::RequestTimeout`] when `timeout` elapses before the
    /// dispatch loop accepts the request.
    pub async fn send_async(
        &self,
        query: Query,
        timeout: Duration,
    ) -> Result<RequestTicket, SessionError> {
        if !self.is_connected() {
            return Err(SessionError::SessionClosed);
        }
        let deadline = Instant::now().checked_add(timeout);
        let correlation_id = self.shared.ids.allocate();
        let rx = self.shared.correlator.register(correlation_id)?;

        let service = query.service().to_string();
        tracing::debug!(
            correlation_id = %correlation_id,
            service = %service,
            operation = %query.operation(),
            "request issued"
        );

        let command = Command::Submit {
            correlation_id,
            query,
        };
        let sent = match deadline {
            Some(deadline) => {
                match tokio::time::timeout_at(deadline, self.commands.send(command)).await {
                    Ok(sent) => sent,
                    Err(_) => {
                        self.shared.correlator.abandon(correlation_id);
                        return Err(SessionError::RequestTimeout {
                            correlation_id,
                            timeout,
                        });
                    }
                }
            }
            None => self.commands.send(command).await,
        };
        if sent.is_err() {
            self.shared
                .correlator
                .fail(correlation_id, SessionError::SessionClosed);
            return Err(SessionError::SessionClosed);
        }
        metrics::record_request_issued(&service);

        Ok(RequestTicket {
            correlation_id,
            rx,
            deadline,
            timeout,
            outcome: None,
            settled: false,
            shared: Arc::clone(&self.shared),
        })
    }

    /// Submit `query` and hand its outcome to `callback` on a spawned task.
    /// The callback runs exactly once, with the response, the provider
    /// error, [`SessionError::RequestTimeout`] or
    /// [`SessionError::SessionClosed`].
    ///
    /// # Errors
    ///
    /// See [`Self::send_async`]. The callback is not invoked when
    /// submission itself fails.
    pub async fn send_with<F>(
        &self,
        query: Query,
        timeout: Duration,
        callback: F,
    ) -> Result<CorrelationId, SessionError>
    where
        F: FnOnce(RequestOutcomeResult) + Send + 'static,
    {
        let ticket = self.send_async(query, timeout).await?;
        let correlation_id = ticket.correlation_id();
        tokio::spawn(async move { callback(ticket.wait().await) });
        Ok(correlation_id)
    }

    /// Subscribe to push updates for `fields` on `topic`.
    ///
    /// # Errors
    ///
    /// - [`SessionError::InvalidQuery`] for a blank topic or empty field list
    /// - [`SessionError::SubscriptionLimit`] when the session's cap is reached
    /// - [`SessionError::SessionClosed`] when the session is not open
    pub async fn subscribe<S: AsRef<str>>(
        &self,
        topic: impl Into<String>,
        fields: impl IntoIterator<Item = S>,
    ) -> Result<Subscription, SessionError> {
        let spec = SubscriptionSpec::new(topic, fields)?;
        if !self.is_connected() {
            return Err(SessionError::SessionClosed);
        }
        let correlation_id = self.shared.ids.allocate();
        let rx = self
            .shared
            .subscriptions
            .register(correlation_id, spec.clone())?;
        let handle = SubscriptionHandle::new(correlation_id, spec.topic());

        if self
            .commands
            .send(Command::Subscribe {
                correlation_id,
                spec,
            })
            .await
            .is_err()
        {
            self.shared.subscriptions.remove(correlation_id);
            return Err(SessionError::SessionClosed);
        }
        tracing::debug!(
            correlation_id = %correlation_id,
            topic = %handle.topic(),
            "subscription registered"
        );

        Ok(Subscription { handle, rx })
    }

    /// Subscribe and deliver every event to `callback` on a spawned task.
    /// The callback sees at most one terminal event, after which it is
    /// dropped.
    ///
    /// # Errors
    ///
    /// See [`Self::subscribe`].
    pub async fn subscribe_with<S, F>(
        &self,
        topic: impl Into<String>,
        fields: impl IntoIterator<Item = S>,
        mut callback: F,
    ) -> Result<SubscriptionHandle, SessionError>
    where
        S: AsRef<str>,
        F: FnMut(SubscriptionEvent) + Send + 'static,
    {
        let mut subscription = self.subscribe(topic, fields).await?;
        let handle = subscription.handle().clone();
        tokio::spawn(async move {
            while let Some(event) = subscription.next_event().await {
                let terminal = event.is_terminal();
                callback(event);
                if terminal {
                    break;
                }
            }
        });
        Ok(handle)
    }

    /// Cancel a subscription. Its stream ends without a terminal event.
    /// Returns `false` when the subscription was already gone, which makes
    /// repeated calls harmless.
    pub async fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        let correlation_id = handle.correlation_id();
        if !self.shared.subscriptions.remove(correlation_id) {
            return false;
        }
        tracing::debug!(
            correlation_id = %correlation_id,
            topic = %handle.topic(),
            "unsubscribed"
        );
        // A closed channel means teardown is already under way.
        let _ = self
            .commands
            .send(Command::Unsubscribe { correlation_id })
            .await;
        true
    }

    /// Snapshot of the registered subscriptions.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<SubscriptionInfo> {
        self.shared.subscriptions.snapshot()
    }

    /// Requests awaiting a response.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.shared.correlator.pending_count()
    }

    /// Point-in-time health report.
    #[must_use]
    pub fn health(&self) -> HealthReport {
        let state = self.state();
        let updates_dropped = self.shared.stats.updates_dropped();
        HealthReport {
            status: HealthStatus::from_state(state, updates_dropped),
            session_id: self.shared.info.id,
            provider_handle: self.shared.info.handle.to_string(),
            state,
            uptime_secs: self.shared.started.elapsed().as_secs(),
            pending_requests: self.shared.correlator.pending_count(),
            active_subscriptions: self.shared.subscriptions.active_count(),
            correlation_ids_issued: self.shared.ids.issued(),
            events_routed: self.shared.stats.events_routed(),
            events_unmatched: self.shared.stats.events_unmatched(),
            updates_dropped,
            current_time: Utc::now(),
        }
    }

    /// Close the session and wait for teardown to finish. Pending requests
    /// fail with [`SessionError::SessionClosed`] and subscriptions receive
    /// [`SubscriptionEvent::Closed`]. Closing twice is a no-op.
    pub async fn close(&self) {
        self.shared.cancel.cancel();
        let mut finished = self.shared.finished.subscribe();
        // The sender lives in `shared`, so this only returns once set.
        let _ = finished.wait_for(|done| *done).await;
    }
}

// =============================================================================
// Request Ticket
// =============================================================================

/// Pending result of [`Session::send_async`].
///
/// Dropping an unresolved ticket abandons the request; a late response is
/// then discarded by the dispatch loop.
#[derive(Debug)]
pub struct RequestTicket {
    correlation_id: CorrelationId,
    rx: oneshot::Receiver<RequestOutcomeResult>,
    deadline: Option<Instant>,
    timeout: Duration,
    outcome: Option<RequestOutcomeResult>,
    settled: bool,
    shared: Arc<SessionShared>,
}

impl RequestTicket {
    /// Correlation id of the request.
    #[must_use]
    pub const fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    /// Request state as last observed.
    pub fn state(&mut self) -> RequestState {
        self.poll_outcome();
        match &self.outcome {
            None => RequestState::Pending,
            Some(Ok(_)) => RequestState::Completed,
            Some(Err(SessionError::RequestTimeout { .. })) => RequestState::TimedOut,
            Some(Err(_)) => RequestState::Failed,
        }
    }

    /// True once the outcome is available without waiting.
    pub fn is_ready(&mut self) -> bool {
        self.poll_outcome();
        self.outcome.is_some()
    }

    /// Take the outcome if it is ready, otherwise hand the ticket back.
    ///
    /// # Errors
    ///
    /// Returns the ticket unchanged while the request is still pending.
    pub fn try_take(mut self) -> Result<RequestOutcomeResult, Self> {
        self.poll_outcome();
        match self.outcome.take() {
            Some(outcome) => Ok(outcome),
            None => Err(self),
        }
    }

    /// Wait for the outcome or the deadline, whichever comes first.
    ///
    /// # Errors
    ///
    /// See [`Session::send`].
    pub async fn wait(mut self) -> RequestOutcomeResult {
        self.poll_outcome();
        if let Some(outcome) = self.outcome.take() {
            return outcome;
        }
        let received = match self.deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, &mut self.rx).await.ok(),
            None => Some((&mut self.rx).await),
        };
        self.settled = true;
        match received {
            Some(Ok(outcome)) => outcome,
            Some(Err(_)) => Err(SessionError::SessionClosed),
            None => self.expire(),
        }
    }

    fn poll_outcome(&mut self) {
        if self.settled {
            return;
        }
        match self.rx.try_recv() {
            Ok(outcome) => {
                self.settled = true;
                self.outcome = Some(outcome);
            }
            Err(oneshot::error::TryRecvError::Closed) => {
                self.settled = true;
                self.outcome = Some(Err(SessionError::SessionClosed));
            }
            Err(oneshot::error::TryRecvError::Empty) => {
                if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                    self.settled = true;
                    self.outcome = Some(self.expire());
                }
            }
        }
    }

    fn expire(&mut self) -> RequestOutcomeResult {
        let timed_out = Err(SessionError::RequestTimeout {
            correlation_id: self.correlation_id,
            timeout: self.timeout,
        });
        if self.shared.correlator.abandon(self.correlation_id) {
            tracing::debug!(
                correlation_id = %self.correlation_id,
                timeout_ms = self.timeout.as_millis(),
                "request timed out"
            );
            return timed_out;
        }
        // Resolved between the deadline and the abandon.
        self.rx.try_recv().unwrap_or(timed_out)
    }
}

impl Drop for RequestTicket {
    fn drop(&mut self) {
        if !self.settled {
            self.shared.correlator.abandon(self.correlation_id);
        }
    }
}

// =============================================================================
// Subscription
// =============================================================================

/// Listener side of an active subscription.
///
/// Yields [`SubscriptionEvent`]s in arrival order. The stream ends after a
/// terminal event, or without one after [`Session::unsubscribe`].
#[derive(Debug)]
pub struct Subscription {
    handle: SubscriptionHandle,
    rx: mpsc::Receiver<SubscriptionEvent>,
}

impl Subscription {
    /// Handle for [`Session::unsubscribe`].
    #[must_use]
    pub const fn handle(&self) -> &SubscriptionHandle {
        &self.handle
    }

    /// Next event, or `None` once the stream has ended.
    pub async fn next_event(&mut self) -> Option<SubscriptionEvent> {
        self.rx.recv().await
    }

    /// Convert into a [`ReceiverStream`], keeping the handle.
    #[must_use]
    pub fn into_stream(self) -> (SubscriptionHandle, ReceiverStream<SubscriptionEvent>) {
        (self.handle, ReceiverStream::new(self.rx))
    }
}

impl Stream for Subscription {
    type Item = SubscriptionEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

// =============================================================================
// Tests
// =============================================================================
