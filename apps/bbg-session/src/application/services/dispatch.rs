//! Event Dispatch Loop
//!
//! The single task that owns the provider. It drains caller commands,
//! polls the provider's event queue and routes every inbound event to the
//! request correlator or the subscription registry by correlation id.
//!
//! The loop ends when the session is closed, when every session handle has
//! been dropped, or when the provider reports the session lost. On the way
//! out it fails pending requests, terminates subscriptions, closes the
//! provider and signals completion to anyone waiting in `Session::close`.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use super::correlator::Routed;
use super::session::SessionShared;
use super::subscriptions::Delivery;
use crate::application::ports::{ProviderError, ProviderPort};
use crate::domain::correlation::CorrelationId;
use crate::domain::event::{ErrorDetail, EventKind, ProviderEvent, SessionStatus};
use crate::domain::query::{MKTDATA_SERVICE, Query};
use crate::domain::session::SessionState;
use crate::domain::subscription::{SubscriptionEvent, SubscriptionSpec};
use crate::infrastructure::metrics;

/// Events routed after each command before the next command is taken.
const EVENT_BURST: usize = 64;

// =============================================================================
// Commands
// =============================================================================

/// Work handed from session handles to the dispatch loop.
#[derive(Debug)]
pub(crate) enum Command {
    /// Send a registered request.
    Submit {
        correlation_id: CorrelationId,
        query: Query,
    },
    /// Start a registered subscription.
    Subscribe {
        correlation_id: CorrelationId,
        spec: SubscriptionSpec,
    },
    /// Stop a subscription already removed from the registry.
    Unsubscribe { correlation_id: CorrelationId },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Exit {
    Closed,
    HandlesDropped,
    Lost(String),
}

enum Step {
    Exit(Exit),
    Command(Command),
    Event(Result<Option<ProviderEvent>, ProviderError>),
}

// =============================================================================
// Dispatch Loop
// =============================================================================

/// Owns the provider for the lifetime of one session.
pub(crate) struct DispatchLoop {
    provider: Box<dyn ProviderPort>,
    commands: mpsc::Receiver<Command>,
    shared: Arc<SessionShared>,
    opened_services: HashSet<String>,
    orphaned: Vec<CorrelationId>,
    poll_interval: Duration,
}

impl DispatchLoop {
    pub(crate) fn new(
        provider: Box<dyn ProviderPort>,
        commands: mpsc::Receiver<Command>,
        shared: Arc<SessionShared>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            provider,
            commands,
            shared,
            opened_services: HashSet::new(),
            orphaned: Vec::new(),
            poll_interval: poll_interval.max(Duration::from_millis(1)),
        }
    }

    /// Run until closed, abandoned or lost, then tear the session down.
    pub(crate) async fn run(mut self) {
        tracing::debug!(session_id = %self.shared.info.id, "dispatch loop started");
        let poll_interval = self.poll_interval;

        let exit = loop {
            let step = tokio::select! {
                biased;
                () = self.shared.cancel.cancelled() => Step::Exit(Exit::Closed),
                command = self.commands.recv() => match command {
                    Some(command) => Step::Command(command),
                    None => Step::Exit(Exit::HandlesDropped),
                },
                event = self.provider.next_event(poll_interval) => Step::Event(event),
            };

            let exit = match step {
                Step::Exit(exit) => Some(exit),
                Step::Command(command) => {
                    self.handle_command(command).await;
                    self.drain_ready_events().await
                }
                Step::Event(event) => self.on_event(event).await,
            };
            if let Some(exit) = exit {
                break exit;
            }
        };

        self.shutdown(exit).await;
    }

    /// Route events already queued at the provider, up to `EVENT_BURST`.
    /// Commands win the select, so this runs after every command.
    async fn drain_ready_events(&mut self) -> Option<Exit> {
        for _ in 0..EVENT_BURST {
            match self.provider.next_event(Duration::ZERO).await {
                Ok(None) => return None,
                event => {
                    if let Some(exit) = self.on_event(event).await {
                        return Some(exit);
                    }
                }
            }
        }
        None
    }

    async fn on_event(
        &mut self,
        event: Result<Option<ProviderEvent>, ProviderError>,
    ) -> Option<Exit> {
        match event {
            Ok(Some(event)) => {
                let exit = self.route(event);
                if exit.is_none() {
                    self.release_orphans().await;
                }
                exit
            }
            Ok(None) => None,
            Err(e) => {
                metrics::record_provider_error("next_event");
                Some(Exit::Lost(e.to_string()))
            }
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Submit {
                correlation_id,
                query,
            } => {
                // Caller already gave up.
                if !self.shared.correlator.is_pending(correlation_id) {
                    return;
                }
                if let Err(e) = self.ensure_service(query.service()).await {
                    self.shared
                        .correlator
                        .fail_with(correlation_id, provider_detail("open_service", &e));
                    return;
                }
                if let Err(e) = self.provider.send_request(correlation_id, &query).await {
                    metrics::record_provider_error("send_request");
                    tracing::warn!(
                        correlation_id = %correlation_id,
                        operation = %query.operation(),
                        error = %e,
                        "request submission failed"
                    );
                    self.shared
                        .correlator
                        .fail_with(correlation_id, provider_detail("send_request", &e));
                }
            }
            Command::Subscribe {
                correlation_id,
                spec,
            } => {
                if !self.shared.subscriptions.is_active(correlation_id) {
                    return;
                }
                let result = match self.ensure_service(MKTDATA_SERVICE).await {
                    Ok(()) => {
                        self.provider
                            .subscribe(correlation_id, spec.topic(), spec.fields())
                            .await
                    }
                    Err(e) => Err(e),
                };
                if let Err(e) = result {
                    metrics::record_provider_error("subscribe");
                    tracing::warn!(
                        correlation_id = %correlation_id,
                        topic = %spec.topic(),
                        error = %e,
                        "subscription failed"
                    );
                    self.shared.subscriptions.terminate(
                        correlation_id,
                        SubscriptionEvent::Failed(provider_detail("subscribe", &e)),
                    );
                }
            }
            Command::Unsubscribe { correlation_id } => {
                if let Err(e) = self.provider.unsubscribe(correlation_id).await {
                    metrics::record_provider_error("unsubscribe");
                    tracing::warn!(
                        correlation_id = %correlation_id,
                        error = %e,
                        "unsubscribe failed"
                    );
                }
            }
        }
    }

    async fn ensure_service(&mut self, service: &str) -> Result<(), ProviderError> {
        if self.opened_services.contains(service) {
            return Ok(());
        }
        if let Err(e) = self.provider.open_service(service).await {
            metrics::record_provider_error("open_service");
            tracing::warn!(service, error = %e, "unable to open service");
            return Err(match e {
                ProviderError::ServiceUnavailable(_) => e,
                other => ProviderError::ServiceUnavailable(format!("{service}: {other}")),
            });
        }
        tracing::info!(service, "service opened");
        self.opened_services.insert(service.to_string());
        Ok(())
    }

    /// Stop provider subscriptions whose listeners went away.
    async fn release_orphans(&mut self) {
        for correlation_id in std::mem::take(&mut self.orphaned) {
            if let Err(e) = self.provider.unsubscribe(correlation_id).await {
                metrics::record_provider_error("unsubscribe");
                tracing::warn!(
                    correlation_id = %correlation_id,
                    error = %e,
                    "unsubscribe failed"
                );
            }
        }
    }

    /// Route one event. Returns an exit when the event ends the session.
    fn route(&mut self, event: ProviderEvent) -> Option<Exit> {
        self.shared.stats.record_routed();
        let kind = event.kind;

        let Some(correlation_id) = event.correlation_id else {
            return match kind {
                EventKind::SessionStatus(status) if status.is_loss() => {
                    tracing::warn!(status = ?status, "provider reported session loss");
                    Some(Exit::Lost(format!("session status {status:?}")))
                }
                EventKind::SessionStatus(SessionStatus::Up) => {
                    tracing::debug!("provider reported session up");
                    None
                }
                EventKind::Error => {
                    let detail = event.error_detail();
                    tracing::warn!(detail = %detail, "session-level provider error");
                    None
                }
                _ => {
                    self.unmatched(kind, None);
                    None
                }
            };
        };

        let matched = match kind {
            EventKind::ResponseData => {
                self.shared.correlator.append(correlation_id, event.payload) == Routed::Matched
            }
            EventKind::ResponseComplete => {
                self.shared.correlator.complete(correlation_id, event.payload) == Routed::Matched
            }
            EventKind::SubscriptionData => {
                match self.shared.subscriptions.deliver(correlation_id, event.payload) {
                    Delivery::Delivered => true,
                    Delivery::Dropped => {
                        self.shared.stats.record_dropped();
                        true
                    }
                    Delivery::ListenerGone => {
                        self.orphaned.push(correlation_id);
                        true
                    }
                    Delivery::Unmatched => false,
                }
            }
            EventKind::Error => {
                let detail = event.error_detail();
                self.shared.correlator.fail_with(correlation_id, detail.clone()) == Routed::Matched
                    || self
                        .shared
                        .subscriptions
                        .terminate(correlation_id, SubscriptionEvent::Failed(detail))
            }
            EventKind::SessionStatus(status) => {
                tracing::debug!(
                    correlation_id = %correlation_id,
                    status = ?status,
                    "status event carried a correlation id"
                );
                if status.is_loss() {
                    return Some(Exit::Lost(format!("session status {status:?}")));
                }
                true
            }
        };

        if !matched {
            self.unmatched(kind, Some(correlation_id));
        }
        None
    }

    fn unmatched(&self, kind: EventKind, correlation_id: Option<CorrelationId>) {
        self.shared.stats.record_unmatched();
        metrics::record_unmatched_event(kind);
        match correlation_id {
            Some(correlation_id) => tracing::debug!(
                correlation_id = %correlation_id,
                kind = kind.as_str(),
                "dropping event with unknown correlation id"
            ),
            None => tracing::warn!(
                kind = kind.as_str(),
                "dropping event without correlation id"
            ),
        }
    }

    async fn shutdown(mut self, exit: Exit) {
        let (state, terminal) = match &exit {
            Exit::Lost(reason) => {
                tracing::error!(
                    session_id = %self.shared.info.id,
                    reason = %reason,
                    "session lost"
                );
                (SessionState::Failed, SubscriptionEvent::Interrupted)
            }
            Exit::Closed | Exit::HandlesDropped => {
                tracing::info!(session_id = %self.shared.info.id, exit = ?exit, "session closing");
                (SessionState::Disconnected, SubscriptionEvent::Closed)
            }
        };

        self.shared.set_state(state);
        self.commands.close();
        let failed = self.shared.correlator.shutdown();
        let terminated = self.shared.subscriptions.shutdown(|| terminal.clone());

        if let Err(e) = self.provider.close().await {
            metrics::record_provider_error("close");
            tracing::warn!(error = %e, "provider close failed");
        }

        tracing::info!(
            session_id = %self.shared.info.id,
            failed_requests = failed,
            terminated_subscriptions = terminated,
            state = %state,
            "session torn down"
        );
        self.shared.finished.send_replace(true);
    }
}

fn provider_detail(operation: &str, error: &ProviderError) -> ErrorDetail {
    let category = match error {
        ProviderError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
        ProviderError::NotConnected => "NOT_CONNECTED",
        _ => "PROVIDER_ERROR",
    };
    ErrorDetail::new(category, operation, error.to_string())
}

// =============================================================================
// Tests
// =============================================================================
