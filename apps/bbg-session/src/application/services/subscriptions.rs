//! Subscription Registry
//!
//! Owns every active subscription and its listener queue. Push updates are
//! offered to the listener with `try_send` so a slow listener can never stall
//! the dispatch loop; when its queue is full the update is dropped and
//! counted.
//!
//! Terminal notifications (`Interrupted`, `Closed`, `Failed`) remove the
//! entry before they are queued, so each listener sees at most one of them
//! and no data after it.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::domain::correlation::CorrelationId;
use crate::domain::errors::SessionError;
use crate::domain::event::Payload;
use crate::domain::subscription::{SubscriptionEvent, SubscriptionSpec};
use crate::infrastructure::metrics::{self, DeliveryResult};

// =============================================================================
// Types
// =============================================================================

#[derive(Debug)]
struct SubscriptionEntry {
    spec: SubscriptionSpec,
    created_at: DateTime<Utc>,
    delivered: u64,
    tx: mpsc::Sender<SubscriptionEvent>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    entries: HashMap<CorrelationId, SubscriptionEntry>,
    closed: bool,
}

/// Result of offering a push update to a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Queued for the listener.
    Delivered,
    /// Listener queue was full; the update was dropped.
    Dropped,
    /// The listener dropped its stream; the entry was removed.
    ListenerGone,
    /// No active subscription had that correlation id.
    Unmatched,
}

/// Snapshot of one active subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionInfo {
    /// Correlation id.
    pub correlation_id: CorrelationId,
    /// Topic.
    pub topic: String,
    /// Fields.
    pub fields: Vec<String>,
    /// Registration time.
    pub created_at: DateTime<Utc>,
    /// Updates delivered so far.
    pub delivered: u64,
}

// =============================================================================
// Registry
// =============================================================================

/// Active subscriptions keyed by correlation id.
#[derive(Debug)]
pub struct SubscriptionRegistry {
    inner: Mutex<RegistryInner>,
    buffer: usize,
    max_subscriptions: usize,
}

impl SubscriptionRegistry {
    /// Create a registry with per-listener queue `buffer` and a cap of
    /// `max_subscriptions` concurrent subscriptions.
    #[must_use]
    pub fn new(buffer: usize, max_subscriptions: usize) -> Self {
        Self {
            inner: Mutex::new(RegistryInner::default()),
            buffer: buffer.max(1),
            max_subscriptions,
        }
    }

    /// Register a subscription and return its listener queue.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::SessionClosed`] after teardown, or
    /// [`SessionError::SubscriptionLimit`] when the cap is reached.
    pub fn register(
        &self,
        correlation_id: CorrelationId,
        spec: SubscriptionSpec,
    ) -> Result<mpsc::Receiver<SubscriptionEvent>, SessionError> {
        let (tx, rx) = mpsc::channel(self.buffer);
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(SessionError::SessionClosed);
        }
        if inner.entries.len() >= self.max_subscriptions {
            return Err(SessionError::SubscriptionLimit {
                limit: self.max_subscriptions,
            });
        }
        inner.entries.insert(
            correlation_id,
            SubscriptionEntry {
                spec,
                created_at: Utc::now(),
                delivered: 0,
                tx,
            },
        );
        let count = inner.entries.len();
        drop(inner);
        metrics::set_active_subscriptions(count);
        Ok(rx)
    }

    /// Offer a push update to the matching listener.
    pub fn deliver(&self, correlation_id: CorrelationId, payload: Payload) -> Delivery {
        let mut inner = self.inner.lock();
        let Some(entry) = inner.entries.get_mut(&correlation_id) else {
            return Delivery::Unmatched;
        };
        match entry.tx.try_send(SubscriptionEvent::Data(payload)) {
            Ok(()) => {
                entry.delivered += 1;
                drop(inner);
                metrics::record_subscription_event(DeliveryResult::Delivered);
                Delivery::Delivered
            }
            Err(TrySendError::Full(_)) => {
                let topic = entry.spec.topic().to_string();
                drop(inner);
                metrics::record_subscription_event(DeliveryResult::Dropped);
                tracing::warn!(
                    correlation_id = %correlation_id,
                    topic = %topic,
                    "listener queue full, dropping update"
                );
                Delivery::Dropped
            }
            Err(TrySendError::Closed(_)) => {
                // Listener dropped its stream without unsubscribing.
                inner.entries.remove(&correlation_id);
                let count = inner.entries.len();
                drop(inner);
                metrics::set_active_subscriptions(count);
                tracing::debug!(correlation_id = %correlation_id, "listener gone");
                Delivery::ListenerGone
            }
        }
    }

    /// Remove a subscription without notifying its listener. The listener's
    /// stream ends once queued events are drained. Returns `false` when the
    /// id was not registered.
    pub fn remove(&self, correlation_id: CorrelationId) -> bool {
        let mut inner = self.inner.lock();
        let removed = inner.entries.remove(&correlation_id).is_some();
        let count = inner.entries.len();
        drop(inner);
        if removed {
            metrics::set_active_subscriptions(count);
        }
        removed
    }

    /// Remove a subscription and queue `event` as its final notification.
    pub fn terminate(&self, correlation_id: CorrelationId, event: SubscriptionEvent) -> bool {
        let mut inner = self.inner.lock();
        let entry = inner.entries.remove(&correlation_id);
        let count = inner.entries.len();
        drop(inner);
        match entry {
            Some(entry) => {
                metrics::set_active_subscriptions(count);
                Self::notify(correlation_id, entry, event);
                true
            }
            None => false,
        }
    }

    /// Terminate every subscription with the event built by `make_event`
    /// and refuse new registrations. Returns how many were terminated.
    pub fn shutdown(&self, make_event: impl Fn() -> SubscriptionEvent) -> usize {
        let drained: Vec<(CorrelationId, SubscriptionEntry)> = {
            let mut inner = self.inner.lock();
            inner.closed = true;
            inner.entries.drain().collect()
        };
        metrics::set_active_subscriptions(0);

        let count = drained.len();
        for (correlation_id, entry) in drained {
            Self::notify(correlation_id, entry, make_event());
        }
        count
    }

    fn notify(correlation_id: CorrelationId, entry: SubscriptionEntry, event: SubscriptionEvent) {
        metrics::record_subscription_event(DeliveryResult::Terminal);
        tracing::debug!(
            correlation_id = %correlation_id,
            topic = %entry.spec.topic(),
            event = ?event,
            "subscription terminated"
        );
        match entry.tx.try_send(event) {
            Ok(()) | Err(TrySendError::Closed(_)) => {}
            Err(TrySendError::Full(event)) => {
                // Queue is full of data; wait for room so the listener
                // still sees the terminal event after the backlog.
                let tx = entry.tx;
                tokio::spawn(async move {
                    let _ = tx.send(event).await;
                });
            }
        }
    }

    /// True when `correlation_id` is registered.
    #[must_use]
    pub fn is_active(&self, correlation_id: CorrelationId) -> bool {
        self.inner.lock().entries.contains_key(&correlation_id)
    }

    /// Number of registered subscriptions.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Snapshot of every registered subscription.
    #[must_use]
    pub fn snapshot(&self) -> Vec<SubscriptionInfo> {
        let inner = self.inner.lock();
        let mut infos: Vec<_> = inner
            .entries
            .iter()
            .map(|(correlation_id, entry)| SubscriptionInfo {
                correlation_id: *correlation_id,
                topic: entry.spec.topic().to_string(),
                fields: entry.spec.fields().to_vec(),
                created_at: entry.created_at,
                delivered: entry.delivered,
            })
            .collect();
        drop(inner);
        infos.sort_by_key(|info| info.correlation_id);
        infos
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn spec(topic: &str) -> SubscriptionSpec {
        SubscriptionSpec::new(topic, ["LAST_PRICE"]).unwrap()
    }

    fn cid(n: u64) -> CorrelationId {
        CorrelationId::new(n)
    }

    #[tokio::test]
    async fn delivers_in_order() {
        let registry = SubscriptionRegistry::new(8, 10);
        let mut rx = registry.register(cid(1), spec("A")).unwrap();

        for n in 0..3 {
            assert_eq!(
                registry.deliver(cid(1), Payload::single(json!({ "n": n }))),
                Delivery::Delivered
            );
        }

        for n in 0..3 {
            let Some(SubscriptionEvent::Data(payload)) = rx.recv().await else {
                panic!("expected data");
            };
            assert_eq!(payload.messages()[0]["n"], json!(n));
        }
        assert_eq!(registry.snapshot()[0].delivered, 3);
    }

    #[test]
    fn unknown_id_is_unmatched() {
        let registry = SubscriptionRegistry::new(8, 10);
        assert_eq!(registry.deliver(cid(5), Payload::empty()), Delivery::Unmatched);
    }

    #[test]
    fn full_queue_drops_update() {
        let registry = SubscriptionRegistry::new(1, 10);
        let _rx = registry.register(cid(1), spec("A")).unwrap();

        assert_eq!(registry.deliver(cid(1), Payload::empty()), Delivery::Delivered);
        assert_eq!(registry.deliver(cid(1), Payload::empty()), Delivery::Dropped);
    }

    #[test]
    fn limit_is_enforced() {
        let registry = SubscriptionRegistry::new(1, 2);
        let _a = registry.register(cid(1), spec("A")).unwrap();
        let _b = registry.register(cid(2), spec("B")).unwrap();
        assert_eq!(
            registry.register(cid(3), spec("C")).unwrap_err(),
            SessionError::SubscriptionLimit { limit: 2 }
        );

        assert!(registry.remove(cid(1)));
        assert!(registry.register(cid(3), spec("C")).is_ok());
    }

    #[tokio::test]
    async fn terminate_sends_one_event_and_stops_data() {
        let registry = SubscriptionRegistry::new(8, 10);
        let mut rx = registry.register(cid(1), spec("A")).unwrap();

        assert!(registry.terminate(cid(1), SubscriptionEvent::Interrupted));
        assert!(!registry.terminate(cid(1), SubscriptionEvent::Interrupted));
        assert_eq!(registry.deliver(cid(1), Payload::empty()), Delivery::Unmatched);

        assert_eq!(rx.recv().await, Some(SubscriptionEvent::Interrupted));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn terminal_event_waits_behind_full_queue() {
        let registry = SubscriptionRegistry::new(1, 10);
        let mut rx = registry.register(cid(1), spec("A")).unwrap();
        registry.deliver(cid(1), Payload::single(json!({ "n": 1 })));

        registry.terminate(cid(1), SubscriptionEvent::Closed);

        assert!(matches!(rx.recv().await, Some(SubscriptionEvent::Data(_))));
        assert_eq!(rx.recv().await, Some(SubscriptionEvent::Closed));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn shutdown_notifies_all_and_refuses_new() {
        let registry = SubscriptionRegistry::new(8, 10);
        let mut a = registry.register(cid(1), spec("A")).unwrap();
        let mut b = registry.register(cid(2), spec("B")).unwrap();

        assert_eq!(registry.shutdown(|| SubscriptionEvent::Interrupted), 2);
        assert_eq!(a.recv().await, Some(SubscriptionEvent::Interrupted));
        assert_eq!(b.recv().await, Some(SubscriptionEvent::Interrupted));
        assert_eq!(
            registry.register(cid(3), spec("C")).unwrap_err(),
            SessionError::SessionClosed
        );
        assert_eq!(registry.active_count(), 0);
    }

    #[test]
    fn remove_is_idempotent() {
        let registry = SubscriptionRegistry::new(8, 10);
        let _rx = registry.register(cid(1), spec("A")).unwrap();
        assert!(registry.remove(cid(1)));
        assert!(!registry.remove(cid(1)));
    }

    #[test]
    fn dropped_listener_is_removed() {
        let registry = SubscriptionRegistry::new(8, 10);
        drop(registry.register(cid(1), spec("A")).unwrap());
        assert_eq!(registry.deliver(cid(1), Payload::empty()), Delivery::ListenerGone);
        assert!(!registry.is_active(cid(1)));
        assert_eq!(registry.active_count(), 0);
    }
}
