//! Request Correlator
//!
//! Tracks in-flight requests by correlation id. Callers register a pending
//! entry and receive a oneshot receiver; the dispatch loop appends partial
//! payloads and resolves the entry when the final response, an error or
//! session teardown arrives. A caller that times out removes its own entry,
//! so a late response finds nothing and is dropped.
//!
//! The map is shared between calling tasks and the dispatch loop and is
//! guarded by a single mutex. No lock is held across an await point.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::domain::correlation::CorrelationId;
use crate::domain::errors::SessionError;
use crate::domain::event::{ErrorDetail, Payload};
use crate::domain::request::{RequestState, Response};
use crate::infrastructure::metrics::{self, RequestOutcome};

/// Result delivered to a waiting caller.
pub type RequestOutcomeResult = Result<Response, SessionError>;

#[derive(Debug)]
struct PendingRequest {
    payload: Payload,
    partials: usize,
    issued_at: DateTime<Utc>,
    started: Instant,
    state: RequestState,
    waiter: oneshot::Sender<RequestOutcomeResult>,
}

#[derive(Debug, Default)]
struct CorrelatorInner {
    pending: HashMap<CorrelationId, PendingRequest>,
    closed: bool,
}

/// What happened to an event routed to the correlator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    /// A pending request consumed the event.
    Matched,
    /// No pending request had that correlation id.
    Unmatched,
}

/// Correlation-id to waiter map for one-shot requests.
#[derive(Debug, Default)]
pub struct RequestCorrelator {
    inner: Mutex<CorrelatorInner>,
}

impl RequestCorrelator {
    /// Create an empty correlator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending request.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::SessionClosed`] once the correlator has been
    /// shut down.
    pub fn register(
        &self,
        correlation_id: CorrelationId,
    ) -> Result<oneshot::Receiver<RequestOutcomeResult>, SessionError> {
        let (waiter, rx) = oneshot::channel();
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(SessionError::SessionClosed);
        }
        inner.pending.insert(
            correlation_id,
            PendingRequest {
                payload: Payload::empty(),
                partials: 0,
                issued_at: Utc::now(),
                started: Instant::now(),
                state: RequestState::Pending,
                waiter,
            },
        );
        let count = inner.pending.len();
        drop(inner);
        metrics::set_pending_requests(count);
        Ok(rx)
    }

    /// Append a partial response. A payload carrying a `responseError`
    /// fails the request immediately.
    pub fn append(&self, correlation_id: CorrelationId, payload: Payload) -> Routed {
        if let Some(detail) = payload.response_error() {
            return self.fail_with(correlation_id, detail);
        }
        let mut inner = self.inner.lock();
        match inner.pending.get_mut(&correlation_id) {
            Some(entry) => {
                entry.payload.extend(payload);
                entry.partials += 1;
                Routed::Matched
            }
            None => Routed::Unmatched,
        }
    }

    /// Append the final payload and resolve the request.
    pub fn complete(&self, correlation_id: CorrelationId, payload: Payload) -> Routed {
        if let Some(detail) = payload.response_error() {
            return self.fail_with(correlation_id, detail);
        }
        let Some(mut entry) = self.take(correlation_id) else {
            return Routed::Unmatched;
        };
        entry.payload.extend(payload);
        entry.partials += 1;
        entry.state.advance(RequestState::Completed);

        let response = Response {
            correlation_id,
            payload: entry.payload,
            partials: entry.partials,
            issued_at: entry.issued_at,
            completed_at: Utc::now(),
        };
        metrics::record_request_resolved(RequestOutcome::Completed, entry.started.elapsed());
        tracing::debug!(
            correlation_id = %correlation_id,
            partials = response.partials,
            state = %entry.state,
            "request completed"
        );
        // Receiver gone means the caller stopped waiting.
        let _ = entry.waiter.send(Ok(response));
        Routed::Matched
    }

    /// Fail the request with provider error detail.
    pub fn fail_with(&self, correlation_id: CorrelationId, detail: ErrorDetail) -> Routed {
        self.fail(
            correlation_id,
            SessionError::RequestFailed {
                correlation_id,
                detail,
            },
        )
    }

    /// Fail the request with `error`.
    pub fn fail(&self, correlation_id: CorrelationId, error: SessionError) -> Routed {
        let Some(mut entry) = self.take(correlation_id) else {
            return Routed::Unmatched;
        };
        entry.state.advance(RequestState::Failed);
        let outcome = if matches!(error, SessionError::SessionClosed) {
            RequestOutcome::Closed
        } else {
            RequestOutcome::Failed
        };
        metrics::record_request_resolved(outcome, entry.started.elapsed());
        tracing::debug!(correlation_id = %correlation_id, error = %error, "request failed");
        let _ = entry.waiter.send(Err(error));
        Routed::Matched
    }

    /// Remove a request whose caller gave up. Returns `false` when the
    /// request was already resolved.
    pub fn abandon(&self, correlation_id: CorrelationId) -> bool {
        let Some(mut entry) = self.take(correlation_id) else {
            return false;
        };
        entry.state.advance(RequestState::TimedOut);
        metrics::record_request_resolved(RequestOutcome::TimedOut, entry.started.elapsed());
        tracing::debug!(correlation_id = %correlation_id, "request abandoned by caller");
        true
    }

    /// Fail every pending request with `SessionClosed` and refuse new ones.
    /// Returns how many requests were failed.
    pub fn shutdown(&self) -> usize {
        let drained: Vec<(CorrelationId, PendingRequest)> = {
            let mut inner = self.inner.lock();
            inner.closed = true;
            inner.pending.drain().collect()
        };
        metrics::set_pending_requests(0);

        let count = drained.len();
        for (correlation_id, mut entry) in drained {
            entry.state.advance(RequestState::Failed);
            metrics::record_request_resolved(RequestOutcome::Closed, entry.started.elapsed());
            tracing::debug!(correlation_id = %correlation_id, "request failed by session teardown");
            let _ = entry.waiter.send(Err(SessionError::SessionClosed));
        }
        count
    }

    /// True while `correlation_id` is awaiting a response.
    #[must_use]
    pub fn is_pending(&self, correlation_id: CorrelationId) -> bool {
        self.inner.lock().pending.contains_key(&correlation_id)
    }

    /// Number of requests awaiting a response.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// True once [`Self::shutdown`] has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    fn take(&self, correlation_id: CorrelationId) -> Option<PendingRequest> {
        let mut inner = self.inner.lock();
        let entry = inner.pending.remove(&correlation_id);
        let count = inner.pending.len();
        drop(inner);
        if entry.is_some() {
            metrics::set_pending_requests(count);
        }
        entry
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use test_case::test_case;

    use super::*;

    fn cid(n: u64) -> CorrelationId {
        CorrelationId::new(n)
    }

    #[tokio::test]
    async fn partials_then_complete_concatenate_in_order() {
        let correlator = RequestCorrelator::new();
        let rx = correlator.register(cid(1)).unwrap();

        for n in 1..=3 {
            assert_eq!(
                correlator.append(cid(1), Payload::single(json!({ "part": n }))),
                Routed::Matched
            );
        }
        assert_eq!(
            correlator.complete(cid(1), Payload::single(json!({ "part": 4 }))),
            Routed::Matched
        );

        let response = rx.await.unwrap().unwrap();
        let parts: Vec<_> = response
            .payload
            .messages()
            .iter()
            .map(|m| m["part"].as_i64().unwrap())
            .collect();
        assert_eq!(parts, vec![1, 2, 3, 4]);
        assert_eq!(response.partials, 4);
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn response_error_fails_request() {
        let correlator = RequestCorrelator::new();
        let rx = correlator.register(cid(2)).unwrap();

        correlator.complete(
            cid(2),
            Payload::single(json!({ "responseError": {
                "category": "BAD_ARGS", "subcategory": "", "message": "bad field"
            }})),
        );

        let err = rx.await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            SessionError::RequestFailed { correlation_id, ref detail }
                if correlation_id == cid(2) && detail.category == "BAD_ARGS"
        ));
    }

    #[test_case(json!("service down"), "service down" ; "string")]
    #[test_case(json!(null), "null" ; "null")]
    #[test_case(json!(["a", 1]), r#"["a",1]"# ; "array")]
    fn response_error_of_any_shape_fails_request(element: serde_json::Value, message: &str) {
        let correlator = RequestCorrelator::new();
        let mut rx = correlator.register(cid(9)).unwrap();
        let payload = Payload::single(json!({ "responseError": element }));

        assert_eq!(correlator.complete(cid(9), payload), Routed::Matched);

        match rx.try_recv().unwrap() {
            Err(SessionError::RequestFailed { detail, .. }) => assert_eq!(detail.message, message),
            other => panic!("expected RequestFailed, got {other:?}"),
        }
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn response_error_in_partial_fails_request() {
        let correlator = RequestCorrelator::new();
        let rx = correlator.register(cid(3)).unwrap();
        correlator.append(
            cid(3),
            Payload::single(json!({ "responseError": { "message": "nope" } })),
        );
        assert!(rx.await.unwrap().is_err());
        assert!(!correlator.is_pending(cid(3)));
    }

    #[test]
    fn unknown_ids_are_unmatched() {
        let correlator = RequestCorrelator::new();
        assert_eq!(correlator.append(cid(9), Payload::empty()), Routed::Unmatched);
        assert_eq!(correlator.complete(cid(9), Payload::empty()), Routed::Unmatched);
        assert_eq!(
            correlator.fail(cid(9), SessionError::SessionClosed),
            Routed::Unmatched
        );
    }

    #[test]
    fn late_response_after_abandon_is_dropped() {
        let correlator = RequestCorrelator::new();
        let _rx = correlator.register(cid(4)).unwrap();

        assert!(correlator.abandon(cid(4)));
        assert!(!correlator.abandon(cid(4)));
        assert_eq!(
            correlator.complete(cid(4), Payload::single(json!({}))),
            Routed::Unmatched
        );
    }

    #[tokio::test]
    async fn shutdown_fails_pending_and_refuses_new() {
        let correlator = RequestCorrelator::new();
        let rx_a = correlator.register(cid(1)).unwrap();
        let rx_b = correlator.register(cid(2)).unwrap();

        assert_eq!(correlator.shutdown(), 2);
        assert_eq!(rx_a.await.unwrap(), Err(SessionError::SessionClosed));
        assert_eq!(rx_b.await.unwrap(), Err(SessionError::SessionClosed));
        assert!(correlator.is_closed());
        assert_eq!(
            correlator.register(cid(3)).unwrap_err(),
            SessionError::SessionClosed
        );
    }

    #[test]
    fn complete_after_caller_dropped_receiver() {
        let correlator = RequestCorrelator::new();
        drop(correlator.register(cid(5)).unwrap());
        assert_eq!(correlator.complete(cid(5), Payload::empty()), Routed::Matched);
    }
}
