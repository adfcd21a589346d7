//! Request Correlation Integration Tests
//!
//! Drives requests through a session backed by the simulated provider and
//! checks how partial, final, late and failed responses reach the caller.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde_json::json;
use tokio::sync::oneshot;
use tokio::time::timeout;

use bbg_session::domain::query::FieldType;
use bbg_session::{
    ErrorDetail, FieldListRequest, Query, REFDATA_SERVICE, ReferenceDataRequest, RequestState,
    Session, SessionConfig, SessionError, SessionManager, SimulatedController, simulated,
};

fn test_config() -> SessionConfig {
    let mut config = SessionConfig::default();
    config.session.poll_interval = Duration::from_millis(10);
    config.session.request_timeout = Duration::from_secs(2);
    config
}

async fn open_session() -> (SessionManager, Session, SimulatedController) {
    let manager = SessionManager::new();
    let (provider, controller) = simulated();
    let session = manager.open(&test_config(), provider).await.unwrap();
    (manager, session, controller)
}

fn reference_query() -> Query {
    ReferenceDataRequest::new(["IBM US Equity"], ["PX_LAST"])
        .build()
        .unwrap()
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn partials_are_concatenated_in_arrival_order() {
    let (_manager, session, mut controller) = open_session().await;

    let pending = tokio::spawn({
        let session = session.clone();
        async move { session.send(reference_query(), Duration::from_secs(2)).await }
    });

    let submitted = controller.next_request().await.unwrap();
    assert_eq!(submitted.query.service(), REFDATA_SERVICE);
    assert_eq!(submitted.query.operation(), "ReferenceDataRequest");

    for n in 0..3 {
        controller.respond_partial(submitted.correlation_id, json!({ "n": n }));
    }
    controller.respond(submitted.correlation_id, json!({ "n": 3 }));

    let response = pending.await.unwrap().unwrap();
    let order: Vec<i64> = response
        .payload
        .messages()
        .iter()
        .map(|m| m["n"].as_i64().unwrap())
        .collect();
    assert_eq!(order, [0, 1, 2, 3]);
    assert_eq!(response.partials, 4);
    assert_eq!(response.correlation_id, submitted.correlation_id);
    assert_eq!(controller.opened_services(), vec![REFDATA_SERVICE]);
    assert_eq!(session.pending_requests(), 0);
}

#[tokio::test]
async fn service_is_opened_once() {
    let (_manager, session, mut controller) = open_session().await;

    for _ in 0..2 {
        let ticket = session
            .send_async(reference_query(), Duration::from_secs(2))
            .await
            .unwrap();
        let submitted = controller.next_request().await.unwrap();
        controller.respond(submitted.correlation_id, json!({}));
        ticket.wait().await.unwrap();
    }

    assert_eq!(controller.opened_services(), vec![REFDATA_SERVICE]);
}

#[tokio::test]
async fn zero_timeout_times_out() {
    let (_manager, session, _controller) = open_session().await;

    let result = session.send(reference_query(), Duration::ZERO).await;
    assert!(matches!(
        result,
        Err(SessionError::RequestTimeout { timeout, .. }) if timeout == Duration::ZERO
    ));
    eventually(|| session.pending_requests() == 0).await;
}

#[tokio::test]
async fn late_response_is_discarded() {
    let (_manager, session, mut controller) = open_session().await;

    let result = session
        .send(reference_query(), Duration::from_millis(30))
        .await;
    assert!(matches!(result, Err(SessionError::RequestTimeout { .. })));

    let submitted = controller.next_request().await.unwrap();
    controller.respond(submitted.correlation_id, json!({ "late": true }));

    eventually(|| session.health().events_unmatched == 1).await;
    assert_eq!(session.pending_requests(), 0);
    assert!(session.is_connected());
}

#[tokio::test]
async fn ticket_reports_progress() {
    let (_manager, session, mut controller) = open_session().await;

    let mut ticket = session
        .send_async(reference_query(), Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(ticket.state(), RequestState::Pending);
    assert!(!ticket.is_ready());

    let submitted = controller.next_request().await.unwrap();
    assert_eq!(submitted.correlation_id, ticket.correlation_id());
    controller.respond(submitted.correlation_id, json!({ "ok": true }));

    timeout(Duration::from_secs(2), async {
        while !ticket.is_ready() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(ticket.state(), RequestState::Completed);
    let response = ticket.try_take().unwrap().unwrap();
    assert_eq!(response.payload.messages()[0]["ok"], true);
}

#[tokio::test]
async fn service_open_failure_fails_request() {
    let (_manager, session, controller) = open_session().await;
    controller.fail_service(REFDATA_SERVICE);

    let result = session.send(reference_query(), Duration::from_secs(2)).await;
    match result {
        Err(SessionError::RequestFailed { detail, .. }) => {
            assert_eq!(detail.category, "SERVICE_UNAVAILABLE");
            assert!(detail.message.contains(REFDATA_SERVICE));
        }
        other => panic!("expected RequestFailed, got {other:?}"),
    }
    assert!(session.is_connected());
}

#[tokio::test]
async fn response_error_fails_request() {
    let (_manager, session, mut controller) = open_session().await;

    let pending = tokio::spawn({
        let session = session.clone();
        async move { session.send(reference_query(), Duration::from_secs(2)).await }
    });
    let submitted = controller.next_request().await.unwrap();
    controller.respond(
        submitted.correlation_id,
        json!({
            "responseError": {
                "category": "BAD_ARGS",
                "subcategory": "INVALID_SECURITY",
                "message": "Unknown security"
            }
        }),
    );

    match pending.await.unwrap() {
        Err(SessionError::RequestFailed {
            correlation_id,
            detail,
        }) => {
            assert_eq!(correlation_id, submitted.correlation_id);
            assert_eq!(detail.category, "BAD_ARGS");
        }
        other => panic!("expected RequestFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn bare_response_error_fails_request() {
    let (_manager, session, mut controller) = open_session().await;

    let pending = tokio::spawn({
        let session = session.clone();
        async move { session.send(reference_query(), Duration::from_secs(2)).await }
    });
    let submitted = controller.next_request().await.unwrap();
    controller.respond(
        submitted.correlation_id,
        json!({ "responseError": "service down" }),
    );

    match pending.await.unwrap() {
        Err(SessionError::RequestFailed { detail, .. }) => {
            assert_eq!(detail.message, "service down");
        }
        other => panic!("expected RequestFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn scoped_error_event_fails_request() {
    let (_manager, session, mut controller) = open_session().await;

    let pending = tokio::spawn({
        let session = session.clone();
        async move { session.request(FieldListRequest::new(FieldType::All).build()).await }
    });
    let submitted = controller.next_request().await.unwrap();
    controller.reject(
        submitted.correlation_id,
        &ErrorDetail::new("LIMIT", "DAILY_CAP", "daily limit reached"),
    );

    assert!(matches!(
        pending.await.unwrap(),
        Err(SessionError::RequestFailed { detail, .. }) if detail.subcategory == "DAILY_CAP"
    ));
}

#[tokio::test]
async fn concurrent_requests_resolve_independently() {
    let (_manager, session, mut controller) = open_session().await;

    let first = session
        .send_async(reference_query(), Duration::from_secs(2))
        .await
        .unwrap();
    let second = session
        .send_async(reference_query(), Duration::from_secs(2))
        .await
        .unwrap();
    assert_ne!(first.correlation_id(), second.correlation_id());

    let a = controller.next_request().await.unwrap();
    let b = controller.next_request().await.unwrap();
    controller.respond(b.correlation_id, json!({ "who": "second" }));
    controller.respond(a.correlation_id, json!({ "who": "first" }));

    let second = second.wait().await.unwrap();
    let first = first.wait().await.unwrap();
    assert_eq!(first.payload.messages()[0]["who"], "first");
    assert_eq!(second.payload.messages()[0]["who"], "second");
}

#[tokio::test]
async fn invalid_query_is_rejected_before_sending() {
    let (_manager, session, mut controller) = open_session().await;

    let invalid = ReferenceDataRequest::new(Vec::<String>::new(), ["PX_LAST"]).build();
    assert!(invalid.is_err());
    let err = SessionError::from(invalid.unwrap_err());
    assert!(matches!(err, SessionError::InvalidQuery(_)));

    session.close().await;
    assert!(
        timeout(Duration::from_millis(50), controller.next_request())
            .await
            .map_or(true, |r| r.is_none())
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn queued_response_is_routed_while_commands_keep_arriving() {
    let (_manager, session, mut controller) = open_session().await;

    let target = session
        .send_async(reference_query(), Duration::from_secs(3))
        .await
        .unwrap();
    let submitted = controller.next_request().await.unwrap();
    assert_eq!(submitted.correlation_id, target.correlation_id());

    let stop = Arc::new(AtomicBool::new(false));
    let senders: Vec<_> = (0..3)
        .map(|_| {
            let session = session.clone();
            let stop = Arc::clone(&stop);
            tokio::spawn(async move {
                while !stop.load(Ordering::Relaxed) {
                    let _ = session
                        .send_async(reference_query(), Duration::from_secs(10))
                        .await;
                }
            })
        })
        .collect();

    controller.respond(submitted.correlation_id, json!({ "ok": true }));
    let outcome = timeout(Duration::from_millis(500), target.wait()).await;

    stop.store(true, Ordering::Relaxed);
    for sender in senders {
        sender.await.unwrap();
    }
    let response = outcome.expect("response starved by commands").unwrap();
    assert_eq!(response.payload.messages()[0]["ok"], true);
}

#[tokio::test]
async fn send_with_hands_response_to_callback() {
    let (_manager, session, mut controller) = open_session().await;

    let (tx, rx) = oneshot::channel();
    let correlation_id = session
        .send_with(reference_query(), Duration::from_secs(2), move |outcome| {
            let _ = tx.send(outcome);
        })
        .await
        .unwrap();

    let submitted = controller.next_request().await.unwrap();
    assert_eq!(submitted.correlation_id, correlation_id);
    controller.respond(correlation_id, json!({ "ok": true }));

    let response = timeout(Duration::from_secs(2), rx)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(response.correlation_id, correlation_id);
    assert_eq!(response.payload.messages()[0]["ok"], true);
}

#[tokio::test]
async fn send_with_hands_timeout_to_callback() {
    let (_manager, session, _controller) = open_session().await;

    let (tx, rx) = oneshot::channel();
    let correlation_id = session
        .send_with(reference_query(), Duration::from_millis(30), move |outcome| {
            let _ = tx.send(outcome);
        })
        .await
        .unwrap();

    let outcome = timeout(Duration::from_secs(2), rx).await.unwrap().unwrap();
    assert_eq!(
        outcome.unwrap_err(),
        SessionError::RequestTimeout {
            correlation_id,
            timeout: Duration::from_millis(30),
        }
    );
    eventually(|| session.pending_requests() == 0).await;
}
