//! Subscription Lifecycle Integration Tests
//!
//! Subscribes through a session backed by the simulated provider and checks
//! update delivery, unsubscription, limits and terminal events on session
//! loss and close.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;
use tokio::time::timeout;
use tokio_stream::StreamExt;

use bbg_session::{
    CorrelationId, ErrorDetail, MKTDATA_SERVICE, Session, SessionConfig, SessionError,
    SessionManager, SessionState, SimulatedController, SubscriptionEvent, simulated,
};

const WAIT: Duration = Duration::from_secs(2);

fn test_config() -> SessionConfig {
    let mut config = SessionConfig::default();
    config.session.poll_interval = Duration::from_millis(10);
    config
}

async fn open_session(config: &SessionConfig) -> (SessionManager, Session, SimulatedController) {
    let manager = SessionManager::new();
    let (provider, controller) = simulated();
    let session = manager.open(config, provider).await.unwrap();
    (manager, session, controller)
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn price(event: &SubscriptionEvent) -> f64 {
    match event {
        SubscriptionEvent::Data(payload) => payload.messages()[0]["LAST_PRICE"].as_f64().unwrap(),
        other => panic!("expected data, got {other:?}"),
    }
}

#[tokio::test]
async fn updates_arrive_in_order() {
    let (_manager, session, mut controller) = open_session(&test_config()).await;

    let mut subscription = session
        .subscribe("IBM US Equity", ["LAST_PRICE", "BID"])
        .await
        .unwrap();
    let started = controller.next_subscription().await.unwrap();
    assert_eq!(started.correlation_id, subscription.handle().correlation_id());
    assert_eq!(started.topic, "IBM US Equity");
    assert_eq!(started.fields, ["LAST_PRICE", "BID"]);
    assert_eq!(controller.opened_services(), vec![MKTDATA_SERVICE]);

    for px in [187.1, 187.2, 187.3] {
        controller.publish(started.correlation_id, json!({ "LAST_PRICE": px }));
    }

    let mut seen = Vec::new();
    for _ in 0..3 {
        let event = timeout(WAIT, subscription.next_event()).await.unwrap().unwrap();
        seen.push(price(&event));
    }
    assert_eq!(seen, [187.1, 187.2, 187.3]);

    let listed = session.subscriptions();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].correlation_id, started.correlation_id);
}

#[tokio::test]
async fn invalid_subscription_is_rejected() {
    let (_manager, session, _controller) = open_session(&test_config()).await;

    assert!(matches!(
        session.subscribe("  ", ["LAST_PRICE"]).await,
        Err(SessionError::InvalidQuery(_))
    ));
    assert!(matches!(
        session.subscribe("IBM US Equity", Vec::<String>::new()).await,
        Err(SessionError::InvalidQuery(_))
    ));
    assert!(session.subscriptions().is_empty());
}

#[tokio::test]
async fn unsubscribe_is_idempotent_and_ends_stream() {
    let (_manager, session, mut controller) = open_session(&test_config()).await;

    let mut subscription = session.subscribe("VOD LN Equity", ["BID"]).await.unwrap();
    let started = controller.next_subscription().await.unwrap();
    let handle = subscription.handle().clone();

    assert!(session.unsubscribe(&handle).await);
    assert!(!session.unsubscribe(&handle).await);

    assert_eq!(timeout(WAIT, subscription.next_event()).await.unwrap(), None);
    eventually(|| controller.unsubscribed() == vec![started.correlation_id]).await;

    // Updates already in flight for the old id are discarded.
    controller.publish(started.correlation_id, json!({ "BID": 1.0 }));
    eventually(|| session.health().events_unmatched == 1).await;
    assert!(session.subscriptions().is_empty());
}

#[tokio::test]
async fn session_loss_interrupts_once() {
    let (manager, session, mut controller) = open_session(&test_config()).await;

    let mut subscription = session.subscribe("IBM US Equity", ["LAST_PRICE"]).await.unwrap();
    let started = controller.next_subscription().await.unwrap();
    let correlation_id = started.correlation_id;

    let pending = tokio::spawn({
        let session = session.clone();
        async move {
            session
                .send(
                    bbg_session::ReferenceDataRequest::new(["IBM US Equity"], ["PX_LAST"])
                        .build()
                        .unwrap(),
                    WAIT,
                )
                .await
        }
    });
    controller.next_request().await.unwrap();

    controller.lose_session();

    let event = timeout(WAIT, subscription.next_event()).await.unwrap();
    assert_eq!(event, Some(SubscriptionEvent::Interrupted));
    assert_eq!(
        event.unwrap().to_error(correlation_id),
        Some(SessionError::SubscriptionInterrupted { correlation_id })
    );
    assert_eq!(timeout(WAIT, subscription.next_event()).await.unwrap(), None);

    assert_eq!(pending.await.unwrap(), Err(SessionError::SessionClosed));
    eventually(|| session.state() == SessionState::Failed).await;
    assert!(controller.is_closed());
    assert!(!manager.is_connected());
}

#[tokio::test]
async fn close_delivers_closed() {
    let (manager, session, mut controller) = open_session(&test_config()).await;

    let mut subscription = session.subscribe("IBM US Equity", ["LAST_PRICE"]).await.unwrap();
    controller.next_subscription().await.unwrap();

    manager.close().await;

    assert_eq!(
        timeout(WAIT, subscription.next_event()).await.unwrap(),
        Some(SubscriptionEvent::Closed)
    );
    assert_eq!(timeout(WAIT, subscription.next_event()).await.unwrap(), None);
    assert_eq!(session.state(), SessionState::Disconnected);
    assert!(matches!(
        session.subscribe("IBM US Equity", ["LAST_PRICE"]).await,
        Err(SessionError::SessionClosed)
    ));
}

#[tokio::test]
async fn provider_error_fails_subscription() {
    let (_manager, session, mut controller) = open_session(&test_config()).await;

    let mut subscription = session.subscribe("BAD Equity", ["LAST_PRICE"]).await.unwrap();
    let started = controller.next_subscription().await.unwrap();
    let detail = ErrorDetail::new("BAD_SEC", "UNKNOWN", "unknown security");
    controller.reject(started.correlation_id, &detail);

    assert_eq!(
        timeout(WAIT, subscription.next_event()).await.unwrap(),
        Some(SubscriptionEvent::Failed(detail))
    );
    assert_eq!(timeout(WAIT, subscription.next_event()).await.unwrap(), None);
    assert!(session.is_connected());
    eventually(|| session.subscriptions().is_empty()).await;
}

#[tokio::test]
async fn limit_is_enforced() {
    let mut config = test_config();
    config.subscriptions.max_subscriptions = 2;
    let (_manager, session, _controller) = open_session(&config).await;

    let first = session.subscribe("A Equity", ["BID"]).await.unwrap();
    let _second = session.subscribe("B Equity", ["BID"]).await.unwrap();
    assert_eq!(
        session.subscribe("C Equity", ["BID"]).await.unwrap_err(),
        SessionError::SubscriptionLimit { limit: 2 }
    );

    session.unsubscribe(first.handle()).await;
    assert!(session.subscribe("C Equity", ["BID"]).await.is_ok());
}

#[tokio::test]
async fn callback_sees_updates_then_terminal() {
    let (manager, session, mut controller) = open_session(&test_config()).await;

    let seen = Arc::new(Mutex::new(Vec::new()));
    let handle = session
        .subscribe_with("IBM US Equity", ["LAST_PRICE"], {
            let seen = Arc::clone(&seen);
            move |event| seen.lock().push(event)
        })
        .await
        .unwrap();
    let started = controller.next_subscription().await.unwrap();
    assert_eq!(started.correlation_id, handle.correlation_id());

    controller.publish(started.correlation_id, json!({ "LAST_PRICE": 1.5 }));
    eventually(|| seen.lock().len() == 1).await;

    manager.close().await;
    eventually(|| seen.lock().len() == 2).await;

    let events = seen.lock().clone();
    assert!((price(&events[0]) - 1.5).abs() < f64::EPSILON);
    assert_eq!(events[1], SubscriptionEvent::Closed);
}

#[tokio::test]
async fn dropped_listener_is_unsubscribed() {
    let (_manager, session, mut controller) = open_session(&test_config()).await;

    let subscription = session.subscribe("IBM US Equity", ["LAST_PRICE"]).await.unwrap();
    let started = controller.next_subscription().await.unwrap();
    drop(subscription);

    controller.publish(started.correlation_id, json!({ "LAST_PRICE": 2.0 }));

    eventually(|| controller.unsubscribed() == vec![started.correlation_id]).await;
    assert!(session.subscriptions().is_empty());
    assert!(session.is_connected());
}

#[tokio::test]
async fn stream_adapter_yields_updates() {
    let (_manager, session, mut controller) = open_session(&test_config()).await;

    let subscription = session.subscribe("IBM US Equity", ["LAST_PRICE"]).await.unwrap();
    let started = controller.next_subscription().await.unwrap();
    let (handle, mut stream) = subscription.into_stream();
    assert_eq!(handle.correlation_id(), started.correlation_id);

    controller.publish(started.correlation_id, json!({ "LAST_PRICE": 3.0 }));
    let event = timeout(WAIT, stream.next()).await.unwrap().unwrap();
    assert!((price(&event) - 3.0).abs() < f64::EPSILON);

    session.unsubscribe(&handle).await;
    assert_eq!(timeout(WAIT, stream.next()).await.unwrap(), None);
}

#[tokio::test]
async fn correlation_ids_are_distinct_across_requests_and_subscriptions() {
    let (_manager, session, mut controller) = open_session(&test_config()).await;

    let a = session.subscribe("A Equity", ["BID"]).await.unwrap();
    let b = session.subscribe("B Equity", ["BID"]).await.unwrap();
    controller.next_subscription().await.unwrap();
    controller.next_subscription().await.unwrap();

    let ids: Vec<CorrelationId> = vec![a.handle().correlation_id(), b.handle().correlation_id()];
    assert_ne!(ids[0], ids[1]);
    assert_eq!(session.health().correlation_ids_issued, 2);
}
