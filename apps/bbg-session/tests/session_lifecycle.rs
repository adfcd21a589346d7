//! Session Lifecycle Integration Tests
//!
//! Opens, fails, closes and reopens sessions through a `SessionManager`
//! backed by the simulated provider.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;

use bbg_session::infrastructure::simulated::ConnectBehavior;
use bbg_session::{
    HealthStatus, ReferenceDataRequest, RetryConfig, SessionConfig, SessionError, SessionManager,
    SessionState, simulated,
};

const WAIT: Duration = Duration::from_secs(2);

fn test_config() -> SessionConfig {
    let mut config = SessionConfig::default();
    config.session.poll_interval = Duration::from_millis(10);
    config.session.connect_timeout = Duration::from_millis(200);
    config
}

#[tokio::test]
async fn open_reports_connected_session() {
    let manager = SessionManager::new();
    assert_eq!(manager.state(), SessionState::Disconnected);

    let (provider, controller) = simulated();
    let session = manager.open(&test_config(), provider).await.unwrap();

    assert!(session.is_connected());
    assert!(manager.is_connected());
    assert!(session.info().handle.as_str().starts_with("simulated-"));
    assert_eq!(controller.connects(), 1);
    assert_eq!(
        manager.current().unwrap().info().id,
        session.info().id
    );
}

#[tokio::test]
async fn second_open_is_rejected() {
    let manager = SessionManager::new();
    let (first, _first_controller) = simulated();
    let session = manager.open(&test_config(), first).await.unwrap();

    let (second, second_controller) = simulated();
    assert_eq!(
        manager.open(&test_config(), second).await.unwrap_err(),
        SessionError::AlreadyOpen
    );
    assert_eq!(second_controller.connects(), 0);
    assert!(session.is_connected());
}

#[tokio::test]
async fn open_while_connecting_is_rejected() {
    let manager = Arc::new(SessionManager::new());
    let (slow, slow_controller) = simulated();
    slow_controller.set_connect_behavior(ConnectBehavior::Hang);

    let mut config = test_config();
    config.session.connect_timeout = Duration::from_millis(300);
    let opening = tokio::spawn({
        let manager = Arc::clone(&manager);
        let config = config.clone();
        async move { manager.open(&config, slow).await }
    });

    timeout(WAIT, async {
        while slow_controller.connects() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(manager.state(), SessionState::Connecting);

    let (other, _other_controller) = simulated();
    assert_eq!(
        manager.open(&config, other).await.unwrap_err(),
        SessionError::AlreadyOpen
    );

    assert!(matches!(
        opening.await.unwrap(),
        Err(SessionError::Connection(_))
    ));
    assert_eq!(manager.state(), SessionState::Disconnected);
}

#[tokio::test]
async fn rejected_credentials_fail_open() {
    let manager = SessionManager::new();
    let (provider, controller) = simulated();
    controller.set_connect_behavior(ConnectBehavior::RejectAuth("token expired".into()));

    match manager.open(&test_config(), provider).await {
        Err(SessionError::Connection(reason)) => assert!(reason.contains("token expired")),
        other => panic!("expected Connection error, got {other:?}"),
    }
    assert!(controller.is_closed());
    assert!(manager.current().is_none());
}

#[tokio::test]
async fn unreachable_provider_fails_open() {
    let manager = SessionManager::new();
    let (provider, controller) = simulated();
    controller.set_connect_behavior(ConnectBehavior::Unreachable);

    assert!(matches!(
        manager.open(&test_config(), provider).await,
        Err(SessionError::Connection(_))
    ));
    assert!(!manager.is_connected());
}

#[tokio::test]
async fn hung_connect_times_out() {
    let manager = SessionManager::new();
    let (provider, controller) = simulated();
    controller.set_connect_behavior(ConnectBehavior::Hang);

    let mut config = test_config();
    config.session.connect_timeout = Duration::from_millis(50);

    match manager.open(&config, provider).await {
        Err(SessionError::Connection(reason)) => assert!(reason.contains("timed out")),
        other => panic!("expected Connection error, got {other:?}"),
    }
    assert!(controller.is_closed());
}

#[tokio::test]
async fn retry_opens_after_failures() {
    let manager = SessionManager::new();
    let mut attempts = 0_u32;
    let retry = RetryConfig {
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        multiplier: 2.0,
        jitter_factor: 0.0,
        max_attempts: 3,
    };

    let session = manager
        .open_with_retry(&test_config(), retry, || {
            attempts += 1;
            let (provider, controller) = simulated();
            if attempts < 3 {
                controller.set_connect_behavior(ConnectBehavior::Unreachable);
            }
            // The controller only scripts connect; the session never needs it.
            drop(controller);
            provider
        })
        .await
        .unwrap();

    assert!(session.is_connected());
    assert_eq!(attempts, 3);
}

#[tokio::test]
async fn close_fails_pending_requests() {
    let manager = SessionManager::new();
    let (provider, mut controller) = simulated();
    let session = manager.open(&test_config(), provider).await.unwrap();

    let query = ReferenceDataRequest::new(["IBM US Equity"], ["PX_LAST"])
        .build()
        .unwrap();
    let pending = tokio::spawn({
        let session = session.clone();
        async move { session.send(query, WAIT).await }
    });
    controller.next_request().await.unwrap();
    assert_eq!(session.pending_requests(), 1);

    manager.close().await;

    assert_eq!(pending.await.unwrap(), Err(SessionError::SessionClosed));
    assert_eq!(session.state(), SessionState::Disconnected);
    assert_eq!(session.pending_requests(), 0);
    assert!(controller.is_closed());

    let query = ReferenceDataRequest::new(["IBM US Equity"], ["PX_LAST"])
        .build()
        .unwrap();
    assert_eq!(
        session.send(query, WAIT).await.unwrap_err(),
        SessionError::SessionClosed
    );
}

#[tokio::test]
async fn close_is_idempotent_and_allows_reopen() {
    let manager = SessionManager::new();
    let (provider, _controller) = simulated();
    let first = manager.open(&test_config(), provider).await.unwrap();

    manager.close().await;
    manager.close().await;
    first.close().await;
    assert_eq!(manager.state(), SessionState::Disconnected);

    let (provider, _controller) = simulated();
    let second = manager.open(&test_config(), provider).await.unwrap();
    assert_ne!(first.info().id, second.info().id);
    assert!(second.is_connected());
    assert!(!first.is_connected());
}

#[tokio::test]
async fn lost_session_can_be_replaced() {
    let manager = SessionManager::new();
    let (provider, controller) = simulated();
    let lost = manager.open(&test_config(), provider).await.unwrap();

    controller.lose_session();
    timeout(WAIT, async {
        while lost.state() != SessionState::Failed {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(lost.health().status, HealthStatus::Unhealthy);

    let (provider, _controller) = simulated();
    assert!(manager.open(&test_config(), provider).await.is_ok());
}

#[tokio::test]
async fn invalid_config_is_a_connection_error() {
    let manager = SessionManager::new();
    let mut config = test_config();
    config.subscriptions.max_subscriptions = 0;

    let (provider, controller) = simulated();
    assert!(matches!(
        manager.open(&config, provider).await,
        Err(SessionError::Connection(_))
    ));
    assert_eq!(controller.connects(), 0);
}

#[tokio::test]
async fn health_report_reflects_session() {
    let manager = SessionManager::new();
    let (provider, _controller) = simulated();
    let session = manager.open(&test_config(), provider).await.unwrap();

    let _subscription = session.subscribe("IBM US Equity", ["LAST_PRICE"]).await.unwrap();

    let report = session.health();
    assert_eq!(report.status, HealthStatus::Healthy);
    assert_eq!(report.state, SessionState::Connected);
    assert_eq!(report.session_id, session.info().id);
    assert_eq!(report.active_subscriptions, 1);
    assert_eq!(report.pending_requests, 0);

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["state"], "connected");
    assert!(json["provider_handle"].as_str().unwrap().starts_with("simulated-"));
}
