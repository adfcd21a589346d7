//! Prometheus Metrics Module
//!
//! Session, request and subscription metrics recorded through the `metrics`
//! facade. The host application installs the Prometheus recorder with
//! [`init_metrics`] and renders the returned handle wherever it exposes
//! metrics; until then every recording call is a no-op.
//!
//! # Metrics Categories
//!
//! - **Requests**: Issued and resolved requests by outcome, latency
//! - **Subscriptions**: Active count, delivered and dropped events
//! - **Routing**: Unmatched events by kind
//! - **Session**: Current state, provider errors

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::event::EventKind;
use crate::domain::session::SessionState;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder, or return the handle installed earlier.
///
/// # Errors
///
/// Returns [`BuildError`] if another recorder is already installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }
    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "bbg_session_requests_total",
        "Requests issued through the session"
    );
    describe_counter!(
        "bbg_session_requests_resolved_total",
        "Requests resolved, by outcome"
    );
    describe_histogram!(
        "bbg_session_request_duration_seconds",
        "Time from request issue to resolution"
    );
    describe_gauge!(
        "bbg_session_pending_requests",
        "Requests awaiting a response"
    );

    describe_gauge!(
        "bbg_session_subscriptions_active",
        "Active subscriptions"
    );
    describe_counter!(
        "bbg_session_subscription_events_total",
        "Subscription events, by delivery result"
    );

    describe_counter!(
        "bbg_session_unmatched_events_total",
        "Provider events whose correlation id matched nothing"
    );

    describe_gauge!(
        "bbg_session_state",
        "Session state (0 disconnected, 1 connecting, 2 connected, 3 failed)"
    );
    describe_counter!(
        "bbg_session_provider_errors_total",
        "Provider errors, by operation"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Metric labels for request outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// Final response received.
    Completed,
    /// Provider error payload.
    Failed,
    /// Caller's bound elapsed.
    TimedOut,
    /// Session closed or lost first.
    Closed,
}

impl RequestOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
            Self::Closed => "closed",
        }
    }
}

/// Metric labels for subscription delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryResult {
    /// Queued for the listener.
    Delivered,
    /// Listener queue full.
    Dropped,
    /// Terminal notification.
    Terminal,
}

impl DeliveryResult {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::Dropped => "dropped",
            Self::Terminal => "terminal",
        }
    }
}

/// Record a request handed to the dispatch loop.
pub fn record_request_issued(service: &str) {
    counter!(
        "bbg_session_requests_total",
        "service" => service.to_string()
    )
    .increment(1);
}

/// Record a request resolution and its latency.
pub fn record_request_resolved(outcome: RequestOutcome, elapsed: Duration) {
    counter!(
        "bbg_session_requests_resolved_total",
        "outcome" => outcome.as_str()
    )
    .increment(1);
    histogram!(
        "bbg_session_request_duration_seconds",
        "outcome" => outcome.as_str()
    )
    .record(elapsed.as_secs_f64());
}

/// Update the pending request count.
#[allow(clippy::cast_precision_loss)]
pub fn set_pending_requests(count: usize) {
    gauge!("bbg_session_pending_requests").set(count as f64);
}

/// Update the active subscription count.
#[allow(clippy::cast_precision_loss)]
pub fn set_active_subscriptions(count: usize) {
    gauge!("bbg_session_subscriptions_active").set(count as f64);
}

/// Record a subscription event delivery.
pub fn record_subscription_event(result: DeliveryResult) {
    counter!(
        "bbg_session_subscription_events_total",
        "result" => result.as_str()
    )
    .increment(1);
}

/// Record an event that matched no request or subscription.
pub fn record_unmatched_event(kind: EventKind) {
    counter!(
        "bbg_session_unmatched_events_total",
        "kind" => kind.as_str()
    )
    .increment(1);
}

/// Update the session state gauge.
pub fn set_session_state(state: SessionState) {
    gauge!("bbg_session_state").set(f64::from(state.code()));
}

/// Record a provider error.
pub fn record_provider_error(operation: &'static str) {
    counter!(
        "bbg_session_provider_errors_total",
        "operation" => operation
    )
    .increment(1);
}

// =============================================================================
// Tests
// =============================================================================
