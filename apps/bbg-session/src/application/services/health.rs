//! Session Health
//!
//! Counters maintained by the dispatch loop and the serialisable report
//! built from them by `Session::health`.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::domain::session::SessionState;

// =============================================================================
// Dispatch Counters
// =============================================================================

/// Event counters updated by the dispatch loop.
#[derive(Debug, Default)]
pub struct DispatchStats {
    events_routed: AtomicU64,
    events_unmatched: AtomicU64,
    updates_dropped: AtomicU64,
}

impl DispatchStats {
    pub(crate) fn record_routed(&self) {
        self.events_routed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_unmatched(&self) {
        self.events_unmatched.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self) {
        self.updates_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Events read from the provider.
    #[must_use]
    pub fn events_routed(&self) -> u64 {
        self.events_routed.load(Ordering::Relaxed)
    }

    /// Events whose correlation id matched nothing.
    #[must_use]
    pub fn events_unmatched(&self) -> u64 {
        self.events_unmatched.load(Ordering::Relaxed)
    }

    /// Subscription updates dropped on full listener queues.
    #[must_use]
    pub fn updates_dropped(&self) -> u64 {
        self.updates_dropped.load(Ordering::Relaxed)
    }
}

// =============================================================================
// Health Report
// =============================================================================

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Connected, nothing dropped.
    Healthy,
    /// Connected, but listener updates have been dropped.
    Degraded,
    /// Not connected.
    Unhealthy,
}

impl HealthStatus {
    /// Derive a status from the session state and drop count.
    #[must_use]
    pub const fn from_state(state: SessionState, updates_dropped: u64) -> Self {
        match state {
            SessionState::Connected if updates_dropped == 0 => Self::Healthy,
            SessionState::Connected => Self::Degraded,
            _ => Self::Unhealthy,
        }
    }
}

/// Point-in-time health of a session.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Overall status.
    pub status: HealthStatus,
    /// Session instance id.
    pub session_id: Uuid,
    /// Provider-assigned handle.
    pub provider_handle: String,
    /// Connection state.
    pub state: SessionState,
    /// Seconds since the session was opened.
    pub uptime_secs: u64,
    /// Requests awaiting a response.
    pub pending_requests: usize,
    /// Registered subscriptions.
    pub active_subscriptions: usize,
    /// Correlation ids handed out.
    pub correlation_ids_issued: u64,
    /// Events read from the provider.
    pub events_routed: u64,
    /// Events that matched nothing.
    pub events_unmatched: u64,
    /// Updates dropped on full listener queues.
    pub updates_dropped: u64,
    /// When the report was taken.
    pub current_time: DateTime<Utc>,
}
