//! Session State
//!
//! Connection state of a provider session plus the identity the session was
//! created with.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Connection state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No session, or the session was closed.
    #[default]
    Disconnected,
    /// Connect and authentication in progress.
    Connecting,
    /// Open and routing events.
    Connected,
    /// Ended by an unrecoverable provider failure.
    Failed,
}

impl SessionState {
    /// True while the session is opening or open.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Connecting | Self::Connected)
    }

    /// Label for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Failed => "failed",
        }
    }

    /// Numeric code exported as a gauge.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Disconnected => 0,
            Self::Connecting => 1,
            Self::Connected => 2,
            Self::Failed => 3,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handle the provider assigned to an established session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderHandle(String);

impl ProviderHandle {
    /// Wrap a provider-assigned handle.
    #[must_use]
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    /// Handle as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of one session instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Locally generated instance id.
    pub id: Uuid,
    /// Provider-assigned handle.
    pub handle: ProviderHandle,
    /// When the session was established.
    pub created_at: DateTime<Utc>,
}

impl SessionInfo {
    /// New session identity stamped now.
    #[must_use]
    pub fn new(handle: ProviderHandle) -> Self {
        Self {
            id: Uuid::new_v4(),
            handle,
            created_at: Utc::now(),
        }
    }
}
