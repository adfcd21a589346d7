//! Correlation Identifiers
//!
//! Every request and subscription is tagged with a [`CorrelationId`] so that
//! asynchronous provider events can be routed back to their origin. Ids come
//! from a single [`CorrelationIdAllocator`] per session, which guarantees
//! uniqueness across both requests and subscriptions.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Opaque identifier linking a request or subscription to its events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(u64);

impl CorrelationId {
    /// Wrap a raw identifier.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Raw numeric value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for CorrelationId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Monotonic allocator shared by requests and subscriptions.
///
/// Ids start at 1 and are never reused for the lifetime of the allocator.
#[derive(Debug)]
pub struct CorrelationIdAllocator {
    next: AtomicU64,
}

impl Default for CorrelationIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl CorrelationIdAllocator {
    /// Create an allocator whose first id is 1.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Allocate the next id.
    pub fn allocate(&self) -> CorrelationId {
        CorrelationId(self.next.fetch_add(1, Ordering::Relaxed))
    }

    /// Number of ids handed out so far.
    #[must_use]
    pub fn issued(&self) -> u64 {
        self.next.load(Ordering::Relaxed) - 1
    }
}
