//! Application Services
//!
//! Services that drive the provider port on behalf of callers.
//!
//! - `SessionManager`: Open/close lifecycle and single-session exclusivity
//! - `Session`: Request, subscription and health operations on an open session
//! - `RequestCorrelator`: Correlation-id to waiter map for one-shot requests
//! - `SubscriptionRegistry`: Active subscriptions and their listener queues
//! - `DispatchLoop`: The single task that polls the provider and routes events

mod correlator;
mod dispatch;
mod health;
mod manager;
mod retry;
mod session;
mod subscriptions;

pub use correlator::{RequestCorrelator, RequestOutcomeResult, Routed};
pub use health::{DispatchStats, HealthReport, HealthStatus};
pub use manager::SessionManager;
pub use retry::{RetryConfig, RetryPolicy};
pub use session::{RequestTicket, Session, Subscription};
pub use subscriptions::{Delivery, SubscriptionInfo, SubscriptionRegistry};
