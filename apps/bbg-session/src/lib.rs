#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! BBG Session - Market Data Session Facade
//!
//! A session layer over a Bloomberg-style market-data API. One session is
//! open per manager; callers issue typed requests and receive their
//! correlated responses, or subscribe to topics and receive push updates,
//! while a single dispatch task owns the provider's event queue.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Types with no I/O
//!   - `correlation`: Correlation identifiers and allocator
//!   - `event`: Provider events and payloads
//!   - `query`: Typed request builders with validation
//!   - `request`, `session`, `subscription`: State and handles
//!   - `errors`: The caller-facing error taxonomy
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: The provider port adapters implement
//!   - `services`: Session manager, correlator, subscription registry and
//!     the dispatch loop
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `gateway`: WebSocket API gateway provider
//!   - `simulated`: In-process provider driven by a controller
//!   - `config`: Configuration with environment overrides
//!   - `metrics`, `telemetry`: Prometheus and OpenTelemetry
//!
//! # Data Flow
//!
//! ```text
//! caller ──request──►  Session ──Command──► DispatchLoop ──► ProviderPort
//!   ▲                     │                      │               │
//!   │                RequestTicket          route by cid    next_event
//!   │                     │                      │               │
//!   └──── Response ◄── correlator ◄──────────────┤◄──────────────┘
//!   └──── Subscription ◄── registry ◄────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use bbg_session::{GatewayProvider, ReferenceDataRequest, SessionConfig, SessionManager};
//!
//! let config = SessionConfig::from_env()?;
//! let session = SessionManager::global()
//!     .open(&config, GatewayProvider::new(&config))
//!     .await?;
//!
//! let query = ReferenceDataRequest::new(["IBM US Equity"], ["PX_LAST"]).build()?;
//! let response = session.request(query).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Session, request and subscription types.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::correlation::{CorrelationId, CorrelationIdAllocator};
pub use domain::errors::SessionError;
pub use domain::event::{ErrorDetail, EventKind, Payload, ProviderEvent, SessionStatus};
pub use domain::request::{RequestState, Response};
pub use domain::session::{ProviderHandle, SessionInfo, SessionState};
pub use domain::subscription::{SubscriptionEvent, SubscriptionHandle, SubscriptionSpec};

// Query builders
pub use domain::query::{
    AIM_HISTORY_SERVICE, AIM_POSITIONS_SERVICE, AimCashBalanceRequest, AimPositionHistoryRequest,
    AimPositionRequest, FIELDS_SERVICE, FieldInfoRequest, FieldListRequest, FieldSearchRequest,
    HistoricalDataRequest, IntradayTickRequest, MKTDATA_SERVICE, Query, QueryError,
    REFDATA_SERVICE, ReferenceDataRequest,
};

// Ports
pub use application::ports::{ProviderError, ProviderPort};

// Services
pub use application::services::{
    HealthReport, HealthStatus, RequestTicket, RetryConfig, Session, SessionManager,
    Subscription,
};

// Infrastructure config
pub use infrastructure::config::{ConfigError, Credentials, SessionConfig, WireFormat};

// Providers
pub use infrastructure::gateway::{GatewayConfig, GatewayProvider};
pub use infrastructure::simulated::{SimulatedController, SimulatedProvider, simulated};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
