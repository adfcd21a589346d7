//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the provider port
//! plus the ambient concerns a host wires up around a session.

/// Session configuration, environment overrides and `.env` loading.
pub mod config;

/// WebSocket API gateway provider.
pub mod gateway;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// In-process provider for tests and offline hosts.
pub mod simulated;

/// OpenTelemetry tracing integration.
pub mod telemetry;
