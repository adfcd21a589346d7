//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the session services (correlation, subscription
//! routing, the dispatch loop and the session manager) and the provider
//! port that infrastructure adapters implement.

/// Port interfaces for external systems.
pub mod ports;

/// Session, correlation and subscription services.
pub mod services;
