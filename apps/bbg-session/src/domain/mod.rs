//! Domain Layer - Core session, request and subscription types.
//!
//! This layer holds the types every other layer speaks in: correlation
//! identifiers, provider events and payloads, request and session states,
//! subscription events, typed queries and the error taxonomy. Nothing here
//! touches the network or spawns tasks.

/// Correlation identifiers and the shared allocator.
pub mod correlation;

/// Error taxonomy surfaced to callers.
pub mod errors;

/// Inbound provider events and accumulated payloads.
pub mod event;

/// Typed query builders with argument validation.
pub mod query;

/// Request completion state and resolved responses.
pub mod request;

/// Session connection state and metadata.
pub mod session;

/// Subscription specs, handles and listener events.
pub mod subscription;
