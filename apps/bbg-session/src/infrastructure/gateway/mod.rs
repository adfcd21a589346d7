//! API Gateway Adapter
//!
//! WebSocket implementation of the provider port. The gateway fronts the
//! vendor session and relays requests, subscriptions and events as JSON or
//! `MessagePack` frames.
//!
//! - `messages`: Frame types
//! - `codec`: JSON and `MessagePack` frame encoding
//! - `auth`: Connect/authenticate handshake
//! - `heartbeat`: Ping cadence and liveness timeout
//! - `client`: The `GatewayProvider` and its I/O task

pub mod auth;
pub mod client;
pub mod codec;
pub mod heartbeat;
pub mod messages;

pub use auth::{AuthError, AuthState};
pub use client::{GatewayConfig, GatewayProvider};
pub use codec::{CodecError, FrameCodec};
pub use messages::{ErrorFrame, Inbound, Outbound};
