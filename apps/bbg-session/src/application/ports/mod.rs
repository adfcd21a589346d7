//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `ProviderPort`: Interface to the vendor market-data session

mod provider_port;

pub use provider_port::{ProviderError, ProviderPort};

#[cfg(test)]
pub use provider_port::MockProviderPort;
