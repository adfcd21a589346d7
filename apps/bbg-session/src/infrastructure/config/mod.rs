//! Configuration Module
//!
//! Session configuration with typed defaults, environment overrides and
//! `.env` loading.

mod settings;

pub use settings::{
    ConfigError, Credentials, EndpointSettings, HeartbeatSettings, RetrySettings, SessionConfig,
    SessionSettings, SubscriptionSettings, WireFormat, load_dotenv, load_dotenv_from,
};
