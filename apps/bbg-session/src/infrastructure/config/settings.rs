//! Session Configuration Settings
//!
//! Configuration types for the session facade. Every value has a default;
//! [`SessionConfig::from_env`] overrides them from `BBG_*` environment
//! variables.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Frame encoding used on the gateway connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WireFormat {
    /// JSON text frames.
    #[default]
    Json,
    /// MessagePack binary frames.
    MsgPack,
}

impl WireFormat {
    /// Parse format from string. Unknown values fall back to JSON.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "msgpack" | "messagepack" => Self::MsgPack,
            _ => Self::Json,
        }
    }

    /// Format name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::MsgPack => "msgpack",
        }
    }
}

/// Application credentials presented during authentication.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    application: String,
    secret: String,
}

impl Credentials {
    /// Create new credentials.
    #[must_use]
    pub const fn new(application: String, secret: String) -> Self {
        Self {
            application,
            secret,
        }
    }

    /// Registered application name.
    #[must_use]
    pub fn application(&self) -> &str {
        &self.application
    }

    /// Application secret.
    #[must_use]
    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("application", &self.application)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Where the provider session is reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointSettings {
    /// Host name.
    pub host: String,
    /// Port.
    pub port: u16,
    /// Use TLS (`wss://`).
    pub tls: bool,
}

impl Default for EndpointSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8194,
            tls: false,
        }
    }
}

impl EndpointSettings {
    /// Gateway WebSocket URL.
    #[must_use]
    pub fn url(&self) -> String {
        let scheme = if self.tls { "wss" } else { "ws" };
        format!("{scheme}://{}:{}/session", self.host, self.port)
    }
}

/// Session timing and queue settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    /// Bound on connect plus authentication.
    pub connect_timeout: Duration,
    /// Bound on the authentication exchange alone.
    pub auth_timeout: Duration,
    /// Bounded wait of each event poll.
    pub poll_interval: Duration,
    /// Timeout used by `Session::request`.
    pub request_timeout: Duration,
    /// Capacity of the command channel into the dispatch loop.
    pub command_buffer: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            auth_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(10),
            request_timeout: Duration::from_secs(30),
            command_buffer: 1_024,
        }
    }
}

/// Subscription delivery settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionSettings {
    /// Per-subscription listener queue capacity.
    pub buffer: usize,
    /// Concurrent subscription limit.
    pub max_subscriptions: usize,
}

impl Default for SubscriptionSettings {
    fn default() -> Self {
        Self {
            buffer: 1_024,
            max_subscriptions: 3_500,
        }
    }
}

/// Gateway heartbeat settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatSettings {
    /// Ping interval.
    pub interval: Duration,
    /// Silence after which the connection is considered lost.
    pub timeout: Duration,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(60),
        }
    }
}

/// Backoff settings for `SessionManager::open_with_retry`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrySettings {
    /// First delay.
    pub initial_delay: Duration,
    /// Delay cap.
    pub max_delay: Duration,
    /// Growth factor per attempt.
    pub multiplier: f64,
    /// Attempts before giving up (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            max_attempts: 5,
        }
    }
}

/// Complete session configuration.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// Provider endpoint.
    pub endpoint: EndpointSettings,
    /// Credentials, if the provider requires authentication.
    pub credentials: Option<Credentials>,
    /// Gateway frame encoding.
    pub format: WireFormat,
    /// Timing and queue settings.
    pub session: SessionSettings,
    /// Subscription delivery settings.
    pub subscriptions: SubscriptionSettings,
    /// Heartbeat settings.
    pub heartbeat: HeartbeatSettings,
    /// Retry settings.
    pub retry: RetrySettings,
}

impl SessionConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if only one half of the credentials is set, a
    /// credential is empty, or the resulting values fail [`Self::validate`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Same as [`Self::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let credentials = match (lookup("BBG_APP_NAME"), lookup("BBG_APP_SECRET")) {
            (None, None) => None,
            (Some(_), None) => return Err(ConfigError::MissingEnvVar("BBG_APP_SECRET".into())),
            (None, Some(_)) => return Err(ConfigError::MissingEnvVar("BBG_APP_NAME".into())),
            (Some(application), Some(secret)) => {
                if application.is_empty() {
                    return Err(ConfigError::EmptyValue("BBG_APP_NAME".into()));
                }
                if secret.is_empty() {
                    return Err(ConfigError::EmptyValue("BBG_APP_SECRET".into()));
                }
                Some(Credentials::new(application, secret))
            }
        };

        let endpoint_defaults = EndpointSettings::default();
        let endpoint = EndpointSettings {
            host: lookup("BBG_HOST")
                .filter(|h| !h.is_empty())
                .unwrap_or(endpoint_defaults.host),
            port: parse_env(&lookup, "BBG_PORT", endpoint_defaults.port),
            tls: parse_env(&lookup, "BBG_TLS", endpoint_defaults.tls),
        };

        let format = lookup("BBG_WIRE_FORMAT")
            .map(|s| WireFormat::from_str_case_insensitive(&s))
            .unwrap_or_default();

        let session_defaults = SessionSettings::default();
        let session = SessionSettings {
            connect_timeout: parse_env_duration_millis(
                &lookup,
                "BBG_CONNECT_TIMEOUT_MS",
                session_defaults.connect_timeout,
            ),
            auth_timeout: parse_env_duration_millis(
                &lookup,
                "BBG_AUTH_TIMEOUT_MS",
                session_defaults.auth_timeout,
            ),
            poll_interval: parse_env_duration_millis(
                &lookup,
                "BBG_POLL_INTERVAL_MS",
                session_defaults.poll_interval,
            ),
            request_timeout: parse_env_duration_secs(
                &lookup,
                "BBG_REQUEST_TIMEOUT_SECS",
                session_defaults.request_timeout,
            ),
            command_buffer: parse_env(
                &lookup,
                "BBG_COMMAND_BUFFER",
                session_defaults.command_buffer,
            ),
        };

        let subscription_defaults = SubscriptionSettings::default();
        let subscriptions = SubscriptionSettings {
            buffer: parse_env(
                &lookup,
                "BBG_SUBSCRIPTION_BUFFER",
                subscription_defaults.buffer,
            ),
            max_subscriptions: parse_env(
                &lookup,
                "BBG_MAX_SUBSCRIPTIONS",
                subscription_defaults.max_subscriptions,
            ),
        };

        let heartbeat_defaults = HeartbeatSettings::default();
        let heartbeat = HeartbeatSettings {
            interval: parse_env_duration_secs(
                &lookup,
                "BBG_HEARTBEAT_INTERVAL_SECS",
                heartbeat_defaults.interval,
            ),
            timeout: parse_env_duration_secs(
                &lookup,
                "BBG_HEARTBEAT_TIMEOUT_SECS",
                heartbeat_defaults.timeout,
            ),
        };

        let retry_defaults = RetrySettings::default();
        let retry = RetrySettings {
            initial_delay: parse_env_duration_millis(
                &lookup,
                "BBG_RETRY_INITIAL_DELAY_MS",
                retry_defaults.initial_delay,
            ),
            max_delay: parse_env_duration_secs(
                &lookup,
                "BBG_RETRY_MAX_DELAY_SECS",
                retry_defaults.max_delay,
            ),
            multiplier: parse_env(&lookup, "BBG_RETRY_MULTIPLIER", retry_defaults.multiplier),
            max_attempts: parse_env(
                &lookup,
                "BBG_RETRY_MAX_ATTEMPTS",
                retry_defaults.max_attempts,
            ),
        };

        let config = Self {
            endpoint,
            credentials,
            format,
            session,
            subscriptions,
            heartbeat,
            retry,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check values that would make the session unusable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the offending setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session.poll_interval.is_zero() {
            return Err(ConfigError::Invalid("poll_interval must be non-zero".into()));
        }
        if self.session.command_buffer == 0 {
            return Err(ConfigError::Invalid("command_buffer must be non-zero".into()));
        }
        if self.subscriptions.buffer == 0 {
            return Err(ConfigError::Invalid(
                "subscription buffer must be non-zero".into(),
            ));
        }
        if self.subscriptions.max_subscriptions == 0 {
            return Err(ConfigError::Invalid(
                "max_subscriptions must be non-zero".into(),
            ));
        }
        if self.heartbeat.timeout <= self.heartbeat.interval {
            return Err(ConfigError::Invalid(
                "heartbeat timeout must exceed the interval".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// A setting has an unusable value.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// A `.env` file could not be read.
    #[error("failed to load {path}: {source}")]
    Dotenv {
        /// File that failed to load.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: dotenvy::Error,
    },
}

/// Load `.env` from the current directory or its parents, if present.
///
/// Returns the path that was loaded.
pub fn load_dotenv() -> Option<PathBuf> {
    dotenvy::dotenv().ok()
}

/// Load a specific `.env` file. Variables already set are left untouched.
///
/// # Errors
///
/// Returns [`ConfigError::Dotenv`] if the file is missing or malformed.
pub fn load_dotenv_from(path: &Path) -> Result<(), ConfigError> {
    dotenvy::from_path(path).map_err(|source| ConfigError::Dotenv {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_env<T: FromStr, F: Fn(&str) -> Option<String>>(lookup: &F, key: &str, default: T) -> T {
    lookup(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_duration_secs<F: Fn(&str) -> Option<String>>(
    lookup: &F,
    key: &str,
    default: Duration,
) -> Duration {
    lookup(key)
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_env_duration_millis<F: Fn(&str) -> Option<String>>(
    lookup: &F,
    key: &str,
    default: Duration,
) -> Duration {
    lookup(key)
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}
