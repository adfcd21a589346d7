//! Session Manager
//!
//! Enforces at most one active session per manager and owns the open and
//! close lifecycle. Most applications use the process-wide instance from
//! [`SessionManager::global`].

use std::sync::OnceLock;

use parking_lot::RwLock;

use super::retry::{RetryConfig, RetryPolicy};
use super::session::Session;
use crate::application::ports::ProviderPort;
use crate::domain::errors::SessionError;
use crate::domain::session::SessionState;
use crate::infrastructure::config::SessionConfig;
use crate::infrastructure::metrics;

static GLOBAL: OnceLock<SessionManager> = OnceLock::new();

/// Owner of the single active session.
#[derive(Debug, Default)]
pub struct SessionManager {
    current: RwLock<Option<Session>>,
    open_gate: tokio::sync::Mutex<()>,
}

impl SessionManager {
    /// Create a manager with no session.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide manager.
    pub fn global() -> &'static Self {
        GLOBAL.get_or_init(Self::new)
    }

    /// Connect `provider` and start a session.
    ///
    /// # Errors
    ///
    /// - [`SessionError::AlreadyOpen`] if a session is open or opening
    /// - [`SessionError::Connection`] if the configuration is invalid, the
    ///   provider cannot be reached or rejects the credentials, or the
    ///   connect timeout elapses
    pub async fn open<P>(
        &self,
        config: &SessionConfig,
        mut provider: P,
    ) -> Result<Session, SessionError>
    where
        P: ProviderPort + 'static,
    {
        let Ok(_gate) = self.open_gate.try_lock() else {
            return Err(SessionError::AlreadyOpen);
        };
        if self
            .current
            .read()
            .as_ref()
            .is_some_and(|session| session.state().is_active())
        {
            return Err(SessionError::AlreadyOpen);
        }
        config
            .validate()
            .map_err(|e| SessionError::Connection(e.to_string()))?;

        tracing::info!(
            endpoint = %config.endpoint.url(),
            timeout_ms = config.session.connect_timeout.as_millis(),
            "opening session"
        );
        metrics::set_session_state(SessionState::Connecting);

        let connected =
            tokio::time::timeout(config.session.connect_timeout, provider.connect()).await;
        let handle = match connected {
            Ok(Ok(handle)) => handle,
            Ok(Err(e)) => return Err(Self::abort(&mut provider, e.to_string()).await),
            Err(_) => {
                let reason = format!(
                    "connect timed out after {:?}",
                    config.session.connect_timeout
                );
                return Err(Self::abort(&mut provider, reason).await);
            }
        };

        let session = Session::start(handle, config, Box::new(provider));
        *self.current.write() = Some(session.clone());
        Ok(session)
    }

    async fn abort<P: ProviderPort>(provider: &mut P, reason: String) -> SessionError {
        metrics::record_provider_error("connect");
        metrics::set_session_state(SessionState::Disconnected);
        tracing::warn!(reason = %reason, "session open failed");
        if let Err(e) = provider.close().await {
            tracing::debug!(error = %e, "provider close after failed open");
        }
        SessionError::Connection(reason)
    }

    /// [`Self::open`] with backoff between attempts. Only
    /// [`SessionError::Connection`] failures are retried; `make_provider`
    /// builds a fresh provider for every attempt.
    ///
    /// # Errors
    ///
    /// Returns the last error once the policy's attempts are used up, or
    /// any non-connection error immediately.
    pub async fn open_with_retry<P, F>(
        &self,
        config: &SessionConfig,
        retry: RetryConfig,
        mut make_provider: F,
    ) -> Result<Session, SessionError>
    where
        P: ProviderPort + 'static,
        F: FnMut() -> P + Send,
    {
        let mut policy = RetryPolicy::new(retry);
        loop {
            match self.open(config, make_provider()).await {
                Err(SessionError::Connection(reason)) => {
                    let Some(delay) = policy.next_delay() else {
                        tracing::error!(
                            attempts = policy.attempt_count(),
                            reason = %reason,
                            "giving up opening session"
                        );
                        return Err(SessionError::Connection(reason));
                    };
                    tracing::info!(
                        attempt = policy.attempt_count(),
                        delay_ms = delay.as_millis(),
                        reason = %reason,
                        "retrying session open"
                    );
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }

    /// Close the current session, if any, and wait for teardown.
    pub async fn close(&self) {
        let session = self.current.write().take();
        if let Some(session) = session {
            session.close().await;
        }
    }

    /// The current session, if one was opened and not yet closed.
    #[must_use]
    pub fn current(&self) -> Option<Session> {
        self.current.read().clone()
    }

    /// Connection state without blocking.
    #[must_use]
    pub fn state(&self) -> SessionState {
        if self.open_gate.try_lock().is_err() {
            return SessionState::Connecting;
        }
        self.current
            .read()
            .as_ref()
            .map_or(SessionState::Disconnected, Session::state)
    }

    /// True while a session is open and routing events.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }
}
