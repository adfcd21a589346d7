//! Gateway Handshake
//!
//! Tracks the connect/authenticate exchange that opens a gateway session.
//!
//! 1. Connect to the WebSocket endpoint
//! 2. Receive `{"T":"success","msg":"connected","handle":"..."}`
//! 3. Send `{"action":"auth","app":"...","secret":"..."}` when credentials
//!    are configured
//! 4. Receive `{"T":"success","msg":"authenticated"}` or an error frame
//!
//! # Error Codes
//!
//! - 401: Not authenticated
//! - 402: Invalid credentials
//! - 403: Already authenticated
//! - 404: Authentication timeout
//! - 406: Connection limit exceeded

use thiserror::Error;

use super::messages::{ErrorFrame, Outbound, SuccessKind};
use crate::application::ports::ProviderError;
use crate::infrastructure::config::Credentials;

/// Errors raised during the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// Gateway requires authentication first.
    #[error("not authenticated")]
    NotAuthenticated,

    /// Credentials rejected.
    #[error("invalid application credentials")]
    InvalidCredentials,

    /// Connection was already authenticated.
    #[error("already authenticated")]
    AlreadyAuthenticated,

    /// Handshake took too long.
    #[error("authentication timed out")]
    Timeout,

    /// Too many concurrent connections for this application.
    #[error("connection limit exceeded")]
    ConnectionLimitExceeded,

    /// Unexpected frame during the handshake.
    #[error("invalid handshake message: {0}")]
    InvalidMessage(String),

    /// Any other gateway error.
    #[error("server error ({code}): {message}")]
    ServerError {
        /// Gateway error code.
        code: i32,
        /// Gateway message.
        message: String,
    },
}

impl From<&ErrorFrame> for AuthError {
    fn from(frame: &ErrorFrame) -> Self {
        match frame.code {
            401 => Self::NotAuthenticated,
            402 => Self::InvalidCredentials,
            403 => Self::AlreadyAuthenticated,
            404 => Self::Timeout,
            406 => Self::ConnectionLimitExceeded,
            code => Self::ServerError {
                code,
                message: frame.msg.clone(),
            },
        }
    }
}

impl From<AuthError> for ProviderError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::NotAuthenticated | AuthError::InvalidCredentials => {
                Self::AuthRejected(err.to_string())
            }
            AuthError::InvalidMessage(_) | AuthError::AlreadyAuthenticated => {
                Self::Protocol(err.to_string())
            }
            AuthError::Timeout
            | AuthError::ConnectionLimitExceeded
            | AuthError::ServerError { .. } => Self::Unreachable(err.to_string()),
        }
    }
}

/// Handshake progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthState {
    /// Transport not yet acknowledged.
    #[default]
    Disconnected,
    /// Gateway acknowledged the connection.
    Connected,
    /// Credentials sent.
    Authenticating,
    /// Handshake complete.
    Authenticated,
    /// Handshake failed.
    Failed,
}

/// What the client must do after a handshake frame.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthStep {
    /// Send this frame and keep waiting.
    Send(Outbound),
    /// Handshake complete.
    Done,
}

/// Handshake state machine.
#[derive(Debug)]
pub struct AuthHandler {
    credentials: Option<Credentials>,
    state: AuthState,
    handle: Option<String>,
}

impl AuthHandler {
    /// Handler for an optional set of credentials.
    #[must_use]
    pub const fn new(credentials: Option<Credentials>) -> Self {
        Self {
            credentials,
            state: AuthState::Disconnected,
            handle: None,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> AuthState {
        self.state
    }

    /// Handle assigned by the gateway, once connected.
    #[must_use]
    pub fn handle(&self) -> Option<&str> {
        self.handle.as_deref()
    }

    /// Process a success frame.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidMessage`] for a frame that does not fit
    /// the current state.
    pub fn on_success(
        &mut self,
        kind: SuccessKind,
        handle: Option<String>,
    ) -> Result<AuthStep, AuthError> {
        match (kind, self.state) {
            (SuccessKind::Connected, AuthState::Disconnected) => {
                self.handle = handle;
                match &self.credentials {
                    Some(credentials) => {
                        self.state = AuthState::Authenticating;
                        Ok(AuthStep::Send(Outbound::Auth {
                            app: credentials.application().to_string(),
                            secret: credentials.secret().to_string(),
                        }))
                    }
                    None => {
                        self.state = AuthState::Authenticated;
                        Ok(AuthStep::Done)
                    }
                }
            }
            (SuccessKind::Authenticated, AuthState::Authenticating) => {
                self.state = AuthState::Authenticated;
                Ok(AuthStep::Done)
            }
            (kind, state) => {
                self.state = AuthState::Failed;
                Err(AuthError::InvalidMessage(format!(
                    "unexpected {kind:?} while {state:?}"
                )))
            }
        }
    }

    /// Process an error frame.
    pub fn on_error(&mut self, frame: &ErrorFrame) -> AuthError {
        self.state = AuthState::Failed;
        AuthError::from(frame)
    }
}
