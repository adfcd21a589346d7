//! Gateway Frame Types
//!
//! Wire types exchanged with the API gateway. Outbound frames carry an
//! `action` discriminator; inbound frames carry a `T` discriminator. The same
//! shapes travel as JSON text frames or as `MessagePack` binary frames with
//! named fields.
//!
//! # Handshake
//!
//! ```json
//! <- {"T":"success","msg":"connected","handle":"gw-17"}
//! -> {"action":"auth","app":"desk","secret":"..."}
//! <- {"T":"success","msg":"authenticated"}
//! ```
//!
//! Without credentials the `connected` frame completes the handshake.
//!
//! # Traffic
//!
//! ```json
//! -> {"action":"open_service","service":"//blp/refdata"}
//! <- {"T":"service","service":"//blp/refdata","opened":true}
//! -> {"action":"request","cid":4,"service":"//blp/refdata","operation":"...","params":{...}}
//! <- {"T":"partial","cid":4,"data":[...]}
//! <- {"T":"response","cid":4,"data":[...]}
//! -> {"action":"subscribe","cid":5,"topic":"IBM US Equity","fields":["LAST_PRICE"]}
//! <- {"T":"data","cid":5,"data":[{"LAST_PRICE":187.2}]}
//! <- {"T":"error","code":400,"msg":"unknown security","cid":5}
//! <- {"T":"status","status":"lost"}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::correlation::CorrelationId;
use crate::domain::event::{ErrorDetail, SessionStatus};
use crate::domain::query::Query;

// =============================================================================
// Outbound
// =============================================================================

/// Frame sent to the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Outbound {
    /// Authenticate the application.
    Auth {
        /// Application name.
        app: String,
        /// Application secret.
        secret: String,
    },
    /// Open a service.
    OpenService {
        /// Service name, e.g. `//blp/refdata`.
        service: String,
    },
    /// Submit a request.
    Request {
        /// Correlation id.
        cid: u64,
        /// Target service.
        service: String,
        /// Operation name.
        operation: String,
        /// Operation parameters.
        params: Map<String, Value>,
    },
    /// Start a subscription.
    Subscribe {
        /// Correlation id.
        cid: u64,
        /// Topic.
        topic: String,
        /// Fields.
        fields: Vec<String>,
    },
    /// Stop a subscription.
    Unsubscribe {
        /// Correlation id.
        cid: u64,
    },
}

impl Outbound {
    /// Request frame for `query`.
    #[must_use]
    pub fn request(correlation_id: CorrelationId, query: &Query) -> Self {
        Self::Request {
            cid: correlation_id.value(),
            service: query.service().to_string(),
            operation: query.operation().to_string(),
            params: query.params().clone(),
        }
    }

    /// Subscribe frame.
    #[must_use]
    pub fn subscribe(correlation_id: CorrelationId, topic: &str, fields: &[String]) -> Self {
        Self::Subscribe {
            cid: correlation_id.value(),
            topic: topic.to_string(),
            fields: fields.to_vec(),
        }
    }

    /// Label for logs.
    #[must_use]
    pub const fn action(&self) -> &'static str {
        match self {
            Self::Auth { .. } => "auth",
            Self::OpenService { .. } => "open_service",
            Self::Request { .. } => "request",
            Self::Subscribe { .. } => "subscribe",
            Self::Unsubscribe { .. } => "unsubscribe",
        }
    }
}

// =============================================================================
// Inbound
// =============================================================================

/// Kind of success frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuccessKind {
    /// Transport established.
    Connected,
    /// Credentials accepted.
    Authenticated,
}

/// Error frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorFrame {
    /// Gateway error code.
    pub code: i32,
    /// Error description.
    pub msg: String,
    /// Request or subscription the error belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cid: Option<u64>,
    /// Provider error category, when relayed from the vendor session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl ErrorFrame {
    /// Convert to provider error detail. The gateway code stands in for the
    /// subcategory when no category was relayed.
    #[must_use]
    pub fn to_detail(&self) -> ErrorDetail {
        ErrorDetail::new(
            self.category.clone().unwrap_or_else(|| "GATEWAY".to_string()),
            self.code.to_string(),
            self.msg.clone(),
        )
    }
}

/// Frame received from the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "T", rename_all = "snake_case")]
pub enum Inbound {
    /// Handshake progress.
    Success {
        /// Which step succeeded.
        msg: SuccessKind,
        /// Session handle, sent with `connected`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        handle: Option<String>,
    },
    /// Error, scoped by `cid` when present.
    Error(ErrorFrame),
    /// Outcome of an `open_service`.
    Service {
        /// Service name.
        service: String,
        /// Whether the service opened.
        opened: bool,
        /// Failure reason.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        msg: Option<String>,
    },
    /// Partial response.
    Partial {
        /// Correlation id.
        cid: u64,
        /// Response messages.
        #[serde(default)]
        data: Vec<Value>,
    },
    /// Final response.
    Response {
        /// Correlation id.
        cid: u64,
        /// Response messages.
        #[serde(default)]
        data: Vec<Value>,
    },
    /// Subscription update.
    Data {
        /// Correlation id.
        cid: u64,
        /// Update messages.
        #[serde(default)]
        data: Vec<Value>,
    },
    /// Session status change.
    Status {
        /// New status.
        status: SessionStatus,
    },
}
