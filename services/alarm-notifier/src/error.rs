//! Error types for the notification pipeline
//!
//! Every failure a record can hit maps to one variant. The batch coordinator
//! only needs [`NotifierError::is_permanent`] to decide between redelivery and
//! the dead-letter path.

use alarm_store::StoreError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, NotifierError>;

#[derive(Error, Debug)]
pub enum NotifierError {
    /// Record, envelope or alarm payload cannot be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Alarm state outside ALARM / OK / INSUFFICIENT_DATA
    #[error("Unknown alarm state '{0}'")]
    UnknownState(String),

    /// Another worker held the fingerprint past the wait timeout
    #[error("Timed out waiting for in-progress event {fingerprint}")]
    GuardTimeout { fingerprint: String },

    /// Work succeeded but the COMPLETE record could not be written
    #[error("Completion of event {fingerprint} was not persisted")]
    CompletionNotPersisted { fingerprint: String },

    /// Chat API rejected or failed a send
    #[error("Delivery to {destination} failed [{code}]: {detail}")]
    Delivery {
        destination: String,
        code: String,
        detail: String,
    },

    /// Destination store lookup failed
    #[error("Destination lookup for {alarm_identity} failed: {source}")]
    Resolution {
        alarm_identity: String,
        #[source]
        source: StoreError,
    },

    /// Idempotency store failure
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl NotifierError {
    /// Errors that will fail identically on every redelivery
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            Self::Decode(_) | Self::UnknownState(_) | Self::Config(_) | Self::Internal(_)
        )
    }

    /// Errors expected to clear up on redelivery
    pub fn is_retryable(&self) -> bool {
        !self.is_permanent()
    }

    /// Stable identifier for logs and reports
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Decode(_) => "decode",
            Self::UnknownState(_) => "unknown_state",
            Self::GuardTimeout { .. } => "guard_timeout",
            Self::CompletionNotPersisted { .. } => "completion_not_persisted",
            Self::Delivery { .. } => "delivery",
            Self::Resolution { .. } => "resolution",
            Self::Store(_) => "store",
            Self::Config(_) => "config",
            Self::Internal(_) => "internal",
        }
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }
}

impl From<serde_json::Error> for NotifierError {
    fn from(err: serde_json::Error) -> Self {
        NotifierError::Decode(err.to_string())
    }
}

impl From<common::Error> for NotifierError {
    fn from(err: common::Error) -> Self {
        NotifierError::Config(err.to_string())
    }
}

// HTTP response conversion for Axum
impl IntoResponse for NotifierError {
    fn into_response(self) -> Response {
        let status = if self.is_permanent() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        };

        let body = Json(json!({
            "error": self.to_string(),
            "kind": self.kind(),
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}
