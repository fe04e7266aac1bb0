//! Error types for the temp mail client.

use reqwest::StatusCode;
use thiserror::Error;

use crate::username::UsernameError;

#[derive(Debug, Error)]
/// Error type for all temp mail client operations.
pub enum Error {
    /// Underlying HTTP client error (connection refused, timeout, ...).
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    /// IO error when writing downloads.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Response body was not the JSON we expected.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    /// A configured or received URL could not be parsed.
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    /// HTTP response returned a non-success status with body.
    #[error("unexpected status {status}: {body}")]
    Status { status: StatusCode, body: String },
    /// Server answered `success: false` with a message.
    #[error("{message}")]
    Api {
        status: Option<StatusCode>,
        message: String,
    },
    /// The server no longer knows the session's mailbox.
    #[error("session not found")]
    SessionNotFound,
    /// Username rejected before any request was made.
    #[error("invalid username: {0}")]
    InvalidUsername(#[from] UsernameError),
    /// A reset or rename is already in flight.
    #[error("a new address is already being requested")]
    ResetInProgress,
    /// Malformed cross-frame message.
    #[error("frame message rejected: {0}")]
    Frame(String),
    /// Parse error with a message.
    #[error("parse error: {0}")]
    Parse(String),
}

/// Result type for temp mail client operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Shown when a reset or rename fails with 403.
pub const SESSION_EXPIRED_MESSAGE: &str = "Your session has expired. Reload to start a new one.";

impl Error {
    /// HTTP status attached to the error, if any.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::Http(err) => err.status(),
            Error::Status { status, .. } => Some(*status),
            Error::Api { status, .. } => *status,
            Error::SessionNotFound => Some(StatusCode::BAD_REQUEST),
            _ => None,
        }
    }

    /// Network failures and 5xx responses: retried with backoff.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Http(err) => err.status().map_or(true, |s| s.is_server_error()),
            Error::Status { status, .. } => status.is_server_error(),
            Error::Api { status, .. } => status.is_some_and(|s| s.is_server_error()),
            _ => false,
        }
    }

    /// The session must be recovered by requesting a mailbox again.
    pub fn is_session_invalid(&self) -> bool {
        matches!(self, Error::SessionNotFound)
    }

    /// Text for a toast: the server's own message when it sent one,
    /// otherwise `fallback` (or the session-expired wording on 403).
    pub fn user_message(&self, fallback: &str) -> String {
        match self {
            Error::Api { message, .. } if !message.trim().is_empty() => message.clone(),
            Error::InvalidUsername(err) => err.to_string(),
            Error::ResetInProgress => self.to_string(),
            _ if self.status() == Some(StatusCode::FORBIDDEN) => {
                SESSION_EXPIRED_MESSAGE.to_string()
            }
            _ => fallback.to_string(),
        }
    }
}
