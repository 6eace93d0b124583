//! Error types for parley-api

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using parley-api Error
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification reported to the view layer alongside an error message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Auth,
    NotFound,
    Validation,
    Server,
    Network,
    Busy,
    Load,
    Unauthenticated,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Auth => "auth",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Validation => "validation",
            ErrorKind::Server => "server",
            ErrorKind::Network => "network",
            ErrorKind::Busy => "busy",
            ErrorKind::Load => "load",
            ErrorKind::Unauthenticated => "unauthenticated",
        }
    }
}

/// Errors returned by the remote chat service
#[derive(Error, Debug)]
pub enum Error {
    /// Credential rejected (401/403)
    #[error("Authentication failed ({status}): {message}")]
    Auth { status: u16, message: String },

    /// Resource missing or owned by another user (404)
    #[error("Not found: {message}")]
    NotFound { message: String },

    /// Request rejected as malformed (400 and other client errors)
    #[error("Invalid request ({status}): {message}")]
    Validation { status: u16, message: String },

    /// Remote service failed (5xx)
    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    /// Transport failure: connect, timeout, broken body
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Success status with a body we could not decode
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
}

impl Error {
    /// Build the error matching an HTTP status code.
    ///
    /// Callers only pass non-success statuses; anything outside the 4xx/5xx
    /// ranges is treated as a server fault.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 | 403 => Error::Auth { status, message },
            404 => Error::NotFound { message },
            400..=499 => Error::Validation { status, message },
            _ => Error::Server { status, message },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Auth { .. } => ErrorKind::Auth,
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::Validation { .. } => ErrorKind::Validation,
            Error::Server { .. } | Error::UnexpectedResponse(_) => ErrorKind::Server,
            Error::Network(_) => ErrorKind::Network,
        }
    }

    /// Whether the credential was rejected and the session must end
    pub fn is_auth(&self) -> bool {
        matches!(self, Error::Auth { .. })
    }

    /// Server-provided message, without the variant prefix.
    pub fn message(&self) -> String {
        match self {
            Error::Auth { message, .. }
            | Error::NotFound { message }
            | Error::Validation { message, .. }
            | Error::Server { message, .. } => message.clone(),
            Error::Network(e) => e.to_string(),
            Error::UnexpectedResponse(detail) => detail.clone(),
        }
    }
}
