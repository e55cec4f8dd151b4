//! couchdb-utils Error Types

use thiserror::Error;

/// Result type alias for couchdb-utils operations
pub type Result<T> = std::result::Result<T, Error>;

/// couchdb-utils error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // Validation errors, raised before any request is issued
    #[error("Invalid resource: {0}")]
    InvalidResource(String),

    // Transport errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Request to {0} timed out")]
    Timeout(String),

    // Structured errors reported by the server
    #[error("{error}: {reason} (HTTP {status})")]
    Couch {
        error: String,
        reason: String,
        status: u16,
    },

    #[error("Server did not acknowledge {0}")]
    NotAcknowledged(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Deadline exceeded before the request was issued")]
    DeadlineExceeded,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// HTTP status reported by the server, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Couch { status, .. } => Some(*status),
            Error::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Document update conflict (stale or missing revision)
    pub fn is_conflict(&self) -> bool {
        self.status() == Some(409)
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    /// Check if this error was raised locally, before anything reached the network
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::InvalidResource(_) | Error::Config(_) | Error::ConfigParse(_)
        )
    }
}
