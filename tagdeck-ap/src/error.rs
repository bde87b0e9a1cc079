//! Error types for tagdeck-ap
//!
//! Defines module-specific error types using thiserror for clear error propagation.

use axum::http::StatusCode;
use thiserror::Error;

/// Main error type for tagdeck-ap
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file loading errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Database connection or query errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Errors bubbled up from the shared crate (key-value store, config)
    #[error(transparent)]
    Common(#[from] tagdeck_common::Error),

    /// HTTP server errors
    #[error("HTTP server error: {0}")]
    Http(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No chunk size at or above the floor could be allocated for the transfer ring
    #[error("Unable to allocate transfer buffers (last tried {chunk_size} bytes)")]
    BufferAllocation { chunk_size: usize },

    /// An upload is already in flight
    #[error("Another upload is already in progress")]
    UploadBusy,

    /// Upload cancelled, stalled, or the writer went away
    #[error("Upload aborted: {0}")]
    UploadAborted(String),

    /// Rejected settings or request payload
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid request
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Player actor is gone or refused the request
    #[error("Playback error: {0}")]
    Playback(String),

    /// Other errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// HTTP status used when this error terminates a request
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::UploadBusy => StatusCode::CONFLICT,
            Error::Common(tagdeck_common::Error::NotFound(_)) => StatusCode::NOT_FOUND,
            Error::Common(tagdeck_common::Error::InvalidInput(_)) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Convenience Result type using tagdeck-ap Error
pub type Result<T> = std::result::Result<T, Error>;
