//! Error types for the streamer
//!
//! Validation and concurrency-guard errors are returned synchronously from
//! supervisor control calls. Errors that happen while the encoder runs are
//! reported through the event log instead and never surface here.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::media::MediaKind;

/// Main error type for the streamer
#[derive(Error, Debug)]
pub enum Error {
    /// Start request rejected before any side effect
    #[error("Validation error: {0}")]
    Validation(String),

    /// A required media directory is empty
    #[error("No media available: no {0} files uploaded")]
    NoMedia(MediaKind),

    /// A session already owns the encoder slot
    #[error("Session already active: {session_id}")]
    AlreadyActive { session_id: String },

    /// Stop requested but no session was ever started
    #[error("No streaming session is active")]
    NotActive,

    /// Encoder process could not be launched
    #[error("Failed to spawn encoder: {0}")]
    Spawn(String),

    /// Malformed media name or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Media asset or session not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Event log or shared-layer failure
    #[error("Storage error: {0}")]
    Storage(#[from] loopcast_common::Error),

    /// Media or playlist file I/O
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Event log query failure
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Convenience Result type using the streamer Error
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Stable machine-readable code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::NoMedia(_) => "NO_MEDIA",
            Error::AlreadyActive { .. } => "ALREADY_ACTIVE",
            Error::NotActive => "NOT_ACTIVE",
            Error::Spawn(_) => "SPAWN_ERROR",
            Error::InvalidInput(_) => "BAD_REQUEST",
            Error::NotFound(_) => "NOT_FOUND",
            Error::Storage(_) | Error::Io(_) | Error::Database(_) => "STORAGE_ERROR",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Error::Validation(_) | Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Error::NoMedia(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::AlreadyActive { .. } | Error::NotActive => StatusCode::CONFLICT,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Spawn(_) | Error::Storage(_) | Error::Io(_) | Error::Database(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }

        let body = Json(json!({
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            }
        }));

        (status, body).into_response()
    }
}
