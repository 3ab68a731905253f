//! Error types for the ingestion service

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Result type alias for ingestion operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ingestion service errors
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Request or job descriptor failed validation
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Task or artifact not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Unsupported file type
    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),

    /// File parsing error
    #[error("Failed to parse file '{filename}': {message}")]
    FileParse { filename: String, message: String },

    /// Download failed
    #[error("Download of '{url}' failed: {message}")]
    Download {
        url: String,
        message: String,
        transient: bool,
    },

    /// An external collaborator (extractor, playlist tool) failed
    #[error("{name} failed: {message}")]
    Collaborator {
        name: String,
        message: String,
        transient: bool,
    },

    /// Operation timed out
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Cooperative cancellation was observed
    #[error("Task was cancelled")]
    Cancelled,

    /// `start` was called on a task that already left `pending`
    #[error("Task {0} has already been started")]
    AlreadyStarted(String),

    /// Output artifact could not be written, even with the fallback schema
    #[error("Failed to write output '{path}': {message}")]
    OutputWrite { path: String, message: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request error
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a file parse error
    pub fn file_parse(filename: impl Into<String>, message: impl Into<String>) -> Self {
        Self::FileParse {
            filename: filename.into(),
            message: message.into(),
        }
    }

    /// Create a download error
    pub fn download(url: impl Into<String>, message: impl Into<String>, transient: bool) -> Self {
        Self::Download {
            url: url.into(),
            message: message.into(),
            transient,
        }
    }

    /// Create a collaborator error
    pub fn collaborator(
        name: impl Into<String>,
        message: impl Into<String>,
        transient: bool,
    ) -> Self {
        Self::Collaborator {
            name: name.into(),
            message: message.into(),
            transient,
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Whether retrying the same operation may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Download { transient, .. } | Error::Collaborator { transient, .. } => *transient,
            Error::Timeout(_) => true,
            Error::Io(err) => matches!(
                err.kind(),
                std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::UnexpectedEof
            ),
            Error::Http(err) => {
                err.is_timeout()
                    || err.is_connect()
                    || err
                        .status()
                        .map(|s| s.is_server_error() || s == reqwest::StatusCode::TOO_MANY_REQUESTS)
                        .unwrap_or(false)
            }
            _ => false,
        }
    }

    /// Short machine-readable name of the variant
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Config(_) => "config_error",
            Error::InvalidInput(_) => "invalid_input",
            Error::NotFound(_) => "not_found",
            Error::UnsupportedFileType(_) => "unsupported_type",
            Error::FileParse { .. } => "parse_error",
            Error::Download { .. } => "download_error",
            Error::Collaborator { .. } => "collaborator_error",
            Error::Timeout(_) => "timeout",
            Error::Cancelled => "cancelled",
            Error::AlreadyStarted(_) => "already_started",
            Error::OutputWrite { .. } => "output_error",
            Error::Io(_) => "io_error",
            Error::Json(_) => "json_error",
            Error::Http(_) => "http_error",
            Error::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::Config(_) | Error::InvalidInput(_) | Error::Json(_) => StatusCode::BAD_REQUEST,
            Error::UnsupportedFileType(_) | Error::FileParse { .. } => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::AlreadyStarted(_) => StatusCode::CONFLICT,
            Error::Download { .. } | Error::Http(_) => StatusCode::BAD_GATEWAY,
            Error::Collaborator { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Error::Cancelled
            | Error::OutputWrite { .. }
            | Error::Io(_)
            | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": {
                "type": self.kind(),
                "message": self.to_string(),
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(Error::download("http://x", "503", true).is_transient());
        assert!(!Error::download("http://x", "404", false).is_transient());
        assert!(Error::Timeout("fetch".into()).is_transient());
        assert!(!Error::UnsupportedFileType("exe".into()).is_transient());
        assert!(!Error::Cancelled.is_transient());

        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow disk");
        assert!(Error::from(io).is_transient());
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert!(!Error::from(io).is_transient());
    }

    #[test]
    fn test_error_response_status() {
        let resp = Error::NotFound("task abc".into()).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = Error::InvalidInput("empty url list".into()).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = Error::AlreadyStarted("abc".into()).into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }
}
