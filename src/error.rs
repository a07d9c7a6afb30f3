//! Error types for llm-relay.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::provider::Provider;

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for llm-relay.
///
/// An upstream provider answering with a non-2xx status is not an error
/// here: that case is relayed as a normalized response with status 502.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    BadRequest(String),

    #[error("No {} API key available", provider.display_name())]
    NoCredential { provider: Provider },

    /// Always stored without its URL: Gemini keys travel in the query string.
    #[error("Upstream request failed: {0}")]
    Network(reqwest::Error),

    #[error("Upstream request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// HTTP status this error is answered with.
    pub fn status(&self) -> StatusCode {
        match self {
            Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::NoCredential { .. }
            | Error::Network(_)
            | Error::Timeout { .. }
            | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Network(err.without_url())
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();

        // Network and timeout failures share the generic message, with the
        // underlying cause attached for the caller.
        let body = match &self {
            Error::Network(_) | Error::Timeout { .. } | Error::Internal(_) => {
                serde_json::json!({
                    "success": false,
                    "error": "Internal server error",
                    "details": self.to_string(),
                })
            }
            _ => serde_json::json!({
                "success": false,
                "error": self.to_string(),
            }),
        };

        (status, axum::Json(body)).into_response()
    }
}
