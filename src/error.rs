use axum::http::StatusCode;
use axum::response::{ IntoResponse, Response };
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::auth::AuthError;

/// Failures surfaced by the relay before (or instead of) a streamed reply.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Unauthorized: {0}")]
    Unauthorized(#[from] AuthError),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Too many requests, slow down")]
    RateLimited,

    #[error("Upstream failure: {0}")]
    UpstreamFailure(String),

    #[error("History store error: {0}")]
    History(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl RelayError {
    pub fn status(&self) -> StatusCode {
        match self {
            RelayError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            RelayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            RelayError::NotFound(_) => StatusCode::NOT_FOUND,
            RelayError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            RelayError::UpstreamFailure(_) | RelayError::History(_) | RelayError::Config(_) =>
                StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Rebuilds an error from a relay's `{error}` body on the client side.
    pub fn from_status(status: StatusCode, message: String) -> Self {
        match status {
            StatusCode::UNAUTHORIZED => {
                let reason = message.trim_start_matches("Unauthorized: ").to_string();
                if reason == "No token provided" {
                    RelayError::Unauthorized(AuthError::MissingToken)
                } else {
                    RelayError::Unauthorized(AuthError::InvalidToken(reason))
                }
            }
            StatusCode::BAD_REQUEST => RelayError::BadRequest(message),
            StatusCode::NOT_FOUND => RelayError::NotFound(message),
            StatusCode::TOO_MANY_REQUESTS => RelayError::RateLimited,
            _ => RelayError::UpstreamFailure(message),
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}
