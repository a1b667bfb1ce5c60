//! HTTP-facing error type

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use gridshim_common::Error;
use tracing::{error, warn};

/// Errors returned by API handlers
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Missing session cookie")]
    MissingSession,

    #[error("Session expired")]
    SessionExpired,

    #[error("Invalid request payload")]
    InvalidPayload,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Only superuser can be logged in")]
    SuperuserRequired,

    #[error("Login Failed")]
    LoginFailed,

    #[error("Node {0} not found")]
    NodeNotFound(String),

    /// Upstream answered with an error or an unexpected body
    #[error("{0}")]
    Upstream(String),

    /// Local file could not be read or parsed
    #[error("{0}")]
    LocalResource(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::SessionExpired | ApiError::InvalidCredentials | ApiError::LoginFailed => {
                StatusCode::UNAUTHORIZED
            }
            ApiError::MissingSession
            | ApiError::InvalidPayload
            | ApiError::SuperuserRequired
            | ApiError::NodeNotFound(_)
            | ApiError::Upstream(_)
            | ApiError::LocalResource(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            ApiError::LocalResource(msg) => error!("Local resource error: {}", msg),
            ApiError::Upstream(msg) => warn!("Upstream error: {}", msg),
            _ => {}
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        match e {
            Error::Io(_) | Error::LocalResource(_) => ApiError::LocalResource(e.to_string()),
            other => ApiError::Upstream(other.to_string()),
        }
    }
}
