//! Unified server error type.
//!
//! Every handler returns `Result<T, ServerError>`, which implements
//! [`axum::response::IntoResponse`] so errors are automatically converted
//! to a JSON-body HTTP response with an appropriate status code.
//!
//! Internal errors (Database, Internal) are logged with full detail but only
//! a generic message is returned to the caller.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use gradient_agent::AgentError;
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

/// All errors that can occur in the gradient-server request lifecycle.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Propagated from the SQLite store.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The conversation (or other resource) does not exist or is not owned
    /// by the caller.
    #[error("not found: {0}")]
    NotFound(String),

    /// The caller sent an invalid or malformed request.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The caller's credentials are missing or invalid.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Another turn is already running on the conversation.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The agent endpoint has not been configured by an admin.
    #[error("agent endpoint not configured by admin")]
    Configuration,

    /// The agent answered with a non-2xx status.
    #[error("agent returned HTTP {status}")]
    Upstream { status: u16 },

    /// The agent could not be reached.
    #[error("agent unavailable: {0}")]
    UpstreamUnavailable(String),

    /// An unclassified internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, client_message) = match &self {
            // Client-facing errors: expose the message directly.
            ServerError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            ServerError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            ServerError::Unauthorized(m) => (StatusCode::UNAUTHORIZED, m.clone()),
            ServerError::Conflict(m) => (StatusCode::CONFLICT, m.clone()),
            ServerError::Configuration => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::Upstream { .. } => {
                warn!(error = %self, "agent call failed");
                (StatusCode::BAD_GATEWAY, self.to_string())
            }
            ServerError::UpstreamUnavailable(m) => {
                warn!(error = %m, "agent unreachable");
                (StatusCode::SERVICE_UNAVAILABLE, "agent unavailable".to_owned())
            }

            // Internal errors: log the full detail, return a generic message.
            ServerError::Database(e) => {
                error!(error = %e, "database error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_owned(),
                )
            }
            ServerError::Internal(m) => {
                error!(message = %m, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_owned(),
                )
            }
        };
        (status, Json(json!({ "error": client_message }))).into_response()
    }
}

impl From<AgentError> for ServerError {
    fn from(e: AgentError) -> Self {
        match e {
            AgentError::Upstream { status, body } => {
                warn!(status, body = %body, "agent error body");
                ServerError::Upstream { status }
            }
            AgentError::Unavailable(e) => ServerError::UpstreamUnavailable(e.to_string()),
            AgentError::InvalidResponse(m) => {
                ServerError::Internal(format!("agent sent an unreadable response: {m}"))
            }
        }
    }
}

impl From<validator::ValidationErrors> for ServerError {
    fn from(e: validator::ValidationErrors) -> Self {
        ServerError::BadRequest(e.to_string())
    }
}
