use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use log::error;
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

/// Error taxonomy for the relay. Every HTTP surface maps these to the same
/// status-code contract: 400 malformed, 401 rejected credential/signature,
/// 403 ownership violation, 404 missing agent/session/config, 500 internal.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("agent not found: {0}")]
    AgentNotFound(Uuid),

    #[error("session not found: {0}")]
    SessionNotFound(Uuid),

    #[error("no active {platform} configuration for agent {agent_id}")]
    ConfigNotFound { agent_id: Uuid, platform: String },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("upstream platform error: {0}")]
    Upstream(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl RelayError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::AgentNotFound(_) | Self::SessionNotFound(_) | Self::ConfigNotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            Self::Storage(_) | Self::Upstream(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status();

        // 5xx details stay in the log; callers get a generic body.
        let message = if status.is_server_error() {
            error!("request failed: {self}");
            "internal server error".to_string()
        } else {
            self.to_string()
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<diesel::result::Error> for RelayError {
    fn from(e: diesel::result::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

impl From<diesel::r2d2::PoolError> for RelayError {
    fn from(e: diesel::r2d2::PoolError) -> Self {
        Self::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(e: serde_json::Error) -> Self {
        Self::Internal(format!("serialization failed: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_follows_contract() {
        assert_eq!(
            RelayError::BadRequest("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            RelayError::Unauthorized("x".into()).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            RelayError::Forbidden("x".into()).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            RelayError::AgentNotFound(Uuid::nil()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            RelayError::Storage("x".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn not_found_message_names_what_is_missing() {
        let err = RelayError::ConfigNotFound {
            agent_id: Uuid::nil(),
            platform: "telegram".into(),
        };
        assert!(err.to_string().contains("telegram"));
        assert!(err.to_string().contains(&Uuid::nil().to_string()));
    }
}
