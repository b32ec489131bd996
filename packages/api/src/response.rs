// ABOUTME: Shared API response types and error handling
// ABOUTME: Maps error taxonomy kinds to HTTP statuses without parsing messages

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json as ResponseJson};
use chainlab_identity::StorageError;
use chainlab_sandbox::{ErrorKind, SandboxError};
use serde::Serialize;
use thiserror::Error;

use crate::auth::AuthError;

/// Standard API response wrapper
#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        ApiResponse {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: String) -> ApiResponse<()> {
        ApiResponse {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Sandbox(#[from] SandboxError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("{0}")]
    BadRequest(String),
}

/// Status mapping for the orchestrator taxonomy. Driven entirely by the
/// error kind, never by message text.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Conflict | ErrorKind::NotReady => StatusCode::CONFLICT,
        ErrorKind::StaleHandle => StatusCode::GONE,
        ErrorKind::RuntimeUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Runtime | ErrorKind::Transport => StatusCode::BAD_GATEWAY,
        ErrorKind::ExecTimeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Inconsistent | ErrorKind::Storage => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            ApiError::Sandbox(err) => (status_for(err.kind()), err.to_string()),
            ApiError::Storage(err) => match err {
                StorageError::NotFound(_) => (StatusCode::NOT_FOUND, err.to_string()),
                StorageError::Conflict(_) => (StatusCode::CONFLICT, err.to_string()),
                _ => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal storage error".to_string(),
                ),
            },
            ApiError::Auth(err) => match err {
                AuthError::Hash(_) => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                ),
                _ => (StatusCode::UNAUTHORIZED, err.to_string()),
            },
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message.clone()),
        };

        (status, ResponseJson(ApiResponse::<()>::error(message))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_taxonomy_status_mapping() {
        assert_eq!(status_for(ErrorKind::Conflict), StatusCode::CONFLICT);
        assert_eq!(status_for(ErrorKind::NotReady), StatusCode::CONFLICT);
        assert_eq!(status_for(ErrorKind::StaleHandle), StatusCode::GONE);
        assert_eq!(
            status_for(ErrorKind::RuntimeUnavailable),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(status_for(ErrorKind::Transport), StatusCode::BAD_GATEWAY);
        assert_eq!(
            status_for(ErrorKind::ExecTimeout),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(status_for(ErrorKind::NotFound), StatusCode::NOT_FOUND);
        assert_eq!(
            status_for(ErrorKind::Inconsistent),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
