//! Error types for the VidRelay server

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::auth::AuthError;
use crate::platform::PublishError;
use crate::storage::WorkspaceError;
use crate::upload::UploadError;

/// Application-wide result type
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Missing or invalid client input
    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
}

impl From<PublishError> for AppError {
    fn from(err: PublishError) -> Self {
        match err {
            PublishError::Auth(e) => AppError::Auth(e),
            PublishError::Upload(e) => AppError::Upload(e),
        }
    }
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Auth(AuthError::InvalidProfile(_)) => StatusCode::BAD_REQUEST,
            AppError::Auth(AuthError::UnknownState) => StatusCode::BAD_REQUEST,
            AppError::Workspace(WorkspaceError::Stream(_)) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        } else {
            tracing::warn!("Rejected request: {}", self);
        }

        let body = Json(ErrorResponse {
            error: self.to_string(),
        });

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            AppError::Validation("No video provided".to_string()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::Upload(UploadError::RetriesExhausted {
                retries: 10,
                last_error: "A retriable HTTP error 503 occurred".to_string(),
            })
            .status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            AppError::Auth(AuthError::Denied("access_denied".to_string())).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            AppError::Auth(AuthError::InvalidProfile("../x".to_string())).status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_publish_error_conversion() {
        let err: AppError = PublishError::Upload(UploadError::MalformedResponse("{}".to_string())).into();
        assert!(matches!(err, AppError::Upload(UploadError::MalformedResponse(_))));
        assert_eq!(
            err.to_string(),
            "The upload failed with an unexpected response: {}"
        );
    }
}
