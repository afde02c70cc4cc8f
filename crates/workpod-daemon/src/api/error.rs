use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;
use workpod_platform::{ControlPlaneError, NamespaceError};

use super::models::ErrorResponse;
use crate::error::DaemonError;

/// Control API errors
///
/// Anything not classified below is reported as a 500 carrying the
/// underlying message.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("No accessible projects")]
    NoAccessibleProjects,

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    ControlPlane(#[from] ControlPlaneError),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NoAccessibleProjects => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::ControlPlane(_) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::NoAccessibleProjects => "NO_ACCESSIBLE_PROJECTS",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::ControlPlane(_) => "CONTROL_PLANE_ERROR",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<NamespaceError> for ApiError {
    fn from(e: NamespaceError) -> Self {
        match e {
            NamespaceError::EmptyProject => ApiError::BadRequest(e.to_string()),
            NamespaceError::Unconfigured => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<DaemonError> for ApiError {
    fn from(e: DaemonError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorResponse {
            error: self.to_string(),
            code: Some(self.code().to_string()),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError::NoAccessibleProjects.status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::NotFound("x".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(NamespaceError::EmptyProject).status(),
            StatusCode::BAD_REQUEST
        );
        // Control-plane failures are never passed through as their own status
        assert_eq!(
            ApiError::from(ControlPlaneError::from_status(404, "gone".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
