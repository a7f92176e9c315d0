//! HTTP error type for the public endpoints.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;
use tracing::error;

use crate::auth::{AuthError, ErrorResponse};
use crate::collaborators::CollaboratorError;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed or incomplete request.
    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Auth(#[from] AuthError),

    /// A collaborator failed while serving the request itself.
    #[error("Upstream service unavailable")]
    Upstream(#[from] CollaboratorError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Self::Auth(err) = self {
            return err.into_response();
        }

        let (status, code, message) = match &self {
            Self::Upstream(CollaboratorError::Rejected(reason)) => (
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR",
                reason.clone(),
            ),
            Self::Upstream(CollaboratorError::Timeout(_)) => (
                StatusCode::GATEWAY_TIMEOUT,
                "UPSTREAM_TIMEOUT",
                self.to_string(),
            ),
            Self::Upstream(e) => {
                error!("Upstream failure: {}", e);
                (StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR", self.to_string())
            }
            Self::BadRequest(_) | Self::Auth(_) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", self.to_string())
            }
        };

        let body = Json(ErrorResponse {
            error: code.to_string(),
            message,
        });

        (status, body).into_response()
    }
}
