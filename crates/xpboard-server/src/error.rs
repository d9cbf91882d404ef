//! HTTP error responses
//!
//! Errors are rendered in the GraphQL error shape so the dashboard client can
//! handle them uniformly:
//! `{"errors": [{"message": "...", "extensions": {"code": "UNAUTHENTICATED"}}]}`

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::error;
use xpboard_core::Error as CoreError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Unauthenticated(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Unauthenticated(_) => "UNAUTHENTICATED",
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Internal(_) => "INTERNAL_SERVER_ERROR",
        }
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Unauthenticated(msg) => ApiError::Unauthenticated(msg),
            CoreError::InvalidRequest(msg) => ApiError::BadRequest(msg),
            CoreError::NotFound(msg) => ApiError::BadRequest(format!("Not found: {}", msg)),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Internal(msg) = &self {
            error!("Request failed: {}", msg);
        }

        let body = json!({
            "errors": [{
                "message": self.to_string(),
                "extensions": { "code": self.code() }
            }]
        });

        (self.status(), Json(body)).into_response()
    }
}
