//! Gateway error responses

use crate::rpc::{RpcStatus, StatusCode as RpcCode};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Unknown method (404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Shutting down (503)
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<RpcStatus> for ServiceError {
    fn from(status: RpcStatus) -> Self {
        match status.code {
            RpcCode::InvalidArgument => ServiceError::BadRequest(status.message),
            RpcCode::Unimplemented => ServiceError::NotFound(status.message),
            RpcCode::Unavailable => ServiceError::Unavailable(status.message),
            RpcCode::Ok | RpcCode::Internal => ServiceError::Internal(status.message),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ServiceError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ServiceError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ServiceError::Unavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE", msg)
            }
            ServiceError::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg)
            }
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}
