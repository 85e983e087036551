use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use huddle_db::StoreError;

/// Errors a handler can return. Store errors keep their taxonomy and are
/// mapped onto status codes here.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("bad request: {0}")]
    BadRequest(&'static str),

    #[error("not found")]
    NotFound,

    #[error("payload too large")]
    PayloadTooLarge,

    #[error("internal error: {0}")]
    Internal(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Store(e) => match e {
                StoreError::NotFound { .. } | StoreError::InviteNotFound => StatusCode::NOT_FOUND,
                StoreError::Forbidden(_) | StoreError::EmailMismatch => StatusCode::FORBIDDEN,
                StoreError::Conflict(_) | StoreError::InviteAlreadyUsed => StatusCode::CONFLICT,
                StoreError::InvalidDestination(_) => StatusCode::BAD_REQUEST,
                StoreError::InviteExpired => StatusCode::GONE,
                StoreError::Sqlite(_) | StoreError::Json(_) | StoreError::LockPoisoned(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("Request failed: {}", self);
            return (status, Json(json!({ "error": "internal server error" }))).into_response();
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
