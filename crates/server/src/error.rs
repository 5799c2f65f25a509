//! API error type and its HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use sheetfind_core::{CoreError, Denied};
use sheetfind_search::SearchError;
use thiserror::Error;

/// Body of every error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Errors a handler can return.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("upload exceeds {limit} bytes")]
    PayloadTooLarge { limit: u64 },

    #[error("{0}")]
    Unprocessable(String),

    #[error("{0}")]
    Unavailable(String),

    #[error("{0}")]
    Internal(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(status = %status, error = %self, "request failed");
        } else {
            tracing::debug!(status = %status, error = %self, "request rejected");
        }
        (status, Json(ErrorBody { error: self.to_string() })).into_response()
    }
}

impl From<Denied> for ApiError {
    fn from(denied: Denied) -> Self {
        match denied {
            Denied::Unauthenticated => ApiError::Unauthorized(denied.to_string()),
            Denied::Inactive | Denied::Forbidden => ApiError::Forbidden(denied.to_string()),
        }
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::UserNotFound(_)
            | CoreError::DocumentNotFound(_)
            | CoreError::GrantNotFound(_) => ApiError::NotFound(err.to_string()),
            CoreError::UsernameTaken(_) | CoreError::EmailTaken(_) => {
                ApiError::Conflict(err.to_string())
            }
            CoreError::WrongPassword => ApiError::Forbidden(err.to_string()),
            CoreError::Validation(_) | CoreError::InvalidStorageKey(_) => {
                ApiError::BadRequest(err.to_string())
            }
            CoreError::Io(_) => ApiError::Unavailable(err.to_string()),
            CoreError::PasswordHash(_) | CoreError::Config(_) | CoreError::Json(_) => {
                ApiError::Internal(err.to_string())
            }
        }
    }
}

impl From<SearchError> for ApiError {
    fn from(err: SearchError) -> Self {
        match err {
            SearchError::UnreadableDocument { .. } | SearchError::SheetNotFound { .. } => {
                ApiError::Unprocessable(err.to_string())
            }
            SearchError::StorageUnavailable(_) => ApiError::Unavailable(err.to_string()),
            SearchError::Export(_) => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        ApiError::Internal(format!("background task failed: {err}"))
    }
}
