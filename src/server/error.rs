use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::error;

use crate::device::{ApproveError, ErrorBody, ErrorCode, StartError, StoreError};

/// Error half of every handler. Bodies are always `{ "error": <code> }`.
#[derive(Debug)]
pub enum ApiError {
    Domain(StatusCode, ErrorCode),
    Unavailable(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match self {
            Self::Domain(status, code) => (status, code),
            Self::Unavailable(reason) => {
                error!(reason = %reason, "request failed on infrastructure");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    ErrorCode::TemporarilyUnavailable,
                )
            }
        };
        (status, Json(ErrorBody { error: code })).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(error: StoreError) -> Self {
        Self::Unavailable(error.to_string())
    }
}

impl From<StartError> for ApiError {
    fn from(error: StartError) -> Self {
        Self::Unavailable(error.to_string())
    }
}

impl From<ApproveError> for ApiError {
    fn from(error: ApproveError) -> Self {
        match error {
            ApproveError::UnknownUserCode => {
                Self::Domain(StatusCode::NOT_FOUND, ErrorCode::UnknownUserCode)
            }
            ApproveError::AlreadyUsed => Self::Domain(StatusCode::CONFLICT, ErrorCode::AlreadyUsed),
            ApproveError::Expired => Self::Domain(StatusCode::GONE, ErrorCode::Expired),
            ApproveError::Store(store) => store.into(),
        }
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(error: tokio::task::JoinError) -> Self {
        Self::Unavailable(error.to_string())
    }
}
