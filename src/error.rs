use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::models::ApiEnvelope;
use crate::store::StoreError;

pub const NOT_FOUND_MESSAGE: &str = "Professor not found";

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("Name, NUPTK, position, and start date are required")]
    MissingFields,
    #[error("Start date must be a valid date (YYYY-MM-DD)")]
    InvalidStartDate,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("Professor not found")]
    NotFound,
    #[error(transparent)]
    Store(StoreError),
    #[error("failed to store uploaded file: {0}")]
    Storage(#[from] std::io::Error),
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::Validation(err.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateNuptk => ApiError::Validation(err.to_string()),
            other => ApiError::Store(other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Validation(message) => (StatusCode::BAD_REQUEST, message.clone()),
            ApiError::NotFound => (StatusCode::NOT_FOUND, NOT_FOUND_MESSAGE.to_string()),
            ApiError::Store(err) => {
                tracing::error!(error = %err, "store request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            ApiError::Storage(err) => {
                tracing::error!(error = %err, "upload write failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        (status, Json(ApiEnvelope::<()>::error(message))).into_response()
    }
}
