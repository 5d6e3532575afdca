use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use shared::ErrorResponse;

use crate::inference::service::AnalysisError;
use crate::storage::upload_store::StorageError;

/// Errors surfaced to HTTP clients as `{"error": "..."}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Unprocessable(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn validation(msg: &str) -> Self {
        ApiError::Validation(msg.to_string())
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorResponse {
            error: self.to_string(),
        })
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NoSelectedFile
            | StorageError::NotAllowed
            | StorageError::ContentMismatch
            | StorageError::InvalidName => ApiError::Validation(err.to_string()),
            StorageError::NotFound(_) => ApiError::NotFound(err.to_string()),
            StorageError::RetentionOutOfRange(_) | StorageError::Io(_) => {
                ApiError::Internal(err.to_string())
            }
        }
    }
}

impl From<AnalysisError> for ApiError {
    fn from(err: AnalysisError) -> Self {
        match err {
            AnalysisError::Decode(_) => ApiError::Unprocessable(err.to_string()),
            AnalysisError::Inference(_) | AnalysisError::InvalidOutput(_) => {
                ApiError::Internal(err.to_string())
            }
        }
    }
}
