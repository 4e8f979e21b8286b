//! Error types for the relay core and its HTTP surface

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use thiserror::Error;

/// Failures raised by a storage backend
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("blob not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("object store error: {0}")]
    Remote(String),
}

/// Failures surfaced by the object registry and the HTTP layer
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("failed to persist upload: {0}")]
    BackendSave(#[source] StorageError),

    /// Absent and expired codes share this variant.
    #[error("File not found or has expired.")]
    NotFoundOrExpired,

    #[error("no free code after {attempts} attempts")]
    CodeSpaceExhausted { attempts: usize },

    #[error("failed to locate stored blob: {0}")]
    Retrieval(#[source] StorageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type RelayResult<T> = Result<T, RelayError>;

impl ResponseError for RelayError {
    fn status_code(&self) -> StatusCode {
        match self {
            RelayError::Validation(_) => StatusCode::BAD_REQUEST,
            RelayError::NotFoundOrExpired => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let body = match self {
            RelayError::Validation(reason) => reason.clone(),
            RelayError::NotFoundOrExpired => self.to_string(),
            _ => "Server error".to_string(),
        };
        HttpResponse::build(self.status_code()).body(body)
    }
}
