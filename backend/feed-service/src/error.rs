/// Error types for feed-service
///
/// Infrastructure failures are recovered close to where they happen (cache
/// errors fall back to the store, batch failures are retried by the worker
/// pool); whatever reaches a handler is converted to an HTTP response here.
use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use feed_cache::CacheError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// The social graph could not be read; fatal to a fanout
    #[error("Social graph error: {0}")]
    Graph(String),

    #[error("Invalid cursor: {0}")]
    InvalidCursor(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Fanout queue error: {0}")]
    Queue(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidCursor(_) | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Graph(_) => StatusCode::BAD_GATEWAY,
            AppError::Queue(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Database(_) | AppError::Cache(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();

        HttpResponse::build(status).json(serde_json::json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        }))
    }
}

/// Result type alias for feed-service operations
pub type Result<T> = std::result::Result<T, AppError>;
