use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid field: {0}")]
    InvalidField(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Persistence error: {0}")]
    Persistence(#[from] sqlx::Error),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Provider degraded: {0}")]
    ProviderDegraded(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<redis::RedisError> for AppError {
    fn from(e: redis::RedisError) -> Self {
        AppError::Store(e.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::Internal(format!("Serialization error: {}", e))
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::InvalidInput(_) | AppError::InvalidField(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::QuotaExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::ProviderDegraded(_) => StatusCode::BAD_GATEWAY,
            AppError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AppError::Persistence(_)
            | AppError::Store(_)
            | AppError::Config(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error_message = match self {
            AppError::InvalidInput(message)
            | AppError::InvalidField(message)
            | AppError::Unauthorized(message)
            | AppError::QuotaExceeded(message) => message,
            AppError::Persistence(ref e) => {
                tracing::error!("Persistence error: {:?}", e);
                "Database error occurred".to_string()
            }
            AppError::Store(ref message) => {
                tracing::error!("Store error: {}", message);
                "Cache error occurred".to_string()
            }
            AppError::ProviderDegraded(ref message) => {
                tracing::error!("Provider error: {}", message);
                "External service error".to_string()
            }
            AppError::Timeout(ref message) => {
                tracing::error!("Timeout: {}", message);
                "The assistant took too long to respond. Please try again.".to_string()
            }
            AppError::Config(ref message) | AppError::Internal(ref message) => {
                tracing::error!("Internal error: {}", message);
                "An error occurred while processing your request".to_string()
            }
        };

        let body = Json(json!({
            "error": error_message,
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
