use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;

/// The error kinds of §7, shared by every component so the HTTP surface
/// can map any failure to the right status code without re-deriving one
/// per module.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("validation failed: {0}")]
    ValidationFailed(String),

    #[error("unauthenticated")]
    Unauthenticated,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("object store error: {0}")]
    StorageError(String),

    #[error("metadata store error: {0}")]
    MetadataError(String),

    #[error("queue error: {0}")]
    QueueError(String),

    #[error("bus error: {0}")]
    BusError(String),

    #[error("corruption detected: {0}")]
    Corruption(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("service overloaded")]
    ServiceOverloaded,
}

impl AppError {
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::ValidationFailed(_) => "ValidationFailed",
            AppError::Unauthenticated => "Unauthenticated",
            AppError::Forbidden(_) => "Forbidden",
            AppError::NotFound(_) => "NotFound",
            AppError::Conflict(_) => "Conflict",
            AppError::StorageError(_) => "StorageError",
            AppError::MetadataError(_) => "MetadataError",
            AppError::QueueError(_) => "QueueError",
            AppError::BusError(_) => "BusError",
            AppError::Corruption(_) => "Corruption",
            AppError::Timeout(_) => "Timeout",
            AppError::ServiceOverloaded => "ServiceOverloaded",
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    success: bool,
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    kind: &'static str,
    message: String,
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let status = match self {
            AppError::ValidationFailed(_) => actix_web::http::StatusCode::BAD_REQUEST,
            AppError::Unauthenticated => actix_web::http::StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => actix_web::http::StatusCode::FORBIDDEN,
            AppError::NotFound(_) => actix_web::http::StatusCode::NOT_FOUND,
            AppError::Conflict(_) => actix_web::http::StatusCode::CONFLICT,
            AppError::ServiceOverloaded => actix_web::http::StatusCode::SERVICE_UNAVAILABLE,
            AppError::Timeout(_) => actix_web::http::StatusCode::GATEWAY_TIMEOUT,
            AppError::StorageError(_)
            | AppError::MetadataError(_)
            | AppError::QueueError(_)
            | AppError::BusError(_)
            | AppError::Corruption(_) => actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
        };

        HttpResponse::build(status).json(ErrorEnvelope {
            success: false,
            error: ErrorBody {
                kind: self.kind(),
                message: self.to_string(),
            },
        })
    }
}

pub type AppResult<T> = Result<T, AppError>;

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => AppError::NotFound("row not found".into()),
            other => AppError::MetadataError(other.to_string()),
        }
    }
}

impl From<redis::RedisError> for AppError {
    fn from(e: redis::RedisError) -> Self {
        AppError::QueueError(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_are_stable() {
        assert_eq!(AppError::Unauthenticated.kind(), "Unauthenticated");
        assert_eq!(AppError::NotFound("x".into()).kind(), "NotFound");
    }

    #[test]
    fn maps_row_not_found_to_not_found() {
        let e: AppError = sqlx::Error::RowNotFound.into();
        assert!(matches!(e, AppError::NotFound(_)));
    }
}
