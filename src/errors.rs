use actix_web::{error::BlockingError, http::StatusCode, HttpResponse, ResponseError};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

use crate::helper::media_helpers::MediaError;
use crate::models::db_operations::DbError;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &str, message: impl Into<String>) -> Self {
        FieldError { field: field.to_string(), message: message.into() }
    }
}

/// Failures surfaced by the content API. Each variant maps to one HTTP status.
#[derive(Error, Debug)]
pub enum ContentError {
    #[error("Validation failed.")]
    ValidationFailed(Vec<FieldError>),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("Not logged in.")]
    Unauthorized,
    /// The inner text is logged but never sent to the caller.
    #[error("Storage failure: {0}")]
    StorageFailure(String),
}

impl ContentError {
    pub fn invalid(field: &str, message: impl Into<String>) -> Self {
        ContentError::ValidationFailed(vec![FieldError::new(field, message)])
    }
}

impl ResponseError for ContentError {
    fn status_code(&self) -> StatusCode {
        match self {
            ContentError::ValidationFailed(_) => StatusCode::BAD_REQUEST,
            ContentError::Conflict(_) => StatusCode::CONFLICT,
            ContentError::NotFound(_) => StatusCode::NOT_FOUND,
            ContentError::Forbidden(_) => StatusCode::FORBIDDEN,
            ContentError::Unauthorized => StatusCode::UNAUTHORIZED,
            ContentError::StorageFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let body = match self {
            ContentError::ValidationFailed(errors) => json!({
                "message": "Validation failed.",
                "errors": errors,
            }),
            ContentError::StorageFailure(detail) => {
                log::error!("Storage failure: {}", detail);
                json!({
                    "message": "A storage error occurred. Please retry the request.",
                    "retryable": true,
                })
            }
            other => json!({ "message": other.to_string() }),
        };
        HttpResponse::build(self.status_code()).json(body)
    }
}

impl From<DbError> for ContentError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(what) => ContentError::NotFound(what),
            DbError::Conflict(what) => ContentError::Conflict(what),
            other => ContentError::StorageFailure(other.to_string()),
        }
    }
}

impl From<rusqlite::Error> for ContentError {
    fn from(err: rusqlite::Error) -> Self {
        ContentError::StorageFailure(err.to_string())
    }
}

impl From<r2d2::Error> for ContentError {
    fn from(err: r2d2::Error) -> Self {
        ContentError::StorageFailure(format!("connection pool: {}", err))
    }
}

impl From<MediaError> for ContentError {
    fn from(err: MediaError) -> Self {
        match err {
            MediaError::UnsupportedType(_) | MediaError::TooLarge(_) => {
                ContentError::invalid("image", err.to_string())
            }
            other => ContentError::StorageFailure(other.to_string()),
        }
    }
}

impl From<BlockingError> for ContentError {
    fn from(err: BlockingError) -> Self {
        ContentError::StorageFailure(format!("blocking task: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::body::to_bytes;

    #[actix_web::test]
    async fn validation_errors_carry_field_detail() {
        let err = ContentError::invalid("title", "Title is required.");
        let resp = err.error_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body = to_bytes(resp.into_body()).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["message"], "Validation failed.");
        assert_eq!(value["errors"][0]["field"], "title");
    }

    #[actix_web::test]
    async fn storage_failures_hide_internal_detail() {
        let err = ContentError::StorageFailure("disk I/O error at /var/lib/db".to_string());
        let resp = err.error_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = to_bytes(resp.into_body()).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(!text.contains("/var/lib/db"));
        assert!(text.contains("\"retryable\":true"));
    }

    #[test]
    fn maps_statuses() {
        assert_eq!(ContentError::Conflict("dup".into()).status_code(), StatusCode::CONFLICT);
        assert_eq!(ContentError::NotFound("gone".into()).status_code(), StatusCode::NOT_FOUND);
        assert_eq!(ContentError::Forbidden("no".into()).status_code(), StatusCode::FORBIDDEN);
        assert_eq!(
            ContentError::from(DbError::NotFound("Post 9".into())).status_code(),
            StatusCode::NOT_FOUND
        );
    }
}
