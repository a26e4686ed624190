// Crate-wide error taxonomy and HTTP mapping.
//
//! A `thiserror`-derived enum with `#[from]` conversions for the errors that
//! cross module boundaries, mapped to HTTP status at the transport boundary.

use axum::{http::StatusCode, response::IntoResponse, response::Response, Json};
use serde_json::json;
use thiserror::Error;
use tracing::error;
use uuid::Uuid;

/// Crate-wide error type. Transport layers map this to HTTP status codes
/// (`IntoResponse` below); the domain layer never constructs HTTP responses
/// directly.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Input failed a structural or semantic check.
    #[error("validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    /// Addressed entity does not exist or is soft-deleted.
    #[error("not found: {0}")]
    NotFound(String),

    /// Auth missing.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Auth present but insufficient.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Caller exceeded a rate limit. `reset_in` is seconds until the window
    /// resets, surfaced to the client as a retry hint.
    #[error("rate limited, retry in {reset_in}s")]
    RateLimited { reset_in: u64 },

    /// Uniqueness or state-transition conflict.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Circuit open, or a downstream health check failed.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Unexpected condition. Always logged with a trace id before the
    /// response is sent; the response body never carries internals.
    #[error("internal error")]
    Internal {
        trace_id: Uuid,
        #[source]
        source: anyhow::Error,
    },
}

impl CoreError {
    pub fn internal(source: impl Into<anyhow::Error>) -> Self {
        let trace_id = Uuid::new_v4();
        let source = source.into();
        error!(%trace_id, error = %source, "internal error");
        CoreError::Internal { trace_id, source }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        CoreError::Validation {
            message: message.into(),
            field: None,
        }
    }

    pub fn validation_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        CoreError::Validation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            CoreError::Validation { .. } => StatusCode::BAD_REQUEST,
            CoreError::NotFound(_) => StatusCode::NOT_FOUND,
            CoreError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            CoreError::Forbidden(_) => StatusCode::FORBIDDEN,
            CoreError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            CoreError::Conflict(_) => StatusCode::CONFLICT,
            CoreError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            CoreError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => CoreError::NotFound("row not found".into()),
            other => CoreError::internal(other),
        }
    }
}

impl IntoResponse for CoreError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            CoreError::Validation { message, field } => json!({
                "error": message,
                "field": field,
            }),
            CoreError::RateLimited { reset_in } => json!({
                "error": self.to_string(),
                "reset_in": reset_in,
            }),
            CoreError::Unavailable(_) => json!({
                "error": self.to_string(),
                "retry_after": 5,
            }),
            CoreError::Internal { trace_id, .. } => json!({
                "error": "internal error",
                "trace_id": trace_id.to_string(),
            }),
            _ => json!({ "error": self.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn validation_maps_to_400_with_field() {
        let err = CoreError::validation_field("name is required", "name");
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["field"], "name");
    }

    #[tokio::test]
    async fn rate_limited_maps_to_429_with_reset_in() {
        let response = CoreError::RateLimited { reset_in: 30 }.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let body = body_json(response).await;
        assert_eq!(body["reset_in"], 30);
    }

    #[tokio::test]
    async fn internal_error_never_leaks_source_detail_in_body() {
        let err = CoreError::internal(anyhow::anyhow!("db connection string leaked: secret"));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["error"], "internal error");
        assert!(body.get("trace_id").is_some());
    }

    #[test]
    fn not_found_maps_to_404() {
        assert_eq!(
            CoreError::NotFound("workflow".into()).status(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn unavailable_maps_to_503() {
        assert_eq!(
            CoreError::Unavailable("circuit open".into()).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn sqlx_row_not_found_maps_to_not_found() {
        let err: CoreError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, CoreError::NotFound(_)));
    }
}
