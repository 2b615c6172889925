use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

use crate::db::StoreError;
use crate::provider::ProviderError;
use crate::strip::StripError;

/// Error type returned by every HTTP handler.
///
/// Rendered as `{ "success": false, "message": ..., "error": ... }`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Strip(#[from] StripError),
    #[error("{0}")]
    Internal(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    fn parts(&self) -> (StatusCode, String, Option<String>) {
        match self {
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone(), None),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone(), None),
            ApiError::Store(StoreError::Validation(msg)) => {
                (StatusCode::BAD_REQUEST, msg.clone(), None)
            }
            ApiError::Store(err @ StoreError::NotFound { .. }) => {
                (StatusCode::NOT_FOUND, err.to_string(), None)
            }
            ApiError::Store(err @ StoreError::Database(_)) => {
                tracing::error!(error = %err, "settings store failure");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Settings store unavailable".into(),
                    Some(err.to_string()),
                )
            }
            ApiError::Provider(err) => {
                tracing::warn!(error = %err, "provider call failed");
                (
                    StatusCode::BAD_GATEWAY,
                    "Image provider request failed".into(),
                    Some(err.to_string()),
                )
            }
            ApiError::Strip(err @ StripError::Encode(_)) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to assemble strip".into(),
                Some(err.to_string()),
            ),
            ApiError::Strip(err) => (StatusCode::BAD_REQUEST, err.to_string(), None),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal error occurred".into(),
                    Some(msg.clone()),
                )
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, error) = self.parts();
        let body = match error {
            Some(error) => json!({ "success": false, "message": message, "error": error }),
            None => json!({ "success": false, "message": message }),
        };
        (status, Json(body)).into_response()
    }
}

/// Success envelope: `{ "success": true, "data": ... }`.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub data: T,
}

pub fn ok<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        success: true,
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        let cases = [
            (ApiError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (ApiError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (
                ApiError::Store(StoreError::NotFound {
                    entity: "effect",
                    id: "x".into(),
                }),
                StatusCode::NOT_FOUND,
            ),
            (
                ApiError::Store(StoreError::Database(sqlx::Error::PoolClosed)),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                ApiError::Provider(ProviderError::MissingJobId),
                StatusCode::BAD_GATEWAY,
            ),
            (ApiError::Strip(StripError::Empty), StatusCode::BAD_REQUEST),
        ];
        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }
}
