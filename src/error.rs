//! Error types for the HTTP surface
//!
//! Every failure leaves the gateway as a `{success: 0, error}` envelope.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;
use tracing::warn;

use crate::models::ErrorEnvelope;
use crate::store::StoreError;

// == Api Error Enum ==
/// Unified error type for the gateway endpoints.
#[derive(Error, Debug)]
pub enum ApiError {
    /// Unknown key or unknown endpoint
    #[error("{0}")]
    NotFound(String),

    /// Malformed body or invalid field
    #[error("{0}")]
    BadRequest(String),

    /// No `Authorization` header while the bearer gate is active
    #[error("Authorization header is missing")]
    MissingCredentials,

    /// `Authorization` header present but not the expected token
    #[error("Invalid token")]
    InvalidToken,

    /// A store operation failed; only the generic message is exposed
    #[error("{message}")]
    Store {
        message: &'static str,
        #[source]
        source: StoreError,
    },
}

impl ApiError {
    /// Wraps a store failure under a client-facing message.
    ///
    /// ```ignore
    /// store.del(&key).await.map_err(ApiError::store("Error deleting key."))?;
    /// ```
    pub fn store(message: &'static str) -> impl FnOnce(StoreError) -> ApiError {
        move |source| ApiError::Store { message, source }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::MissingCredentials => StatusCode::UNAUTHORIZED,
            ApiError::InvalidToken => StatusCode::FORBIDDEN,
            ApiError::Store { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

// == IntoResponse Implementation ==
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Store { message, source } = &self {
            warn!(pid = std::process::id(), cause = %source, "{}", message);
        }

        let status = self.status();
        let body = Json(ErrorEnvelope::new(self.to_string()));

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for handlers.
pub type Result<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_json(error: ApiError) -> (StatusCode, serde_json::Value) {
        let response = error.into_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[test]
    fn test_error_status_codes() {
        let test_cases = vec![
            (ApiError::NotFound("k".to_string()), StatusCode::NOT_FOUND),
            (ApiError::BadRequest("bad".to_string()), StatusCode::BAD_REQUEST),
            (ApiError::MissingCredentials, StatusCode::UNAUTHORIZED),
            (ApiError::InvalidToken, StatusCode::FORBIDDEN),
            (
                ApiError::store("Error getting key.")(StoreError::Unavailable("down".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (error, expected_status) in test_cases {
            assert_eq!(error.into_response().status(), expected_status);
        }
    }

    #[tokio::test]
    async fn test_error_envelope_shape() {
        let (status, json) = body_json(ApiError::NotFound("Key \"a\" not found.".into())).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["success"], 0);
        assert_eq!(json["error"], "Key \"a\" not found.");
        assert!(json.get("data").is_none());
    }

    #[tokio::test]
    async fn test_store_failure_hides_cause() {
        let error = ApiError::store("Error setting key.")(StoreError::Unavailable(
            "connection refused at 10.0.0.5:6379".into(),
        ));

        let (status, json) = body_json(error).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["error"], "Error setting key.");
        assert!(!json.to_string().contains("10.0.0.5"));
    }
}
