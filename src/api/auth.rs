//! Request Gate
//!
//! Authorization checked before any route runs.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap},
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;

use crate::config::Config;
use crate::error::ApiError;

/// Which requests are let through.
#[derive(Debug, Clone)]
pub enum AuthPolicy {
    /// Every request passes
    AllowAll,
    /// `Authorization: Bearer <secret>` is required
    BearerToken(Arc<str>),
}

impl AuthPolicy {
    /// `AUTH_TOKEN` set selects the bearer gate, otherwise everything passes.
    pub fn from_config(config: &Config) -> Self {
        match &config.auth_token {
            Some(secret) => Self::BearerToken(Arc::from(secret.as_str())),
            None => Self::AllowAll,
        }
    }

    /// Allows or denies a request by its headers.
    pub fn authorize(&self, headers: &HeaderMap) -> Result<(), ApiError> {
        let secret = match self {
            Self::AllowAll => return Ok(()),
            Self::BearerToken(secret) => secret,
        };

        let header = headers
            .get(AUTHORIZATION)
            .ok_or(ApiError::MissingCredentials)?;
        let token = header
            .to_str()
            .ok()
            .and_then(|value| value.strip_prefix("Bearer "))
            .ok_or(ApiError::InvalidToken)?;

        if bool::from(token.as_bytes().ct_eq(secret.as_bytes())) {
            Ok(())
        } else {
            Err(ApiError::InvalidToken)
        }
    }
}

/// Middleware applying the [`AuthPolicy`] held in state.
pub async fn require_auth(
    State(policy): State<AuthPolicy>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    policy.authorize(request.headers())?;
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(auth: Option<&'static str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(value) = auth {
            headers.insert(AUTHORIZATION, HeaderValue::from_static(value));
        }
        headers
    }

    #[test]
    fn test_allow_all_ignores_headers() {
        let policy = AuthPolicy::AllowAll;
        assert!(policy.authorize(&headers(None)).is_ok());
        assert!(policy.authorize(&headers(Some("Bearer whatever"))).is_ok());
    }

    #[test]
    fn test_bearer_accepts_matching_token() {
        let policy = AuthPolicy::BearerToken(Arc::from("mysecrettoken"));
        assert!(policy.authorize(&headers(Some("Bearer mysecrettoken"))).is_ok());
    }

    #[test]
    fn test_bearer_missing_header() {
        let policy = AuthPolicy::BearerToken(Arc::from("mysecrettoken"));
        assert!(matches!(
            policy.authorize(&headers(None)),
            Err(ApiError::MissingCredentials)
        ));
    }

    #[test]
    fn test_bearer_rejects_wrong_or_malformed_token() {
        let policy = AuthPolicy::BearerToken(Arc::from("mysecrettoken"));
        for value in ["Bearer nope", "Basic bXlzZWNyZXR0b2tlbg==", "mysecrettoken", "Bearer "] {
            assert!(
                matches!(
                    policy.authorize(&headers(Some(value))),
                    Err(ApiError::InvalidToken)
                ),
                "{value} should be rejected"
            );
        }
    }

    #[test]
    fn test_from_config() {
        assert!(matches!(
            AuthPolicy::from_config(&Config::default()),
            AuthPolicy::AllowAll
        ));

        let config = Config {
            auth_token: Some("s3cret".to_string()),
            ..Config::default()
        };
        assert!(matches!(
            AuthPolicy::from_config(&config),
            AuthPolicy::BearerToken(secret) if &*secret == "s3cret"
        ));
    }
}
