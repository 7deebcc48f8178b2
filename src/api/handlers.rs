//! API Handlers
//!
//! One handler per route. Each translates the request into exactly one
//! store operation and wraps the outcome in the response envelope.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Json,
};
use tracing::debug;

use super::auth::AuthPolicy;
use crate::config::Config;
use crate::error::{ApiError, Result};
use crate::models::responses::{deleted_message, expire_message, not_found_message, set_message};
use crate::models::{
    Envelope, ExistsResponse, ExpireRequest, GetResponse, HealthResponse, SetRequest,
    TtlResponse,
};
use crate::store::StoreConnection;

/// Application state shared across all handlers.
///
/// The store connection is created once per process and shared by every
/// request through the `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// The single upstream connection of this process
    pub store: Arc<StoreConnection>,
    /// Gate applied ahead of every route
    pub auth: AuthPolicy,
    /// Emit one log line per request
    pub request_logging: bool,
}

impl AppState {
    pub fn new(store: Arc<StoreConnection>) -> Self {
        Self {
            store,
            auth: AuthPolicy::AllowAll,
            request_logging: false,
        }
    }

    /// Builds the state around an already created connection.
    pub fn from_config(config: &Config, store: Arc<StoreConnection>) -> Self {
        Self {
            store,
            auth: AuthPolicy::from_config(config),
            request_logging: config.enable_logging,
        }
    }

    pub fn with_auth(mut self, auth: AuthPolicy) -> Self {
        self.auth = auth;
        self
    }
}

/// Turns a body extraction failure into a 400 envelope.
fn body<T>(payload: std::result::Result<Json<T>, JsonRejection>) -> Result<T> {
    payload
        .map(|Json(inner)| inner)
        .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))
}

/// Handler for POST /set
pub async fn set_handler(
    State(state): State<AppState>,
    payload: std::result::Result<Json<SetRequest>, JsonRejection>,
) -> Result<Json<Envelope<String>>> {
    let req = body(payload)?;
    if let Some(error_msg) = req.validate() {
        return Err(ApiError::BadRequest(error_msg));
    }

    state
        .store
        .set(&req.key, &req.value, req.ttl)
        .await
        .map_err(ApiError::store("Error setting key."))?;

    Ok(Json(Envelope::ok(set_message(&req.key))))
}

/// Handler for GET /get/:key
pub async fn get_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<Envelope<GetResponse>>> {
    let value = state
        .store
        .get(&key)
        .await
        .map_err(ApiError::store("Error getting key."))?;

    match value {
        Some(value) => Ok(Json(Envelope::ok(GetResponse::new(key, value)))),
        None => Err(ApiError::NotFound(not_found_message(&key))),
    }
}

/// Handler for DELETE /delete/:key
///
/// Succeeds whether or not the key existed.
pub async fn delete_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<Envelope<String>>> {
    state
        .store
        .del(&key)
        .await
        .map_err(ApiError::store("Error deleting key."))?;

    Ok(Json(Envelope::ok(deleted_message(&key))))
}

/// Handler for GET /exists/:key
pub async fn exists_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<Envelope<ExistsResponse>>> {
    let exists = state
        .store
        .exists(&key)
        .await
        .map_err(ApiError::store("Error checking key existence."))?;

    Ok(Json(Envelope::ok(ExistsResponse { key, exists })))
}

/// Handler for POST /expire
///
/// Expiring an absent key is not an error.
pub async fn expire_handler(
    State(state): State<AppState>,
    payload: std::result::Result<Json<ExpireRequest>, JsonRejection>,
) -> Result<Json<Envelope<String>>> {
    let req = body(payload)?;
    if let Some(error_msg) = req.validate() {
        return Err(ApiError::BadRequest(error_msg));
    }

    state
        .store
        .expire(&req.key, req.ttl)
        .await
        .map_err(ApiError::store("Error setting TTL."))?;

    Ok(Json(Envelope::ok(expire_message(&req.key, req.ttl))))
}

/// Handler for GET /ttl/:key
pub async fn ttl_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<Envelope<TtlResponse>>> {
    let ttl = state
        .store
        .get_ttl(&key)
        .await
        .map_err(ApiError::store("Error getting TTL."))?;

    Ok(Json(Envelope::ok(TtlResponse { key, ttl })))
}

/// Handler for GET /health
///
/// Answers without touching the store.
pub async fn health_handler() -> Json<Envelope<HealthResponse>> {
    Json(Envelope::ok(HealthResponse::healthy()))
}

/// Any unknown path, or a known path with the wrong method.
pub async fn fallback_handler() -> ApiError {
    debug!(pid = std::process::id(), "No route matched");
    ApiError::NotFound("Endpoint not found.".to_string())
}
