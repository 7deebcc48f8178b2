//! API Routes
//!
//! Configures the Axum router with all gateway endpoints.

use axum::{
    extract::Request,
    middleware::{self, Next},
    response::Response,
    routing::{delete, get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

use super::auth::require_auth;
use super::handlers::{
    delete_handler, exists_handler, expire_handler, fallback_handler, get_handler,
    health_handler, set_handler, ttl_handler, AppState,
};

/// Creates the main router with all endpoints configured.
///
/// # Endpoints
/// - `POST /set` - Store a key-value pair, optionally with a TTL
/// - `GET /get/:key` - Retrieve a value by key
/// - `DELETE /delete/:key` - Delete a key
/// - `GET /exists/:key` - Check whether a key exists
/// - `POST /expire` - Set a TTL on a key
/// - `GET /ttl/:key` - Remaining TTL of a key
/// - `GET /health` - Health check endpoint
///
/// Anything else, including a known path with the wrong method, answers
/// 404 `Endpoint not found.`.
///
/// # Middleware
/// Outermost first: CORS, request logging and tracing (when enabled),
/// then the authorization gate.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let mut router = Router::new()
        .route("/set", post(set_handler).fallback(fallback_handler))
        .route("/get/:key", get(get_handler).fallback(fallback_handler))
        .route("/delete/:key", delete(delete_handler).fallback(fallback_handler))
        .route("/exists/:key", get(exists_handler).fallback(fallback_handler))
        .route("/expire", post(expire_handler).fallback(fallback_handler))
        .route("/ttl/:key", get(ttl_handler).fallback(fallback_handler))
        .route("/health", get(health_handler).fallback(fallback_handler))
        .fallback(fallback_handler)
        .layer(middleware::from_fn_with_state(
            state.auth.clone(),
            require_auth,
        ));

    if state.request_logging {
        router = router
            .layer(middleware::from_fn(log_request))
            .layer(TraceLayer::new_for_http());
    }

    router.layer(cors).with_state(state)
}

/// One line per request naming the worker that handles it.
async fn log_request(request: Request, next: Next) -> Response {
    info!(
        "Worker {} is handling request for {} {}",
        std::process::id(),
        request.method(),
        request.uri()
    );
    next.run(request).await
}
