//! API Module
//!
//! HTTP handlers, routing and the authorization gate of the gateway.
//!
//! # Endpoints
//! - `POST /set` - Store a key-value pair
//! - `GET /get/:key` - Retrieve a value by key
//! - `DELETE /delete/:key` - Delete a key
//! - `GET /exists/:key` - Check whether a key exists
//! - `POST /expire` - Set a TTL on a key
//! - `GET /ttl/:key` - Remaining TTL of a key
//! - `GET /health` - Health check endpoint

pub mod auth;
pub mod handlers;
pub mod routes;

pub use auth::{require_auth, AuthPolicy};
pub use handlers::*;
pub use routes::create_router;
