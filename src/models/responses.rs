//! Response DTOs for the gateway API
//!
//! Every body is wrapped in an envelope: `{success: 1, data}` on success,
//! `{success: 0, error}` on failure.

use serde::Serialize;

/// Successful response wrapper.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope<T> {
    /// Always `1`
    pub success: u8,
    pub data: T,
}

impl<T: Serialize> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self { success: 1, data }
    }
}

/// Failed response wrapper.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelope {
    /// Always `0`
    pub success: u8,
    pub error: String,
}

impl ErrorEnvelope {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            success: 0,
            error: error.into(),
        }
    }
}

/// Payload for GET /get/:key
#[derive(Debug, Clone, Serialize)]
pub struct GetResponse {
    pub key: String,
    pub value: String,
}

impl GetResponse {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Payload for GET /exists/:key
#[derive(Debug, Clone, Serialize)]
pub struct ExistsResponse {
    pub key: String,
    pub exists: bool,
}

/// Payload for GET /ttl/:key
///
/// `ttl` is the remaining seconds, `-1` without expiry, `-2` for an absent key.
#[derive(Debug, Clone, Serialize)]
pub struct TtlResponse {
    pub key: String,
    pub ttl: i64,
}

/// Payload for GET /health
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Health status (e.g., "healthy")
    pub status: String,
    /// Process id of the worker that answered
    pub pid: u32,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
}

impl HealthResponse {
    /// Creates a new HealthResponse with current timestamp
    pub fn healthy() -> Self {
        Self {
            status: "healthy".to_string(),
            pid: std::process::id(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

// == Messages ==
pub fn set_message(key: &str) -> String {
    format!("Key \"{}\" set successfully.", key)
}

pub fn deleted_message(key: &str) -> String {
    format!("Key \"{}\" deleted.", key)
}

pub fn expire_message(key: &str, ttl: u64) -> String {
    format!("TTL for key \"{}\" set to {} seconds.", key, ttl)
}

pub fn not_found_message(key: &str) -> String {
    format!("Key \"{}\" not found.", key)
}
