//! Request DTOs for the gateway API
//!
//! Defines the structure of incoming HTTP request bodies.

use serde::Deserialize;

/// Maximum accepted key length in bytes
pub const MAX_KEY_LENGTH: usize = 1024;

/// Largest TTL accepted, in seconds (100 years). Redis stores deadlines in
/// signed milliseconds, so larger values are rejected or wrap upstream.
pub const MAX_TTL_SECONDS: u64 = 100 * 365 * 24 * 60 * 60;

/// Request body for the SET operation (POST /set)
///
/// # Fields
/// - `key`: The key to write
/// - `value`: The value to store
/// - `ttl`: Optional TTL in seconds, `0` or absent means no expiry
#[derive(Debug, Clone, Deserialize)]
pub struct SetRequest {
    pub key: String,
    pub value: String,
    #[serde(default)]
    pub ttl: Option<u64>,
}

impl SetRequest {
    /// Validates the request data
    ///
    /// Returns an error message if validation fails, None if valid.
    pub fn validate(&self) -> Option<String> {
        validate_key(&self.key).or_else(|| self.ttl.and_then(validate_ttl))
    }
}

/// Request body for the EXPIRE operation (POST /expire)
#[derive(Debug, Clone, Deserialize)]
pub struct ExpireRequest {
    pub key: String,
    /// TTL in seconds
    pub ttl: u64,
}

impl ExpireRequest {
    pub fn validate(&self) -> Option<String> {
        validate_key(&self.key).or_else(|| validate_ttl(self.ttl))
    }
}

fn validate_ttl(ttl: u64) -> Option<String> {
    (ttl > MAX_TTL_SECONDS).then(|| {
        format!("TTL exceeds maximum of {} seconds", MAX_TTL_SECONDS)
    })
}

fn validate_key(key: &str) -> Option<String> {
    if key.is_empty() {
        return Some("Key cannot be empty".to_string());
    }
    if key.len() > MAX_KEY_LENGTH {
        return Some(format!(
            "Key exceeds maximum length of {} bytes",
            MAX_KEY_LENGTH
        ));
    }
    None
}
