//! Request and Response models for the gateway API
//!
//! This module defines the DTOs (Data Transfer Objects) used for
//! serializing/deserializing HTTP request and response bodies.

pub mod requests;
pub mod responses;

// Re-export commonly used types
pub use requests::{ExpireRequest, SetRequest, MAX_KEY_LENGTH, MAX_TTL_SECONDS};
pub use responses::{
    Envelope, ErrorEnvelope, ExistsResponse, GetResponse, HealthResponse, TtlResponse,
};
