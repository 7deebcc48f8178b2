//! Background Tasks Module
//!
//! # Tasks
//! - Expiry sweep: reclaims expired entries of the in-process upstream

mod cleanup;

pub use cleanup::spawn_sweep_task;
