//! KV Gateway - HTTP front door for a Redis-compatible store
//!
//! Each serving process holds exactly one upstream connection shared by all
//! of its requests. A supervisor keeps a pool of such processes alive on a
//! shared port.

pub mod api;
pub mod cluster;
pub mod config;
pub mod error;
pub mod models;
pub mod server;
pub mod store;
pub mod tasks;

pub use api::{create_router, AppState, AuthPolicy};
pub use cluster::{Role, SupervisorHandle, WorkerSupervisor};
pub use config::Config;
pub use server::serve;
pub use store::{StoreConnection, StoreError};
pub use tasks::spawn_sweep_task;
