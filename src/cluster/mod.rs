//! Cluster Module
//!
//! Multi-process topology: one supervisor process keeps a pool of worker
//! processes alive, and every worker binds the same port.
//!
//! Workers share nothing. Each one owns its own store connection.

mod policy;
mod supervisor;
mod worker;

pub use policy::{RestartDecision, RestartPolicy, RestartTracker};
pub use supervisor::{
    SupervisorError, SupervisorHandle, WorkerCommand, WorkerRecord, WorkerStatus,
    WorkerSupervisor,
};
pub use worker::{bind_shared, Role, WORKER_ENV};
