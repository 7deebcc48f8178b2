//! Worker Server
//!
//! Runs the HTTP surface of one serving process: builds the single store
//! connection, mounts the router on a listener and tears everything down on
//! shutdown.

use std::future::Future;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::api::{create_router, AppState};
use crate::config::Config;
use crate::store::StoreConnection;
use crate::tasks::spawn_sweep_task;

/// Serves requests on `listener` until `shutdown` resolves.
///
/// An unreachable upstream does not stop the process from serving: the
/// failure is logged and requests answer 500 until the store comes back.
pub async fn serve<F>(config: &Config, listener: TcpListener, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let pid = std::process::id();
    let store = Arc::new(
        StoreConnection::from_config(config).context("invalid REDIS_URL")?,
    );
    info!(pid, upstream = %store.addr(), "Store connection configured");

    if let Err(err) = store.connect().await {
        warn!(pid, error = %err, "Store not reachable at startup, serving anyway");
    }

    let sweep = store
        .memory_store()
        .map(|memory| spawn_sweep_task(memory, config.sweep_interval));

    let app = create_router(AppState::from_config(config, store.clone()));

    let addr = listener.local_addr().context("listener has no local address")?;
    info!(pid, "Server listening on http://{}", addr);

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("HTTP server failed");

    if let Some(handle) = sweep {
        handle.abort();
    }
    store.close().await;
    info!(pid, "Server shutdown complete");

    result
}
