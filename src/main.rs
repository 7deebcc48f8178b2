//! KV Gateway - HTTP front door for a Redis-compatible store
//!
//! The same binary runs as supervisor or as worker. The supervisor re-executes
//! itself once per worker slot; workers find their slot in the environment.

use std::net::SocketAddr;

use anyhow::Context;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kv_gateway::cluster::{bind_shared, RestartPolicy, Role, WorkerCommand, WorkerSupervisor};
use kv_gateway::{serve, Config};

/// Main entry point for the gateway.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Detect the role of this process
/// 4. Supervisor: fork the worker pool and keep it alive until a signal
/// 5. Worker / standalone: bind the shared port and serve until a signal
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kv_gateway=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    let role = Role::detect(&config);
    info!(
        pid = std::process::id(),
        ?role,
        "Configuration loaded: port={}, workers={}, cluster_enabled={}, request_logging={}",
        config.server_port,
        config.worker_count(),
        config.cluster_enabled,
        config.enable_logging
    );

    if role.serves_requests() {
        run_server(&config).await
    } else {
        run_supervisor(&config).await
    }
}

async fn run_supervisor(config: &Config) -> anyhow::Result<()> {
    info!(pid = std::process::id(), "Master {} is running", std::process::id());

    let command = WorkerCommand::current_exe().context("cannot locate own executable")?;
    let handle = WorkerSupervisor::new(
        command,
        config.worker_count(),
        RestartPolicy::from_config(config),
    )
    .start()
    .await?;

    let token = handle.shutdown_token();
    tokio::spawn(async move {
        shutdown_signal().await;
        token.cancel();
    });

    if let Err(err) = handle.wait().await {
        error!(pid = std::process::id(), error = %err, "Supervisor stopped");
        return Err(err.into());
    }

    info!(pid = std::process::id(), "Supervisor shutdown complete");
    Ok(())
}

async fn run_server(config: &Config) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = bind_shared(addr).with_context(|| format!("failed to bind {}", addr))?;

    serve(config, listener, shutdown_signal()).await
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(error = %err, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!(pid = std::process::id(), "Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!(pid = std::process::id(), "Received SIGTERM, initiating shutdown...");
        }
    }
}
