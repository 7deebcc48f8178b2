//! Expiry Sweep Task
//!
//! Background task that periodically removes expired entries from the
//! in-process upstream. Reads already ignore expired entries; the sweep
//! only reclaims their memory.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::store::MemoryStore;

/// Spawns a task that sweeps `store` every `interval_secs` seconds.
///
/// The returned handle is aborted during graceful shutdown.
///
/// # Example
/// ```ignore
/// if let Some(memory) = connection.memory_store() {
///     let sweep = spawn_sweep_task(memory, config.sweep_interval);
///     // Later, during shutdown:
///     sweep.abort();
/// }
/// ```
pub fn spawn_sweep_task(store: Arc<RwLock<MemoryStore>>, interval_secs: u64) -> JoinHandle<()> {
    let interval = Duration::from_secs(interval_secs.max(1));

    tokio::spawn(async move {
        info!(
            pid = std::process::id(),
            "Starting expiry sweep with interval of {} seconds",
            interval.as_secs()
        );

        loop {
            tokio::time::sleep(interval).await;

            let removed = store.write().await.cleanup_expired();

            if removed > 0 {
                info!("Expiry sweep: removed {} expired entries", removed);
            } else {
                debug!("Expiry sweep: no expired entries found");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sweep_removes_expired_entries() {
        let store = Arc::new(RwLock::new(MemoryStore::new()));
        store.write().await.set_with_ttl("expire_soon", "value", 1);

        let handle = spawn_sweep_task(store.clone(), 1);

        tokio::time::sleep(Duration::from_millis(2500)).await;

        // `len` counts stored entries without evicting on read
        assert_eq!(store.read().await.len(), 0, "Expired entry should have been swept");

        handle.abort();
    }

    #[tokio::test]
    async fn test_sweep_preserves_valid_entries() {
        let store = Arc::new(RwLock::new(MemoryStore::new()));
        {
            let mut guard = store.write().await;
            guard.set_with_ttl("long_lived", "value", 3600);
            guard.set("forever", "value");
        }

        let handle = spawn_sweep_task(store.clone(), 1);

        tokio::time::sleep(Duration::from_millis(1500)).await;

        {
            let mut guard = store.write().await;
            assert_eq!(guard.len(), 2);
            assert_eq!(guard.get("long_lived").as_deref(), Some("value"));
        }

        handle.abort();
    }

    #[tokio::test]
    async fn test_sweep_can_be_aborted() {
        let store = Arc::new(RwLock::new(MemoryStore::new()));

        let handle = spawn_sweep_task(store, 1);
        handle.abort();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(handle.is_finished(), "Task should be finished after abort");
    }
}
