//! Configuration Module
//!
//! Handles loading and managing gateway configuration from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Gateway configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP port shared by every worker
    pub server_port: u16,
    /// Emit one log line per handled request
    pub enable_logging: bool,
    /// Upstream store address (`redis://`, `rediss://`, `unix://` or `memory://`)
    pub store_url: String,
    /// Shared secret for the bearer-token gate, `None` allows every request
    pub auth_token: Option<String>,
    /// Worker pool size, 0 resolves to the number of CPUs
    pub workers: usize,
    /// Run a supervisor with a worker pool instead of a single process
    pub cluster_enabled: bool,
    /// Per-operation deadline in milliseconds, 0 disables it
    pub store_op_timeout_ms: u64,
    /// Upstream handshake deadline in milliseconds
    pub store_connect_timeout_ms: u64,
    /// Handshake retries delegated to the transport
    pub store_connect_retries: usize,
    /// Use a single `SET .. EX` when a TTL accompanies a write
    pub atomic_set_ttl: bool,
    /// Initial delay before replacing a worker that died shortly after another
    pub restart_backoff_ms: u64,
    /// Upper bound for the restart delay
    pub restart_backoff_max_ms: u64,
    /// Window in seconds used to count recent restarts
    pub restart_window_secs: u64,
    /// Restarts tolerated within the window, 0 = unlimited
    pub max_restarts: u32,
    /// Expiry sweep period for the in-process store
    pub sweep_interval: u64,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `PORT` - HTTP server port (default: 3000)
    /// - `ENABLE_LOGGING` - Per-request logging (default: false)
    /// - `REDIS_URL` - Upstream address (default: redis://127.0.0.1:6379)
    /// - `AUTH_TOKEN` - Bearer secret (default: unset, gate allows all)
    /// - `WORKERS` - Worker count (default: 0 = CPU count)
    /// - `CLUSTER_ENABLED` - Supervise a worker pool (default: true)
    /// - `STORE_OP_TIMEOUT_MS` - Operation deadline (default: 5000)
    /// - `STORE_CONNECT_TIMEOUT_MS` - Handshake deadline (default: 2000)
    /// - `STORE_CONNECT_RETRIES` - Handshake retries (default: 3)
    /// - `ATOMIC_SET_TTL` - Single-command set with TTL (default: true)
    /// - `RESTART_BACKOFF_MS` / `RESTART_BACKOFF_MAX_MS` - Restart delays (default: 100 / 10000)
    /// - `RESTART_WINDOW_SECS` - Restart counting window (default: 30)
    /// - `MAX_RESTARTS` - Restart ceiling within the window (default: 0)
    /// - `SWEEP_INTERVAL_SECS` - In-process expiry sweep (default: 1)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            server_port: parse_var("PORT").unwrap_or(defaults.server_port),
            enable_logging: parse_flag("ENABLE_LOGGING").unwrap_or(defaults.enable_logging),
            store_url: env::var("REDIS_URL")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.store_url),
            auth_token: env::var("AUTH_TOKEN").ok().filter(|v| !v.is_empty()),
            workers: parse_var("WORKERS").unwrap_or(defaults.workers),
            cluster_enabled: parse_flag("CLUSTER_ENABLED").unwrap_or(defaults.cluster_enabled),
            store_op_timeout_ms: parse_var("STORE_OP_TIMEOUT_MS")
                .unwrap_or(defaults.store_op_timeout_ms),
            store_connect_timeout_ms: parse_var("STORE_CONNECT_TIMEOUT_MS")
                .unwrap_or(defaults.store_connect_timeout_ms),
            store_connect_retries: parse_var("STORE_CONNECT_RETRIES")
                .unwrap_or(defaults.store_connect_retries),
            atomic_set_ttl: parse_flag("ATOMIC_SET_TTL").unwrap_or(defaults.atomic_set_ttl),
            restart_backoff_ms: parse_var("RESTART_BACKOFF_MS")
                .unwrap_or(defaults.restart_backoff_ms),
            restart_backoff_max_ms: parse_var("RESTART_BACKOFF_MAX_MS")
                .unwrap_or(defaults.restart_backoff_max_ms),
            restart_window_secs: parse_var("RESTART_WINDOW_SECS")
                .unwrap_or(defaults.restart_window_secs),
            max_restarts: parse_var("MAX_RESTARTS").unwrap_or(defaults.max_restarts),
            sweep_interval: parse_var("SWEEP_INTERVAL_SECS").unwrap_or(defaults.sweep_interval),
        }
    }

    /// Worker pool size with `0` resolved to the available parallelism.
    pub fn worker_count(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }

    /// Per-operation deadline, `None` when disabled.
    pub fn op_timeout(&self) -> Option<Duration> {
        (self.store_op_timeout_ms > 0).then(|| Duration::from_millis(self.store_op_timeout_ms))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.store_connect_timeout_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_port: 3000,
            enable_logging: false,
            store_url: "redis://127.0.0.1:6379".to_string(),
            auth_token: None,
            workers: 0,
            cluster_enabled: true,
            store_op_timeout_ms: 5000,
            store_connect_timeout_ms: 2000,
            store_connect_retries: 3,
            atomic_set_ttl: true,
            restart_backoff_ms: 100,
            restart_backoff_max_ms: 10_000,
            restart_window_secs: 30,
            max_restarts: 0,
            sweep_interval: 1,
        }
    }
}

fn parse_var<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

fn parse_flag(name: &str) -> Option<bool> {
    let raw = env::var(name).ok()?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.server_port, 3000);
        assert!(!config.enable_logging);
        assert_eq!(config.store_url, "redis://127.0.0.1:6379");
        assert!(config.auth_token.is_none());
        assert!(config.cluster_enabled);
        assert_eq!(config.max_restarts, 0);
    }

    #[test]
    fn test_worker_count_resolves_cpus() {
        let config = Config::default();
        assert!(config.worker_count() >= 1);

        let config = Config {
            workers: 3,
            ..Config::default()
        };
        assert_eq!(config.worker_count(), 3);
    }

    #[test]
    fn test_op_timeout_disabled_at_zero() {
        let config = Config {
            store_op_timeout_ms: 0,
            ..Config::default()
        };
        assert!(config.op_timeout().is_none());
        assert_eq!(
            Config::default().op_timeout(),
            Some(Duration::from_millis(5000))
        );
    }

    #[test]
    fn test_parse_flag_variants() {
        env::set_var("KV_GATEWAY_TEST_FLAG_ON", "TRUE");
        env::set_var("KV_GATEWAY_TEST_FLAG_OFF", "0");
        env::set_var("KV_GATEWAY_TEST_FLAG_BAD", "maybe");

        assert_eq!(parse_flag("KV_GATEWAY_TEST_FLAG_ON"), Some(true));
        assert_eq!(parse_flag("KV_GATEWAY_TEST_FLAG_OFF"), Some(false));
        assert_eq!(parse_flag("KV_GATEWAY_TEST_FLAG_BAD"), None);
        assert_eq!(parse_flag("KV_GATEWAY_TEST_FLAG_MISSING"), None);
    }
}
