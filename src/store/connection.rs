//! Store Connection
//!
//! Lazily established, single upstream handle shared by every request of a
//! worker process.
//!
//! The handle lives in a [`OnceCell`]: concurrent first requests wait on one
//! in-flight handshake instead of opening competing connections. The Redis
//! transport is a [`ConnectionManager`], whose clones multiplex onto the same
//! socket and which re-dials on its own after a drop. This module adds no lock
//! of its own around commands.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use redis::aio::{ConnectionLike, ConnectionManager, ConnectionManagerConfig};
use redis::{AsyncCommands, ErrorKind, RedisError, RedisResult};
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::store::{MemoryStore, StoreError, StoreResult, UpstreamAddr};

// == Connection State ==
/// Lifecycle of the upstream handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    Failed = 3,
}

impl ConnectionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Connecting,
            2 => Self::Connected,
            3 => Self::Failed,
            _ => Self::Disconnected,
        }
    }
}

// == Connection Options ==
/// Tunables for the handshake and for each operation.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Deadline applied to every operation, `None` waits indefinitely
    pub op_timeout: Option<Duration>,
    /// Deadline for a single handshake attempt
    pub connect_timeout: Duration,
    /// Handshake retries performed by the transport
    pub connect_retries: usize,
    /// Write value and TTL with one `SET .. EX` instead of `SET` then `EXPIRE`
    pub atomic_set_ttl: bool,
}

impl ConnectionOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            op_timeout: config.op_timeout(),
            connect_timeout: config.connect_timeout(),
            connect_retries: config.store_connect_retries,
            atomic_set_ttl: config.atomic_set_ttl,
        }
    }
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Live handle to the upstream.
#[derive(Clone)]
enum Upstream {
    Redis(ConnectionManager),
    Memory(Arc<RwLock<MemoryStore>>),
}

/// Why a guarded call did not produce a value.
enum Fault {
    Transport(RedisError),
    Deadline(Duration),
}

/// Which error kind a rejected command maps to.
#[derive(Clone, Copy)]
enum Access {
    Read,
    Write,
}

// == Store Connection ==
/// The one upstream connection of a worker process.
///
/// Not a global: bootstrap constructs it and hands an `Arc` to the HTTP state.
pub struct StoreConnection {
    addr: UpstreamAddr,
    options: ConnectionOptions,
    handle: OnceCell<Upstream>,
    memory: Option<Arc<RwLock<MemoryStore>>>,
    state: AtomicU8,
    opened: AtomicUsize,
    closed: AtomicBool,
}

impl StoreConnection {
    // == Constructors ==
    /// Creates an unconnected handle. Nothing is dialed until the first
    /// operation or an explicit [`connect`](Self::connect).
    pub fn new(addr: UpstreamAddr, options: ConnectionOptions) -> Self {
        let memory = match addr {
            UpstreamAddr::Memory => Some(Arc::new(RwLock::new(MemoryStore::new()))),
            UpstreamAddr::Redis(_) => None,
        };
        Self {
            addr,
            options,
            handle: OnceCell::new(),
            memory,
            state: AtomicU8::new(ConnectionState::Disconnected as u8),
            opened: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Builds the connection described by the configuration.
    pub fn from_config(config: &Config) -> StoreResult<Self> {
        let addr = UpstreamAddr::parse(&config.store_url)?;
        Ok(Self::new(addr, ConnectionOptions::from_config(config)))
    }

    /// In-process connection, mainly for tests.
    pub fn in_memory() -> Self {
        Self::new(UpstreamAddr::Memory, ConnectionOptions::default())
    }

    // == Introspection ==
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn addr(&self) -> &UpstreamAddr {
        &self.addr
    }

    /// Number of handshakes that produced a handle. Never exceeds one.
    pub fn connections_opened(&self) -> usize {
        self.opened.load(Ordering::Acquire)
    }

    /// The backing map when the upstream is in-process.
    pub fn memory_store(&self) -> Option<Arc<RwLock<MemoryStore>>> {
        self.memory.clone()
    }

    // == Connect ==
    /// Establishes the handle now instead of on first use.
    pub async fn connect(&self) -> StoreResult<()> {
        self.upstream().await.map(|_| ())
    }

    // == Close ==
    /// Stops serving operations. Later calls fail with `StoreUnavailable`;
    /// the socket is released when the last owner drops the connection.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.set_state(ConnectionState::Disconnected);
        info!(pid = std::process::id(), upstream = %self.addr, "Store connection closed");
    }

    // == Set ==
    /// Writes `value` at `key`, then applies `ttl` seconds when it is positive.
    ///
    /// In two-step mode a failing `EXPIRE` is reported as a write error while
    /// the value written by `SET` stays in place.
    pub async fn set(&self, key: &str, value: &str, ttl: Option<u64>) -> StoreResult<()> {
        let ttl = ttl.filter(|secs| *secs > 0);
        let atomic = self.options.atomic_set_ttl;
        let upstream = self.upstream().await?;
        let outcome = self
            .guarded(async move {
                match upstream {
                    Upstream::Redis(mut conn) => redis_set(&mut conn, key, value, ttl, atomic).await,
                    Upstream::Memory(store) => {
                        let mut store = store.write().await;
                        match ttl {
                            Some(secs) if atomic => store.set_with_ttl(key, value, secs),
                            Some(secs) => {
                                store.set(key, value);
                                store.expire(key, secs);
                            }
                            None => store.set(key, value),
                        }
                        Ok(())
                    }
                }
            })
            .await;
        let result = self.settle("set", key, Access::Write, outcome);
        if result.is_ok() {
            debug!(key, ?ttl, "Key set");
        }
        result
    }

    // == Get ==
    /// Current value, or `None` when the key is absent.
    pub async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let upstream = self.upstream().await?;
        let outcome = self
            .guarded(async move {
                match upstream {
                    Upstream::Redis(mut conn) => redis_get(&mut conn, key).await,
                    Upstream::Memory(store) => Ok(store.write().await.get(key)),
                }
            })
            .await;
        self.settle("get", key, Access::Read, outcome)
    }

    // == Delete ==
    /// Removes `key`. Succeeds whether or not it existed.
    pub async fn del(&self, key: &str) -> StoreResult<()> {
        let upstream = self.upstream().await?;
        let outcome = self
            .guarded(async move {
                match upstream {
                    Upstream::Redis(mut conn) => redis_del(&mut conn, key).await,
                    Upstream::Memory(store) => {
                        store.write().await.del(key);
                        Ok(())
                    }
                }
            })
            .await;
        self.settle("del", key, Access::Write, outcome)
    }

    // == Exists ==
    pub async fn exists(&self, key: &str) -> StoreResult<bool> {
        let upstream = self.upstream().await?;
        let outcome = self
            .guarded(async move {
                match upstream {
                    Upstream::Redis(mut conn) => redis_exists(&mut conn, key).await,
                    Upstream::Memory(store) => Ok(store.write().await.exists(key)),
                }
            })
            .await;
        self.settle("exists", key, Access::Read, outcome)
    }

    // == Expire ==
    /// Sets a TTL on an existing key. Absent keys are left untouched.
    pub async fn expire(&self, key: &str, ttl: u64) -> StoreResult<()> {
        let upstream = self.upstream().await?;
        let outcome = self
            .guarded(async move {
                match upstream {
                    Upstream::Redis(mut conn) => redis_expire(&mut conn, key, ttl).await,
                    Upstream::Memory(store) => {
                        store.write().await.expire(key, ttl);
                        Ok(())
                    }
                }
            })
            .await;
        self.settle("expire", key, Access::Write, outcome)
    }

    // == Get TTL ==
    /// Remaining seconds; `-1` when the key has no expiry, `-2` when absent.
    pub async fn get_ttl(&self, key: &str) -> StoreResult<i64> {
        let upstream = self.upstream().await?;
        let outcome = self
            .guarded(async move {
                match upstream {
                    Upstream::Redis(mut conn) => redis_ttl(&mut conn, key).await,
                    Upstream::Memory(store) => Ok(store.write().await.ttl(key)),
                }
            })
            .await;
        self.settle("ttl", key, Access::Read, outcome)
    }

    // == Internals ==
    /// Returns the handle, performing the single handshake on first use.
    async fn upstream(&self) -> StoreResult<Upstream> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Unavailable("connection closed".to_string()));
        }
        self.handle
            .get_or_try_init(|| self.open())
            .await
            .cloned()
    }

    async fn open(&self) -> StoreResult<Upstream> {
        self.set_state(ConnectionState::Connecting);
        let upstream = match &self.addr {
            UpstreamAddr::Memory => {
                let store = self
                    .memory
                    .clone()
                    .unwrap_or_else(|| Arc::new(RwLock::new(MemoryStore::new())));
                Upstream::Memory(store)
            }
            UpstreamAddr::Redis(url) => {
                let manager = self.dial(url).await.map_err(|err| {
                    self.observe("connect", &err);
                    StoreError::Unavailable(err.to_string())
                })?;
                Upstream::Redis(manager)
            }
        };
        self.opened.fetch_add(1, Ordering::AcqRel);
        self.set_state(ConnectionState::Connected);
        info!(pid = std::process::id(), upstream = %self.addr, "Store connection established");
        Ok(upstream)
    }

    async fn dial(&self, url: &str) -> RedisResult<ConnectionManager> {
        let client = redis::Client::open(url)?;
        let config = ConnectionManagerConfig::new()
            .set_number_of_retries(self.options.connect_retries)
            .set_connection_timeout(self.options.connect_timeout);
        ConnectionManager::new_with_config(client, config).await
    }

    /// Applies the per-operation deadline.
    async fn guarded<T, F>(&self, fut: F) -> Result<T, Fault>
    where
        F: Future<Output = RedisResult<T>>,
    {
        match self.options.op_timeout {
            Some(limit) => match tokio::time::timeout(limit, fut).await {
                Ok(result) => result.map_err(Fault::Transport),
                Err(_) => Err(Fault::Deadline(limit)),
            },
            None => fut.await.map_err(Fault::Transport),
        }
    }

    /// Classifies the outcome of an operation and updates the state.
    fn settle<T>(
        &self,
        op: &'static str,
        key: &str,
        access: Access,
        outcome: Result<T, Fault>,
    ) -> StoreResult<T> {
        match outcome {
            Ok(value) => {
                self.mark_healthy();
                Ok(value)
            }
            Err(Fault::Deadline(limit)) => {
                self.set_state(ConnectionState::Failed);
                warn!(pid = std::process::id(), op, key, ?limit, "Store operation timed out");
                Err(StoreError::Unavailable(format!(
                    "{op} timed out after {}ms",
                    limit.as_millis()
                )))
            }
            Err(Fault::Transport(err)) if is_connection_level(&err) => {
                self.observe(op, &err);
                Err(StoreError::Unavailable(err.to_string()))
            }
            Err(Fault::Transport(err)) => {
                self.mark_healthy();
                error!(pid = std::process::id(), op, key, error = %err, "Store command failed");
                let key = key.to_string();
                Err(match access {
                    Access::Read => StoreError::Read { key, source: err },
                    Access::Write => StoreError::Write { key, source: err },
                })
            }
        }
    }

    /// Error observer for connection-level faults. Logs and marks the
    /// connection failed; never panics or exits.
    fn observe(&self, op: &'static str, err: &RedisError) {
        self.set_state(ConnectionState::Failed);
        error!(
            pid = std::process::id(),
            op,
            upstream = %self.addr,
            error = %err,
            "Store connection error"
        );
    }

    fn mark_healthy(&self) {
        let previous = self
            .state
            .swap(ConnectionState::Connected as u8, Ordering::AcqRel);
        if previous == ConnectionState::Failed as u8 {
            info!(pid = std::process::id(), upstream = %self.addr, "Store connection recovered");
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

// == Redis Commands ==
// Generic over the transport so any `ConnectionLike` can stand in for the
// connection manager.

async fn redis_set<C>(
    conn: &mut C,
    key: &str,
    value: &str,
    ttl: Option<u64>,
    atomic: bool,
) -> RedisResult<()>
where
    C: ConnectionLike + Send + Sync,
{
    match ttl {
        Some(secs) if atomic => conn.set_ex(key, value, secs).await,
        Some(secs) => {
            conn.set::<_, _, ()>(key, value).await?;
            conn.expire(key, ttl_arg(secs)?).await
        }
        None => conn.set(key, value).await,
    }
}

async fn redis_get<C>(conn: &mut C, key: &str) -> RedisResult<Option<String>>
where
    C: ConnectionLike + Send + Sync,
{
    conn.get(key).await
}

async fn redis_del<C>(conn: &mut C, key: &str) -> RedisResult<()>
where
    C: ConnectionLike + Send + Sync,
{
    conn.del::<_, usize>(key).await.map(|_| ())
}

async fn redis_exists<C>(conn: &mut C, key: &str) -> RedisResult<bool>
where
    C: ConnectionLike + Send + Sync,
{
    conn.exists(key).await
}

async fn redis_expire<C>(conn: &mut C, key: &str, ttl: u64) -> RedisResult<()>
where
    C: ConnectionLike + Send + Sync,
{
    conn.expire::<_, bool>(key, ttl_arg(ttl)?).await.map(|_| ())
}

async fn redis_ttl<C>(conn: &mut C, key: &str) -> RedisResult<i64>
where
    C: ConnectionLike + Send + Sync,
{
    conn.ttl(key).await
}

/// `EXPIRE` takes a signed count; refuse values that would wrap.
fn ttl_arg(secs: u64) -> RedisResult<i64> {
    i64::try_from(secs).map_err(|_| {
        RedisError::from((
            ErrorKind::InvalidClientConfig,
            "TTL out of range",
            secs.to_string(),
        ))
    })
}

/// Whether an error concerns the link rather than the command.
fn is_connection_level(err: &RedisError) -> bool {
    err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() || err.is_timeout()
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use redis::Value;
    use redis_test::{MockCmd, MockRedisConnection};

    fn two_step() -> StoreConnection {
        StoreConnection::new(
            UpstreamAddr::Memory,
            ConnectionOptions {
                atomic_set_ttl: false,
                ..ConnectionOptions::default()
            },
        )
    }

    #[tokio::test]
    async fn test_lazy_connect() {
        let store = StoreConnection::in_memory();
        assert_eq!(store.state(), ConnectionState::Disconnected);
        assert_eq!(store.connections_opened(), 0);

        store.get("anything").await.unwrap();

        assert_eq!(store.state(), ConnectionState::Connected);
        assert_eq!(store.connections_opened(), 1);
    }

    #[tokio::test]
    async fn test_set_get_roundtrip() {
        let store = StoreConnection::in_memory();

        store.set("a", "1", None).await.unwrap();
        assert_eq!(store.get("a").await.unwrap().as_deref(), Some("1"));
        assert_eq!(store.get_ttl("a").await.unwrap(), -1);
    }

    #[tokio::test]
    async fn test_set_with_ttl_both_modes() {
        for store in [StoreConnection::in_memory(), two_step()] {
            store.set("a", "1", Some(5)).await.unwrap();
            let ttl = store.get_ttl("a").await.unwrap();
            assert!(ttl > 0 && ttl <= 5, "ttl {ttl} out of range");
        }
    }

    #[tokio::test]
    async fn test_zero_ttl_means_no_expiry() {
        let store = StoreConnection::in_memory();

        store.set("a", "1", Some(0)).await.unwrap();
        assert_eq!(store.get_ttl("a").await.unwrap(), -1);
    }

    #[tokio::test]
    async fn test_del_twice_succeeds() {
        let store = StoreConnection::in_memory();

        store.set("a", "1", None).await.unwrap();
        store.del("a").await.unwrap();
        store.del("a").await.unwrap();
        assert!(store.get("a").await.unwrap().is_none());
        assert!(!store.exists("a").await.unwrap());
    }

    #[tokio::test]
    async fn test_expire_absent_key_is_noop() {
        let store = StoreConnection::in_memory();

        store.expire("ghost", 10).await.unwrap();
        assert!(!store.exists("ghost").await.unwrap());
        assert_eq!(store.get_ttl("ghost").await.unwrap(), -2);
    }

    #[tokio::test]
    async fn test_concurrent_first_use_opens_one_connection() {
        let store = Arc::new(StoreConnection::in_memory());

        let handles: Vec<_> = (0..64)
            .map(|i| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.set(&format!("k{i}"), "v", None).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(store.connections_opened(), 1);
        for i in 0..64 {
            assert_eq!(
                store.get(&format!("k{i}")).await.unwrap().as_deref(),
                Some("v")
            );
        }
    }

    #[tokio::test]
    async fn test_closed_connection_is_unavailable() {
        let store = StoreConnection::in_memory();
        store.set("a", "1", None).await.unwrap();

        store.close().await;

        assert_eq!(store.state(), ConnectionState::Disconnected);
        assert!(matches!(
            store.get("a").await,
            Err(StoreError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_redis_fails_without_panicking() {
        let store = StoreConnection::new(
            UpstreamAddr::parse("redis://127.0.0.1:1").unwrap(),
            ConnectionOptions {
                connect_retries: 0,
                connect_timeout: Duration::from_millis(300),
                ..ConnectionOptions::default()
            },
        );

        let result = store.set("a", "1", None).await;

        assert!(matches!(result, Err(StoreError::Unavailable(_))));
        assert_eq!(store.state(), ConnectionState::Failed);
        assert_eq!(store.connections_opened(), 0);
    }

    // == Redis arm, scripted ==

    fn reply_error(message: &'static str) -> RedisError {
        RedisError::from((ErrorKind::ResponseError, message))
    }

    #[tokio::test]
    async fn test_two_step_expire_failure_keeps_value() {
        let mut conn = MockRedisConnection::new(vec![
            MockCmd::new(redis::cmd("SET").arg("k").arg("v"), Ok(Value::Okay)),
            MockCmd::new(
                redis::cmd("EXPIRE").arg("k").arg(5),
                Err::<i64, _>(reply_error("expire rejected")),
            ),
            MockCmd::new(
                redis::cmd("GET").arg("k"),
                Ok(Value::BulkString(b"v".to_vec())),
            ),
        ]);

        let store = two_step();
        let outcome = redis_set(&mut conn, "k", "v", Some(5), false)
            .await
            .map_err(Fault::Transport);
        let result = store.settle("set", "k", Access::Write, outcome);

        assert!(matches!(result, Err(StoreError::Write { ref key, .. }) if key == "k"));
        // No rollback was issued: the next command on the wire is the read.
        assert_eq!(
            redis_get(&mut conn, "k").await.unwrap().as_deref(),
            Some("v")
        );
    }

    #[tokio::test]
    async fn test_atomic_set_sends_single_setex() {
        let mut conn = MockRedisConnection::new(vec![MockCmd::new(
            redis::cmd("SETEX").arg("k").arg(5).arg("v"),
            Ok(Value::Okay),
        )]);

        redis_set(&mut conn, "k", "v", Some(5), true).await.unwrap();
    }

    #[tokio::test]
    async fn test_oversized_ttl_never_reaches_the_wire() {
        // Empty script: the conversion fails before anything is sent.
        let mut conn = MockRedisConnection::new(Vec::<MockCmd>::new());

        let err = redis_expire(&mut conn, "k", u64::MAX).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidClientConfig);

        let err = redis_set(&mut conn, "k", "v", Some(u64::MAX), false)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidClientConfig);
    }

    #[tokio::test]
    async fn test_rejected_commands_map_to_access_kind() {
        let mut conn = MockRedisConnection::new(vec![
            MockCmd::new(
                redis::cmd("GET").arg("k"),
                Err::<Value, _>(reply_error("WRONGTYPE")),
            ),
            MockCmd::new(
                redis::cmd("DEL").arg("k"),
                Err::<Value, _>(reply_error("READONLY")),
            ),
        ]);
        let store = StoreConnection::in_memory();

        let read = redis_get(&mut conn, "k").await.map_err(Fault::Transport);
        assert!(matches!(
            store.settle("get", "k", Access::Read, read),
            Err(StoreError::Read { .. })
        ));

        let write = redis_del(&mut conn, "k").await.map_err(Fault::Transport);
        assert!(matches!(
            store.settle("del", "k", Access::Write, write),
            Err(StoreError::Write { .. })
        ));
        // A rejected command says nothing about the link.
        assert_eq!(store.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_failed_connection_recovers_on_success() {
        let mut conn = MockRedisConnection::new(vec![
            MockCmd::new(redis::cmd("EXISTS").arg("k"), Ok(1i64)),
            MockCmd::new(redis::cmd("TTL").arg("k"), Ok(42i64)),
        ]);
        let store = StoreConnection::in_memory();

        let dropped = RedisError::from(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "broken pipe",
        ));
        let result: StoreResult<()> =
            store.settle("get", "k", Access::Read, Err(Fault::Transport(dropped)));
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
        assert_eq!(store.state(), ConnectionState::Failed);

        let exists = redis_exists(&mut conn, "k").await.map_err(Fault::Transport);
        assert!(store.settle("exists", "k", Access::Read, exists).unwrap());
        assert_eq!(store.state(), ConnectionState::Connected);

        let ttl = redis_ttl(&mut conn, "k").await.map_err(Fault::Transport);
        assert_eq!(store.settle("ttl", "k", Access::Read, ttl).unwrap(), 42);
    }

    #[test]
    fn test_io_errors_are_connection_level() {
        let refused = RedisError::from(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "refused",
        ));
        assert!(is_connection_level(&refused));

        let wrong_type = RedisError::from((redis::ErrorKind::TypeError, "wrong type"));
        assert!(!is_connection_level(&wrong_type));
    }
}
