//! Worker role detection and listener sharing.

use std::io;
use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpSocket};

use crate::config::Config;

/// Environment variable carrying the slot of a supervised worker.
pub const WORKER_ENV: &str = "KV_GATEWAY_WORKER";

/// What this process does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Spawns and replaces workers; serves nothing itself
    Supervisor,
    /// Serves requests as one member of a supervised pool
    Worker { slot: usize },
    /// Serves requests alone, without a supervisor
    Standalone,
}

impl Role {
    /// Derives the role from the environment of the current process.
    pub fn detect(config: &Config) -> Self {
        Self::resolve(std::env::var(WORKER_ENV).ok().as_deref(), config)
    }

    fn resolve(worker_var: Option<&str>, config: &Config) -> Self {
        if let Some(slot) = worker_var.and_then(|raw| raw.trim().parse().ok()) {
            return Self::Worker { slot };
        }
        if config.cluster_enabled {
            Self::Supervisor
        } else {
            Self::Standalone
        }
    }

    pub fn serves_requests(&self) -> bool {
        !matches!(self, Self::Supervisor)
    }
}

/// Binds `addr` so that sibling workers can bind it too. The kernel spreads
/// incoming connections across every listener on the port.
pub fn bind_shared(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = match addr {
        SocketAddr::V4(_) => TcpSocket::new_v4()?,
        SocketAddr::V6(_) => TcpSocket::new_v6()?,
    };
    socket.set_reuseaddr(true)?;
    #[cfg(all(unix, not(target_os = "solaris"), not(target_os = "illumos")))]
    socket.set_reuseport(true)?;
    socket.bind(addr)?;
    socket.listen(1024)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_env_wins() {
        let config = Config::default();
        assert_eq!(Role::resolve(Some("3"), &config), Role::Worker { slot: 3 });
    }

    #[test]
    fn test_cluster_flag_selects_role() {
        let clustered = Config::default();
        assert_eq!(Role::resolve(None, &clustered), Role::Supervisor);

        let single = Config {
            cluster_enabled: false,
            ..Config::default()
        };
        assert_eq!(Role::resolve(None, &single), Role::Standalone);
        assert_eq!(Role::resolve(Some("not-a-slot"), &single), Role::Standalone);
    }

    #[test]
    fn test_supervisor_serves_nothing() {
        assert!(!Role::Supervisor.serves_requests());
        assert!(Role::Worker { slot: 0 }.serves_requests());
        assert!(Role::Standalone.serves_requests());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_two_listeners_share_a_port() {
        let first = bind_shared("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = first.local_addr().unwrap();

        let second = bind_shared(addr).unwrap();
        assert_eq!(second.local_addr().unwrap().port(), addr.port());
    }
}
