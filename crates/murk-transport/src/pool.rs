use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Mutex;

use tokio::net::TcpStream;

use crate::{Connection, MurkTransportError, TransportConfig};

/// Client-side connection pool, keyed by relay address.
///
/// Checking out removes an idle connection (or opens a fresh one);
/// checking in returns it for reuse, capped per address. The pool never
/// validates idle connections — a stale one surfaces as an I/O error on
/// next use and the caller retries with a fresh checkout.
pub struct Pool {
    config: TransportConfig,
    idle: Mutex<HashMap<SocketAddr, Vec<Connection<TcpStream>>>>,
}

impl Pool {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            idle: Mutex::new(HashMap::new()),
        }
    }

    /// Take a connection to `addr`, reusing an idle one when available.
    pub async fn checkout(
        &self,
        addr: SocketAddr,
    ) -> Result<Connection<TcpStream>, MurkTransportError> {
        let reused = {
            let mut idle = self.idle.lock().expect("pool lock poisoned");
            idle.get_mut(&addr).and_then(Vec::pop)
        };
        match reused {
            Some(connection) => Ok(connection),
            None => {
                let connection = Connection::open(addr, self.config.clone()).await?;
                Ok(connection.with_peer_addr(addr))
            }
        }
    }

    /// Return a healthy connection for reuse. Dropped silently when the
    /// per-address idle cap is reached.
    pub fn checkin(&self, addr: SocketAddr, connection: Connection<TcpStream>) {
        let mut idle = self.idle.lock().expect("pool lock poisoned");
        let bucket = idle.entry(addr).or_default();
        if bucket.len() < self.config.max_idle_per_addr {
            bucket.push(connection);
        } else {
            tracing::debug!(%addr, "pool idle cap reached, dropping connection");
        }
    }

    /// Drop all idle connections to `addr` (relay restart, redirect).
    pub fn evict(&self, addr: SocketAddr) {
        let mut idle = self.idle.lock().expect("pool lock poisoned");
        idle.remove(&addr);
    }

    /// Number of idle connections currently pooled for `addr`.
    pub fn idle_count(&self, addr: SocketAddr) -> usize {
        let idle = self.idle.lock().expect("pool lock poisoned");
        idle.get(&addr).map(Vec::len).unwrap_or(0)
    }
}
