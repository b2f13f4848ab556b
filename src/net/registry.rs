//! Server-side registry of accepted connections.
//!
//! # Responsibilities
//! - Record every accepted connection and count them over the server lifetime
//! - Track last activity per connection
//! - Periodically close connections idle beyond the keep-alive timeout
//!
//! # Design Decisions
//! - Entries live in a `DashMap` so the acceptor, workers, and sweeper never
//!   contend on one lock
//! - Registration returns a guard; dropping it removes the entry
//! - Closing only flips the close signal; the connection task owns the socket
//!   and drops it when its pending read fails

use dashmap::DashMap;
use std::net::SocketAddr;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time;

use crate::lifecycle::ShutdownReceiver;
use crate::net::connection::{CloseSignal, ConnectionId, LastActivity, Tracked};
use crate::observability::metrics::{self, Side};

/// Shared state of one accepted connection.
#[derive(Debug)]
pub struct ServerConnection {
    id: ConnectionId,
    peer: SocketAddr,
    activity: LastActivity,
    signal: CloseSignal,
}

impl ServerConnection {
    fn new(peer: SocketAddr) -> Self {
        Self {
            id: ConnectionId::new(),
            peer,
            activity: LastActivity::new(),
            signal: CloseSignal::new(),
        }
    }

    pub fn idle_for(&self) -> Duration {
        self.activity.idle_for()
    }
}

impl Tracked for ServerConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn mark_active(&self) {
        self.activity.touch();
    }

    fn close_signal(&self) -> &CloseSignal {
        &self.signal
    }
}

#[derive(Debug)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Arc<ServerConnection>>,
    established: AtomicU64,
    keep_alive_timeout: Duration,
}

impl ConnectionRegistry {
    pub fn new(keep_alive_timeout: Duration) -> Self {
        Self {
            connections: DashMap::new(),
            established: AtomicU64::new(0),
            keep_alive_timeout,
        }
    }

    /// Record a new connection. The entry is removed when the guard drops.
    pub fn register(self: &Arc<Self>, peer: SocketAddr) -> RegisteredConnection {
        let connection = Arc::new(ServerConnection::new(peer));
        self.connections.insert(connection.id, connection.clone());
        self.established.fetch_add(1, Ordering::Relaxed);
        metrics::connection_established(Side::Server);

        tracing::debug!(connection_id = %connection.id, peer_addr = %peer, "Connection registered");

        RegisteredConnection {
            registry: Arc::clone(self),
            connection,
        }
    }

    /// Total connections registered since creation.
    pub fn connections_established(&self) -> u64 {
        self.established.load(Ordering::Relaxed)
    }

    /// Connections currently registered.
    pub fn open_connections(&self) -> usize {
        self.connections.len()
    }

    /// Close every connection idle longer than the keep-alive timeout and
    /// drop closed entries. Returns how many were closed by this call.
    pub fn close_stale(&self) -> usize {
        let mut closed = 0;
        self.connections.retain(|id, connection| {
            if connection.is_closed() {
                return false;
            }
            if connection.idle_for() > self.keep_alive_timeout {
                tracing::debug!(
                    connection_id = %id,
                    peer_addr = %connection.peer,
                    "Closing connection due to not being active"
                );
                connection.close();
                closed += 1;
                return false;
            }
            true
        });
        closed
    }

    /// Sweep on a fixed interval until shutdown.
    pub async fn run_sweeper(self: Arc<Self>, interval: Duration, mut shutdown: ShutdownReceiver) {
        tracing::debug!(
            interval_ms = interval.as_millis() as u64,
            keep_alive_ms = self.keep_alive_timeout.as_millis() as u64,
            "Keep-alive sweeper starting"
        );

        let mut ticker = time::interval_at(time::Instant::now() + interval, interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let closed = self.close_stale();
                    if closed > 0 {
                        tracing::trace!(closed, "Closed stale connections");
                    }
                }
                _ = shutdown.wait() => {
                    tracing::debug!("Keep-alive sweeper received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}

/// Guard that keeps a connection registered for its lifetime.
#[derive(Debug)]
pub struct RegisteredConnection {
    registry: Arc<ConnectionRegistry>,
    connection: Arc<ServerConnection>,
}

impl RegisteredConnection {
    pub fn shared(&self) -> Arc<ServerConnection> {
        Arc::clone(&self.connection)
    }
}

impl Deref for RegisteredConnection {
    type Target = ServerConnection;

    fn deref(&self) -> &Self::Target {
        &self.connection
    }
}

impl Drop for RegisteredConnection {
    fn drop(&mut self) {
        let reason = if self.connection.close() { "finished" } else { "evicted" };
        self.registry.connections.remove(&self.connection.id);
        metrics::connection_closed(Side::Server, reason);
        tracing::trace!(connection_id = %self.connection.id, reason, "Connection closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    #[test]
    fn counts_established_and_open() {
        let registry = Arc::new(ConnectionRegistry::new(Duration::from_secs(30)));

        let first = registry.register(peer());
        let second = registry.register(peer());
        assert_eq!(registry.connections_established(), 2);
        assert_eq!(registry.open_connections(), 2);

        drop(first);
        assert_eq!(registry.open_connections(), 1);
        assert_eq!(registry.connections_established(), 2);

        drop(second);
        assert_eq!(registry.open_connections(), 0);
    }

    #[test]
    fn closes_idle_connections_only() {
        let registry = Arc::new(ConnectionRegistry::new(Duration::from_millis(30)));

        let idle = registry.register(peer());
        std::thread::sleep(Duration::from_millis(50));
        let fresh = registry.register(peer());

        assert_eq!(registry.close_stale(), 1);
        assert!(idle.is_closed());
        assert!(!fresh.is_closed());
        assert_eq!(registry.open_connections(), 1);
    }

    #[test]
    fn activity_postpones_eviction() {
        let registry = Arc::new(ConnectionRegistry::new(Duration::from_millis(40)));
        let connection = registry.register(peer());

        std::thread::sleep(Duration::from_millis(25));
        connection.mark_active();
        std::thread::sleep(Duration::from_millis(25));

        assert_eq!(registry.close_stale(), 0);
        assert!(!connection.is_closed());
    }
}
