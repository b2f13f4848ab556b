//! Per-destination client connection pool with admission control.
//!
//! # Responsibilities
//! - Bound concurrent connections per destination with a semaphore
//! - Reuse idle connections, discarding ones that are closed or that the peer
//!   already hung up on
//! - Open new connections within the connect timeout
//! - Periodically close connections idle beyond the keep-alive timeout
//!
//! # Design Decisions
//! - Destinations are sharded in a `DashMap`; each holds a short-lived mutex
//!   over its available queue and a `DashMap` of leased connections
//! - A lease owns its semaphore permit, so dropping it always frees the slot
//! - Liveness is a sweep counter reset on every read and write; the I/O path
//!   never reads the clock

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use dashmap::DashMap;
use thiserror::Error;
use tokio::io::BufReader;
use tokio::net::TcpStream;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time;

use crate::client::destination::ConnectionDestination;
use crate::codec::{self, Parsed};
use crate::config::validation::{describe, validate_client_config, ValidationError};
use crate::config::ClientConfig;
use crate::http::request::Request;
use crate::http::response::Response;
use crate::lifecycle::{Shutdown, ShutdownReceiver};
use crate::net::{ActivityStream, CloseSignal, ConnectionId, IdleChecks, Tracked};
use crate::observability::metrics::{self, Side};

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("no connection slot for {destination} within {timeout:?}")]
    AdmissionTimeout {
        destination: ConnectionDestination,
        timeout: Duration,
    },

    #[error("connecting to {destination} timed out after {timeout:?}")]
    ConnectTimeout {
        destination: ConnectionDestination,
        timeout: Duration,
    },

    #[error("failed to connect to {destination}: {source}")]
    Connect {
        destination: ConnectionDestination,
        #[source]
        source: io::Error,
    },

    #[error("connection pool is closed")]
    Closed,

    #[error("invalid client config: {}", describe(.0))]
    InvalidConfig(Vec<ValidationError>),
}

/// Timeouts applied to every socket the client opens.
#[derive(Debug, Clone, Copy)]
pub struct ConnectOptions {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub keep_alive_timeout: Duration,
    pub check_interval: Duration,
}

impl From<&ClientConfig> for ConnectOptions {
    fn from(config: &ClientConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout(),
            read_timeout: config.read_timeout(),
            keep_alive_timeout: config.keep_alive_timeout(),
            check_interval: config.keep_alive_check_interval(),
        }
    }
}

/// Shared state of one client socket.
#[derive(Debug)]
pub struct ClientConnState {
    id: ConnectionId,
    destination: ConnectionDestination,
    idle: IdleChecks,
    signal: CloseSignal,
}

impl ClientConnState {
    pub fn destination(&self) -> &ConnectionDestination {
        &self.destination
    }

    /// Count one idle sweep. Returns `true` when the connection is stale.
    fn record_idle_check(&self) -> bool {
        self.idle.record_check()
    }
}

impl Tracked for ClientConnState {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn mark_active(&self) {
        self.idle.reset();
    }

    fn close_signal(&self) -> &CloseSignal {
        &self.signal
    }
}

type ClientStream = BufReader<ActivityStream<TcpStream, ClientConnState>>;

/// An open client socket. Dropping it closes the socket.
pub struct Connection {
    state: Arc<ClientConnState>,
    io: ClientStream,
}

impl Connection {
    fn new(stream: TcpStream, state: Arc<ClientConnState>, read_timeout: Duration) -> Self {
        let io = ActivityStream::new(stream, Arc::clone(&state))
            .with_read_timeout(Some(read_timeout));
        Self {
            state,
            io: BufReader::new(io),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.state.id
    }

    pub fn destination(&self) -> &ConnectionDestination {
        &self.state.destination
    }

    pub fn close(&self) {
        self.state.close();
    }

    pub fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    /// Write one request and read one response.
    pub async fn exchange(&mut self, request: &Request) -> io::Result<Response> {
        codec::write_request(&mut self.io, request).await?;
        match codec::read_response(&mut self.io).await? {
            Parsed::Message(response) => Ok(response),
            Parsed::Malformed(e) => Err(io::Error::new(io::ErrorKind::InvalidData, e)),
            Parsed::PeerClosed => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed before a response was received",
            )),
        }
    }

    /// Whether an idle connection can no longer carry an exchange: the peer
    /// closed it, or it holds bytes no request asked for.
    fn is_stale(&self) -> bool {
        if !self.io.buffer().is_empty() {
            return true;
        }
        let mut probe = [0u8; 1];
        match self.io.get_ref().get_ref().try_read(&mut probe) {
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => false,
            _ => true,
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        let reason = if self.state.close() { "dropped" } else { "closed" };
        metrics::connection_closed(Side::Client, reason);
        tracing::trace!(
            connection_id = %self.state.id,
            destination = %self.state.destination,
            reason,
            "Connection closed"
        );
    }
}

/// Open a socket within the connect timeout.
pub async fn open_connection(
    destination: &ConnectionDestination,
    options: &ConnectOptions,
) -> Result<Connection, PoolError> {
    let connect = TcpStream::connect((destination.host(), destination.port()));
    let stream = match time::timeout(options.connect_timeout, connect).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(source)) => {
            return Err(PoolError::Connect {
                destination: destination.clone(),
                source,
            })
        }
        Err(_) => {
            return Err(PoolError::ConnectTimeout {
                destination: destination.clone(),
                timeout: options.connect_timeout,
            })
        }
    };

    let state = Arc::new(ClientConnState {
        id: ConnectionId::new(),
        destination: destination.clone(),
        idle: IdleChecks::new(options.keep_alive_timeout, options.check_interval),
        signal: CloseSignal::new(),
    });
    metrics::connection_established(Side::Client);
    tracing::debug!(
        connection_id = %state.id,
        destination = %destination,
        "Connection established"
    );

    Ok(Connection::new(stream, state, options.read_timeout))
}

/// Available and leased connections to one destination.
struct DestinationPool {
    destination: ConnectionDestination,
    available: Mutex<VecDeque<Connection>>,
    leased: DashMap<ConnectionId, Arc<ClientConnState>>,
    permits: Arc<Semaphore>,
}

impl DestinationPool {
    fn new(destination: ConnectionDestination, max_connections: usize) -> Self {
        Self {
            destination,
            available: Mutex::new(VecDeque::new()),
            leased: DashMap::new(),
            permits: Arc::new(Semaphore::new(max_connections)),
        }
    }

    /// Take the most recently used healthy connection, dropping unusable ones.
    fn take_available(&self) -> Option<Connection> {
        let mut available = self.available.lock().unwrap_or_else(PoisonError::into_inner);
        while let Some(connection) = available.pop_back() {
            if connection.is_closed() {
                continue;
            }
            if connection.is_stale() {
                tracing::debug!(
                    connection_id = %connection.id(),
                    destination = %self.destination,
                    "Discarding connection closed by peer"
                );
                continue;
            }
            return Some(connection);
        }
        None
    }

    fn give_back(&self, connection: Connection) {
        self.leased.remove(&connection.id());
        if connection.is_closed() {
            return;
        }
        self.available
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(connection);
    }

    /// Count one idle check on every connection; close and drop stale ones.
    fn sweep(&self) -> usize {
        let mut closed = 0;
        {
            let mut available = self.available.lock().unwrap_or_else(PoisonError::into_inner);
            available.retain(|connection| {
                if connection.is_closed() {
                    return false;
                }
                if connection.state.record_idle_check() {
                    tracing::debug!(
                        connection_id = %connection.id(),
                        destination = %self.destination,
                        "Closing connection due to not being active"
                    );
                    closed += 1;
                    return false;
                }
                true
            });
        }

        self.leased.retain(|id, state| {
            if state.is_closed() {
                return false;
            }
            if state.record_idle_check() {
                tracing::debug!(
                    connection_id = %id,
                    destination = %self.destination,
                    "Closing leased connection due to not being active"
                );
                state.close();
                closed += 1;
                return false;
            }
            true
        });
        closed
    }

    fn close_all(&self) {
        let drained: Vec<Connection> = self
            .available
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        drop(drained);
        self.leased.retain(|_, state| {
            state.close();
            false
        });
    }

    fn available_count(&self) -> usize {
        self.available.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// A connection leased from the pool.
///
/// Hand it back with [`ClientConnectionPool::release_connection`]. Dropping it
/// instead closes the socket; either way the destination slot is freed.
pub struct PooledConnection {
    connection: Option<Connection>,
    pool: Arc<DestinationPool>,
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    fn connection(&mut self) -> io::Result<&mut Connection> {
        self.connection.as_mut().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotConnected, "connection already released")
        })
    }

    pub fn id(&self) -> Option<ConnectionId> {
        self.connection.as_ref().map(Connection::id)
    }

    pub fn destination(&self) -> &ConnectionDestination {
        &self.pool.destination
    }

    pub async fn exchange(&mut self, request: &Request) -> io::Result<Response> {
        self.connection()?.exchange(request).await
    }

    /// Mark the connection closed; it will not be reused.
    pub fn close(&self) {
        if let Some(connection) = &self.connection {
            connection.close();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.connection.as_ref().map_or(true, Connection::is_closed)
    }

    fn release(mut self) {
        if let Some(connection) = self.connection.take() {
            self.pool.give_back(connection);
        }
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            self.pool.leased.remove(&connection.id());
            connection.close();
        }
    }
}

/// Snapshot of pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    /// Sockets opened since the pool was created.
    pub connections_established: u64,
    pub available: usize,
    pub leased: usize,
}

struct PoolInner {
    destinations: DashMap<ConnectionDestination, Arc<DestinationPool>>,
    established: AtomicU64,
    options: ConnectOptions,
    max_connections_per_destination: usize,
}

impl PoolInner {
    fn destination(&self, destination: &ConnectionDestination) -> Arc<DestinationPool> {
        if let Some(pool) = self.destinations.get(destination) {
            return Arc::clone(pool.value());
        }
        let pool = self.destinations.entry(destination.clone()).or_insert_with(|| {
            Arc::new(DestinationPool::new(
                destination.clone(),
                self.max_connections_per_destination,
            ))
        });
        Arc::clone(pool.value())
    }

    fn sweep(&self) -> usize {
        self.destinations.iter().map(|pool| pool.sweep()).sum()
    }

    async fn run_sweeper(self: Arc<Self>, mut shutdown: ShutdownReceiver) {
        let interval = self.options.check_interval;
        tracing::debug!(
            interval_ms = interval.as_millis() as u64,
            keep_alive_ms = self.options.keep_alive_timeout.as_millis() as u64,
            "Client pool sweeper starting"
        );

        let mut ticker = time::interval_at(time::Instant::now() + interval, interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let closed = self.sweep();
                    if closed > 0 {
                        tracing::trace!(closed, "Closed stale client connections");
                    }
                }
                _ = shutdown.wait() => {
                    tracing::debug!("Client pool sweeper received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}

/// Connection pool keyed by destination.
///
/// Must be created inside a tokio runtime; it spawns its sweep task.
pub struct ClientConnectionPool {
    inner: Arc<PoolInner>,
    admission_timeout: Duration,
    shutdown_timeout: Duration,
    shutdown: Shutdown,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl ClientConnectionPool {
    /// Fails when the config cannot run, e.g. a zero sweep interval.
    pub fn new(config: &ClientConfig) -> Result<Self, PoolError> {
        validate_client_config(config).map_err(PoolError::InvalidConfig)?;

        let inner = Arc::new(PoolInner {
            destinations: DashMap::new(),
            established: AtomicU64::new(0),
            options: ConnectOptions::from(config),
            max_connections_per_destination: config.max_connections_per_destination,
        });
        let shutdown = Shutdown::new();
        let sweeper = tokio::spawn(Arc::clone(&inner).run_sweeper(shutdown.subscribe()));

        Ok(Self {
            inner,
            admission_timeout: config.admission_timeout(),
            shutdown_timeout: config.shutdown_timeout(),
            shutdown,
            sweeper: Mutex::new(Some(sweeper)),
        })
    }

    /// Lease a connection to `destination`, waiting up to the admission
    /// timeout for a free slot.
    pub async fn retrieve_connection(
        &self,
        destination: &ConnectionDestination,
    ) -> Result<PooledConnection, PoolError> {
        if self.shutdown.is_triggered() {
            return Err(PoolError::Closed);
        }
        let pool = self.inner.destination(destination);

        let admission = Arc::clone(&pool.permits).acquire_owned();
        let permit = match time::timeout(self.admission_timeout, admission).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(PoolError::Closed),
            Err(_) => {
                metrics::admission_timeout();
                tracing::warn!(
                    destination = %destination,
                    timeout_ms = self.admission_timeout.as_millis() as u64,
                    "Admission timeout waiting for connection slot"
                );
                return Err(PoolError::AdmissionTimeout {
                    destination: destination.clone(),
                    timeout: self.admission_timeout,
                });
            }
        };

        let connection = match pool.take_available() {
            Some(connection) => connection,
            None => {
                let connection = open_connection(destination, &self.inner.options).await?;
                self.inner.established.fetch_add(1, Ordering::Relaxed);
                connection
            }
        };
        pool.leased.insert(connection.id(), Arc::clone(&connection.state));

        Ok(PooledConnection {
            connection: Some(connection),
            pool,
            _permit: permit,
        })
    }

    /// Return a leased connection for reuse and free its slot. Closed
    /// connections are dropped instead of reused.
    pub fn release_connection(&self, connection: PooledConnection) {
        connection.release();
    }

    pub fn stats(&self) -> PoolStats {
        self.inner.destinations.iter().fold(
            PoolStats {
                connections_established: self.inner.established.load(Ordering::Relaxed),
                ..PoolStats::default()
            },
            |mut stats, pool| {
                stats.available += pool.available_count();
                stats.leased += pool.leased.len();
                stats
            },
        )
    }

    /// Run one idle sweep immediately.
    pub fn sweep(&self) -> usize {
        self.inner.sweep()
    }

    /// Stop the sweeper and close every connection. Leases still held fail
    /// their next I/O.
    pub async fn close(&self) {
        self.shutdown.trigger();
        let sweeper = self.sweeper.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(sweeper) = sweeper {
            if time::timeout(self.shutdown_timeout, sweeper).await.is_err() {
                tracing::warn!("Client pool sweeper did not stop within shutdown timeout");
            }
        }
        self.inner.destinations.retain(|_, pool| {
            pool.close_all();
            false
        });
    }
}

impl Drop for ClientConnectionPool {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn config() -> ClientConfig {
        ClientConfig {
            max_connections_per_destination: 2,
            admission_timeout_ms: 50,
            ..ClientConfig::default()
        }
    }

    async fn accepting_listener() -> (TcpListener, ConnectionDestination) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, ConnectionDestination::new("127.0.0.1", port))
    }

    fn keep_accepting(listener: TcpListener) {
        tokio::spawn(async move {
            let mut sockets = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                sockets.push(socket);
            }
        });
    }

    #[tokio::test]
    async fn released_connection_is_reused() {
        let (listener, destination) = accepting_listener().await;
        keep_accepting(listener);
        let pool = ClientConnectionPool::new(&config()).unwrap();

        let first = pool.retrieve_connection(&destination).await.unwrap();
        let first_id = first.id();
        pool.release_connection(first);

        let second = pool.retrieve_connection(&destination).await.unwrap();
        assert_eq!(second.id(), first_id);
        assert_eq!(pool.stats().connections_established, 1);
        assert_eq!(pool.stats().leased, 1);
    }

    #[tokio::test]
    async fn admission_timeout_when_slots_exhausted() {
        let (listener, destination) = accepting_listener().await;
        keep_accepting(listener);
        let pool = ClientConnectionPool::new(&config()).unwrap();

        let _a = pool.retrieve_connection(&destination).await.unwrap();
        let _b = pool.retrieve_connection(&destination).await.unwrap();
        let err = pool.retrieve_connection(&destination).await.err().unwrap();

        assert!(matches!(err, PoolError::AdmissionTimeout { .. }));
    }

    #[tokio::test]
    async fn dropped_lease_frees_slot_and_socket() {
        let (listener, destination) = accepting_listener().await;
        keep_accepting(listener);
        let pool = ClientConnectionPool::new(&config()).unwrap();

        let a = pool.retrieve_connection(&destination).await.unwrap();
        let _b = pool.retrieve_connection(&destination).await.unwrap();
        drop(a);

        let c = pool.retrieve_connection(&destination).await.unwrap();
        assert!(!c.is_closed());
        assert_eq!(pool.stats().connections_established, 3);
        assert_eq!(pool.stats().available, 0);
    }

    #[tokio::test]
    async fn closed_connection_is_not_reused() {
        let (listener, destination) = accepting_listener().await;
        keep_accepting(listener);
        let pool = ClientConnectionPool::new(&config()).unwrap();

        let first = pool.retrieve_connection(&destination).await.unwrap();
        first.close();
        pool.release_connection(first);
        assert_eq!(pool.stats().available, 0);

        let _second = pool.retrieve_connection(&destination).await.unwrap();
        assert_eq!(pool.stats().connections_established, 2);
    }

    #[tokio::test]
    async fn peer_closed_connection_is_discarded_on_lease() {
        let (listener, destination) = accepting_listener().await;
        let pool = ClientConnectionPool::new(&config()).unwrap();

        let first = pool.retrieve_connection(&destination).await.unwrap();
        let (server_side, _) = listener.accept().await.unwrap();
        pool.release_connection(first);
        drop(server_side);
        tokio::time::sleep(Duration::from_millis(50)).await;

        keep_accepting(listener);
        let second = pool.retrieve_connection(&destination).await.unwrap();
        assert!(!second.is_closed());
        assert_eq!(pool.stats().connections_established, 2);
    }

    #[tokio::test]
    async fn sweep_evicts_after_threshold() {
        let (listener, destination) = accepting_listener().await;
        keep_accepting(listener);
        let pool = ClientConnectionPool::new(&ClientConfig {
            keep_alive_timeout_ms: 2_000,
            keep_alive_check_interval_ms: 1_000,
            ..config()
        })
        .unwrap();

        let connection = pool.retrieve_connection(&destination).await.unwrap();
        pool.release_connection(connection);

        assert_eq!(pool.sweep(), 0);
        assert_eq!(pool.sweep(), 0);
        assert_eq!(pool.sweep(), 1);
        assert_eq!(pool.stats().available, 0);
    }

    #[tokio::test]
    async fn sweep_closes_connection_never_released() {
        let (listener, destination) = accepting_listener().await;
        keep_accepting(listener);
        let pool = ClientConnectionPool::new(&ClientConfig {
            keep_alive_timeout_ms: 2_000,
            keep_alive_check_interval_ms: 1_000,
            ..config()
        })
        .unwrap();

        let mut leased = pool.retrieve_connection(&destination).await.unwrap();
        assert_eq!(pool.stats().leased, 1);

        let swept: Vec<usize> = (0..3).map(|_| pool.sweep()).collect();
        assert_eq!(swept, [0, 0, 1]);
        assert!(leased.is_closed());
        assert_eq!(pool.stats().leased, 0);

        let request = Request::new(crate::http::request::Method::Get, "/");
        let err = leased.exchange(&request).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionAborted);
    }

    #[tokio::test]
    async fn rejects_zero_check_interval() {
        let err = ClientConnectionPool::new(&ClientConfig {
            keep_alive_check_interval_ms: 0,
            ..config()
        })
        .err()
        .unwrap();
        assert!(matches!(err, PoolError::InvalidConfig(_)));
        assert!(err.to_string().contains("client.keep_alive_check_interval_ms"));
    }

    #[tokio::test]
    async fn refused_connect_is_connect_error() {
        let (listener, destination) = accepting_listener().await;
        drop(listener);
        let pool = ClientConnectionPool::new(&config()).unwrap();

        let err = pool.retrieve_connection(&destination).await.err().unwrap();
        assert!(matches!(err, PoolError::Connect { .. }));

        // the failed connect returned its permit
        let err = pool.retrieve_connection(&destination).await.err().unwrap();
        assert!(matches!(err, PoolError::Connect { .. }));
        let err = pool.retrieve_connection(&destination).await.err().unwrap();
        assert!(matches!(err, PoolError::Connect { .. }));
    }

    #[tokio::test]
    async fn close_rejects_new_leases() {
        let pool = ClientConnectionPool::new(&config()).unwrap();
        pool.close().await;
        let err = pool
            .retrieve_connection(&ConnectionDestination::new("127.0.0.1", 1))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, PoolError::Closed));
    }
}
