//! TCP listener with a bounded worker pool.
//!
//! # Responsibilities
//! - Bind to the configured address with the configured accept backlog
//! - Accept incoming TCP connections
//! - Enforce `max_worker_tasks` via a semaphore so at most that many
//!   connections are served at once

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::ServerConfig;

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("invalid bind address {address}: {reason}")]
    Address { address: String, reason: String },

    #[error("failed to bind: {0}")]
    Bind(#[source] io::Error),

    #[error("failed to accept: {0}")]
    Accept(#[source] io::Error),

    #[error("worker pool closed")]
    WorkersClosed,
}

/// A TCP listener that only accepts when a worker slot is free.
///
/// Connections beyond the worker limit wait in the kernel backlog until a
/// running connection task finishes.
pub struct Listener {
    inner: TcpListener,
    workers: Arc<Semaphore>,
    max_workers: usize,
}

impl Listener {
    pub fn bind(config: &ServerConfig) -> Result<Self, ListenerError> {
        let addr: SocketAddr = config.bind_address.parse().map_err(|e: std::net::AddrParseError| {
            ListenerError::Address {
                address: config.bind_address.clone(),
                reason: e.to_string(),
            }
        })?;

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(ListenerError::Bind)?;
        socket.set_reuseaddr(true).map_err(ListenerError::Bind)?;
        socket.bind(addr).map_err(ListenerError::Bind)?;

        let backlog = u32::try_from(config.max_incoming_connections).unwrap_or(u32::MAX);
        let listener = socket.listen(backlog).map_err(ListenerError::Bind)?;

        let local_addr = listener.local_addr().map_err(ListenerError::Bind)?;

        tracing::info!(
            address = %local_addr,
            backlog,
            max_worker_tasks = config.max_worker_tasks,
            "Listener bound"
        );

        Ok(Self {
            inner: listener,
            workers: Arc::new(Semaphore::new(config.max_worker_tasks)),
            max_workers: config.max_worker_tasks,
        })
    }

    /// Wait for a free worker slot, then accept the next connection.
    ///
    /// The returned permit must be held for the lifetime of the connection task.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr, WorkerPermit), ListenerError> {
        let permit = self
            .workers
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ListenerError::WorkersClosed)?;

        let (stream, addr) = self.inner.accept().await.map_err(ListenerError::Accept)?;

        tracing::debug!(
            peer_addr = %addr,
            available_workers = self.workers.available_permits(),
            "Connection accepted"
        );

        Ok((stream, addr, WorkerPermit { _permit: permit }))
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    pub fn available_workers(&self) -> usize {
        self.workers.available_permits()
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Handle to the worker semaphore, used to wait for running tasks on close.
    pub fn workers(&self) -> Arc<Semaphore> {
        Arc::clone(&self.workers)
    }
}

/// A worker slot. Dropping it lets the listener accept another connection,
/// even if the connection task panicked.
#[derive(Debug)]
pub struct WorkerPermit {
    _permit: OwnedSemaphorePermit,
}
