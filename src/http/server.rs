//! HTTP/1.1 server on raw sockets.
//!
//! # Responsibilities
//! - Accept connections on a bounded worker pool
//! - Register every connection for keep-alive tracking
//! - Run the read → handle → write loop per connection
//! - Answer malformed requests with 400
//! - Shut down gracefully: stop accepting, release idle connections, wait a
//!   bounded time for in-flight handlers

use std::future::Future;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use thiserror::Error;
use tokio::io::BufReader;
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::codec::{self, Parsed};
use crate::config::validation::{describe, validate_server_config, ValidationError};
use crate::config::ServerConfig;
use crate::http::request::Request;
use crate::http::response::{Response, Status};
use crate::lifecycle::{Shutdown, ShutdownReceiver};
use crate::net::{
    ActivityStream, ConnectionRegistry, Listener, ListenerError, Tracked, WorkerPermit,
};
use crate::observability::metrics;

/// Application logic invoked once per parsed request.
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, request: Request) -> impl Future<Output = Response> + Send;
}

impl<F, Fut> Handler for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send,
{
    fn handle(&self, request: Request) -> impl Future<Output = Response> + Send {
        self(request)
    }
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid server config: {}", describe(.0))]
    InvalidConfig(Vec<ValidationError>),

    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error("failed to read local address: {0}")]
    LocalAddr(#[source] std::io::Error),
}

/// Per-connection settings copied out of [`ServerConfig`].
#[derive(Debug, Clone, Copy)]
struct ConnectionOptions {
    read_timeout: Option<Duration>,
    close_on_malformed: bool,
}

/// A running server. Dropping it triggers shutdown without waiting.
pub struct Server {
    local_addr: SocketAddr,
    registry: Arc<ConnectionRegistry>,
    shutdown: Shutdown,
    workers: Arc<Semaphore>,
    max_workers: usize,
    shutdown_timeout: Duration,
    acceptor: Option<JoinHandle<()>>,
    sweeper: Option<JoinHandle<()>>,
}

impl Server {
    /// Bind the listener and start the accept and sweep tasks.
    pub async fn bind<H: Handler>(config: ServerConfig, handler: H) -> Result<Self, ServerError> {
        validate_server_config(&config).map_err(ServerError::InvalidConfig)?;
        let listener = Listener::bind(&config)?;
        let local_addr = listener.local_addr().map_err(ServerError::LocalAddr)?;
        let workers = listener.workers();
        let max_workers = listener.max_workers();

        let registry = Arc::new(ConnectionRegistry::new(config.keep_alive_timeout()));
        let shutdown = Shutdown::new();

        let sweeper = tokio::spawn(Arc::clone(&registry).run_sweeper(
            config.keep_alive_check_interval(),
            shutdown.subscribe(),
        ));

        let options = ConnectionOptions {
            read_timeout: config.read_timeout(),
            close_on_malformed: config.close_on_malformed,
        };
        let acceptor = tokio::spawn(accept_loop(
            listener,
            Arc::clone(&registry),
            Arc::new(handler),
            options,
            shutdown.subscribe(),
        ));

        tracing::info!(address = %local_addr, "Server started");

        Ok(Self {
            local_addr,
            registry,
            shutdown,
            workers,
            max_workers,
            shutdown_timeout: config.shutdown_timeout(),
            acceptor: Some(acceptor),
            sweeper: Some(sweeper),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Total connections accepted since the server started.
    pub fn connections_established(&self) -> u64 {
        self.registry.connections_established()
    }

    /// Connections currently open.
    pub fn open_connections(&self) -> usize {
        self.registry.open_connections()
    }

    /// Stop accepting, let idle connections exit, and wait up to the shutdown
    /// timeout for in-flight handlers. Handlers are never interrupted.
    pub async fn close(&mut self) {
        if self.acceptor.is_none() && self.sweeper.is_none() {
            return;
        }
        tracing::info!(address = %self.local_addr, "Server shutting down");
        self.shutdown.trigger();

        for (name, task) in [("acceptor", self.acceptor.take()), ("sweeper", self.sweeper.take())] {
            if let Some(task) = task {
                if tokio::time::timeout(self.shutdown_timeout, task).await.is_err() {
                    tracing::warn!(task = name, "Task did not stop within shutdown timeout");
                }
            }
        }

        let permits = u32::try_from(self.max_workers).unwrap_or(u32::MAX);
        let drained = self.workers.acquire_many(permits);
        match tokio::time::timeout(self.shutdown_timeout, drained).await {
            Ok(_) => tracing::info!("Server stopped"),
            Err(_) => tracing::warn!(
                still_running = self.max_workers - self.workers.available_permits(),
                "Connections still running after shutdown timeout"
            ),
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

async fn accept_loop<H: Handler>(
    listener: Listener,
    registry: Arc<ConnectionRegistry>,
    handler: Arc<H>,
    options: ConnectionOptions,
    mut shutdown: ShutdownReceiver,
) {
    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            _ = shutdown.wait() => {
                tracing::debug!("Acceptor received shutdown signal, exiting loop");
                break;
            }
        };

        match accepted {
            Ok((stream, peer, permit)) => {
                let connection = serve_connection(
                    stream,
                    peer,
                    permit,
                    Arc::clone(&registry),
                    Arc::clone(&handler),
                    options,
                    shutdown.clone(),
                );
                tokio::spawn(connection);
            }
            Err(e) if shutdown.is_triggered() => {
                tracing::trace!(error = %e, "Accept failed during shutdown");
                break;
            }
            Err(ListenerError::WorkersClosed) => {
                tracing::error!("Worker pool closed, stopping acceptor");
                break;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to accept connection");
            }
        }
    }
}

async fn serve_connection<H: Handler>(
    stream: TcpStream,
    peer: SocketAddr,
    permit: WorkerPermit,
    registry: Arc<ConnectionRegistry>,
    handler: Arc<H>,
    options: ConnectionOptions,
    mut shutdown: ShutdownReceiver,
) {
    let _permit = permit;
    let connection = registry.register(peer);
    let span = tracing::debug_span!(
        "connection",
        connection_id = %connection.id(),
        peer_addr = %peer
    );

    async move {
        let stream = ActivityStream::new(stream, connection.shared())
            .with_read_timeout(options.read_timeout);
        let mut stream = BufReader::new(stream);

        loop {
            let parsed = tokio::select! {
                parsed = codec::read_request(&mut stream) => parsed,
                _ = shutdown.wait() => {
                    tracing::trace!("Shutdown while waiting for request");
                    break;
                }
            };

            match parsed {
                Ok(Parsed::Message(request)) => {
                    let close_requested = request.headers().is_connection_close();
                    tracing::debug!(
                        method = %request.method(),
                        path = request.path(),
                        "Request received"
                    );

                    let handled = AssertUnwindSafe(async { handler.handle(request).await });
                    let response = match handled.catch_unwind().await {
                        Ok(response) => response,
                        Err(_) => {
                            tracing::error!("Handler panicked, answering 500");
                            Response::new(Status::InternalServerError)
                        }
                    };
                    metrics::request_served(response.status().code());

                    if let Err(e) = codec::write_response(&mut stream, &response).await {
                        tracing::debug!(error = %e, "Failed to write response");
                        break;
                    }
                    if close_requested || shutdown.is_triggered() {
                        break;
                    }
                }
                Ok(Parsed::PeerClosed) => {
                    tracing::debug!("Peer closed connection");
                    break;
                }
                Ok(Parsed::Malformed(e)) => {
                    tracing::debug!(error = %e, "Malformed request");
                    let response =
                        Response::new(Status::BadRequest).with_body(e.to_string(), "text/plain");
                    metrics::request_served(Status::BadRequest.code());

                    if let Err(e) = codec::write_response(&mut stream, &response).await {
                        tracing::debug!(error = %e, "Failed to write response");
                        break;
                    }
                    if options.close_on_malformed {
                        break;
                    }
                }
                Err(e) if connection.is_closed() => {
                    tracing::trace!(error = %e, "Connection closed while reading");
                    break;
                }
                Err(e) => {
                    tracing::debug!(error = %e, "Failed to read request");
                    break;
                }
            }
        }
    }
    .instrument(span)
    .await
}
