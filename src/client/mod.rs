//! HTTP/1.1 client subsystem.
//!
//! # Data Flow
//! ```text
//! exchange(url, request)
//!     → destination.rs (base URL → host:port)
//!     → pool.rs (admission, lease or connect)
//!     → codec (write request, read response)
//!     → pool.rs (release, or close on failure)
//! ```
//!
//! The URL names the destination only; the request path is sent as given.

pub mod destination;
pub mod direct;
pub mod pool;
pub mod socket;

use std::future::Future;
use std::io;
use thiserror::Error;

use crate::http::request::Request;
use crate::http::response::Response;

pub use destination::ConnectionDestination;
pub use direct::DirectClient;
pub use pool::{ClientConnectionPool, PoolError, PoolStats, PooledConnection};
pub use socket::SocketClient;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("unsupported scheme {0:?}, only http is supported")]
    UnsupportedScheme(String),

    #[error("invalid url {url:?}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("url {0:?} has no host")]
    MissingHost(String),

    #[error(transparent)]
    Pool(#[from] PoolError),

    /// The connection failed after it was obtained. It has been closed.
    #[error("exchange with {destination} failed: {source}")]
    Exchange {
        destination: ConnectionDestination,
        #[source]
        source: io::Error,
    },
}

/// Sends one request to a base URL and returns the response.
pub trait Client: Send + Sync {
    fn exchange(
        &self,
        url: &str,
        request: Request,
    ) -> impl Future<Output = Result<Response, ClientError>> + Send;

    /// Release every resource the client holds.
    fn close(&self) -> impl Future<Output = ()> + Send;
}
