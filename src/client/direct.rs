//! Client that opens a fresh socket for every exchange.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::client::destination::ConnectionDestination;
use crate::client::pool::{open_connection, ConnectOptions, PoolError};
use crate::client::{Client, ClientError};
use crate::config::validation::validate_client_config;
use crate::config::ClientConfig;
use crate::http::request::Request;
use crate::http::response::Response;

pub struct DirectClient {
    options: ConnectOptions,
    established: AtomicU64,
}

impl DirectClient {
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        validate_client_config(config).map_err(PoolError::InvalidConfig)?;
        Ok(Self {
            options: ConnectOptions::from(config),
            established: AtomicU64::new(0),
        })
    }

    /// Sockets opened since the client was created.
    pub fn connections_established(&self) -> u64 {
        self.established.load(Ordering::Relaxed)
    }
}

impl Client for DirectClient {
    async fn exchange(&self, url: &str, request: Request) -> Result<Response, ClientError> {
        let destination = ConnectionDestination::from_url(url)?;
        let mut connection = open_connection(&destination, &self.options).await?;
        self.established.fetch_add(1, Ordering::Relaxed);

        connection
            .exchange(&request)
            .await
            .map_err(|source| ClientError::Exchange { destination, source })
    }

    async fn close(&self) {}
}
