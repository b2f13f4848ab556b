//! Pooled socket client.

use crate::client::destination::ConnectionDestination;
use crate::client::pool::{ClientConnectionPool, PoolStats};
use crate::client::{Client, ClientError};
use crate::config::ClientConfig;
use crate::http::request::Request;
use crate::http::response::Response;

/// Client that keeps connections alive and reuses them per destination.
pub struct SocketClient {
    pool: ClientConnectionPool,
}

impl SocketClient {
    /// Must be called inside a tokio runtime. Fails on an invalid config.
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        Ok(Self {
            pool: ClientConnectionPool::new(config)?,
        })
    }

    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn pool(&self) -> &ClientConnectionPool {
        &self.pool
    }
}

impl Client for SocketClient {
    async fn exchange(&self, url: &str, request: Request) -> Result<Response, ClientError> {
        let destination = ConnectionDestination::from_url(url)?;
        let mut connection = self.pool.retrieve_connection(&destination).await?;

        let result = connection.exchange(&request).await;
        match result {
            Ok(response) => {
                let close_requested = request.headers().is_connection_close()
                    || response.headers().is_connection_close();
                if close_requested {
                    connection.close();
                }
                self.pool.release_connection(connection);
                Ok(response)
            }
            Err(source) => {
                tracing::debug!(
                    destination = %destination,
                    error = %source,
                    "Exchange failed, closing connection"
                );
                connection.close();
                self.pool.release_connection(connection);
                Err(ClientError::Exchange { destination, source })
            }
        }
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
