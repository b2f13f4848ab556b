//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from config files.
//! Durations are stored as milliseconds and exposed through accessors.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct Config {
    /// Listening server settings.
    pub server: ServerConfig,

    /// Pooled client settings.
    pub client: ClientConfig,

    /// Logging settings.
    pub observability: ObservabilityConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "127.0.0.1:8090").
    pub bind_address: String,

    /// Accept backlog handed to `listen`.
    pub max_incoming_connections: usize,

    /// Connections served concurrently.
    pub max_worker_tasks: usize,

    /// Idle time after which a connection is closed.
    pub keep_alive_timeout_ms: u64,

    /// Cadence of the idle sweep.
    pub keep_alive_check_interval_ms: u64,

    /// Per-read timeout. Unset waits indefinitely.
    pub read_timeout_ms: Option<u64>,

    /// How long `close` waits for in-flight handlers.
    pub shutdown_timeout_ms: u64,

    /// Close the connection after answering a malformed request with 400.
    pub close_on_malformed: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8090".to_string(),
            max_incoming_connections: 10,
            max_worker_tasks: 50,
            keep_alive_timeout_ms: 30_000,
            keep_alive_check_interval_ms: 1_000,
            read_timeout_ms: None,
            shutdown_timeout_ms: 1_000,
            close_on_malformed: true,
        }
    }
}

impl ServerConfig {
    pub fn keep_alive_timeout(&self) -> Duration {
        Duration::from_millis(self.keep_alive_timeout_ms)
    }

    pub fn keep_alive_check_interval(&self) -> Duration {
        Duration::from_millis(self.keep_alive_check_interval_ms)
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_ms.map(Duration::from_millis)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

/// Client pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ClientConfig {
    /// Idle time after which a pooled connection is closed.
    pub keep_alive_timeout_ms: u64,

    /// Cadence of the stale sweep.
    pub keep_alive_check_interval_ms: u64,

    /// Concurrent connections per destination.
    pub max_connections_per_destination: usize,

    pub connect_timeout_ms: u64,

    /// Per-read timeout while waiting for a response.
    pub read_timeout_ms: u64,

    /// How long a caller waits for a destination slot.
    pub admission_timeout_ms: u64,

    pub shutdown_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            keep_alive_timeout_ms: 30_000,
            keep_alive_check_interval_ms: 1_000,
            max_connections_per_destination: 10,
            connect_timeout_ms: 500,
            read_timeout_ms: 200,
            admission_timeout_ms: 1_000,
            shutdown_timeout_ms: 1_000,
        }
    }
}

impl ClientConfig {
    pub fn keep_alive_timeout(&self) -> Duration {
        Duration::from_millis(self.keep_alive_timeout_ms)
    }

    pub fn keep_alive_check_interval(&self) -> Duration {
        Duration::from_millis(self.keep_alive_check_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn admission_timeout(&self) -> Duration {
        Duration::from_millis(self.admission_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Default log filter (trace, debug, info, warn, error, or a directive list).
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server, ServerConfig::default());
        assert_eq!(config.client.connect_timeout(), Duration::from_millis(500));
        assert_eq!(config.client.read_timeout(), Duration::from_millis(200));
        assert_eq!(config.server.read_timeout(), None);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config: Config = toml::from_str(
            r#"
            [server]
            bind_address = "0.0.0.0:9000"
            read_timeout_ms = 250

            [client]
            max_connections_per_destination = 2
            "#,
        )
        .unwrap();

        assert_eq!(config.server.bind_address, "0.0.0.0:9000");
        assert_eq!(config.server.read_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(config.server.max_worker_tasks, 50);
        assert_eq!(config.client.max_connections_per_destination, 2);
        assert_eq!(config.client.admission_timeout(), Duration::from_secs(1));
    }
}
