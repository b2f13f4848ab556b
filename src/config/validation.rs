//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, limits > 0)
//! - Check that sweep cadences fit inside their keep-alive timeouts
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is a pure function: &Config → Result<(), Vec<ValidationError>>

use std::net::SocketAddr;
use thiserror::Error;

use crate::config::schema::{ClientConfig, Config, ServerConfig};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field}: invalid socket address {value:?}")]
    InvalidAddress { field: &'static str, value: String },

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("{field} ({interval_ms} ms) must not exceed {limit_field} ({limit_ms} ms)")]
    IntervalExceedsTimeout {
        field: &'static str,
        interval_ms: u64,
        limit_field: &'static str,
        limit_ms: u64,
    },
}

pub fn validate_config(config: &Config) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    check_server(&config.server, &mut errors);
    check_client(&config.client, &mut errors);
    into_result(errors)
}

/// Checks applied by `Server::bind`.
pub fn validate_server_config(server: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    check_server(server, &mut errors);
    into_result(errors)
}

/// Checks applied when a client is created.
pub fn validate_client_config(client: &ClientConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    check_client(client, &mut errors);
    into_result(errors)
}

/// Render a list of violations on one line.
pub fn describe(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn into_result(errors: Vec<ValidationError>) -> Result<(), Vec<ValidationError>> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_server(server: &ServerConfig, errors: &mut Vec<ValidationError>) {
    if server.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: "server.bind_address",
            value: server.bind_address.clone(),
        });
    }

    non_zero(errors, "server.max_incoming_connections", server.max_incoming_connections as u64);
    non_zero(errors, "server.max_worker_tasks", server.max_worker_tasks as u64);
    non_zero(errors, "server.keep_alive_timeout_ms", server.keep_alive_timeout_ms);
    non_zero(errors, "server.keep_alive_check_interval_ms", server.keep_alive_check_interval_ms);
    if let Some(read_timeout) = server.read_timeout_ms {
        non_zero(errors, "server.read_timeout_ms", read_timeout);
    }

    interval_within(
        errors,
        ("server.keep_alive_check_interval_ms", server.keep_alive_check_interval_ms),
        ("server.keep_alive_timeout_ms", server.keep_alive_timeout_ms),
    );
}

fn check_client(client: &ClientConfig, errors: &mut Vec<ValidationError>) {
    non_zero(
        errors,
        "client.max_connections_per_destination",
        client.max_connections_per_destination as u64,
    );
    non_zero(errors, "client.keep_alive_timeout_ms", client.keep_alive_timeout_ms);
    non_zero(errors, "client.keep_alive_check_interval_ms", client.keep_alive_check_interval_ms);
    non_zero(errors, "client.connect_timeout_ms", client.connect_timeout_ms);
    non_zero(errors, "client.read_timeout_ms", client.read_timeout_ms);
    non_zero(errors, "client.admission_timeout_ms", client.admission_timeout_ms);

    interval_within(
        errors,
        ("client.keep_alive_check_interval_ms", client.keep_alive_check_interval_ms),
        ("client.keep_alive_timeout_ms", client.keep_alive_timeout_ms),
    );
}

fn non_zero(errors: &mut Vec<ValidationError>, field: &'static str, value: u64) {
    if value == 0 {
        errors.push(ValidationError::Zero { field });
    }
}

fn interval_within(
    errors: &mut Vec<ValidationError>,
    (field, interval_ms): (&'static str, u64),
    (limit_field, limit_ms): (&'static str, u64),
) {
    if interval_ms > limit_ms {
        errors.push(ValidationError::IntervalExceedsTimeout {
            field,
            interval_ms,
            limit_field,
            limit_ms,
        });
    }
}
