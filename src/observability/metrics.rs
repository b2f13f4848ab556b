//! Metrics emitted by the transport.
//!
//! # Metrics
//! - `rawhttp_connections_established_total` (counter): by side
//! - `rawhttp_connections_closed_total` (counter): by side and reason
//! - `rawhttp_admission_timeouts_total` (counter): pool permits not granted in time
//! - `rawhttp_requests_total` (counter): server responses by status code
//! - `rawhttp_open_connections` (gauge): by side

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Server,
    Client,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Server => "server",
            Side::Client => "client",
        }
    }
}

pub fn connection_established(side: Side) {
    metrics::counter!("rawhttp_connections_established_total", "side" => side.as_str())
        .increment(1);
    metrics::gauge!("rawhttp_open_connections", "side" => side.as_str()).increment(1.0);
}

pub fn connection_closed(side: Side, reason: &'static str) {
    metrics::counter!(
        "rawhttp_connections_closed_total",
        "side" => side.as_str(),
        "reason" => reason
    )
    .increment(1);
    metrics::gauge!("rawhttp_open_connections", "side" => side.as_str()).decrement(1.0);
}

pub fn admission_timeout() {
    metrics::counter!("rawhttp_admission_timeouts_total").increment(1);
}

pub fn request_served(status: u16) {
    metrics::counter!("rawhttp_requests_total", "status" => status.to_string()).increment(1);
}
