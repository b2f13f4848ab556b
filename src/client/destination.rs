//! Pool key: the remote host and port a connection is bound to.

use std::fmt;
use url::{Host, Url};

use crate::client::ClientError;

pub const DEFAULT_HTTP_PORT: u16 = 80;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionDestination {
    host: String,
    port: u16,
}

impl ConnectionDestination {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Destination of an `http` base URL. The port defaults to 80.
    pub fn from_url(url: &str) -> Result<Self, ClientError> {
        let parsed = Url::parse(url).map_err(|source| ClientError::InvalidUrl {
            url: url.to_string(),
            source,
        })?;
        if parsed.scheme() != "http" {
            return Err(ClientError::UnsupportedScheme(parsed.scheme().to_string()));
        }
        // IPv6 literals are stored without brackets so they resolve as addresses
        let host = match parsed.host() {
            Some(Host::Domain(domain)) if !domain.is_empty() => domain.to_string(),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Ipv6(addr)) => addr.to_string(),
            _ => return Err(ClientError::MissingHost(url.to_string())),
        };

        Ok(Self::new(host, parsed.port().unwrap_or(DEFAULT_HTTP_PORT)))
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for ConnectionDestination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}
