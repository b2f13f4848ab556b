//! Line grammar: start lines and header lines.

use thiserror::Error;

use crate::http::request::Method;
use crate::http::response::Status;

pub const PROTOCOL: &str = "HTTP/1.1";

const VALUE_SEPARATOR: &str = ", ";

/// A message that does not follow the wire grammar.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("invalid start line {0:?}, expected three space-separated parts")]
    InvalidStartLine(String),

    #[error("method {0} is not supported")]
    UnsupportedMethod(String),

    #[error("invalid protocol {0}, only HTTP/1.1 is supported")]
    UnsupportedProtocol(String),

    #[error("invalid status code {0}")]
    InvalidStatusCode(String),

    #[error("invalid header line: {0:?}")]
    InvalidHeaderLine(String),

    #[error("line longer than {0} bytes")]
    LineTooLong(usize),
}

/// `METHOD SP TARGET SP VERSION`
pub fn parse_request_line(line: &str) -> Result<(Method, String), ParseError> {
    let invalid = || ParseError::InvalidStartLine(line.to_string());

    let (method, rest) = line.split_once(' ').ok_or_else(invalid)?;
    let (target, protocol) = rest.rsplit_once(' ').ok_or_else(invalid)?;
    if method.is_empty() || target.is_empty() || protocol.is_empty() {
        return Err(invalid());
    }

    let method = method
        .parse::<Method>()
        .map_err(|_| ParseError::UnsupportedMethod(method.to_string()))?;
    if protocol != PROTOCOL {
        return Err(ParseError::UnsupportedProtocol(protocol.to_string()));
    }

    Ok((method, target.to_string()))
}

/// `VERSION SP CODE SP REASON`. The reason phrase is not checked against the code.
pub fn parse_status_line(line: &str) -> Result<Status, ParseError> {
    let invalid = || ParseError::InvalidStartLine(line.to_string());

    let (protocol, rest) = line.split_once(' ').ok_or_else(invalid)?;
    let (code, reason) = rest.split_once(' ').ok_or_else(invalid)?;
    if protocol.is_empty() || code.is_empty() || reason.is_empty() {
        return Err(invalid());
    }

    if protocol != PROTOCOL {
        return Err(ParseError::UnsupportedProtocol(protocol.to_string()));
    }

    code.parse::<u16>()
        .ok()
        .and_then(Status::from_code)
        .ok_or_else(|| ParseError::InvalidStatusCode(code.to_string()))
}

/// `NAME: V1, V2`. Returns the name as sent and its values in order.
pub fn parse_header_line(line: &str) -> Result<(&str, Vec<String>), ParseError> {
    match line.split_once(": ") {
        Some((name, value)) if !name.is_empty() && !value.is_empty() => Ok((
            name,
            value.split(VALUE_SEPARATOR).map(str::to_string).collect(),
        )),
        _ => Err(ParseError::InvalidHeaderLine(line.to_string())),
    }
}

pub(crate) fn join_values(values: &[String]) -> String {
    values.join(VALUE_SEPARATOR)
}
