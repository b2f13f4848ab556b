//! Response value and status set.

use std::fmt;

use crate::http::headers::Headers;

/// Status codes the codec understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Ok,
    Created,
    NoContent,

    BadRequest,
    NotFound,
    MethodNotAllowed,
    LengthRequired,
    PayloadTooLarge,
    UriTooLong,

    InternalServerError,
    ServiceUnavailable,
    HttpVersionNotSupported,
}

impl Status {
    pub fn code(&self) -> u16 {
        match self {
            Status::Ok => 200,
            Status::Created => 201,
            Status::NoContent => 204,
            Status::BadRequest => 400,
            Status::NotFound => 404,
            Status::MethodNotAllowed => 405,
            Status::LengthRequired => 411,
            Status::PayloadTooLarge => 413,
            Status::UriTooLong => 414,
            Status::InternalServerError => 500,
            Status::ServiceUnavailable => 503,
            Status::HttpVersionNotSupported => 505,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::Created => "Created",
            Status::NoContent => "No Content",
            Status::BadRequest => "Bad Request",
            Status::NotFound => "Not Found",
            Status::MethodNotAllowed => "Method Not Allowed",
            Status::LengthRequired => "Length Required",
            Status::PayloadTooLarge => "Payload Too Large",
            Status::UriTooLong => "URI Too Long",
            Status::InternalServerError => "Internal Server Error",
            Status::ServiceUnavailable => "Service Unavailable",
            Status::HttpVersionNotSupported => "HTTP Version Not Supported",
        }
    }

    pub fn from_code(code: u16) -> Option<Status> {
        let status = match code {
            200 => Status::Ok,
            201 => Status::Created,
            204 => Status::NoContent,
            400 => Status::BadRequest,
            404 => Status::NotFound,
            405 => Status::MethodNotAllowed,
            411 => Status::LengthRequired,
            413 => Status::PayloadTooLarge,
            414 => Status::UriTooLong,
            500 => Status::InternalServerError,
            503 => Status::ServiceUnavailable,
            505 => Status::HttpVersionNotSupported,
            _ => return None,
        };
        Some(status)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code())
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code(), self.reason())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    status: Status,
    headers: Headers,
    body: Option<Vec<u8>>,
}

impl Response {
    /// An empty response declaring `content-length: 0`.
    pub fn new(status: Status) -> Self {
        Self {
            status,
            headers: Headers::new().with_content_length(0),
            body: None,
        }
    }

    /// Build a response from exact parts; nothing is derived.
    pub fn from_parts(status: Status, headers: Headers, body: Option<Vec<u8>>) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    /// Replace the body and set `content-length` and `content-type` to match.
    pub fn with_body(self, body: impl Into<Vec<u8>>, media_type: &str) -> Self {
        let body = body.into();
        let headers = self
            .headers
            .with_content_type(media_type)
            .with_content_length(body.len());
        Self {
            status: self.status,
            headers,
            body: Some(body),
        }
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    pub fn body_text(&self) -> Option<String> {
        self.body
            .as_deref()
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_are_consistent() {
        for status in [
            Status::Ok,
            Status::BadRequest,
            Status::NotFound,
            Status::InternalServerError,
            Status::HttpVersionNotSupported,
        ] {
            assert_eq!(Status::from_code(status.code()), Some(status));
        }
        assert_eq!(Status::from_code(299), None);
        assert_eq!(Status::BadRequest.to_string(), "400 Bad Request");
    }

    #[test]
    fn with_body_sets_framing_headers() {
        let response = Response::new(Status::Ok).with_body("hello", "text/plain");

        assert_eq!(response.headers().content_length(), 5);
        assert_eq!(response.headers().first("content-type"), Some("text/plain"));
        assert_eq!(response.body_text().as_deref(), Some("hello"));
    }
}
