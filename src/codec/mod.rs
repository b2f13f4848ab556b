//! HTTP/1.1 wire codec.
//!
//! # Data Flow
//! ```text
//! socket bytes
//!     → read_line (start line; EOF here means the peer closed)
//!     → line.rs (start line + header grammar)
//!     → body (exactly content-length bytes, none when 0/absent)
//!     → Parsed::{Message, Malformed, PeerClosed}
//!
//! Request/Response
//!     → encode_* (start line, one line per header name, blank line, body)
//!     → write_* (write_all + flush)
//! ```
//!
//! # Design Decisions
//! - Parsing outcome is a value, not an error: malformed input and a closed
//!   peer are ordinary results; only I/O failures are `Err`
//! - Lines end with `\n`; a trailing `\r` is stripped on input, never emitted
//! - No `content-length` is derived when encoding; callers own framing headers
//! - Long lines are cut at [`MAX_LINE_LEN`] and reported as malformed

pub mod line;

use std::io;

use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt,
};

use crate::http::headers::Headers;
use crate::http::request::Request;
use crate::http::response::Response;

pub use line::{ParseError, PROTOCOL};

pub const MAX_LINE_LEN: usize = 8192;

/// Cap on up-front allocation for a declared body.
const MAX_BODY_PREALLOC: usize = 64 * 1024;

/// Result of reading one message off a stream.
#[derive(Debug)]
pub enum Parsed<T> {
    Message(T),
    Malformed(ParseError),
    /// The stream ended before the first byte of a message.
    PeerClosed,
}

impl<T> Parsed<T> {
    pub fn into_message(self) -> Option<T> {
        match self {
            Parsed::Message(message) => Some(message),
            _ => None,
        }
    }
}

enum Line {
    Eof,
    TooLong,
    Text(String),
}

async fn read_line<R>(reader: &mut R) -> io::Result<Line>
where
    R: AsyncBufRead + Unpin,
{
    // room for the line plus its `\r\n` terminator
    let mut buf = Vec::new();
    let read = (&mut *reader)
        .take(MAX_LINE_LEN as u64 + 2)
        .read_until(b'\n', &mut buf)
        .await?;

    if read == 0 {
        return Ok(Line::Eof);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    }
    if buf.len() > MAX_LINE_LEN {
        return Ok(Line::TooLong);
    }

    Ok(Line::Text(String::from_utf8_lossy(&buf).into_owned()))
}

/// Start line of a message: `None` when the peer closed before sending anything.
async fn read_start_line<R>(reader: &mut R) -> io::Result<Option<Result<String, ParseError>>>
where
    R: AsyncBufRead + Unpin,
{
    Ok(match read_line(reader).await? {
        Line::Eof => None,
        Line::TooLong => Some(Err(ParseError::LineTooLong(MAX_LINE_LEN))),
        Line::Text(line) => Some(Ok(line)),
    })
}

/// Header lines up to the blank separator (or end of stream).
async fn read_headers<R>(reader: &mut R) -> io::Result<Result<Headers, ParseError>>
where
    R: AsyncBufRead + Unpin,
{
    let mut headers = Headers::new();
    loop {
        let line = match read_line(reader).await? {
            Line::Eof => break,
            Line::TooLong => return Ok(Err(ParseError::LineTooLong(MAX_LINE_LEN))),
            Line::Text(line) => line,
        };
        if line.trim().is_empty() {
            break;
        }
        match line::parse_header_line(&line) {
            Ok((name, values)) => headers.extend_values(name, values),
            Err(e) => return Ok(Err(e)),
        }
    }
    Ok(Ok(headers))
}

/// Read up to `length` bytes. A stream ending early yields a shorter body.
async fn read_body<R>(reader: &mut R, length: usize) -> io::Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    if length == 0 {
        return Ok(None);
    }
    let mut body = Vec::with_capacity(length.min(MAX_BODY_PREALLOC));
    (&mut *reader).take(length as u64).read_to_end(&mut body).await?;
    Ok(Some(body))
}

pub async fn read_request<R>(reader: &mut R) -> io::Result<Parsed<Request>>
where
    R: AsyncBufRead + Unpin,
{
    let line = match read_start_line(reader).await? {
        None => return Ok(Parsed::PeerClosed),
        Some(Err(e)) => return Ok(Parsed::Malformed(e)),
        Some(Ok(line)) => line,
    };
    let (method, path) = match line::parse_request_line(&line) {
        Ok(parts) => parts,
        Err(e) => return Ok(Parsed::Malformed(e)),
    };
    let headers = match read_headers(reader).await? {
        Ok(headers) => headers,
        Err(e) => return Ok(Parsed::Malformed(e)),
    };
    let body = read_body(reader, headers.content_length()).await?;

    let mut request = Request::new(method, path).with_headers(headers);
    if let Some(body) = body {
        request = request.with_body(body);
    }
    Ok(Parsed::Message(request))
}

pub async fn read_response<R>(reader: &mut R) -> io::Result<Parsed<Response>>
where
    R: AsyncBufRead + Unpin,
{
    let line = match read_start_line(reader).await? {
        None => return Ok(Parsed::PeerClosed),
        Some(Err(e)) => return Ok(Parsed::Malformed(e)),
        Some(Ok(line)) => line,
    };
    let status = match line::parse_status_line(&line) {
        Ok(status) => status,
        Err(e) => return Ok(Parsed::Malformed(e)),
    };
    let headers = match read_headers(reader).await? {
        Ok(headers) => headers,
        Err(e) => return Ok(Parsed::Malformed(e)),
    };
    let body = read_body(reader, headers.content_length()).await?;

    Ok(Parsed::Message(Response::from_parts(status, headers, body)))
}

fn encode_message(start_line: String, headers: &Headers, body: Option<&[u8]>) -> Vec<u8> {
    let mut out = start_line.into_bytes();
    out.push(b'\n');
    for (name, values) in headers.iter() {
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(line::join_values(values).as_bytes());
        out.push(b'\n');
    }
    out.push(b'\n');
    if let Some(body) = body {
        out.extend_from_slice(body);
    }
    out
}

pub fn encode_request(request: &Request) -> Vec<u8> {
    encode_message(
        format!("{} {} {}", request.method(), request.path(), PROTOCOL),
        request.headers(),
        request.body(),
    )
}

pub fn encode_response(response: &Response) -> Vec<u8> {
    let status = response.status();
    encode_message(
        format!("{} {} {}", PROTOCOL, status.code(), status.reason()),
        response.headers(),
        response.body(),
    )
}

pub async fn write_request<W>(writer: &mut W, request: &Request) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&encode_request(request)).await?;
    writer.flush().await
}

pub async fn write_response<W>(writer: &mut W, response: &Response) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&encode_response(response)).await?;
    writer.flush().await
}
