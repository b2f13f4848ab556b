//! Minimal HTTP/1.1 stack on raw TCP sockets.
//!
//! A keep-alive server that dispatches parsed requests to a [`Handler`], and
//! a pooled client with per-destination admission control.

// Protocol
pub mod codec;
pub mod http;

// Transport
pub mod client;
pub mod net;

// Cross-cutting concerns
pub mod config;
pub mod lifecycle;
pub mod observability;

pub use client::{Client, ClientError, DirectClient, SocketClient};
pub use config::{ClientConfig, Config, ServerConfig};
pub use http::{Handler, Headers, Method, Request, Response, Server, Status};
pub use lifecycle::Shutdown;
