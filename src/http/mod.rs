//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (accept loop, per-connection request loop)
//!     → codec (parse bytes into Request)
//!     → Handler (application logic)
//!     → response.rs (status, headers, body)
//!     → codec (serialize) → socket
//! ```

pub mod headers;
pub mod request;
pub mod response;
pub mod server;

pub use headers::Headers;
pub use request::{Method, Request};
pub use response::{Response, Status};
pub use server::{Handler, Server, ServerError};
