//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, worker limit)
//!     → registry.rs (registration, idle sweeps)
//!     → activity.rs (stream wrapper marking activity, honouring close)
//!     → Hand off to HTTP layer
//! ```
//!
//! # Design Decisions
//! - Connections beyond the worker limit wait in the kernel backlog
//! - Each connection is tracked so idle ones can be swept and all can be
//!   closed on shutdown
//! - Pooled client sockets reuse the same stream wrapper and close signal

pub mod activity;
pub mod connection;
pub mod listener;
pub mod registry;

pub use activity::ActivityStream;
pub use connection::{CloseSignal, ConnectionId, IdleChecks, LastActivity, Tracked};
pub use listener::{Listener, ListenerError, WorkerPermit};
pub use registry::{ConnectionRegistry, RegisteredConnection, ServerConnection};
