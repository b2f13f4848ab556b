//! Lifecycle management.
//!
//! # Data Flow
//! ```text
//! Ctrl-C / SIGTERM (signals.rs), Server::close, or client close
//!     → Shutdown::trigger
//!     → accept loop exits (listener dropped)
//!     → connections waiting for a new request exit
//!     → sweep tasks exit
//!     → bounded wait for in-flight work
//! ```
//!
//! # Design Decisions
//! - One coordinator per server or pool instance, never process-wide
//! - Shutdown waits are bounded; in-flight handlers are never aborted

pub mod shutdown;
pub mod signals;

pub use shutdown::{Shutdown, ShutdownReceiver};
