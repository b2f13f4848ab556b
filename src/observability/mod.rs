//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → tracing events (structured fields: connection_id, destination, peer_addr)
//!     → metrics.rs (counters and gauges)
//!
//! Consumers:
//!     → logging.rs subscriber (stdout)
//!     → whatever metrics recorder the embedding application installs
//! ```
//!
//! # Design Decisions
//! - The library never installs a subscriber or recorder on its own
//! - Metrics are cheap (atomic increments inside the recorder)

pub mod logging;
pub mod metrics;
