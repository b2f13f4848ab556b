//! Connection identity, liveness signals, and the close signal.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Carry a close flag that wakes anyone blocked on the socket
//! - Provide the two liveness signals used by server and client
//!
//! # Design Decisions
//! - Server connections record a wall-clock last-activity time
//! - Pooled client connections count idle sweeps instead, so the hot I/O path
//!   only stores a zero
//! - Closing is a flag plus a watch channel; the owner drops the socket

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Global atomic counter for connection IDs.
/// Relaxed ordering is enough: only uniqueness matters.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// One-shot close flag observable from other tasks.
#[derive(Debug)]
pub struct CloseSignal {
    tx: watch::Sender<bool>,
}

impl CloseSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// Mark closed. Returns `true` only for the call that flipped the flag.
    pub fn close(&self) -> bool {
        !self.tx.send_replace(true)
    }

    pub fn is_closed(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for CloseSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared state of a live socket, observed by the stream wrapper on every I/O.
pub trait Tracked: Send + Sync + 'static {
    fn id(&self) -> ConnectionId;

    /// Called after every read or write that moved bytes.
    fn mark_active(&self);

    fn close_signal(&self) -> &CloseSignal;

    fn close(&self) -> bool {
        self.close_signal().close()
    }

    fn is_closed(&self) -> bool {
        self.close_signal().is_closed()
    }
}

/// Wall-clock liveness: milliseconds since `epoch` of the last I/O.
#[derive(Debug)]
pub struct LastActivity {
    epoch: Instant,
    last_millis: AtomicU64,
}

impl LastActivity {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            last_millis: AtomicU64::new(0),
        }
    }

    pub fn touch(&self) {
        let now = self.epoch.elapsed().as_millis() as u64;
        self.last_millis.store(now, Ordering::Relaxed);
    }

    pub fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_millis.load(Ordering::Relaxed));
        self.epoch.elapsed().saturating_sub(last)
    }
}

impl Default for LastActivity {
    fn default() -> Self {
        Self::new()
    }
}

/// Sweep-count liveness: number of idle sweeps since the last I/O.
#[derive(Debug)]
pub struct IdleChecks {
    checks: AtomicU32,
    threshold: u32,
}

impl IdleChecks {
    /// The threshold is `keep_alive / check_interval`, at least one sweep.
    pub fn new(keep_alive: Duration, check_interval: Duration) -> Self {
        let interval = check_interval.as_millis().max(1);
        let threshold = (keep_alive.as_millis() / interval).clamp(1, u32::MAX as u128) as u32;
        Self {
            checks: AtomicU32::new(0),
            threshold,
        }
    }

    pub fn reset(&self) {
        self.checks.store(0, Ordering::Relaxed);
    }

    /// Record one sweep. Returns `true` once the connection has been idle for
    /// more than `threshold` sweeps.
    pub fn record_check(&self) -> bool {
        self.checks.fetch_add(1, Ordering::Relaxed) >= self.threshold
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }
}
