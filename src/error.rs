//! Error taxonomy for the lock core.
//!
//! Contention is *not* an error: a failed try-acquire is reported as `Ok(None)`
//! and the caller decides whether to retry, back off, or abort. The errors here
//! are the hard failures: a worker that outgrew its statically sized block pool,
//! an arena that ran out of worker identities, or a configuration that cannot be
//! represented in the packed lock word. Protocol misuse (double release, releasing
//! an ungranted handle) is a programming error and fails fast with a panic rather
//! than surfacing as a value.

use thiserror::Error;

/// Hard failures from the block-pool layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PoolError {
    /// The calling worker holds more lock blocks than its pool capacity.
    ///
    /// This indicates a transaction exceeding its configured lock-count budget:
    /// a sizing bug, not a transient condition. Callers must not retry.
    #[error("worker {worker} exhausted its lock-block pool (capacity {capacity})")]
    Exhausted {
        /// Worker id whose pool ran dry.
        worker: u16,
        /// Usable blocks per worker (slot 0 is the reserved sentinel).
        capacity: u16,
    },

    /// Every worker identity in the arena is already taken.
    #[error("lock arena already has {max} registered workers")]
    WorkersExhausted {
        /// Configured worker limit.
        max: u16,
    },

    /// The arena configuration cannot be represented by the lock protocol.
    #[error("invalid lock arena configuration: {0}")]
    InvalidConfig(&'static str),
}
