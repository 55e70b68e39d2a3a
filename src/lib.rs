//! # `reclock`
//!
//! Record-level reader/writer locking for a transactional storage engine.
//!
//! This crate implements the concurrency-control primitive attached to every
//! versioned record:
//! - A packed atomic version word per record (epoch, ordinal, status flags)
//! - Per-worker pools of lock-queue blocks, referenced by handles, never
//!   by address
//! - An MCS-style reader/writer lock with strict non-blocking "try"
//!   acquisition
//!
//! ## Feature Overview
//!
//! | Feature | Status |
//! |---------|--------|
//! | Try acquire (reader/writer) | Single atomic transition, never enqueues on failure |
//! | Blocking acquire | FIFO queue, spins only on the caller's own block |
//! | Reader batching | Contiguous queued readers granted together at handoff |
//! | Version word | One-load optimistic validation incl. write-lock state |
//! | Critical path | Allocation-free; all blocks preallocated per worker |
//!
//! ## Thread Safety
//!
//! [`VersionedRecord`], [`RecordLock`], and [`LockArena`] are `Send + Sync`.
//! Each worker thread registers once against the shared arena and drives every
//! lock operation through its own [`WorkerLockContext`], which is where block
//! claims and reuse stay thread-exclusive:
//!
//! ```rust
//! use std::sync::Arc;
//! use reclock::{LockArena, LockArenaConfig, VersionedRecord};
//!
//! # fn main() -> Result<(), reclock::error::PoolError> {
//! let arena = Arc::new(LockArena::new(LockArenaConfig::default())?);
//! let mut ctx = arena.register_worker()?;
//! let record = VersionedRecord::new();
//!
//! // Non-blocking attempt; `None` is contention, not an error.
//! if let Some(handle) = record.try_acquire_writer(&mut ctx)? {
//!     assert!(ctx.node(handle).is_granted());
//!     record.release_writer(&mut ctx, handle);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Try Semantics
//!
//! A failed try returns within a constant number of steps and leaves the
//! lock's observable state unchanged: no ghost queue node to unlink, no
//! reader count drift. The transaction layer builds its deadlock avoidance
//! and abort/retry policy on exactly this property, so the crate treats it as
//! a contract, not an optimization.
//!
//! ## Error Model
//!
//! Contention is signaled in-band (`Ok(None)`). Pool exhaustion (a
//! transaction holding more locks than its configured budget) is a hard
//! [`error::PoolError`]. Protocol misuse (double release, releasing an
//! ungranted handle) fails fast with a panic.

#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod error;
pub mod ordering;
pub mod pool;
pub mod record;
pub mod recordversion;
pub mod rwlock;
mod tracing_helpers;

// Re-export main types for convenience
pub use error::PoolError;
pub use pool::{BlockHandle, LockArena, LockArenaConfig, LockMode, QueueNode, WorkerLockContext};
pub use record::VersionedRecord;
pub use recordversion::{Epoch, RecordVersion, VersionSnapshot};
pub use rwlock::RecordLock;
