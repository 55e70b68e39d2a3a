//! Lock-bearing record handle: one version word plus one lock.
//!
//! [`VersionedRecord`] is the unit transactions actually touch. It couples a
//! [`RecordVersion`] with a [`RecordLock`] and keeps the version word's
//! `keylocked` flag coherent with the lock: set immediately after a writer
//! grant, cleared immediately before a writer release, never touched by
//! reader holds. Optimistic readers thereby see the write-hold state in the
//! same load that carries the version fields.

use crate::error::PoolError;
use crate::pool::{BlockHandle, WorkerLockContext};
use crate::recordversion::RecordVersion;
use crate::rwlock::RecordLock;

/// One record's concurrency-control state: version word plus lock queue head.
///
/// Embedded inline in the storage record it annotates; lives exactly as long
/// as that record.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use reclock::{LockArena, LockArenaConfig, VersionedRecord};
///
/// # fn main() -> Result<(), reclock::error::PoolError> {
/// let arena = Arc::new(LockArena::new(LockArenaConfig::default())?);
/// let mut ctx = arena.register_worker()?;
/// let record = VersionedRecord::new();
///
/// if let Some(handle) = record.try_acquire_writer(&mut ctx)? {
///     assert!(record.version().is_keylocked());
///     record.release_writer(&mut ctx, handle);
/// }
/// assert!(!record.version().is_keylocked());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct VersionedRecord {
    version: RecordVersion,
    lock: RecordLock,
}

impl VersionedRecord {
    /// Create a pristine record: invalid version word, free lock.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            version: RecordVersion::new(),
            lock: RecordLock::new(),
        }
    }

    /// The record's version word.
    #[inline]
    #[must_use]
    pub const fn version(&self) -> &RecordVersion {
        &self.version
    }

    /// The record's lock queue head, for callers driving the lock protocol
    /// directly.
    #[inline]
    #[must_use]
    pub const fn lock_head(&self) -> &RecordLock {
        &self.lock
    }

    /// Whether a writer currently holds this record's lock.
    #[inline]
    #[must_use]
    pub fn is_keylocked(&self) -> bool {
        self.version.is_keylocked()
    }

    /// Non-blocking shared acquisition. Reader holds leave the version word
    /// untouched.
    ///
    /// # Errors
    /// [`PoolError::Exhausted`] when the calling worker's block pool is dry.
    pub fn try_acquire_reader(
        &self,
        ctx: &mut WorkerLockContext,
    ) -> Result<Option<BlockHandle>, PoolError> {
        self.lock.try_acquire_reader(ctx)
    }

    /// Non-blocking exclusive acquisition; marks the version word keylocked
    /// on success, before returning to the caller.
    ///
    /// # Errors
    /// [`PoolError::Exhausted`] when the calling worker's block pool is dry.
    pub fn try_acquire_writer(
        &self,
        ctx: &mut WorkerLockContext,
    ) -> Result<Option<BlockHandle>, PoolError> {
        let Some(handle) = self.lock.try_acquire_writer(ctx)? else {
            return Ok(None);
        };
        self.version.set_keylocked();
        Ok(Some(handle))
    }

    /// Blocking shared acquisition.
    ///
    /// # Errors
    /// [`PoolError::Exhausted`] when the calling worker's block pool is dry.
    pub fn acquire_reader(&self, ctx: &mut WorkerLockContext) -> Result<BlockHandle, PoolError> {
        self.lock.acquire_reader(ctx)
    }

    /// Blocking exclusive acquisition; marks the version word keylocked once
    /// granted.
    ///
    /// # Errors
    /// [`PoolError::Exhausted`] when the calling worker's block pool is dry.
    pub fn acquire_writer(&self, ctx: &mut WorkerLockContext) -> Result<BlockHandle, PoolError> {
        let handle = self.lock.acquire_writer(ctx)?;
        self.version.set_keylocked();
        Ok(handle)
    }

    /// Release a shared hold.
    ///
    /// # Panics
    /// Panics on protocol misuse, as [`RecordLock::release_reader`].
    pub fn release_reader(&self, ctx: &mut WorkerLockContext, handle: BlockHandle) {
        self.lock.release_reader(ctx, handle);
    }

    /// Release an exclusive hold, clearing the keylocked mark first so the
    /// flag is never observed set without a live writer.
    ///
    /// # Panics
    /// Panics on protocol misuse, as [`RecordLock::release_writer`].
    pub fn release_writer(&self, ctx: &mut WorkerLockContext, handle: BlockHandle) {
        self.version.clear_keylocked();
        self.lock.release_writer(ctx, handle);
    }

    /// Return the record to a pristine, unlocked, valid-cleared state.
    ///
    /// Only at record (re)initialization, never while concurrently visible
    /// to other threads.
    ///
    /// # Panics
    /// Panics if the lock is still held or awaited.
    pub fn reset(&self) {
        assert!(
            self.lock.is_free(),
            "reset: record lock still held or awaited"
        );
        self.version.reset();
    }
}

// ============================================================================
//  Tests
// ============================================================================
