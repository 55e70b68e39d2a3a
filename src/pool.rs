//! Per-worker lock-block pools backed by one shared arena.
//!
//! Every worker thread owns a fixed-capacity pool of lock-queue node slots
//! ("blocks"). A block is referenced by a [`BlockHandle`], a packed
//! `(worker id, slot index)` pair, never by address, so the lock queue never
//! holds a dangling cross-thread pointer and slot reuse is race-free by
//! construction: only the owning worker claims or reuses a slot, and only
//! after the lock protocol has made it unreachable.
//!
//! The node *fields* are shared memory: any thread may read or write them
//! through a resolved handle (linking a successor, granting a waiter). What is
//! thread-exclusive is allocation, which is why the pool needs no reference
//! counting and no dynamic memory operation occurs while a lock is held.
//!
//! # Implementation Note
//! Pools are sized at worker-pool construction time to the maximum number of
//! locks a single transaction may hold concurrently. Running out of slots is a
//! sizing bug surfaced as [`PoolError::Exhausted`], never retried.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU16, AtomicU32};

use crate::error::PoolError;
use crate::ordering::{CAS_FAILURE, CAS_SUCCESS, GRANT_ORD, RELAXED, SPIN_ORD};
use crate::tracing_helpers::warn_log;

/// Packed handle raw value meaning "no block".
pub(crate) const NO_BLOCK: u32 = 0;

// ============================================================================
//  BlockHandle
// ============================================================================

/// Reference to one lock-queue node slot: worker id in the high half, slot
/// index in the low half.
///
/// A handle value alone would be ambiguous without the owning-worker tag, so
/// both are packed into the one word. Raw value `0` is the reserved "no block"
/// sentinel (slot 0 of every pool is never handed out).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockHandle {
    raw: u32,
}

impl BlockHandle {
    #[inline]
    pub(crate) const fn from_parts(worker: u16, slot: u16) -> Self {
        Self {
            raw: ((worker as u32) << 16) | slot as u32,
        }
    }

    #[inline]
    pub(crate) const fn from_raw(raw: u32) -> Self {
        Self { raw }
    }

    /// Id of the worker whose pool owns the referenced slot.
    #[inline]
    #[must_use]
    pub const fn worker(self) -> u16 {
        (self.raw >> 16) as u16
    }

    /// Slot index within the owning worker's pool.
    #[inline]
    #[must_use]
    pub const fn slot(self) -> u16 {
        (self.raw & 0xFFFF) as u16
    }

    /// The packed value as stored in lock queue fields.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.raw
    }
}

// ============================================================================
//  QueueNode
// ============================================================================

/// Request mode carried by a queue node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Shared access; coexists with other granted readers.
    Reader,
    /// Exclusive access.
    Writer,
}

const MODE_READER: u8 = 0;
const MODE_WRITER: u8 = 1;

/// One worker's pending or held request on one lock.
///
/// All fields are atomics because the MCS protocol has other threads write
/// them: a later arrival links `successor`, the releasing holder stores
/// `granted`/`finalized`. Aligned to a cache line so that a waiter spinning on
/// its own node does not share the line with a neighbor slot.
#[derive(Debug)]
#[repr(align(64))]
pub struct QueueNode {
    /// Packed handle of the next queued request, or [`NO_BLOCK`].
    successor: AtomicU32,
    /// Set by the granter; the only field a blocking waiter spins on.
    granted: AtomicBool,
    /// Set when the request's outcome is settled; for handles returned by the
    /// try variants this is always already true.
    finalized: AtomicBool,
    /// [`MODE_READER`] or [`MODE_WRITER`].
    mode: AtomicU8,
}

impl QueueNode {
    const fn new() -> Self {
        Self {
            successor: AtomicU32::new(NO_BLOCK),
            granted: AtomicBool::new(false),
            finalized: AtomicBool::new(false),
            mode: AtomicU8::new(MODE_READER),
        }
    }

    /// Whether the request was granted. For a released block this is false
    /// again, which is what the fail-fast double-release checks key on.
    #[inline]
    #[must_use]
    pub fn is_granted(&self) -> bool {
        self.granted.load(SPIN_ORD)
    }

    /// Whether the request's outcome is settled.
    #[inline]
    #[must_use]
    pub fn is_finalized(&self) -> bool {
        self.finalized.load(SPIN_ORD)
    }

    /// The request mode this node was initialized with.
    #[inline]
    #[must_use]
    pub fn mode(&self) -> LockMode {
        if self.mode.load(SPIN_ORD) == MODE_WRITER {
            LockMode::Writer
        } else {
            LockMode::Reader
        }
    }

    /// Reinitialize a freshly claimed block. Owner only, before publication.
    pub(crate) fn reset(&self, mode: LockMode) {
        self.successor.store(NO_BLOCK, RELAXED);
        self.granted.store(false, RELAXED);
        self.finalized.store(false, RELAXED);
        let mode = match mode {
            LockMode::Reader => MODE_READER,
            LockMode::Writer => MODE_WRITER,
        };
        self.mode.store(mode, RELAXED);
    }

    #[inline]
    pub(crate) fn successor(&self) -> u32 {
        self.successor.load(SPIN_ORD)
    }

    #[inline]
    pub(crate) fn set_successor(&self, handle: u32) {
        self.successor.store(handle, GRANT_ORD);
    }

    #[inline]
    pub(crate) fn set_granted(&self) {
        self.granted.store(true, GRANT_ORD);
    }

    #[inline]
    pub(crate) fn clear_granted(&self) {
        self.granted.store(false, GRANT_ORD);
    }

    #[inline]
    pub(crate) fn set_finalized(&self) {
        self.finalized.store(true, GRANT_ORD);
    }
}

// ============================================================================
//  LockArena
// ============================================================================

/// Sizing for the shared node arena.
///
/// `blocks_per_worker` bounds how many locks one transaction may hold
/// concurrently (one slot per held or in-flight request, slot 0 reserved).
#[derive(Debug, Clone, Copy)]
pub struct LockArenaConfig {
    /// Worker identities the arena can hand out.
    pub max_workers: u16,
    /// Slots per worker pool, including the reserved slot 0.
    pub blocks_per_worker: u16,
}

impl Default for LockArenaConfig {
    fn default() -> Self {
        Self {
            max_workers: 64,
            blocks_per_worker: 64,
        }
    }
}

impl LockArenaConfig {
    fn validate(self) -> Result<(), PoolError> {
        if self.max_workers == 0 {
            return Err(PoolError::InvalidConfig("max_workers must be at least 1"));
        }
        if self.max_workers == u16::MAX {
            // The all-ones worker tag is reserved for the lock's
            // reader-group tail marker.
            return Err(PoolError::InvalidConfig(
                "max_workers must be below u16::MAX",
            ));
        }
        if self.blocks_per_worker < 2 {
            return Err(PoolError::InvalidConfig(
                "blocks_per_worker must be at least 2 (slot 0 is reserved)",
            ));
        }
        // Every block could be a concurrently granted reader on one lock, and
        // the lock's reader count is a 16-bit field.
        let usable = u32::from(self.max_workers) * u32::from(self.blocks_per_worker - 1);
        if usable > u32::from(u16::MAX) {
            return Err(PoolError::InvalidConfig(
                "total usable blocks must fit the 16-bit reader count",
            ));
        }
        Ok(())
    }
}

/// The shared slab of queue-node slots, `max_workers x blocks_per_worker`.
///
/// Created once at worker-pool startup; workers register to obtain their
/// thread-exclusive [`WorkerLockContext`] view. Worker identities are not
/// recycled; the arena mirrors the engine's fixed worker pool.
#[derive(Debug)]
pub struct LockArena {
    nodes: Box<[QueueNode]>,
    blocks_per_worker: u16,
    max_workers: u16,
    registered: AtomicU16,
}

impl LockArena {
    /// Allocate the arena.
    ///
    /// # Errors
    /// Returns [`PoolError::InvalidConfig`] when the sizing cannot be
    /// represented by the lock protocol.
    pub fn new(config: LockArenaConfig) -> Result<Self, PoolError> {
        config.validate()?;
        let count = usize::from(config.max_workers) * usize::from(config.blocks_per_worker);
        let nodes: Box<[QueueNode]> = (0..count).map(|_| QueueNode::new()).collect();
        Ok(Self {
            nodes,
            blocks_per_worker: config.blocks_per_worker,
            max_workers: config.max_workers,
            registered: AtomicU16::new(0),
        })
    }

    /// Usable blocks in each worker's pool (slot 0 excluded).
    #[inline]
    #[must_use]
    pub const fn pool_capacity(&self) -> u16 {
        self.blocks_per_worker - 1
    }

    /// Worker identities the arena can hand out.
    #[inline]
    #[must_use]
    pub const fn max_workers(&self) -> u16 {
        self.max_workers
    }

    /// Claim the next worker identity and its private block pool.
    ///
    /// # Errors
    /// Returns [`PoolError::WorkersExhausted`] once every identity is taken.
    pub fn register_worker(self: &Arc<Self>) -> Result<WorkerLockContext, PoolError> {
        let worker = self
            .registered
            .fetch_update(CAS_SUCCESS, CAS_FAILURE, |n| {
                (n < self.max_workers).then_some(n + 1)
            })
            .map_err(|_| PoolError::WorkersExhausted {
                max: self.max_workers,
            })?;
        Ok(WorkerLockContext::new(Arc::clone(self), worker))
    }

    /// Resolve a handle to its node, from any thread.
    ///
    /// # Panics
    /// Panics on the sentinel handle or an out-of-range worker/slot, which
    /// can only arise from protocol misuse.
    #[must_use]
    pub fn resolve(&self, handle: BlockHandle) -> &QueueNode {
        assert_ne!(handle.raw(), NO_BLOCK, "resolve: sentinel handle");
        assert!(
            handle.worker() < self.max_workers,
            "resolve: worker {} out of range",
            handle.worker()
        );
        assert!(
            handle.slot() != 0 && handle.slot() < self.blocks_per_worker,
            "resolve: slot {} out of range",
            handle.slot()
        );
        let index =
            usize::from(handle.worker()) * usize::from(self.blocks_per_worker) + usize::from(handle.slot());
        &self.nodes[index]
    }
}

// ============================================================================
//  WorkerLockContext
// ============================================================================

/// One worker thread's private view of the arena: its identity plus a LIFO
/// free stack over its own row of slots.
///
/// Never shared across threads; the lock operations take it by `&mut` so the
/// free stack needs no synchronization at all.
#[derive(Debug)]
pub struct WorkerLockContext {
    arena: Arc<LockArena>,
    worker: u16,
    free: Vec<u16>,
}

impl WorkerLockContext {
    fn new(arena: Arc<LockArena>, worker: u16) -> Self {
        // Reverse so the first claim pops slot 1.
        let free: Vec<u16> = (1..arena.blocks_per_worker).rev().collect();
        Self {
            arena,
            worker,
            free,
        }
    }

    /// This worker's stable identity.
    #[inline]
    #[must_use]
    pub const fn worker_id(&self) -> u16 {
        self.worker
    }

    /// The shared arena this context draws from.
    #[inline]
    #[must_use]
    pub fn arena(&self) -> &LockArena {
        &self.arena
    }

    /// Blocks currently claimable.
    #[inline]
    #[must_use]
    pub fn available_blocks(&self) -> usize {
        self.free.len()
    }

    /// Total usable blocks in this pool.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> u16 {
        self.arena.pool_capacity()
    }

    /// Claim the next free block in this worker's own pool.
    ///
    /// # Errors
    /// Returns [`PoolError::Exhausted`] when the pool is dry: a fatal
    /// sizing error, not a transient condition.
    pub fn acquire_block(&mut self) -> Result<BlockHandle, PoolError> {
        match self.free.pop() {
            Some(slot) => Ok(BlockHandle::from_parts(self.worker, slot)),
            None => {
                warn_log!(
                    worker = self.worker,
                    capacity = self.capacity(),
                    "lock-block pool exhausted"
                );
                Err(PoolError::Exhausted {
                    worker: self.worker,
                    capacity: self.capacity(),
                })
            }
        }
    }

    /// Return a fully released block to this worker's pool.
    ///
    /// # Panics
    /// Panics on a foreign handle, an out-of-range slot, or (in debug builds)
    /// a double release.
    pub fn release_block(&mut self, handle: BlockHandle) {
        assert_eq!(
            handle.worker(),
            self.worker,
            "release_block: handle belongs to worker {}",
            handle.worker()
        );
        assert!(
            handle.slot() != 0 && handle.slot() < self.arena.blocks_per_worker,
            "release_block: slot {} out of range",
            handle.slot()
        );
        debug_assert!(
            !self.free.contains(&handle.slot()),
            "release_block: slot {} released twice",
            handle.slot()
        );
        self.free.push(handle.slot());
    }

    /// Access one of this worker's own nodes.
    ///
    /// # Panics
    /// Panics on a foreign handle.
    #[must_use]
    pub fn node(&self, handle: BlockHandle) -> &QueueNode {
        assert_eq!(
            handle.worker(),
            self.worker,
            "node: handle belongs to worker {}",
            handle.worker()
        );
        self.arena.resolve(handle)
    }
}

// ============================================================================
//  Tests
// ============================================================================
