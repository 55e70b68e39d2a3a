//! Queue-based reader/writer lock with non-blocking try acquisition.
//!
//! One [`RecordLock`] is embedded in every lock-bearing record. Requests queue
//! MCS-style: each waiter spins only on the `granted` flag of its own
//! pool-allocated [`QueueNode`](crate::pool::QueueNode), bounding cross-core
//! traffic. The try variants never enqueue: they either commit one atomic
//! transition of the lock's state word or return `None` with the lock's
//! observable state bit-for-bit unchanged, which is what lets the transaction
//! layer implement bounded retry/backoff and deadlock avoidance on top.
//!
//! # State Word
//!
//! Bits 63-32: tail | Bits 31-16: granted readers | Bits 15-0: reserved (zero)
//!
//! The tail is a packed [`BlockHandle`]: `0` when the lock is free,
//! `READER_GROUP` (all ones) while the lock is held by a batch of granted
//! readers with nothing queued, otherwise the handle of the most recently
//! queued node. `tail == 0` iff no thread holds or awaits the lock.
//!
//! A second word, `next_writer`, parks the handle of the one writer waiting
//! for the reader batch to drain; the last releasing reader grants it.
//!
//! # Grant Discipline
//!
//! FIFO with reader batching: a writer's release hands off to its successor;
//! when the successor is a reader, the whole contiguous run of queued readers
//! behind it is granted together before control can pass to the next writer.
//! Once any node is queued, arriving try-readers fail rather than jump ahead,
//! so a queued writer cannot be starved by a stream of try traffic.

use std::hint;
use std::sync::atomic::{AtomicU32, AtomicU64};

use crate::error::PoolError;
use crate::ordering::{CAS_FAILURE, CAS_SUCCESS, GRANT_ORD, READ_ORD};
use crate::pool::{BlockHandle, LockArena, LockMode, NO_BLOCK, WorkerLockContext};
use crate::tracing_helpers::{debug_log, trace_log};

#[cfg(all(test, not(loom)))]
mod concurrent_tests;

/// State word of a free lock.
const FREE: u64 = 0;

/// Tail marker for "held by a batch of granted readers, nothing queued".
/// The all-ones worker tag is reserved by the arena configuration.
pub(crate) const READER_GROUP: u32 = u32::MAX;

const TAIL_SHIFT: u32 = 32;
const READERS_SHIFT: u32 = 16;

/// One granted reader, in place in the state word.
const READERS_ONE: u64 = 1 << READERS_SHIFT;

#[inline]
const fn pack(tail: u32, readers: u16) -> u64 {
    ((tail as u64) << TAIL_SHIFT) | ((readers as u64) << READERS_SHIFT)
}

#[inline]
const fn tail_of(state: u64) -> u32 {
    (state >> TAIL_SHIFT) as u32
}

#[inline]
const fn readers_of(state: u64) -> u16 {
    ((state >> READERS_SHIFT) & 0xFFFF) as u16
}

/// Outcome of retargeting the tail at the end of a reader run.
enum Retarget {
    /// The run consumed the whole queue; tail now points at the reader group.
    Done,
    /// A new arrival appended itself first; its successor link is imminent.
    TailMovedOn,
}

// ============================================================================
//  RecordLock
// ============================================================================

/// The queue anchor embedded in one record.
///
/// All coordination is via atomic operations on the state word and on queue
/// nodes resolved through the shared [`LockArena`]; the lock itself never
/// allocates and never blocks on I/O or a scheduler.
#[derive(Debug)]
pub struct RecordLock {
    state: AtomicU64,
    next_writer: AtomicU32,
}

impl RecordLock {
    /// Create a free lock.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: AtomicU64::new(FREE),
            next_writer: AtomicU32::new(NO_BLOCK),
        }
    }

    /// Whether no thread currently holds or awaits the lock.
    #[inline]
    #[must_use]
    pub fn is_free(&self) -> bool {
        self.state.load(READ_ORD) == FREE
    }

    /// Whether any thread holds or awaits the lock.
    #[inline]
    #[must_use]
    pub fn is_locked(&self) -> bool {
        !self.is_free()
    }

    /// Number of currently granted readers.
    #[inline]
    #[must_use]
    pub fn active_readers(&self) -> u16 {
        readers_of(self.state.load(READ_ORD))
    }

    // ========================================================================
    //  Try acquisition
    // ========================================================================

    /// Single non-blocking attempt to obtain exclusive access.
    ///
    /// Succeeds only if the lock was observed free and the one CAS installing
    /// the caller's block commits; the returned handle is already granted and
    /// finalized, valid to release with no further spinning. Otherwise
    /// returns `Ok(None)` immediately, without enqueuing and with the lock's
    /// observable state unchanged; the caller decides retry, backoff, or
    /// abort.
    ///
    /// # Errors
    /// [`PoolError::Exhausted`] when the calling worker's block pool is dry;
    /// a fatal sizing error, never to be retried.
    pub fn try_acquire_writer(
        &self,
        ctx: &mut WorkerLockContext,
    ) -> Result<Option<BlockHandle>, PoolError> {
        if self.state.load(READ_ORD) != FREE {
            return Ok(None);
        }
        let handle = ctx.acquire_block()?;
        ctx.node(handle).reset(LockMode::Writer);
        if self
            .state
            .compare_exchange(FREE, pack(handle.raw(), 0), CAS_SUCCESS, CAS_FAILURE)
            .is_ok()
        {
            let node = ctx.node(handle);
            node.set_finalized();
            node.set_granted();
            Ok(Some(handle))
        } else {
            ctx.release_block(handle);
            Ok(None)
        }
    }

    /// Single non-blocking attempt to obtain shared access.
    ///
    /// Succeeds when the lock is free or already held by the reader group
    /// with nothing queued; multiple readers succeed concurrently through
    /// independent transitions of the state word. Fails whenever the tail is
    /// a real queue node (a writer holds the lock or a request is queued), so
    /// a queued writer keeps its place ahead of new try traffic.
    ///
    /// # Errors
    /// [`PoolError::Exhausted`] as for [`Self::try_acquire_writer`].
    pub fn try_acquire_reader(
        &self,
        ctx: &mut WorkerLockContext,
    ) -> Result<Option<BlockHandle>, PoolError> {
        let observed = self.state.load(READ_ORD);
        let tail = tail_of(observed);
        let next = if observed == FREE {
            pack(READER_GROUP, 1)
        } else if tail == READER_GROUP {
            debug_assert!(readers_of(observed) >= 1);
            observed + READERS_ONE
        } else {
            return Ok(None);
        };
        let handle = ctx.acquire_block()?;
        ctx.node(handle).reset(LockMode::Reader);
        if self
            .state
            .compare_exchange(observed, next, CAS_SUCCESS, CAS_FAILURE)
            .is_ok()
        {
            let node = ctx.node(handle);
            node.set_finalized();
            node.set_granted();
            Ok(Some(handle))
        } else {
            ctx.release_block(handle);
            Ok(None)
        }
    }

    // ========================================================================
    //  Blocking acquisition
    // ========================================================================

    /// Queue for exclusive access and wait until granted.
    ///
    /// When the lock is not free, the caller's block is appended by one CAS
    /// of the state word, linked from its predecessor, and the calling thread
    /// then spins exclusively on its own node's `granted` flag. A thread that
    /// enqueues is committed: there is no cancellation, and it must release.
    ///
    /// # Errors
    /// [`PoolError::Exhausted`] when the calling worker's block pool is dry.
    pub fn acquire_writer(&self, ctx: &mut WorkerLockContext) -> Result<BlockHandle, PoolError> {
        let handle = ctx.acquire_block()?;
        ctx.node(handle).reset(LockMode::Writer);
        loop {
            let observed = self.state.load(READ_ORD);
            if observed == FREE {
                if self
                    .state
                    .compare_exchange_weak(FREE, pack(handle.raw(), 0), CAS_SUCCESS, CAS_FAILURE)
                    .is_ok()
                {
                    let node = ctx.node(handle);
                    node.set_finalized();
                    node.set_granted();
                    return Ok(handle);
                }
                continue;
            }
            if self
                .state
                .compare_exchange_weak(
                    observed,
                    pack(handle.raw(), readers_of(observed)),
                    CAS_SUCCESS,
                    CAS_FAILURE,
                )
                .is_err()
            {
                continue;
            }
            let prev = tail_of(observed);
            if prev == READER_GROUP {
                // First writer behind the reader batch; the last draining
                // reader looks for us here.
                debug_assert_eq!(self.next_writer.load(READ_ORD), NO_BLOCK);
                trace_log!(handle = handle.raw(), "writer parked behind reader group");
                self.next_writer.store(handle.raw(), GRANT_ORD);
            } else {
                ctx.arena()
                    .resolve(BlockHandle::from_raw(prev))
                    .set_successor(handle.raw());
            }
            let node = ctx.node(handle);
            while !node.is_granted() {
                hint::spin_loop();
            }
            return Ok(handle);
        }
    }

    /// Queue for shared access and wait until granted.
    ///
    /// Joins the reader group directly when the lock is free or reader-held
    /// with nothing queued; otherwise appends FIFO behind the tail and spins
    /// on its own node until a release grants it (together with the rest of
    /// its contiguous reader run).
    ///
    /// # Errors
    /// [`PoolError::Exhausted`] when the calling worker's block pool is dry.
    pub fn acquire_reader(&self, ctx: &mut WorkerLockContext) -> Result<BlockHandle, PoolError> {
        let handle = ctx.acquire_block()?;
        ctx.node(handle).reset(LockMode::Reader);
        loop {
            let observed = self.state.load(READ_ORD);
            let tail = tail_of(observed);
            if observed == FREE || tail == READER_GROUP {
                let next = if observed == FREE {
                    pack(READER_GROUP, 1)
                } else {
                    observed + READERS_ONE
                };
                if self
                    .state
                    .compare_exchange_weak(observed, next, CAS_SUCCESS, CAS_FAILURE)
                    .is_ok()
                {
                    let node = ctx.node(handle);
                    node.set_finalized();
                    node.set_granted();
                    return Ok(handle);
                }
                continue;
            }
            if self
                .state
                .compare_exchange_weak(
                    observed,
                    pack(handle.raw(), readers_of(observed)),
                    CAS_SUCCESS,
                    CAS_FAILURE,
                )
                .is_err()
            {
                continue;
            }
            ctx.arena()
                .resolve(BlockHandle::from_raw(tail))
                .set_successor(handle.raw());
            let node = ctx.node(handle);
            while !node.is_granted() {
                hint::spin_loop();
            }
            return Ok(handle);
        }
    }

    // ========================================================================
    //  Release
    // ========================================================================

    /// Release exclusive access.
    ///
    /// Hands off FIFO to the queued successor when one exists (a successor
    /// reader is granted together with its contiguous run); otherwise the
    /// tail is CASed back to free. The race with an acquirer that has already
    /// swapped itself in as tail is resolved by spinning briefly on this
    /// node's own successor field only.
    ///
    /// # Panics
    /// Panics on protocol misuse: a foreign or ungranted handle, a reader
    /// handle, or a double release.
    pub fn release_writer(&self, ctx: &mut WorkerLockContext, handle: BlockHandle) {
        assert_eq!(
            handle.worker(),
            ctx.worker_id(),
            "release_writer: foreign handle"
        );
        {
            let node = ctx.node(handle);
            assert!(node.is_granted(), "release_writer: handle not granted");
            assert_eq!(
                node.mode(),
                LockMode::Writer,
                "release_writer: not a writer handle"
            );

            let mut successor = node.successor();
            if successor == NO_BLOCK {
                if self
                    .state
                    .compare_exchange(pack(handle.raw(), 0), FREE, CAS_SUCCESS, CAS_FAILURE)
                    .is_err()
                {
                    // An acquirer swapped itself in between our check and the
                    // clear; its link to us is imminent.
                    successor = loop {
                        let linked = node.successor();
                        if linked != NO_BLOCK {
                            break linked;
                        }
                        hint::spin_loop();
                    };
                }
            }
            if successor != NO_BLOCK {
                self.grant_queue(ctx.arena(), successor);
            }
            node.clear_granted();
        }
        ctx.release_block(handle);
    }

    /// Release shared access.
    ///
    /// Decrements the granted-reader count; only the reader that observes the
    /// count reach zero performs the free transition or grants the writer
    /// parked behind the batch.
    ///
    /// # Panics
    /// Panics on protocol misuse: a foreign or ungranted handle, a writer
    /// handle, a double release, or a reader-count underflow.
    pub fn release_reader(&self, ctx: &mut WorkerLockContext, handle: BlockHandle) {
        assert_eq!(
            handle.worker(),
            ctx.worker_id(),
            "release_reader: foreign handle"
        );
        {
            let node = ctx.node(handle);
            assert!(node.is_granted(), "release_reader: handle not granted");
            assert_eq!(
                node.mode(),
                LockMode::Reader,
                "release_reader: not a reader handle"
            );

            loop {
                let observed = self.state.load(READ_ORD);
                let readers = readers_of(observed);
                assert!(readers >= 1, "release_reader: reader count underflow");
                if readers > 1 {
                    if self
                        .state
                        .compare_exchange_weak(
                            observed,
                            observed - READERS_ONE,
                            CAS_SUCCESS,
                            CAS_FAILURE,
                        )
                        .is_ok()
                    {
                        break;
                    }
                    continue;
                }
                // Last active reader.
                let tail = tail_of(observed);
                if tail == READER_GROUP {
                    if self
                        .state
                        .compare_exchange_weak(observed, FREE, CAS_SUCCESS, CAS_FAILURE)
                        .is_ok()
                    {
                        break;
                    }
                    continue;
                }
                // A writer is queued behind the batch. Commit the decrement,
                // then grant it.
                if self
                    .state
                    .compare_exchange_weak(observed, pack(tail, 0), CAS_SUCCESS, CAS_FAILURE)
                    .is_ok()
                {
                    let writer = loop {
                        let parked = self.next_writer.swap(NO_BLOCK, CAS_SUCCESS);
                        if parked != NO_BLOCK {
                            break parked;
                        }
                        // The writer has swapped itself in as tail but not
                        // yet published its handle; the store is imminent.
                        hint::spin_loop();
                    };
                    trace_log!(handle = writer, "last reader granting parked writer");
                    let next = ctx.arena().resolve(BlockHandle::from_raw(writer));
                    next.set_finalized();
                    next.set_granted();
                    break;
                }
            }
            node.clear_granted();
        }
        ctx.release_block(handle);
    }

    // ========================================================================
    //  Handoff
    // ========================================================================

    /// Grant the queue head after a writer release.
    ///
    /// A writer head is granted alone. A reader head is granted together with
    /// the whole contiguous run of queued readers behind it: pass 1 sizes the
    /// run and resolves its boundary without granting anything (so every
    /// successor link it reads is still stable), the run is accounted into
    /// the state word and the bounding writer parked, then pass 2 sets the
    /// grant flags front to back.
    fn grant_queue(&self, arena: &LockArena, first: u32) {
        let head = arena.resolve(BlockHandle::from_raw(first));
        if head.mode() == LockMode::Writer {
            head.set_finalized();
            head.set_granted();
            return;
        }

        // Pass 1: size the run, find the boundary.
        let mut run_len: u16 = 0;
        let mut cursor = first;
        let boundary: u32 = loop {
            let node = arena.resolve(BlockHandle::from_raw(cursor));
            if node.mode() == LockMode::Writer {
                break cursor;
            }
            run_len += 1;
            let mut next = node.successor();
            if next == NO_BLOCK {
                match self.retarget_tail(cursor, run_len) {
                    Retarget::Done => break NO_BLOCK,
                    Retarget::TailMovedOn => {
                        next = loop {
                            let linked = node.successor();
                            if linked != NO_BLOCK {
                                break linked;
                            }
                            hint::spin_loop();
                        };
                    }
                }
            }
            cursor = next;
        };

        debug_log!(run_len, boundary, "granting queued reader run");

        if boundary != NO_BLOCK {
            // Account the run before any grant: the pre-added count keeps the
            // last-reader handoff from firing until every run member has been
            // granted and released. Park the bounding writer for that handoff.
            self.state
                .fetch_add(u64::from(run_len) << READERS_SHIFT, CAS_SUCCESS);
            debug_assert_eq!(self.next_writer.load(READ_ORD), NO_BLOCK);
            self.next_writer.store(boundary, GRANT_ORD);
        }

        // Pass 2: grant front to back. Each successor link is read before its
        // node is granted, so the chain stays stable under us.
        let mut cursor = first;
        for granted in 0..run_len {
            let node = arena.resolve(BlockHandle::from_raw(cursor));
            let next = if granted + 1 < run_len {
                node.successor()
            } else {
                NO_BLOCK
            };
            node.set_finalized();
            node.set_granted();
            cursor = next;
        }
    }

    /// At the end of a reader run whose last node has no successor, either
    /// swing the tail from that node to the reader group (accounting the run
    /// in the same transition) or report that a new arrival got there first.
    fn retarget_tail(&self, tail: u32, run_len: u16) -> Retarget {
        loop {
            let observed = self.state.load(READ_ORD);
            if tail_of(observed) != tail {
                return Retarget::TailMovedOn;
            }
            let readers = readers_of(observed) + run_len;
            if self
                .state
                .compare_exchange_weak(
                    observed,
                    pack(READER_GROUP, readers),
                    CAS_SUCCESS,
                    CAS_FAILURE,
                )
                .is_ok()
            {
                return Retarget::Done;
            }
        }
    }
}

impl Default for RecordLock {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
//  Tests
// ============================================================================
