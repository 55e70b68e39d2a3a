//! Versioned record identifier for transactional concurrency control.
//!
//! [`RecordVersion`] packs an epoch, an intra-epoch ordinal, and status flags
//! in a single `u64`. Optimistic readers take one atomic load and answer both
//! "is this record still as I last saw it" and "is it currently write-locked"
//! without touching the lock word.
//!
//! # Concurrency Model
//! 1. Readers: call `read()` for a [`VersionSnapshot`], perform the read, call
//!    `changed_since()` to validate.
//! 2. Writers: mutate only under the record's write lock, via `stamp()` and the
//!    flag setters, or via `try_update()` with an expected snapshot.
//!
//! The `keylocked` bit is owned by the lock layer: it is set right after a
//! writer grant and cleared right before writer release, so snapshots taken by
//! optimistic readers see a write hold in the same load that carries the
//! version fields. Because `try_update` compares the whole word, a stale
//! expectation also fails when a writer locked the record in the meantime.

use std::sync::atomic::AtomicU64;

use crate::ordering::{CAS_FAILURE, CAS_SUCCESS, READ_ORD, WRITE_ORD};

// ============================================================================
//  Bit Layout
// ============================================================================
//
// Bits 63-32: epoch | Bits 31-8: ordinal | Bits 7-4: reserved (zero)
// Bit 3: keylocked | Bit 2: moved | Bit 1: deleted | Bit 0: valid
//
// Other subsystems depend on this layout being bit-exact.

/// Valid bit: the record carries a committed version.
const VALID_BIT: u64 = 1 << 0;

/// Deleted bit: the record is logically deleted.
const DELETED_BIT: u64 = 1 << 1;

/// Moved bit: the record was relocated and this slot is a tombstone.
const MOVED_BIT: u64 = 1 << 2;

/// Keylocked bit: a writer currently holds the record's lock.
const KEYLOCKED_BIT: u64 = 1 << 3;

/// All flag bits, including the reserved nibble.
const FLAGS_MASK: u64 = 0xFF;

/// Low bit of the ordinal field.
const ORDINAL_SHIFT: u32 = 8;

/// Width of the ordinal field.
const ORDINAL_BITS: u32 = 24;

/// Ordinal field mask (in place).
const ORDINAL_MASK: u64 = ((1 << ORDINAL_BITS) - 1) << ORDINAL_SHIFT;

/// Low bit of the epoch field.
const EPOCH_SHIFT: u32 = 32;

/// Largest ordinal a version word can carry.
pub const MAX_ORDINAL: u32 = (1 << ORDINAL_BITS) - 1;

// ============================================================================
//  Epoch
// ============================================================================

/// Monotonically increasing generation counter grouping transactions for
/// snapshot ordering. Advanced by the (external) transaction manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Epoch(u32);

impl Epoch {
    /// Create an epoch from its integer value.
    #[inline]
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// The integer value of this epoch.
    #[inline]
    #[must_use]
    pub const fn value(self) -> u32 {
        self.0
    }
}

// ============================================================================
//  VersionSnapshot
// ============================================================================

/// One consistent view of a record's version word.
///
/// Obtained from [`RecordVersion::read`]; all accessors are pure projections
/// of the single load that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionSnapshot {
    raw: u64,
}

impl VersionSnapshot {
    #[inline]
    pub(crate) const fn from_raw(raw: u64) -> Self {
        Self { raw }
    }

    #[inline]
    pub(crate) const fn raw(self) -> u64 {
        self.raw
    }

    /// Epoch recorded in this snapshot.
    #[inline]
    #[must_use]
    pub const fn epoch(self) -> Epoch {
        Epoch::new((self.raw >> EPOCH_SHIFT) as u32)
    }

    /// Intra-epoch ordinal recorded in this snapshot.
    #[inline]
    #[must_use]
    pub const fn ordinal(self) -> u32 {
        ((self.raw & ORDINAL_MASK) >> ORDINAL_SHIFT) as u32
    }

    /// Whether the record carried a committed version.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        (self.raw & VALID_BIT) != 0
    }

    /// Whether the record was logically deleted.
    #[inline]
    #[must_use]
    pub const fn is_deleted(self) -> bool {
        (self.raw & DELETED_BIT) != 0
    }

    /// Whether the record was relocated.
    #[inline]
    #[must_use]
    pub const fn is_moved(self) -> bool {
        (self.raw & MOVED_BIT) != 0
    }

    /// Whether a writer held the record's lock at snapshot time.
    #[inline]
    #[must_use]
    pub const fn is_keylocked(self) -> bool {
        (self.raw & KEYLOCKED_BIT) != 0
    }

    /// Copy of this snapshot with the epoch and ordinal replaced and the
    /// valid bit set. Used by transactions to build the value handed to
    /// [`RecordVersion::try_update`].
    ///
    /// # Panics
    /// Panics if `ordinal` exceeds [`MAX_ORDINAL`].
    #[must_use]
    pub fn with_version(self, epoch: Epoch, ordinal: u32) -> Self {
        assert!(ordinal <= MAX_ORDINAL, "ordinal exceeds 24-bit field");
        let raw = (self.raw & FLAGS_MASK)
            | VALID_BIT
            | (u64::from(epoch.value()) << EPOCH_SHIFT)
            | (u64::from(ordinal) << ORDINAL_SHIFT);
        Self { raw }
    }

    /// Copy of this snapshot with the deleted bit set.
    #[inline]
    #[must_use]
    pub const fn with_deleted(self) -> Self {
        Self {
            raw: self.raw | DELETED_BIT,
        }
    }

    /// Copy of this snapshot with the moved bit set.
    #[inline]
    #[must_use]
    pub const fn with_moved(self) -> Self {
        Self {
            raw: self.raw | MOVED_BIT,
        }
    }
}

// ============================================================================
//  RecordVersion
// ============================================================================

/// A record's concurrency-control metadata, packed into one atomic word.
///
/// Read with a single acquire load; mutated only via compare-and-swap or
/// flag RMWs by the owning transaction (under the record's write lock) and by
/// the lock layer (the `keylocked` bit).
///
/// # Example
///
/// ```rust
/// use reclock::recordversion::{Epoch, RecordVersion};
///
/// let v = RecordVersion::new();
/// assert!(!v.is_valid());
///
/// v.stamp(Epoch::new(3), 7);
/// let snap = v.read();
/// assert!(snap.is_valid());
/// assert_eq!(snap.epoch(), Epoch::new(3));
/// assert_eq!(snap.ordinal(), 7);
/// ```
#[derive(Debug)]
pub struct RecordVersion {
    value: AtomicU64,
}

impl RecordVersion {
    /// Create a pristine version word: invalid, no flags, epoch/ordinal zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    /// Take one consistent snapshot of the word.
    ///
    /// Single atomic load; no side effects; never fails.
    #[inline]
    #[must_use]
    pub fn read(&self) -> VersionSnapshot {
        VersionSnapshot::from_raw(self.value.load(READ_ORD))
    }

    /// Whether the record carries a committed version.
    #[inline]
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.read().is_valid()
    }

    /// Whether the record is logically deleted.
    #[inline]
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.read().is_deleted()
    }

    /// Whether the record was relocated.
    #[inline]
    #[must_use]
    pub fn is_moved(&self) -> bool {
        self.read().is_moved()
    }

    /// Whether a writer currently holds the record's lock.
    #[inline]
    #[must_use]
    pub fn is_keylocked(&self) -> bool {
        self.read().is_keylocked()
    }

    /// Whether the word changed since `old` was taken.
    ///
    /// Any transition counts, including a writer locking the record.
    #[inline]
    #[must_use]
    pub fn changed_since(&self, old: VersionSnapshot) -> bool {
        self.value.load(READ_ORD) != old.raw()
    }

    /// Install `new` if the word still equals `expected`.
    ///
    /// Single CAS. Returns false on concurrent modification; the caller
    /// re-reads and retries or aborts. Lost-update races here are expected
    /// and are the caller's to resolve.
    #[inline]
    #[must_use]
    pub fn try_update(&self, expected: VersionSnapshot, new: VersionSnapshot) -> bool {
        self.value
            .compare_exchange(expected.raw(), new.raw(), CAS_SUCCESS, CAS_FAILURE)
            .is_ok()
    }

    /// Stamp the committing transaction's epoch and ordinal, setting the
    /// valid bit and preserving the flags.
    ///
    /// The caller must hold the record's write lock.
    ///
    /// # Panics
    /// Panics if `ordinal` exceeds [`MAX_ORDINAL`].
    pub fn stamp(&self, epoch: Epoch, ordinal: u32) {
        assert!(ordinal <= MAX_ORDINAL, "ordinal exceeds 24-bit field");
        let fields = VALID_BIT
            | (u64::from(epoch.value()) << EPOCH_SHIFT)
            | (u64::from(ordinal) << ORDINAL_SHIFT);
        // RMW loop rather than a plain store: concurrent optimistic CASes by
        // other transactions must either land fully before or fully after.
        let mut current = self.value.load(READ_ORD);
        loop {
            let new = (current & FLAGS_MASK) | fields;
            match self
                .value
                .compare_exchange_weak(current, new, CAS_SUCCESS, CAS_FAILURE)
            {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }

    /// Set the deleted flag. The caller must hold the record's write lock.
    #[inline]
    pub fn set_deleted(&self) {
        self.value.fetch_or(DELETED_BIT, CAS_SUCCESS);
    }

    /// Set the moved flag. The caller must hold the record's write lock.
    #[inline]
    pub fn set_moved(&self) {
        self.value.fetch_or(MOVED_BIT, CAS_SUCCESS);
    }

    /// Return the word to the pristine, valid-cleared state.
    ///
    /// Only at record (re)initialization, never while concurrently visible.
    #[inline]
    pub fn reset(&self) {
        self.value.store(0, WRITE_ORD);
    }

    /// Mark the record write-locked. Lock layer only, right after a grant.
    #[inline]
    pub(crate) fn set_keylocked(&self) {
        self.value.fetch_or(KEYLOCKED_BIT, CAS_SUCCESS);
    }

    /// Clear the write-locked mark. Lock layer only, right before release.
    #[inline]
    pub(crate) fn clear_keylocked(&self) {
        self.value.fetch_and(!KEYLOCKED_BIT, CAS_SUCCESS);
    }
}

impl Default for RecordVersion {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
//  Tests
// ============================================================================
