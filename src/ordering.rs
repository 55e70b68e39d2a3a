//! Standard memory orderings for lock and version-word access.
//!
//! These constants ensure consistent ordering usage across the codebase
//! and make the intent clear at each access point.

use std::sync::atomic::Ordering;

/// Ordering for observing lock state and version words.
/// Pairs with the Release stores/CASes of holders and granters.
pub const READ_ORD: Ordering = Ordering::Acquire;

/// Ordering for publishing version-word resets and stamps.
/// Pairs with readers' Acquire loads.
pub const WRITE_ORD: Ordering = Ordering::Release;

/// Ordering for CAS success on the lock state word and version word.
/// Acquires the predecessor state, releases our own transition.
pub const CAS_SUCCESS: Ordering = Ordering::AcqRel;

/// Ordering for CAS failure.
/// Only need to see the current value.
pub const CAS_FAILURE: Ordering = Ordering::Acquire;

/// Ordering for handoff stores: `granted`, `finalized`, `successor`,
/// `next_writer`. Everything written under the hold must be visible
/// to the thread that observes the grant.
pub const GRANT_ORD: Ordering = Ordering::Release;

/// Ordering for spinning on a field of the caller's own queue node.
/// Pairs with the granter's [`GRANT_ORD`] store.
pub const SPIN_ORD: Ordering = Ordering::Acquire;

/// Ordering for owner-local node initialization before publication.
/// Safe because the state-word CAS that publishes the node is AcqRel.
pub const RELAXED: Ordering = Ordering::Relaxed;
