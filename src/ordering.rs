//! Memory orderings shared by node accessors.
//!
//! Node fields are atomics written under the node lock and read optimistically,
//! so every access site names its ordering through one of these constants.

use std::sync::atomic::Ordering;

/// Optimistic reads of node fields. Pairs with [`WRITE_ORD`].
pub const READ_ORD: Ordering = Ordering::Acquire;

/// Stores to node fields made under the node lock, and publication stores.
pub const WRITE_ORD: Ordering = Ordering::Release;

/// Successful compare-and-swap on the root pointer or a lock word.
pub const CAS_SUCCESS: Ordering = Ordering::AcqRel;

/// Failed compare-and-swap; only the current value is needed.
pub const CAS_FAILURE: Ordering = Ordering::Acquire;

/// Accesses already ordered by the node lock.
pub const RELAXED: Ordering = Ordering::Relaxed;

/// Version snapshots taken by `stable` and validation.
pub const VERSION_ORD: Ordering = Ordering::Acquire;

/// Version store that releases a node lock.
pub const UNLOCK_ORD: Ordering = Ordering::Release;
