//! Filepath: src/nodeversion.rs
//!
//! Per-node version word for optimistic concurrency control.
//!
//! [`NodeVersion`] packs the lock bit, the two in-progress bits, the insert
//! and split counters, and the node role flags into a single `u32` so that a
//! reader can snapshot all of it with one atomic load.
//!
//! # Concurrency Model
//! 1. Readers: call [`NodeVersion::stable`], read node fields, then check
//!    [`NodeVersion::has_changed`] (or [`NodeVersion::has_split`]) and retry.
//! 2. Writers: call [`NodeVersion::lock`] to get a [`LockGuard`], mark the
//!    kind of change with `mark_insert`/`mark_split`, modify the node, and let
//!    the guard drop.
//!
//! ```rust
//! use masstrie::nodeversion::NodeVersion;
//!
//! let v = NodeVersion::new(true);
//! let before = v.stable();
//! {
//!     let mut guard = v.lock();
//!     guard.mark_insert();
//! }
//! assert!(v.has_changed(before));
//! assert!(!v.has_split(before));
//! ```

use std::hint;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU32, Ordering, fence};
use std::thread;

use crate::ordering::{CAS_FAILURE, RELAXED, UNLOCK_ORD, VERSION_ORD};


#[cfg(all(test, loom))]
mod loom_tests;

// ============================================================================
//  Bit Constants
// ============================================================================

/// Lock bit: node is locked for modification.
pub(crate) const LOCK_BIT: u32 = 1 << 0;

/// Inserting bit: slot contents are being changed.
pub(crate) const INSERTING_BIT: u32 = 1 << 1;

/// Splitting bit: the node is being split (or deleted).
pub(crate) const SPLITTING_BIT: u32 = 1 << 2;

/// Either in-progress bit.
pub(crate) const DIRTY_MASK: u32 = INSERTING_BIT | SPLITTING_BIT;

/// Low bit of the insert counter.
pub(crate) const VINSERT_LOWBIT: u32 = 1 << 3;

/// Low bit of the split counter.
pub(crate) const VSPLIT_LOWBIT: u32 = 1 << 9;

/// Overflow guard between the split counter and the flags.
const UNUSED1_BIT: u32 = 1 << 28;

/// Deleted bit: node has been unlinked from the tree.
pub(crate) const DELETED_BIT: u32 = 1 << 29;

/// Root bit: node is the root of its layer.
pub(crate) const ROOT_BIT: u32 = 1 << 30;

/// Border bit: node is a border (leaf) node.
pub(crate) const BORDER_BIT: u32 = 1 << 31;

/// Unlock after split: clears the in-progress bits, the lock, and counter overflow.
const SPLIT_UNLOCK_MASK: u32 = !(UNUSED1_BIT | (VSPLIT_LOWBIT - 1));

/// Unlock after insert: clears bits below the insert counter and counter overflow.
const UNLOCK_MASK: u32 = !(UNUSED1_BIT | (VINSERT_LOWBIT - 1));

/// Spins before a contended lock starts yielding the thread.
const SPIN_LIMIT: u32 = 64;

// ============================================================================
//  NodeVersion
// ============================================================================

/// A versioned lock for tree nodes.
///
/// # Layout
/// Bit 31: `is_border` | Bit 30: `root` | Bit 29: `deleted` | Bits 9-27: split counter
/// Bits 3-8: insert counter | Bit 2: `splitting` | Bit 1: `inserting` | Bit 0: `locked`
#[derive(Debug)]
pub struct NodeVersion {
    value: AtomicU32,
}

// ============================================================================
//  LockGuard (Type-State Pattern)
// ============================================================================

/// Proof that a node lock is held.
///
/// Only [`NodeVersion::lock`] and [`NodeVersion::try_lock`] construct one.
/// Dropping the guard releases the lock and bumps whichever counter matches
/// the in-progress bit that was marked.
///
/// Guards are `!Send` and `!Sync` through `PhantomData<*mut ()>`.
#[derive(Debug)]
#[must_use = "releasing a lock without using the guard is a logic error"]
pub struct LockGuard<'a> {
    version: &'a NodeVersion,
    locked_value: u32,
    _marker: PhantomData<*mut ()>,
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        let new_value: u32 = if self.locked_value & SPLITTING_BIT != 0 {
            (self.locked_value + VSPLIT_LOWBIT) & SPLIT_UNLOCK_MASK
        } else {
            // `(inserting << 2)` equals `VINSERT_LOWBIT` when inserting was marked.
            (self.locked_value + ((self.locked_value & INSERTING_BIT) << 2)) & UNLOCK_MASK
        };

        self.version.value.store(new_value, UNLOCK_ORD);
    }
}

impl LockGuard<'_> {
    /// The version word as this guard last wrote it.
    #[inline]
    #[must_use]
    pub const fn locked_value(&self) -> u32 {
        self.locked_value
    }

    /// The version this guard protects.
    #[inline]
    #[must_use]
    pub const fn version(&self) -> &NodeVersion {
        self.version
    }

    #[inline]
    fn set_bits(&mut self, bits: u32) {
        let value: u32 = self.version.value.load(RELAXED) | bits;
        self.version.value.store(value, Ordering::Relaxed);
        // Slot writes that follow must not become visible before the dirty bit.
        fence(Ordering::Release);
        self.locked_value = value;
    }

    /// Mark slot contents as being modified.
    ///
    /// The insert counter is bumped on unlock.
    #[inline]
    pub fn mark_insert(&mut self) {
        debug_assert!(
            self.locked_value & SPLITTING_BIT == 0,
            "mark_insert: node is already splitting"
        );
        self.set_bits(INSERTING_BIT);
    }

    /// Mark the node as being split.
    ///
    /// The split counter is bumped on unlock. An earlier `mark_insert` is
    /// upgraded to a split so the two bits are never set together.
    #[inline]
    pub fn mark_split(&mut self) {
        let value: u32 = (self.version.value.load(RELAXED) & !INSERTING_BIT) | SPLITTING_BIT;
        self.version.value.store(value, Ordering::Relaxed);
        fence(Ordering::Release);
        self.locked_value = value;
    }

    /// Mark the node as deleted.
    ///
    /// Also marks a split so every reader holding an older snapshot retries.
    #[inline]
    pub fn mark_deleted(&mut self) {
        self.mark_split();
        self.set_bits(DELETED_BIT);
    }

    /// Set the root bit.
    #[inline]
    pub fn mark_root(&mut self) {
        self.set_bits(ROOT_BIT);
    }

    /// Clear the root bit.
    #[inline]
    pub fn mark_nonroot(&mut self) {
        let value: u32 = self.version.value.load(RELAXED) & !ROOT_BIT;
        self.version.value.store(value, Ordering::Release);
        self.locked_value = value;
    }
}

impl NodeVersion {
    /// Create an unlocked, non-root version.
    #[must_use]
    pub const fn new(is_border: bool) -> Self {
        let initial: u32 = if is_border { BORDER_BIT } else { 0 };

        Self {
            value: AtomicU32::new(initial),
        }
    }

    /// Create an unlocked version with the root bit already set.
    ///
    /// Used for nodes built before they are published.
    #[must_use]
    pub const fn new_root(is_border: bool) -> Self {
        let initial: u32 = if is_border { BORDER_BIT } else { 0 };

        Self {
            value: AtomicU32::new(initial | ROOT_BIT),
        }
    }

    /// Create a version from a raw word.
    #[cfg(test)]
    #[must_use]
    pub(crate) const fn from_value(value: u32) -> Self {
        Self {
            value: AtomicU32::new(value),
        }
    }

    // ========================================================================
    //  Flag Accessors
    // ========================================================================

    /// Border (leaf) node.
    #[inline]
    #[must_use]
    pub fn is_border(&self) -> bool {
        (self.value.load(RELAXED) & BORDER_BIT) != 0
    }

    /// Root of its layer.
    #[inline]
    #[must_use]
    pub fn is_root(&self) -> bool {
        (self.value.load(RELAXED) & ROOT_BIT) != 0
    }

    /// Logically deleted.
    #[inline]
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        (self.value.load(RELAXED) & DELETED_BIT) != 0
    }

    /// Lock currently held.
    #[inline]
    #[must_use]
    pub fn is_locked(&self) -> bool {
        (self.value.load(RELAXED) & LOCK_BIT) != 0
    }

    /// Inserting bit set.
    #[inline]
    #[must_use]
    pub fn is_inserting(&self) -> bool {
        (self.value.load(RELAXED) & INSERTING_BIT) != 0
    }

    /// Splitting bit set.
    #[inline]
    #[must_use]
    pub fn is_splitting(&self) -> bool {
        (self.value.load(RELAXED) & SPLITTING_BIT) != 0
    }

    /// Either in-progress bit set.
    #[inline]
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        (self.value.load(RELAXED) & DIRTY_MASK) != 0
    }

    /// The raw version word.
    #[inline]
    #[must_use]
    pub fn value(&self) -> u32 {
        self.value.load(RELAXED)
    }

    /// Root bit of a snapshot.
    #[inline]
    #[must_use]
    pub const fn snapshot_is_root(snapshot: u32) -> bool {
        (snapshot & ROOT_BIT) != 0
    }

    /// Deleted bit of a snapshot.
    #[inline]
    #[must_use]
    pub const fn snapshot_is_deleted(snapshot: u32) -> bool {
        (snapshot & DELETED_BIT) != 0
    }

    /// True if a split happened between two snapshots of the same node.
    #[inline]
    #[must_use]
    pub const fn split_between(old: u32, new: u32) -> bool {
        (old ^ new) >= VSPLIT_LOWBIT
    }

    // ========================================================================
    //  Optimistic Reads
    // ========================================================================

    /// Spin until neither in-progress bit is set and return that snapshot.
    #[inline]
    #[must_use]
    pub fn stable(&self) -> u32 {
        let mut spins: u32 = 0;
        loop {
            let value: u32 = self.value.load(VERSION_ORD);
            if (value & DIRTY_MASK) == 0 {
                return value;
            }
            backoff(&mut spins);
        }
    }

    /// True if anything other than the lock bit changed since `old`.
    #[inline]
    #[must_use]
    pub fn has_changed(&self, old: u32) -> bool {
        fence(Ordering::Acquire);
        (old ^ self.value.load(VERSION_ORD)) > LOCK_BIT
    }

    /// True if the split counter (or any higher flag) changed since `old`.
    #[inline]
    #[must_use]
    pub fn has_split(&self, old: u32) -> bool {
        fence(Ordering::Acquire);
        (old ^ self.value.load(VERSION_ORD)) >= VSPLIT_LOWBIT
    }

    // ========================================================================
    //  Locking
    // ========================================================================

    /// Acquire the lock.
    ///
    /// Contended acquisition spins briefly and then yields the thread between
    /// attempts. The returned guard releases the lock on drop.
    #[must_use = "releasing a lock without using the guard is a logic error"]
    pub fn lock(&self) -> LockGuard<'_> {
        let mut spins: u32 = 0;
        loop {
            if let Some(guard) = self.try_lock() {
                return guard;
            }
            backoff(&mut spins);
        }
    }

    /// Acquire the lock if it is free right now.
    #[must_use]
    pub fn try_lock(&self) -> Option<LockGuard<'_>> {
        let value: u32 = self.value.load(RELAXED);
        if (value & LOCK_BIT) != 0 {
            return None;
        }
        debug_assert!(
            (value & DIRTY_MASK) == 0,
            "unlocked node has in-progress bits set"
        );

        let locked: u32 = value | LOCK_BIT;
        self.value
            .compare_exchange_weak(value, locked, Ordering::Acquire, CAS_FAILURE)
            .ok()
            .map(|_| LockGuard {
                version: self,
                locked_value: locked,
                _marker: PhantomData,
            })
    }
}

/// One round of the spin-then-yield wait used by `stable` and `lock`.
#[inline]
fn backoff(spins: &mut u32) {
    if *spins < SPIN_LIMIT {
        *spins += 1;
        hint::spin_loop();
    } else {
        thread::yield_now();
    }
}

impl Default for NodeVersion {
    /// A border node version.
    fn default() -> Self {
        Self::new(true)
    }
}
