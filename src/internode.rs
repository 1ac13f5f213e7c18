//! Filepath: src/internode.rs
//!
//! Interior (routing) node of a layer's B+-tree.
//!
//! Interior nodes hold only separator slices and child pointers. Keys are
//! kept in sorted physical order, so no permutation is needed.
//!
//! # Memory Layout
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │ header: NodeVersion + NodeLink (16 bytes)                       │
//! │ nkeys: AtomicU8                                                 │
//! ├─────────────────────────────────────────────────────────────────┤
//! │ key_slice: [AtomicU64; 15] (120 bytes) - separators             │
//! ├─────────────────────────────────────────────────────────────────┤
//! │ child: [AtomicPtr<u8>; 16] (128 bytes) - border or interior     │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Routing
//!
//! ```text
//!         [K0 | K1 | K2]           <- 3 keys, 4 children
//!        /    |    |    \
//!    C0     C1    C2     C3
//!
//!    C0: slices < K0
//!    C1: K0 <= slices < K1
//!    C2: K1 <= slices < K2
//!    C3: slices >= K2
//! ```

use std::cmp::Ordering;
use std::fmt as StdFmt;
use std::ptr as StdPtr;
use std::sync::atomic::{AtomicPtr, AtomicU8, AtomicU64, fence};

use crate::node::{NodeHeader, NodeLink, NodePtr};
use crate::nodeversion::NodeVersion;
use crate::ordering::{READ_ORD, RELAXED, WRITE_ORD};
use crate::permuter::WIDTH;

/// Children per interior node.
pub const CHILDREN: usize = WIDTH + 1;

// ============================================================================
//  InteriorNode
// ============================================================================

/// A routing node.
///
/// # Invariants
/// - `nkeys <= 15`
/// - `child[0..=nkeys]` are non-null
/// - `key_slice[i] < key_slice[i + 1]` for `i + 1 < nkeys`
/// - every slice under `child[i]` is `< key_slice[i]`; under `child[i + 1]`
///   it is `>= key_slice[i]`
#[repr(C, align(64))]
pub struct InteriorNode<V> {
    header: NodeHeader<V>,

    nkeys: AtomicU8,

    key_slice: [AtomicU64; WIDTH],

    child: [AtomicPtr<u8>; CHILDREN],
}

impl<V> StdFmt::Debug for InteriorNode<V> {
    fn fmt(&self, f: &mut StdFmt::Formatter<'_>) -> StdFmt::Result {
        let keys: Vec<u64> = (0..self.nkeys()).map(|i| self.key_slice(i)).collect();
        f.debug_struct("InteriorNode")
            .field("root", &self.version().is_root())
            .field("keys", &keys)
            .field("link", &self.header.link)
            .finish_non_exhaustive()
    }
}

impl<V> InteriorNode<V> {
    /// An empty, unlinked, non-root interior node.
    #[must_use]
    pub fn new() -> Box<Self> {
        Box::new(Self {
            header: NodeHeader::new(NodeVersion::new(false), NodeLink::LayerRoot),
            nkeys: AtomicU8::new(0),
            key_slice: std::array::from_fn(|_| AtomicU64::new(0)),
            child: std::array::from_fn(|_| AtomicPtr::new(StdPtr::null_mut())),
        })
    }

    /// An interior root with one separator and two children.
    ///
    /// Used when a root splits and the layer grows a level.
    #[must_use]
    pub fn new_root(link: NodeLink<V>, separator: u64, left: *mut u8, right: *mut u8) -> Box<Self> {
        let node: Box<Self> = Box::new(Self {
            header: NodeHeader::new(NodeVersion::new_root(false), link),
            nkeys: AtomicU8::new(1),
            key_slice: std::array::from_fn(|_| AtomicU64::new(0)),
            child: std::array::from_fn(|_| AtomicPtr::new(StdPtr::null_mut())),
        });
        node.key_slice[0].store(separator, RELAXED);
        node.child[0].store(left, RELAXED);
        node.child[1].store(right, RELAXED);
        node
    }

    // ========================================================================
    //  Header
    // ========================================================================

    /// The node's version.
    #[inline(always)]
    #[must_use]
    pub const fn version(&self) -> &NodeVersion {
        &self.header.version
    }

    /// Upward link.
    #[inline]
    #[must_use]
    pub fn link(&self) -> NodeLink<V> {
        self.header.link.load()
    }

    /// Replace the upward link. Caller holds this node's lock or owns it.
    #[inline]
    pub fn set_link(&self, link: NodeLink<V>) {
        self.header.link.store(link);
    }

    // ========================================================================
    //  Keys and Children
    // ========================================================================

    /// Number of separators.
    #[inline(always)]
    #[must_use]
    pub fn nkeys(&self) -> usize {
        self.nkeys.load(READ_ORD) as usize
    }

    /// All 15 separators used.
    #[inline]
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.nkeys() == WIDTH
    }

    /// Separator at `i`.
    #[inline(always)]
    #[must_use]
    pub fn key_slice(&self, i: usize) -> u64 {
        self.key_slice[i].load(READ_ORD)
    }

    /// Child at `i`, `0..=nkeys`.
    #[inline(always)]
    #[must_use]
    pub fn child(&self, i: usize) -> *mut u8 {
        self.child[i].load(READ_ORD)
    }

    /// Overwrite child `i`.
    #[inline(always)]
    pub fn set_child(&self, i: usize, child: *mut u8) {
        self.child[i].store(child, WRITE_ORD);
    }

    #[inline]
    fn set_nkeys(&self, n: usize) {
        debug_assert!(n <= WIDTH, "set_nkeys: {n} exceeds width");
        #[expect(clippy::cast_possible_truncation, reason = "n <= 15")]
        let n: u8 = n as u8;
        self.nkeys.store(n, WRITE_ORD);
    }

    /// Index of the child covering `slice`: the first `i < nkeys` with
    /// `slice < key_slice[i]`, else `nkeys`.
    #[inline]
    #[must_use]
    pub fn find_child_index(&self, slice: u64) -> usize {
        let n: usize = self.nkeys().min(WIDTH);
        (0..n).find(|&i| slice < self.key_slice(i)).unwrap_or(n)
    }

    /// Child covering `slice`.
    ///
    /// Under an optimistic read the result may be stale or null; the caller
    /// validates the version before trusting it.
    #[inline]
    #[must_use]
    pub fn find_child(&self, slice: u64) -> *mut u8 {
        self.child(self.find_child_index(slice))
    }

    /// Position where separator `slice` goes: the first `i` with
    /// `key_slice[i] >= slice`.
    #[must_use]
    pub fn find_insert_position(&self, slice: u64) -> usize {
        let mut lo: usize = 0;
        let mut hi: usize = self.nkeys();

        while lo < hi {
            let mid: usize = (lo + hi) >> 1;
            if self.key_slice(mid) < slice {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }

        lo
    }

    // ========================================================================
    //  Insertion
    // ========================================================================

    /// Insert separator `slice` at `p` with `child` to its right.
    ///
    /// Keys from `p` and children from `p + 1` move up one place. The count
    /// is published last.
    ///
    /// # Panics
    /// In debug builds, if the node is full or `p > nkeys`.
    pub fn insert_key_and_child(&self, p: usize, slice: u64, child: *mut u8) {
        let n: usize = self.nkeys.load(RELAXED) as usize;
        debug_assert!(n < WIDTH, "insert_key_and_child: node is full");
        debug_assert!(p <= n, "insert_key_and_child: position {p} past {n}");

        for i in (p..n).rev() {
            self.key_slice[i + 1].store(self.key_slice[i].load(RELAXED), RELAXED);
            self.child[i + 2].store(self.child[i + 1].load(RELAXED), RELAXED);
        }
        self.key_slice[p].store(slice, RELAXED);
        self.child[p + 1].store(child, RELAXED);

        fence(WRITE_ORD);
        self.set_nkeys(n + 1);
    }

    /// Copy `count` separators (each with its right child) from `src`.
    fn shift_from(&self, dst_pos: usize, src: &Self, src_pos: usize, count: usize) {
        for i in 0..count {
            self.key_slice[dst_pos + i].store(src.key_slice[src_pos + i].load(RELAXED), RELAXED);
            self.child[dst_pos + 1 + i].store(src.child[src_pos + 1 + i].load(RELAXED), RELAXED);
        }
    }

    // ========================================================================
    //  Split
    // ========================================================================

    /// Split this full node into `self + new_right` while inserting
    /// `(slice, child)` at `insert_pos`.
    ///
    /// Of the 16 separators (15 old plus the new one), the 9th pops up to the
    /// parent; 8 stay left and 7 move right.
    ///
    /// Returns `(popup, went_left)`. `went_left` is true if the new separator
    /// landed in `self`.
    ///
    /// The caller holds the lock on `self` with a split marked, and relinks
    /// the children of `new_right` with [`adopt_children`](Self::adopt_children)
    /// before anything else can reach them.
    pub fn split_into(&self, new_right: &Self, insert_pos: usize, slice: u64, child: *mut u8) -> (u64, bool) {
        debug_assert!(self.is_full(), "split_into: node must be full");

        let mid: usize = WIDTH.div_ceil(2);

        let split: (u64, bool) = match insert_pos.cmp(&mid) {
            Ordering::Less => {
                new_right.child[0].store(self.child[mid].load(RELAXED), RELAXED);
                new_right.shift_from(0, self, mid, WIDTH - mid);
                new_right.set_nkeys(WIDTH - mid);

                let popup: u64 = self.key_slice[mid - 1].load(RELAXED);
                self.set_nkeys(mid - 1);
                self.insert_key_and_child(insert_pos, slice, child);

                (popup, true)
            }

            Ordering::Equal => {
                // The new separator is the one that pops up.
                new_right.child[0].store(child, RELAXED);
                new_right.shift_from(0, self, mid, WIDTH - mid);
                new_right.set_nkeys(WIDTH - mid);
                self.set_nkeys(mid);

                (slice, false)
            }

            Ordering::Greater => {
                let right_pos: usize = insert_pos - (mid + 1);

                new_right.child[0].store(self.child[mid + 1].load(RELAXED), RELAXED);
                new_right.shift_from(0, self, mid + 1, right_pos);
                new_right.key_slice[right_pos].store(slice, RELAXED);
                new_right.child[right_pos + 1].store(child, RELAXED);
                new_right.shift_from(right_pos + 1, self, insert_pos, WIDTH - insert_pos);
                new_right.set_nkeys(WIDTH - mid);

                let popup: u64 = self.key_slice[mid].load(RELAXED);
                self.set_nkeys(mid);

                (popup, false)
            }
        };

        // Children past nkeys now belong to `new_right`.
        for slot in &self.child[self.nkeys() + 1..] {
            slot.store(StdPtr::null_mut(), RELAXED);
        }
        split
    }

    /// Point every child's link at `self_ptr`.
    ///
    /// # Safety
    /// `self_ptr` must be `self`, and every child in `0..=nkeys` must be live.
    pub unsafe fn adopt_children(&self, self_ptr: *mut Self) {
        for i in 0..=self.nkeys() {
            // SAFETY: caller guarantees the children are live nodes.
            unsafe {
                NodePtr::<V>::from_raw(self.child(i))
                    .link()
                    .store(NodeLink::InteriorChild(self_ptr));
            }
        }
    }

    /// Check ordering of the separators, and that exactly the children in
    /// `0..=nkeys` are set.
    #[cfg(debug_assertions)]
    pub fn debug_assert_invariants(&self) {
        let n: usize = self.nkeys();
        assert!(n <= WIDTH);
        for i in 1..n {
            assert!(
                self.key_slice(i - 1) < self.key_slice(i),
                "separators out of order at {i}: {self:?}"
            );
        }
        for i in 0..=n {
            assert!(!self.child(i).is_null(), "null child {i}");
        }
        for i in n + 1..CHILDREN {
            assert!(self.child(i).is_null(), "stale child {i} past nkeys {n}");
        }
    }

    /// Check ordering of the separators.
    #[cfg(not(debug_assertions))]
    pub const fn debug_assert_invariants(&self) {}
}
