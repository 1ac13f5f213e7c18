//! Filepath: src/tree.rs
//! `MassTree` - a concurrent trie of B+trees.
//!
//! The facade owns the layer-0 root pointer, the `seize` collector that
//! every operation enters, and the entry count. The algorithms live in the
//! submodules:
//!
//! | Module | Operation |
//! |--------|-----------|
//! | `traverse` | optimistic descent to a border node |
//! | `optimistic` | lock-free `get` |
//! | `locked` | `put` / `insert` |
//! | `layer` | first root, new layers, layer root relinking |
//! | `split` | border and interior splits |
//! | `remove` | `remove` and empty layer collapse |
//! | `scan` | ordered range reads |

use std::fmt as StdFmt;
use std::marker::PhantomData;
use std::ops::Bound;
use std::ptr as StdPtr;
use std::sync::Arc;
use std::sync::atomic::{AtomicPtr, AtomicUsize};

use seize::{Collector, LocalGuard};

use crate::border::layer_root_of;
use crate::error::TreeError;
use crate::gc::GarbageCollector;
use crate::key::Key;
use crate::node::NodePtr;
use crate::ordering::{READ_ORD, RELAXED};

mod layer;
mod locked;
mod optimistic;
mod remove;
mod scan;
mod split;
mod traverse;

#[cfg(test)]
mod shuttle_tests;

use locked::{PutMode, PutOutcome};

/// A concurrent ordered map from byte strings to `Arc<V>`.
///
/// Keys are split into 8-byte slices; each slice is indexed by the B+tree of
/// one trie layer. Reads never take locks. Writes lock single nodes.
///
/// Every method has a `*_with_guard` form that reuses a caller's guard from
/// [`guard`](Self::guard), which amortizes entering the collector across a
/// batch of operations.
///
/// ```rust
/// use masstrie::MassTree;
///
/// let tree: MassTree<u64> = MassTree::new();
/// tree.put(b"hello", 1).unwrap();
/// tree.put(b"hello world, long key", 2).unwrap();
///
/// assert_eq!(tree.get(b"hello").as_deref(), Some(&1));
/// assert_eq!(tree.len(), 2);
///
/// let keys: Vec<Vec<u8>> = tree
///     .scan(b"a", false, b"z", false)
///     .into_iter()
///     .map(|(key, _)| key.to_bytes())
///     .collect();
/// assert_eq!(keys, vec![b"hello".to_vec(), b"hello world, long key".to_vec()]);
/// ```
pub struct MassTree<V> {
    /// Layer-0 root, null while the tree has never held a key.
    ///
    /// May lag behind a root split; readers climb from here to the current
    /// root through the node links.
    root: AtomicPtr<u8>,

    /// Reclamation domain for nodes, values and suffixes.
    collector: Collector,

    /// Live entries.
    count: AtomicUsize,

    _marker: PhantomData<Arc<V>>,
}

impl<V> StdFmt::Debug for MassTree<V> {
    fn fmt(&self, f: &mut StdFmt::Formatter<'_>) -> StdFmt::Result {
        f.debug_struct("MassTree")
            .field("root", &self.root.load(RELAXED))
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

impl<V> Default for MassTree<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> MassTree<V> {
    /// Create an empty tree. No node is allocated until the first insert.
    #[must_use]
    pub fn new() -> Self {
        Self {
            root: AtomicPtr::new(StdPtr::null_mut()),
            collector: Collector::new(),
            count: AtomicUsize::new(0),
            _marker: PhantomData,
        }
    }

    /// Enter a protected region and return a guard.
    ///
    /// Nodes and values read while the guard is alive are not freed until it
    /// is dropped.
    #[must_use]
    #[inline(always)]
    pub fn guard(&self) -> LocalGuard<'_> {
        self.collector.enter()
    }

    /// Number of keys.
    #[must_use]
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.count.load(RELAXED)
    }

    /// True if the tree holds no keys.
    #[must_use]
    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline(always)]
    fn load_root(&self) -> *mut u8 {
        self.root.load(READ_ORD)
    }

    // ========================================================================
    //  Reads
    // ========================================================================

    /// Look up `key`.
    ///
    /// The empty key is never stored, so it always yields `None`.
    #[must_use]
    #[inline]
    pub fn get(&self, key: &[u8]) -> Option<Arc<V>> {
        let guard = self.guard();
        self.get_with_guard(key, &guard)
    }

    /// Look up `key` under a caller's guard.
    #[must_use]
    pub fn get_with_guard(&self, key: &[u8], guard: &LocalGuard<'_>) -> Option<Arc<V>> {
        let mut key: Key = Key::from_bytes(key).ok()?;
        self.get_key(&mut key, guard)
    }

    /// Every entry with `left <= key <= right`, in ascending key order.
    ///
    /// Either bound becomes strict when its `*_exclusive` flag is set.
    #[must_use]
    pub fn scan(
        &self,
        left: &[u8],
        left_exclusive: bool,
        right: &[u8],
        right_exclusive: bool,
    ) -> Vec<(Key, Arc<V>)> {
        let lower: Bound<&[u8]> = if left_exclusive {
            Bound::Excluded(left)
        } else {
            Bound::Included(left)
        };
        let upper: Bound<&[u8]> = if right_exclusive {
            Bound::Excluded(right)
        } else {
            Bound::Included(right)
        };

        let guard = self.guard();
        self.scan_keys(lower, upper, &guard)
    }

    /// Every entry within `range`, in ascending key order.
    ///
    /// ```rust
    /// use masstrie::MassTree;
    ///
    /// let tree: MassTree<u8> = MassTree::new();
    /// for b in b'a'..=b'e' {
    ///     tree.put(&[b], b).unwrap();
    /// }
    ///
    /// let hits: Vec<u8> = tree
    ///     .range(b"b".as_slice()..b"d".as_slice())
    ///     .iter()
    ///     .map(|(_, v)| **v)
    ///     .collect();
    /// assert_eq!(hits, vec![b'b', b'c']);
    /// ```
    #[must_use]
    pub fn range<K, R>(&self, range: R) -> Vec<(Key, Arc<V>)>
    where
        K: AsRef<[u8]>,
        R: std::ops::RangeBounds<K>,
    {
        let lower: Bound<&[u8]> = range.start_bound().map(|k| k.as_ref());
        let upper: Bound<&[u8]> = range.end_bound().map(|k| k.as_ref());

        let guard = self.guard();
        self.scan_keys(lower, upper, &guard)
    }

    // ========================================================================
    //  Writes
    // ========================================================================

    /// Insert or overwrite `key`.
    ///
    /// Returns the previous value if the key was present.
    ///
    /// # Errors
    /// [`TreeError::EmptyKey`] for an empty key.
    #[inline]
    pub fn put(&self, key: &[u8], value: V) -> Result<Option<Arc<V>>, TreeError> {
        let guard = self.guard();
        self.put_with_guard(key, value, &guard)
    }

    /// Insert or overwrite `key` under a caller's guard.
    ///
    /// # Errors
    /// [`TreeError::EmptyKey`] for an empty key.
    pub fn put_with_guard(
        &self,
        key: &[u8],
        value: V,
        guard: &LocalGuard<'_>,
    ) -> Result<Option<Arc<V>>, TreeError> {
        let mut key: Key = Key::from_bytes(key)?;
        let mut gc: GarbageCollector<V> = GarbageCollector::new();
        let old: Option<Arc<V>> = self.put_key(&mut key, Arc::new(value), &mut gc, guard);
        gc.run(guard);
        Ok(old)
    }

    /// Insert `key` only if it is absent.
    ///
    /// # Errors
    /// - [`TreeError::AlreadyExists`] if the key is present; the stored value
    ///   is left untouched.
    /// - [`TreeError::EmptyKey`] for an empty key.
    pub fn insert(&self, key: &[u8], value: V) -> Result<(), TreeError> {
        let guard = self.guard();
        let mut key: Key = Key::from_bytes(key)?;
        let mut gc: GarbageCollector<V> = GarbageCollector::new();
        let outcome: PutOutcome<V> =
            self.put_internal(&mut key, Arc::new(value), PutMode::InsertOnly, &mut gc, &guard);
        gc.run(&guard);

        match outcome {
            PutOutcome::Exists => Err(TreeError::AlreadyExists),
            PutOutcome::Inserted | PutOutcome::Replaced(_) => Ok(()),
        }
    }

    /// Remove `key`, returning its value.
    ///
    /// # Errors
    /// - [`TreeError::NotFound`] if the key is absent.
    /// - [`TreeError::EmptyKey`] for an empty key.
    #[inline]
    pub fn remove(&self, key: &[u8]) -> Result<Arc<V>, TreeError> {
        let guard = self.guard();
        self.remove_with_guard(key, &guard)
    }

    /// Remove `key` under a caller's guard.
    ///
    /// # Errors
    /// As for [`remove`](Self::remove).
    pub fn remove_with_guard(&self, key: &[u8], guard: &LocalGuard<'_>) -> Result<Arc<V>, TreeError> {
        let mut key: Key = Key::from_bytes(key)?;
        let mut gc: GarbageCollector<V> = GarbageCollector::new();
        let removed: Result<Arc<V>, TreeError> = self.remove_key(&mut key, &mut gc, guard);
        gc.run(guard);
        removed
    }

    // ========================================================================
    //  Key-level Entry Points
    // ========================================================================

    /// Insert or overwrite a prepared key.
    ///
    /// Unlinked objects are staged in `gc`; the caller retires them with
    /// [`GarbageCollector::run`] under the same guard. The key's cursor is
    /// reset to layer 0 on entry and left at the layer that took the value.
    pub fn put_key(
        &self,
        key: &mut Key,
        value: Arc<V>,
        gc: &mut GarbageCollector<V>,
        guard: &LocalGuard<'_>,
    ) -> Option<Arc<V>> {
        match self.put_internal(key, value, PutMode::Upsert, gc, guard) {
            PutOutcome::Replaced(old) => Some(old),
            PutOutcome::Inserted | PutOutcome::Exists => None,
        }
    }
}

impl<V> Drop for MassTree<V> {
    fn drop(&mut self) {
        let root: *mut u8 = *self.root.get_mut();
        if root.is_null() {
            return;
        }
        // SAFETY: `&mut self` rules out guards and concurrent operations, so
        // every reachable node is live and reachable exactly once.
        unsafe { free_layer::<V>(root) };
    }
}

/// Free the layer that `node` belongs to, deeper layers included.
///
/// # Safety
/// The tree must be exclusively owned; `node` must be part of it.
unsafe fn free_layer<V>(node: *mut u8) {
    // SAFETY: forwarded.
    unsafe { free_subtree(layer_root_of::<V>(node)) };
}

unsafe fn free_subtree<V>(node: NodePtr<V>) {
    match node {
        NodePtr::Border(border) => {
            // SAFETY: the caller owns the tree; layer links name live layers.
            unsafe {
                let links: Vec<*mut u8> = (*border).layer_links().map(|(_, layer)| layer).collect();
                for layer in links {
                    free_layer::<V>(layer);
                }
                drop(Box::from_raw(border));
            }
        }
        NodePtr::Interior(interior) => {
            // SAFETY: children in `0..=nkeys` are live, owned nodes.
            unsafe {
                for i in 0..=(*interior).nkeys() {
                    free_subtree(NodePtr::<V>::from_raw((*interior).child(i)));
                }
                drop(Box::from_raw(interior));
            }
        }
    }
}

#[cfg(test)]
impl<V> MassTree<V> {
    /// Current layer-0 root.
    fn root_for_test(&self) -> Option<NodePtr<V>> {
        let root: *mut u8 = self.load_root();
        // SAFETY: test trees are not dropped while inspected.
        (!root.is_null()).then(|| unsafe { layer_root_of::<V>(root) })
    }
}
