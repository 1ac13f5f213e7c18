//! Deferred reclamation of unlinked border nodes, values and suffixes.
//!
//! Interior nodes are never unlinked, so only border nodes pass through here.
//!
//! Writers stage everything they unlink in a [`GarbageCollector`] while
//! they work, then hand the whole batch to `seize` in one
//! [`run`](GarbageCollector::run). Readers that loaded one of those pointers
//! under an older guard keep it alive until their guard is dropped.

use std::sync::Arc;

use seize::{Guard, LocalGuard};

use crate::border::BorderNode;
use crate::suffix::BigSuffix;
use crate::tracing_helpers::trace_log;

/// Objects unlinked by one operation, waiting for retirement.
///
/// Each pointer may be staged at most once. After [`run`](Self::run) the
/// collector is empty and can be reused.
pub struct GarbageCollector<V> {
    borders: Vec<*mut BorderNode<V>>,
    values: Vec<*const V>,
    suffixes: Vec<*mut BigSuffix>,
}

impl<V> GarbageCollector<V> {
    /// Nothing staged.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            borders: Vec::new(),
            values: Vec::new(),
            suffixes: Vec::new(),
        }
    }

    /// Stage a border node that is marked deleted and unreachable.
    pub fn add_border(&mut self, node: *mut BorderNode<V>) {
        debug_assert!(!node.is_null());
        debug_assert!(!self.borders.contains(&node), "border node staged twice");
        // SAFETY: the caller just unlinked the node; it is still allocated.
        debug_assert!(unsafe { (*node).version().is_deleted() }, "staged node not marked deleted");
        self.borders.push(node);
    }

    /// Stage a value pointer obtained from `Arc::into_raw`.
    pub fn add_value(&mut self, value: *const V) {
        debug_assert!(!value.is_null());
        debug_assert!(!self.values.contains(&value), "value staged twice");
        self.values.push(value);
    }

    /// Stage a suffix; null is ignored.
    pub fn add_suffix(&mut self, suffix: *mut BigSuffix) {
        if suffix.is_null() {
            return;
        }
        debug_assert!(!self.suffixes.contains(&suffix), "suffix staged twice");
        self.suffixes.push(suffix);
    }

    /// True if `value` is staged.
    #[must_use]
    pub fn contains_value(&self, value: *const V) -> bool {
        self.values.contains(&value)
    }

    /// True if `node` is staged.
    #[must_use]
    pub fn contains_border(&self, node: *mut BorderNode<V>) -> bool {
        self.borders.contains(&node)
    }

    /// Number of staged objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.borders.len() + self.values.len() + self.suffixes.len()
    }

    /// Nothing staged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Retire everything staged through `guard`.
    ///
    /// Objects are freed once every guard that might still see them is gone.
    pub fn run(&mut self, guard: &LocalGuard<'_>) {
        if self.is_empty() {
            return;
        }
        trace_log!(
            borders = self.borders.len(),
            values = self.values.len(),
            suffixes = self.suffixes.len(),
            "gc: retiring batch"
        );

        // SAFETY: every staged pointer was unlinked from the tree by the
        // operation that staged it, is staged once, and came from
        // `Box::into_raw` (nodes, suffixes) or `Arc::into_raw` (values).
        unsafe {
            for node in self.borders.drain(..) {
                guard.defer_retire(node, |p, _| {
                    drop(Box::from_raw(p));
                });
            }
            for value in self.values.drain(..) {
                guard.defer_retire(value.cast_mut(), |p, _| {
                    drop(Arc::from_raw(p));
                });
            }
            for suffix in self.suffixes.drain(..) {
                guard.defer_retire(suffix, |p, _| {
                    drop(Box::from_raw(p));
                });
            }
        }
    }
}

impl<V> Default for GarbageCollector<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> std::fmt::Debug for GarbageCollector<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GarbageCollector")
            .field("borders", &self.borders.len())
            .field("values", &self.values.len())
            .field("suffixes", &self.suffixes.len())
            .finish()
    }
}

impl<V> Drop for GarbageCollector<V> {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            debug_assert!(self.is_empty(), "garbage collector dropped with {self:?} unretired");
        }
    }
}
