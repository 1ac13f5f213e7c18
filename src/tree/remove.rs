//! Removal and empty layer collapse.
//!
//! A removed entry leaves a tombstone `key_len` that later inserts reuse.
//! Border nodes inside a layer stay linked even when empty. The one
//! structural change is collapse: once the root border node of a deeper layer
//! is empty, the layer is unlinked from its upper slot and retired, which may
//! in turn empty the upper layer.
//!
//! Lock order across layers is upper node first, then the layer root.

use std::ptr as StdPtr;
use std::sync::Arc;

use seize::LocalGuard;

use crate::border::{BorderNode, SearchResult};
use crate::error::TreeError;
use crate::gc::GarbageCollector;
use crate::key::Key;
use crate::node::NodeLink;
use crate::nodeversion::LockGuard;
use crate::ordering::RELAXED;
use crate::suffix::BigSuffix;
use crate::tracing_helpers::{debug_log, trace_log};

use super::MassTree;

impl<V> MassTree<V> {
    /// Remove a prepared key, returning its value.
    ///
    /// The removed value and suffix are staged in `gc`, as is any layer root
    /// that collapses.
    ///
    /// # Errors
    /// [`TreeError::NotFound`] if the key is absent.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "trace", skip_all))]
    pub fn remove_key(
        &self,
        key: &mut Key,
        gc: &mut GarbageCollector<V>,
        guard: &LocalGuard<'_>,
    ) -> Result<Arc<V>, TreeError> {
        'top: loop {
            key.reset();
            let mut layer_root: *mut u8 = self.load_root();
            if layer_root.is_null() {
                return Err(TreeError::NotFound);
            }

            'layer: loop {
                let (border, version): (&BorderNode<V>, u32) =
                    self.find_border(layer_root, key.current_slice().slice, guard);
                let mut lock: LockGuard<'_> = border.version().lock();

                if border.version().is_deleted() {
                    drop(lock);
                    continue 'top;
                }
                if border.version().has_split(version) {
                    drop(lock);
                    continue 'layer;
                }

                match border.search_link_or_value_with_index(key) {
                    SearchResult::Value(slot) => {
                        lock.mark_insert();
                        let (value, suffix): (*const V, *mut BigSuffix) = border.remove_entry(slot);
                        // SAFETY: the slot owned one strong count, now staged
                        // in `gc`; the caller gets a fresh one.
                        let removed: Arc<V> = unsafe {
                            Arc::increment_strong_count(value);
                            Arc::from_raw(value)
                        };
                        gc.add_value(value);
                        gc.add_suffix(suffix);
                        self.count.fetch_sub(1, RELAXED);

                        let collapse: bool = Self::is_empty_layer_root(border, &lock);
                        drop(lock);
                        if collapse {
                            let border_ptr: *mut BorderNode<V> = StdPtr::from_ref(border).cast_mut();
                            // SAFETY: protected by `guard`.
                            unsafe { Self::collapse_layer(border_ptr, gc) };
                        }
                        return Ok(removed);
                    }

                    SearchResult::Layer(slot) => {
                        let Some(next) = border.layer_ptr(slot) else {
                            unreachable!("layer slot {slot} without a layer pointer");
                        };
                        drop(lock);
                        key.shift();
                        layer_root = next;
                        continue 'layer;
                    }

                    SearchResult::Unstable => {
                        drop(lock);
                        continue 'layer;
                    }

                    SearchResult::NotFound => return Err(TreeError::NotFound),
                }
            }
        }
    }

    /// True if `border` is an empty root of a layer other than layer 0.
    fn is_empty_layer_root(border: &BorderNode<V>, lock: &LockGuard<'_>) -> bool {
        border.is_empty()
            && lock.version().is_root()
            && !lock.version().is_deleted()
            && matches!(border.link(), NodeLink::BorderChild(_))
    }

    /// Unlink the empty layer rooted at `node` from its upper slot, and
    /// repeat upward while that leaves upper layers empty.
    ///
    /// Every check is redone under both locks; if a racing insert refilled
    /// the layer, or a split moved the slot, the collapse retries or stops.
    ///
    /// # Safety
    /// `node` must be protected by a guard held by the caller.
    unsafe fn collapse_layer(mut node: *mut BorderNode<V>, gc: &mut GarbageCollector<V>) {
        loop {
            // SAFETY: caller's guard keeps the node allocated.
            let layer: &BorderNode<V> = unsafe { &*node };
            let NodeLink::BorderChild(upper_ptr) = layer.link() else {
                return;
            };
            // SAFETY: an upper border node holding a live layer slot is not
            // retired before the layer is unlinked.
            let upper: &BorderNode<V> = unsafe { &*upper_ptr };

            let mut upper_lock: LockGuard<'_> = upper.version().lock();
            let mut layer_lock: LockGuard<'_> = layer.version().lock();

            if layer.link() != NodeLink::BorderChild(upper_ptr) {
                trace_log!("collapse_layer: upper slot moved, retrying");
                continue;
            }
            if upper.version().is_deleted() || !Self::is_empty_layer_root(layer, &layer_lock) {
                return;
            }
            let Some(slot) = upper.find_layer_slot(node.cast()) else {
                return;
            };

            upper_lock.mark_insert();
            layer_lock.mark_deleted();
            upper.unlink_layer(slot);
            drop(layer_lock);
            gc.add_border(node);
            debug_log!(slot, layer = ?node, "collapse_layer: layer unlinked");

            let cascade: bool = Self::is_empty_layer_root(upper, &upper_lock);
            drop(upper_lock);
            if !cascade {
                return;
            }
            node = upper_ptr;
        }
    }
}
