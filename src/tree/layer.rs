//! Layer management: the first root, new layers, and layer root links.
//!
//! ```text
//! layer 0:   [ "abcdefgh" LAYER ]──────┐
//!                    ▲                 ▼
//!                    └── BorderChild ─ layer 1 root
//! ```
//!
//! A layer root points back at the border node holding its slot. When that
//! border node splits and the slot moves, the back link is rewritten.

use std::ptr as StdPtr;
use std::sync::Arc;

use crate::border::{BorderNode, KEY_LEN_HAS_SUFFIX, KEY_LEN_LAYER, KEY_LEN_UNSTABLE, SlotEntry, encode_layer};
use crate::gc::GarbageCollector;
use crate::key::{Key, Slice};
use crate::node::{NodeLink, NodePtr};
use crate::nodeversion::LockGuard;
use crate::ordering::{CAS_FAILURE, CAS_SUCCESS, RELAXED};
use crate::permuter::Permuter;
use crate::suffix::BigSuffix;
use crate::tracing_helpers::{debug_log, trace_log};

use super::MassTree;

impl<V> MassTree<V> {
    /// Install a layer-0 root holding only `key`.
    ///
    /// Two writers may race here. The loser takes its value back, marks its
    /// unpublished node deleted, stages it, and returns the value so it can
    /// retry against the winner's root.
    pub(super) fn start_new_tree(
        &self,
        key: &Key,
        value: Arc<V>,
        gc: &mut GarbageCollector<V>,
    ) -> Result<(), Arc<V>> {
        let root: Box<BorderNode<V>> = BorderNode::new_root();
        root.insert_entry(0, key, value);
        let root_ptr: *mut BorderNode<V> = Box::into_raw(root);

        match self
            .root
            .compare_exchange(StdPtr::null_mut(), root_ptr.cast(), CAS_SUCCESS, CAS_FAILURE)
        {
            Ok(_) => {
                self.count.fetch_add(1, RELAXED);
                debug_log!(root = ?root_ptr, "start_new_tree: root installed");
                Ok(())
            }

            Err(_) => {
                // SAFETY: the CAS failed, so no other thread has seen the node.
                let node: &BorderNode<V> = unsafe { &*root_ptr };
                let mut lock: LockGuard<'_> = node.version().lock();
                let Some(value) = node.take_value(0) else {
                    unreachable!("fresh root lost its only value");
                };
                lock.mark_deleted();
                drop(lock);
                gc.add_border(root_ptr);

                debug_log!("start_new_tree: lost the root race, retrying");
                Err(value)
            }
        }
    }

    /// Move the entry in `slot` of a locked border node into a new layer.
    ///
    /// Called when the entry keeps its tail in a suffix and another key with
    /// the same slice needs a slot. The new layer root holds the old entry
    /// keyed by the first slice of its tail; the slot becomes a layer link.
    pub(super) fn make_new_layer(
        &self,
        border: &BorderNode<V>,
        lock: &mut LockGuard<'_>,
        slot: usize,
        gc: &mut GarbageCollector<V>,
    ) {
        debug_assert_eq!(border.key_len(slot), KEY_LEN_HAS_SUFFIX);
        lock.mark_insert();

        let border_ptr: *mut BorderNode<V> = StdPtr::from_ref(border).cast_mut();
        let layer: Box<BorderNode<V>> = BorderNode::new_layer_root(border_ptr);

        let suffix_ptr: *mut BigSuffix = border.suffix(slot);
        // SAFETY: a HAS_SUFFIX slot always owns a live suffix, and we hold
        // the node lock.
        let suffix: &BigSuffix = unsafe { &*suffix_ptr };
        let first: Slice = suffix.current_slice();

        let (key_len, moved): (u8, *mut BigSuffix) = if suffix.has_next() {
            suffix.shift();
            (KEY_LEN_HAS_SUFFIX, suffix_ptr)
        } else {
            gc.add_suffix(suffix_ptr);
            (first.size, StdPtr::null_mut())
        };

        layer.store_entry(
            0,
            SlotEntry {
                key_len,
                key_slice: first.slice,
                lv: border.lv_raw(slot),
                suffix: moved,
            },
        );
        layer.set_permutation(Permuter::from_sorted(1));
        let layer_ptr: *mut BorderNode<V> = Box::into_raw(layer);

        border.set_key_len(slot, KEY_LEN_UNSTABLE);
        border.set_suffix(slot, StdPtr::null_mut());
        border.set_lv_raw(slot, encode_layer(layer_ptr.cast()));
        border.set_key_len(slot, KEY_LEN_LAYER);

        debug_log!(slot, layer = ?layer_ptr, "make_new_layer: slot now links a layer");
    }

    /// Point the layer rooted at or above `layer` back at `upper`.
    ///
    /// `layer` may be a stale root; the walk climbs to the current root,
    /// locking each candidate so a concurrent root split cannot be missed.
    ///
    /// # Safety
    /// `layer` must be a live node linked from a slot of `upper`, and the
    /// caller must hold the lock on `upper`.
    pub(super) unsafe fn relink_layer_root(layer: *mut u8, upper: *mut BorderNode<V>) {
        // SAFETY: caller guarantees `layer` is live.
        let mut node: NodePtr<V> = unsafe { NodePtr::from_raw(layer) };
        loop {
            // SAFETY: nodes on a layer's parent chain are never freed while
            // their layer is linked.
            let version = unsafe { node.version() };
            let lock: LockGuard<'_> = version.lock();
            // SAFETY: as above.
            match unsafe { node.link() }.load() {
                NodeLink::InteriorChild(parent) => {
                    drop(lock);
                    node = NodePtr::Interior(parent);
                }
                NodeLink::LayerRoot | NodeLink::BorderChild(_) => {
                    // SAFETY: as above; the link is written under the lock.
                    unsafe { node.link() }.store(NodeLink::BorderChild(upper));
                    trace_log!(layer = ?node, "relink_layer_root: moved to new upper node");
                    return;
                }
            }
        }
    }
}
