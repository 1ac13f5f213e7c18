//! Node splits and their propagation up a layer's B+-tree.
//!
//! Lock order within a layer is child first, then parent. A freshly split
//! right sibling stays locked until it is linked into the parent, so no
//! other writer can reach it through a half-built link.
//!
//! ```text
//! before:                 after:
//!    [P: .. | ..]            [P: .. | sep | ..]
//!        |                       |      |
//!    [L: full]               [L: low] [R: high]
//! ```

use std::ptr as StdPtr;

use crate::border::{BorderNode, split_point};
use crate::internode::InteriorNode;
use crate::node::{NodeLink, NodePtr};
use crate::nodeversion::LockGuard;
use crate::ordering::{CAS_FAILURE, CAS_SUCCESS};
use crate::tracing_helpers::debug_log;

use super::MassTree;

impl<V> MassTree<V> {
    /// Split the full, locked border node `border` so that a key with
    /// `slice` can be inserted, then publish the new sibling in the parent.
    ///
    /// Entries sharing a slice always stay on one side, so both halves keep
    /// routing correctly by slice alone. Consumes and releases `lock`.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip_all))]
    pub(super) fn split_border<'g>(
        &self,
        border: &'g BorderNode<V>,
        mut lock: LockGuard<'g>,
        slice: u64,
    ) {
        lock.mark_split();
        border.sort();

        let (table, found): (Vec<usize>, Vec<u64>) = border.create_slice_table();
        let len: usize = border.len();
        let mut boundary: usize = split_point(slice, &table, &found, len);
        if table.len() > 1 {
            // Keep both halves non-empty without cutting a run.
            boundary = boundary.clamp(table[1], table[table.len() - 1]);
        }

        let right_ptr: *mut BorderNode<V> = Box::into_raw(BorderNode::new());
        // SAFETY: `right` is unpublished until `insert_into_parent` links it.
        let right: &'g BorderNode<V> = unsafe { &*right_ptr };
        let right_lock: LockGuard<'g> = right.version().lock();

        let border_ptr: *mut BorderNode<V> = StdPtr::from_ref(border).cast_mut();
        // SAFETY: `border_ptr` is `border`, `right_ptr` is `right`, fresh.
        unsafe { border.split_keys_among(border_ptr, right, right_ptr, boundary) };

        let moved: Vec<*mut u8> = right.layer_links().map(|(_, layer)| layer).collect();
        for layer in moved {
            // SAFETY: the slot moved under both locks; its layer is live.
            unsafe { Self::relink_layer_root(layer, right_ptr) };
        }

        let separator: u64 = right.lowest_key().unwrap_or(slice);
        debug_log!(
            boundary,
            left = border.len(),
            right = right.len(),
            separator = format_args!("{separator:016x}"),
            "split_border"
        );

        self.insert_into_parent(
            NodePtr::Border(border_ptr),
            lock,
            separator,
            NodePtr::Border(right_ptr),
            right_lock,
        );
    }

    /// Link the locked, freshly split `right` into the parent of the locked
    /// node `left`, splitting ancestors as needed. Releases every lock.
    fn insert_into_parent<'g>(
        &self,
        left: NodePtr<V>,
        mut left_lock: LockGuard<'g>,
        separator: u64,
        right: NodePtr<V>,
        right_lock: LockGuard<'g>,
    ) where
        V: 'g,
    {
        if left_lock.version().is_root() {
            self.create_root_with_children(left, &mut left_lock, separator, right);
            drop(right_lock);
            drop(left_lock);
            return;
        }

        // SAFETY: `left` is locked and not a root, so it has a live parent.
        let (parent_ptr, mut parent_lock): (*mut InteriorNode<V>, LockGuard<'g>) =
            unsafe { Self::locked_parent(left) };
        // SAFETY: interior nodes are never freed while the tree is alive.
        let parent: &'g InteriorNode<V> = unsafe { &*parent_ptr };

        // SAFETY: `right` is ours until unlocked.
        unsafe { right.link() }.store(NodeLink::InteriorChild(parent_ptr));
        let pos: usize = parent.find_insert_position(separator);

        if !parent.is_full() {
            parent_lock.mark_insert();
            parent.insert_key_and_child(pos, separator, right.as_raw());
            parent.debug_assert_invariants();

            drop(right_lock);
            drop(left_lock);
            drop(parent_lock);
            return;
        }

        parent_lock.mark_split();
        let new_ptr: *mut InteriorNode<V> = Box::into_raw(InteriorNode::new());
        // SAFETY: unpublished until linked by the recursive call.
        let new_right: &'g InteriorNode<V> = unsafe { &*new_ptr };
        let new_lock: LockGuard<'g> = new_right.version().lock();

        let (popup, _went_left): (u64, bool) = parent.split_into(new_right, pos, separator, right.as_raw());
        // SAFETY: `new_ptr` is `new_right`; its children are live.
        unsafe { new_right.adopt_children(new_ptr) };
        parent.debug_assert_invariants();
        new_right.debug_assert_invariants();

        debug_log!(
            popup = format_args!("{popup:016x}"),
            "insert_into_parent: interior split"
        );

        drop(right_lock);
        drop(left_lock);
        self.insert_into_parent(
            NodePtr::Interior(parent_ptr),
            parent_lock,
            popup,
            NodePtr::Interior(new_ptr),
            new_lock,
        );
    }

    /// Grow the layer by one level: a new interior root over `left` and
    /// `right`, taking over `left`'s upward link.
    fn create_root_with_children(
        &self,
        left: NodePtr<V>,
        left_lock: &mut LockGuard<'_>,
        separator: u64,
        right: NodePtr<V>,
    ) {
        // SAFETY: both nodes are locked by the caller.
        let link: NodeLink<V> = unsafe { left.link() }.load();
        let root_ptr: *mut InteriorNode<V> =
            Box::into_raw(InteriorNode::new_root(link, separator, left.as_raw(), right.as_raw()));

        // SAFETY: as above.
        unsafe {
            left.link().store(NodeLink::InteriorChild(root_ptr));
            right.link().store(NodeLink::InteriorChild(root_ptr));
        }
        left_lock.mark_nonroot();

        if link == NodeLink::LayerRoot {
            let swapped = self
                .root
                .compare_exchange(left.as_raw(), root_ptr.cast(), CAS_SUCCESS, CAS_FAILURE);
            debug_assert!(swapped.is_ok(), "layer-0 root moved while its holder was locked");
        }

        debug_log!(root = ?root_ptr, ?link, "create_root_with_children");
    }

    /// Lock the parent of a non-root node.
    ///
    /// The parent can change while we wait for its lock (it may split and
    /// hand `node` to a new sibling), so the link is re-read after locking.
    ///
    /// # Safety
    /// `node` must be locked by the caller and not a root.
    unsafe fn locked_parent<'g>(node: NodePtr<V>) -> (*mut InteriorNode<V>, LockGuard<'g>)
    where
        V: 'g,
    {
        loop {
            // SAFETY: caller holds `node`'s lock.
            let link: NodeLink<V> = unsafe { node.link() }.load();
            let NodeLink::InteriorChild(parent_ptr) = link else {
                unreachable!("non-root node {node:?} has link {link:?}");
            };
            // SAFETY: interior nodes are never freed while the tree is alive.
            let parent: &'g InteriorNode<V> = unsafe { &*parent_ptr };
            let lock: LockGuard<'g> = parent.version().lock();

            if unsafe { node.link() }.load() == link {
                return (parent_ptr, lock);
            }
            drop(lock);
        }
    }
}
