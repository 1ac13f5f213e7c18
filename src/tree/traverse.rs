//! Optimistic descent from a layer root to a border node.
//!
//! No locks are taken. Each step reads a child pointer, snapshots the child,
//! and only then checks that the parent did not change underneath. A split
//! anywhere on the path sends the walk back to the layer root.

use seize::LocalGuard;

use crate::border::BorderNode;
use crate::node::{NodeLink, NodePtr};
use crate::nodeversion::NodeVersion;
use crate::tracing_helpers::trace_log;

use super::MassTree;

impl<V> MassTree<V> {
    /// Find the border node of the layer rooted near `root` whose range
    /// covers `slice`, with a stable snapshot of its version.
    ///
    /// `root` may be stale: if it is no longer a root the walk first climbs
    /// to the current one. The returned node is only a candidate; callers
    /// validate the snapshot after reading it.
    pub(super) fn find_border<'g>(
        &self,
        root: *mut u8,
        slice: u64,
        _guard: &'g LocalGuard<'_>,
    ) -> (&'g BorderNode<V>, u32) {
        'restart: loop {
            // SAFETY: `root` came from the facade or a layer slot; nodes
            // reachable from there are retired only through the guard.
            let mut node: NodePtr<V> = unsafe { NodePtr::from_raw(root) };
            let mut version: u32 = unsafe { node.version() }.stable();

            while !NodeVersion::snapshot_is_root(version) {
                // SAFETY: as above; parents are interior nodes, never freed
                // while the tree is alive.
                match unsafe { node.link() }.load() {
                    NodeLink::InteriorChild(parent) => {
                        node = NodePtr::Interior(parent);
                        version = unsafe { node.version() }.stable();
                    }
                    NodeLink::LayerRoot | NodeLink::BorderChild(_) => break,
                }
            }

            loop {
                let interior = match node {
                    // SAFETY: protected by the guard.
                    NodePtr::Border(border) => return (unsafe { &*border }, version),
                    NodePtr::Interior(interior) => unsafe { &*interior },
                };

                let child: *mut u8 = interior.find_child(slice);
                if !child.is_null() {
                    // SAFETY: a non-null child pointer names a live node even
                    // when read from a node that is changing.
                    let child_node: NodePtr<V> = unsafe { NodePtr::from_raw(child) };
                    let child_version: u32 = unsafe { child_node.version() }.stable();

                    if !interior.version().has_changed(version) {
                        node = child_node;
                        version = child_version;
                        continue;
                    }
                }

                let fresh: u32 = interior.version().stable();
                if NodeVersion::split_between(version, fresh) {
                    trace_log!(slice, "find_border: split on path, restarting");
                    continue 'restart;
                }
                version = fresh;
            }
        }
    }
}
