//! Locked insert path.
//!
//! A writer finds the border node optimistically, locks it, and re-checks
//! that the node is still live and unsplit before touching it. Everything
//! structural (new layers, splits) happens under that lock, after which the
//! writer retries from the layer root.

use std::sync::Arc;

use seize::LocalGuard;

use crate::border::{BorderNode, SearchResult};
use crate::gc::GarbageCollector;
use crate::key::Key;
use crate::nodeversion::LockGuard;
use crate::ordering::RELAXED;
use crate::tracing_helpers::{debug_log, trace_log};

use super::MassTree;

/// What a writer does when the key is already present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum PutMode {
    /// Replace the stored value.
    Upsert,

    /// Leave the stored value alone.
    InsertOnly,
}

/// How a put ended.
#[derive(Debug)]
pub(super) enum PutOutcome<V> {
    /// The key was new.
    Inserted,

    /// The key existed; this is the value it held.
    Replaced(Arc<V>),

    /// The key existed and the mode was [`PutMode::InsertOnly`].
    Exists,
}

impl<V> MassTree<V> {
    /// Shared body of `put`, `put_key` and `insert`.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "trace", skip_all))]
    pub(super) fn put_internal(
        &self,
        key: &mut Key,
        mut value: Arc<V>,
        mode: PutMode,
        gc: &mut GarbageCollector<V>,
        guard: &LocalGuard<'_>,
    ) -> PutOutcome<V> {
        'top: loop {
            key.reset();
            let mut layer_root: *mut u8 = self.load_root();
            if layer_root.is_null() {
                match self.start_new_tree(key, value, gc) {
                    Ok(()) => return PutOutcome::Inserted,
                    Err(returned) => {
                        value = returned;
                        continue 'top;
                    }
                }
            }

            'layer: loop {
                let (border, version): (&BorderNode<V>, u32) =
                    self.find_border(layer_root, key.current_slice().slice, guard);
                let mut lock: LockGuard<'_> = border.version().lock();

                if border.version().is_deleted() {
                    drop(lock);
                    trace_log!("put: border deleted, restarting from layer 0");
                    continue 'top;
                }
                if border.version().has_split(version) {
                    drop(lock);
                    trace_log!("put: border split before lock, retrying layer");
                    continue 'layer;
                }

                match border.search_link_or_value_with_index(key) {
                    SearchResult::Value(slot) => {
                        if mode == PutMode::InsertOnly {
                            return PutOutcome::Exists;
                        }
                        lock.mark_insert();
                        let old: *const V = border.swap_value(slot, value);
                        // SAFETY: `old` came from `Arc::into_raw`; the tree's
                        // reference is retired through `gc`, this is a new one.
                        let previous: Arc<V> = unsafe {
                            Arc::increment_strong_count(old);
                            Arc::from_raw(old)
                        };
                        gc.add_value(old);
                        return PutOutcome::Replaced(previous);
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
                        // Only a lock holder converts slots, so this is stale.
                        drop(lock);
                        continue 'layer;
                    }

                    SearchResult::NotFound => {}
                }

                if let Some(slot) = border.check_break_invariant(key) {
                    self.make_new_layer(border, &mut lock, slot, gc);
                    drop(lock);
                    continue 'layer;
                }

                let Some(slot) = border.insert_point() else {
                    debug_log!(len = border.len(), "put: border full, splitting");
                    self.split_border(border, lock, key.current_slice().slice);
                    continue 'layer;
                };

                lock.mark_insert();
                border.insert_entry(slot, key, value);
                self.count.fetch_add(1, RELAXED);
                return PutOutcome::Inserted;
            }
        }
    }
}
