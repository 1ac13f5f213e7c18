//! Lock-free point lookup.
//!
//! A lookup reads a border node under a version snapshot, then validates the
//! snapshot before trusting what it read. A changed node is re-read; a split
//! node sends the lookup back to the layer root. Values are cloned out of the
//! tree only after validation, which is safe because replaced values are
//! retired through the collector rather than freed.

use std::sync::Arc;

use seize::LocalGuard;

use crate::border::{BorderNode, LinkOrValue, SearchResult};
use crate::key::Key;
use crate::nodeversion::NodeVersion;
use crate::tracing_helpers::trace_log;

use super::MassTree;

impl<V> MassTree<V> {
    /// Look up a prepared key.
    ///
    /// The cursor is reset to layer 0 on entry and left at the layer where
    /// the lookup ended.
    #[must_use]
    pub fn get_key(&self, key: &mut Key, guard: &LocalGuard<'_>) -> Option<Arc<V>> {
        'top: loop {
            key.reset();
            let mut layer_root: *mut u8 = self.load_root();
            if layer_root.is_null() {
                return None;
            }

            'layer: loop {
                let (border, mut version): (&BorderNode<V>, u32) =
                    self.find_border(layer_root, key.current_slice().slice, guard);

                loop {
                    if NodeVersion::snapshot_is_deleted(version) {
                        if NodeVersion::snapshot_is_root(version) {
                            // The whole layer was emptied and unlinked.
                            return None;
                        }
                        continue 'top;
                    }

                    let found: SearchResult = border.search_link_or_value_with_index(key);
                    let lv: LinkOrValue<V> = match found {
                        SearchResult::Value(slot) | SearchResult::Layer(slot) => border.link_or_value(slot),
                        SearchResult::NotFound | SearchResult::Unstable => LinkOrValue::Empty,
                    };

                    if border.version().has_changed(version) {
                        if border.version().has_split(version) {
                            trace_log!("get: border split, retrying layer");
                            continue 'layer;
                        }
                        version = border.version().stable();
                        continue;
                    }

                    match (found, lv) {
                        (SearchResult::Value(_), LinkOrValue::Value(ptr)) => {
                            // SAFETY: the snapshot validated, so `ptr` was the
                            // stored value; its retirement waits for `guard`.
                            let value: Arc<V> = unsafe {
                                Arc::increment_strong_count(ptr);
                                Arc::from_raw(ptr)
                            };
                            return Some(value);
                        }

                        (SearchResult::Layer(_), LinkOrValue::Layer(next)) => {
                            key.shift();
                            layer_root = next;
                            continue 'layer;
                        }

                        (SearchResult::NotFound, _) => return None,

                        _ => {
                            version = border.version().stable();
                        }
                    }
                }
            }
        }
    }
}
