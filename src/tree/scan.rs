//! Ordered range reads.
//!
//! A scan walks each layer's border nodes left to right through their
//! `next` links and recurses into layer slots in place, so entries come out
//! in byte order without sorting:
//!
//! - within a node, the permutation orders entries by slice, then by key
//!   length, which for zero-padded big-endian slices is byte order
//! - a layer slot sorts after every shorter key with the same slice, and
//!   every key below it extends that slice
//!
//! Each border node is read under a version snapshot and re-read until the
//! snapshot validates. Deleted nodes (collapsed layers) read as empty. The
//! scan is not a point-in-time view, but its output is strictly ascending.

use std::ops::{Bound, ControlFlow};
use std::sync::Arc;

use seize::LocalGuard;

use crate::border::{BorderNode, KEY_LEN_HAS_SUFFIX, LinkOrValue};
use crate::key::{self, Key, SLICE_SIZE};
use crate::nodeversion::NodeVersion;
use crate::permuter::WIDTH;
use crate::suffix::BigSuffix;

use super::MassTree;

/// Lower and upper key bounds of a scan.
#[derive(Debug, Clone, Copy)]
struct ScanBounds<'a> {
    lower: Bound<&'a [u8]>,
    upper: Bound<&'a [u8]>,
}

impl ScanBounds<'_> {
    fn below_lower(&self, key: &[u8]) -> bool {
        match self.lower {
            Bound::Included(lower) => key < lower,
            Bound::Excluded(lower) => key <= lower,
            Bound::Unbounded => false,
        }
    }

    fn above_upper(&self, key: &[u8]) -> bool {
        match self.upper {
            Bound::Included(upper) => key > upper,
            Bound::Excluded(upper) => key >= upper,
            Bound::Unbounded => false,
        }
    }

    /// Every key under `prefix` sorts below the lower bound.
    fn layer_below_lower(&self, prefix: &[u8]) -> bool {
        match self.lower {
            Bound::Included(lower) | Bound::Excluded(lower) => !lower.starts_with(prefix) && prefix < lower,
            Bound::Unbounded => false,
        }
    }

    /// Every key under `prefix` sorts above the upper bound. Keys under a
    /// layer are strictly longer than its prefix.
    fn layer_above_upper(&self, prefix: &[u8]) -> bool {
        match self.upper {
            Bound::Included(upper) | Bound::Excluded(upper) => prefix >= upper,
            Bound::Unbounded => false,
        }
    }

    /// First slice worth visiting in the layer under `prefix`.
    fn start_slice(&self, prefix: &[u8]) -> u64 {
        match self.lower {
            Bound::Included(lower) | Bound::Excluded(lower)
                if lower.len() > prefix.len() && lower.starts_with(prefix) =>
            {
                key::read_slice(&lower[prefix.len()..])
            }
            _ => 0,
        }
    }
}

/// One entry copied out of a border node.
enum ScanEntry<V> {
    Value {
        slice: u64,
        len: usize,
        tail: Vec<u8>,
        value: *const V,
    },
    Layer {
        slice: u64,
        root: *mut u8,
    },
}

/// A validated copy of one border node.
struct BorderSnapshot<V> {
    entries: Vec<ScanEntry<V>>,
    next: *mut BorderNode<V>,
}

/// Output of a scan in progress.
struct Collected<V> {
    out: Vec<(Key, Arc<V>)>,
    last: Option<Vec<u8>>,
}

impl<V> MassTree<V> {
    /// Every entry between `lower` and `upper`, in ascending key order.
    #[must_use]
    pub fn scan_keys(
        &self,
        lower: Bound<&[u8]>,
        upper: Bound<&[u8]>,
        guard: &LocalGuard<'_>,
    ) -> Vec<(Key, Arc<V>)> {
        let mut collected: Collected<V> = Collected {
            out: Vec::new(),
            last: None,
        };

        let root: *mut u8 = self.load_root();
        if root.is_null() {
            return collected.out;
        }

        let bounds = ScanBounds { lower, upper };
        let mut prefix: Vec<u8> = Vec::new();
        let _ = self.scan_layer(root, &mut prefix, bounds, &mut collected, guard);
        collected.out
    }

    fn scan_layer(
        &self,
        root: *mut u8,
        prefix: &mut Vec<u8>,
        bounds: ScanBounds<'_>,
        collected: &mut Collected<V>,
        guard: &LocalGuard<'_>,
    ) -> ControlFlow<()> {
        let (mut border, _): (&BorderNode<V>, u32) = self.find_border(root, bounds.start_slice(prefix), guard);

        loop {
            let Some(snapshot) = Self::read_border(border) else {
                return ControlFlow::Continue(());
            };

            for entry in snapshot.entries {
                let mark: usize = prefix.len();
                match entry {
                    ScanEntry::Value {
                        slice,
                        len,
                        tail,
                        value,
                    } => {
                        prefix.extend_from_slice(&slice.to_be_bytes()[..len]);
                        prefix.extend_from_slice(&tail);
                        let flow: ControlFlow<()> = Self::emit(prefix, value, bounds, collected);
                        prefix.truncate(mark);
                        flow?;
                    }

                    ScanEntry::Layer { slice, root } => {
                        prefix.extend_from_slice(&slice.to_be_bytes());
                        let flow: ControlFlow<()> = if bounds.layer_above_upper(prefix) {
                            ControlFlow::Break(())
                        } else if bounds.layer_below_lower(prefix) {
                            ControlFlow::Continue(())
                        } else {
                            self.scan_layer(root, prefix, bounds, collected, guard)
                        };
                        prefix.truncate(mark);
                        flow?;
                    }
                }
            }

            if snapshot.next.is_null() {
                return ControlFlow::Continue(());
            }
            // SAFETY: siblings are protected by `guard`.
            border = unsafe { &*snapshot.next };
        }
    }

    fn emit(key_bytes: &[u8], value: *const V, bounds: ScanBounds<'_>, collected: &mut Collected<V>) -> ControlFlow<()> {
        if bounds.above_upper(key_bytes) {
            return ControlFlow::Break(());
        }
        if bounds.below_lower(key_bytes) || collected.last.as_deref().is_some_and(|last| key_bytes <= last) {
            return ControlFlow::Continue(());
        }

        // SAFETY: `value` was stored when the snapshot validated; its
        // retirement waits for the scan's guard.
        let value: Arc<V> = unsafe {
            Arc::increment_strong_count(value);
            Arc::from_raw(value)
        };
        let (slices, last_size): (Vec<u64>, usize) = key::encode(key_bytes);
        collected.out.push((Key::new(slices, last_size), value));
        collected.last = Some(key_bytes.to_vec());
        ControlFlow::Continue(())
    }

    /// Copy the live entries of `border` under a validated snapshot.
    ///
    /// Returns `None` for a deleted node.
    fn read_border(border: &BorderNode<V>) -> Option<BorderSnapshot<V>> {
        'retry: loop {
            let version: u32 = border.version().stable();
            if NodeVersion::snapshot_is_deleted(version) {
                return None;
            }

            let mut entries: Vec<ScanEntry<V>> = Vec::with_capacity(WIDTH);
            for slot in border.permutation().iter() {
                let slice: u64 = border.key_slice(slot);
                let key_len: u8 = border.key_len(slot);

                match border.link_or_value(slot) {
                    LinkOrValue::Value(value) if key_len == KEY_LEN_HAS_SUFFIX => {
                        let suffix: *mut BigSuffix = border.suffix(slot);
                        if suffix.is_null() {
                            continue 'retry;
                        }
                        // SAFETY: suffixes are retired through the collector.
                        let (slices, last_size): (Vec<u64>, usize) = unsafe { (*suffix).snapshot() };
                        entries.push(ScanEntry::Value {
                            slice,
                            len: SLICE_SIZE,
                            tail: key::decode(&slices, last_size),
                            value,
                        });
                    }

                    LinkOrValue::Value(value) if (1..=8).contains(&key_len) => {
                        entries.push(ScanEntry::Value {
                            slice,
                            len: usize::from(key_len),
                            tail: Vec::new(),
                            value,
                        });
                    }

                    LinkOrValue::Layer(root) => entries.push(ScanEntry::Layer { slice, root }),

                    // Mid-update; the version check below fails.
                    _ => continue 'retry,
                }
            }
            let next: *mut BorderNode<V> = border.next();

            if border.version().has_changed(version) {
                continue;
            }
            return Some(BorderSnapshot { entries, next });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bounds<'a>(lower: Bound<&'a [u8]>, upper: Bound<&'a [u8]>) -> ScanBounds<'a> {
        ScanBounds { lower, upper }
    }

    #[test]
    fn test_key_bounds() {
        let b = bounds(Bound::Excluded(b"b"), Bound::Included(b"d"));
        assert!(b.below_lower(b"a"));
        assert!(b.below_lower(b"b"));
        assert!(!b.below_lower(b"b\0"));
        assert!(!b.above_upper(b"d"));
        assert!(b.above_upper(b"d\0"));
    }

    #[test]
    fn test_layer_bounds() {
        let b = bounds(Bound::Included(b"abcdefghXYZ"), Bound::Excluded(b"abcdefgiAAA"));
        assert!(!b.layer_below_lower(b"abcdefgh"));
        assert!(b.layer_below_lower(b"abcdefga"));
        assert!(!b.layer_above_upper(b"abcdefgh"));
        assert!(!b.layer_above_upper(b"abcdefgi"));
        assert!(b.layer_above_upper(b"abcdefgj"));

        let exact = bounds(Bound::Unbounded, Bound::Included(b"abcdefgh"));
        assert!(exact.layer_above_upper(b"abcdefgh"));
    }

    #[test]
    fn test_start_slice() {
        let b = bounds(Bound::Included(b"abcdefghXY"), Bound::Unbounded);
        assert_eq!(b.start_slice(b""), u64::from_be_bytes(*b"abcdefgh"));
        assert_eq!(b.start_slice(b"abcdefgh"), u64::from_be_bytes(*b"XY\0\0\0\0\0\0"));
        assert_eq!(b.start_slice(b"zzzzzzzz"), 0);
        assert_eq!(bounds(Bound::Unbounded, Bound::Unbounded).start_slice(b""), 0);
    }
}
