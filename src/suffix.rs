//! Filepath: src/suffix.rs
//!
//! Suffix storage for keys that continue past the current layer.
//!
//! A border slot whose `key_len` is `KEY_LEN_HAS_SUFFIX` owns a [`BigSuffix`]
//! holding every slice of the key after the one stored in the slot. When a
//! second key with the same slice arrives, the suffix is trimmed in place and
//! moved one layer down.
//!
//! The suffix is read by optimistic readers while its node is only
//! version-validated, so its contents sit behind their own lock.

use std::collections::VecDeque;
use std::ptr as StdPtr;
use std::sync::atomic::AtomicPtr;

use parking_lot::Mutex;

use crate::key::{Key, SLICE_SIZE, Slice};
use crate::ordering::{READ_ORD, WRITE_ORD};
use crate::permuter::WIDTH;

// ============================================================================
//  BigSuffix
// ============================================================================

#[derive(Debug)]
struct SuffixInner {
    slices: VecDeque<u64>,
    last_slice_size: u8,
}

/// The slices of a key beyond the current layer.
///
/// # Invariants
/// - at least one slice
/// - `1 <= last_slice_size <= 8`
#[derive(Debug)]
pub struct BigSuffix {
    inner: Mutex<SuffixInner>,
}

impl BigSuffix {
    /// Build a suffix from explicit slices.
    ///
    /// # Panics
    /// If `slices` is empty or `last_slice_size` is outside `1..=8`.
    #[must_use]
    pub fn new(slices: Vec<u64>, last_slice_size: usize) -> Self {
        assert!(!slices.is_empty(), "a suffix needs at least one slice");
        assert!(
            (1..=SLICE_SIZE).contains(&last_slice_size),
            "last slice size {last_slice_size} outside 1..=8"
        );

        #[expect(clippy::cast_possible_truncation, reason = "checked to be <= 8 above")]
        let last_slice_size: u8 = last_slice_size as u8;

        Self {
            inner: Mutex::new(SuffixInner {
                slices: slices.into(),
                last_slice_size,
            }),
        }
    }

    /// The slices of `key` from layer `from` onward.
    ///
    /// # Panics
    /// If `from` is past the key's last slice.
    #[must_use]
    pub fn from_key(key: &Key, from: usize) -> Self {
        Self::new(key.slices()[from..].to_vec(), key.last_slice_size())
    }

    /// First slice of the suffix.
    #[must_use]
    pub fn current_slice(&self) -> Slice {
        let inner = self.inner.lock();
        let size: u8 = if inner.slices.len() == 1 {
            inner.last_slice_size
        } else {
            8
        };
        Slice {
            slice: inner.slices.front().copied().unwrap_or_default(),
            size,
        }
    }

    /// True if more than one slice remains.
    #[must_use]
    pub fn has_next(&self) -> bool {
        self.inner.lock().slices.len() > 1
    }

    /// Bytes held.
    #[must_use]
    pub fn remain_length(&self) -> usize {
        let inner = self.inner.lock();
        (inner.slices.len() - 1) * SLICE_SIZE + inner.last_slice_size as usize
    }

    /// Significant bytes in the final slice.
    #[must_use]
    pub fn last_slice_size(&self) -> usize {
        self.inner.lock().last_slice_size as usize
    }

    /// Copy of the slices.
    #[must_use]
    pub fn slices(&self) -> Vec<u64> {
        self.inner.lock().slices.iter().copied().collect()
    }

    /// Slices and last slice size, read under one lock.
    #[must_use]
    pub fn snapshot(&self) -> (Vec<u64>, usize) {
        let inner = self.inner.lock();
        (inner.slices.iter().copied().collect(), inner.last_slice_size as usize)
    }

    /// Drop the first slice.
    ///
    /// # Panics
    /// If only one slice remains.
    pub fn shift(&self) {
        let mut inner = self.inner.lock();
        assert!(inner.slices.len() > 1, "shift would empty the suffix");
        inner.slices.pop_front();
    }

    /// Put `slice` back in front.
    pub fn insert_top(&self, slice: u64) {
        self.inner.lock().slices.push_front(slice);
    }

    /// True if the suffix equals the slices of `key` from layer `from` on.
    #[must_use]
    pub fn is_same(&self, key: &Key, from: usize) -> bool {
        let inner = self.inner.lock();
        let tail: &[u64] = key.slices().get(from..).unwrap_or_default();
        inner.last_slice_size as usize == key.last_slice_size()
            && inner.slices.len() == tail.len()
            && inner.slices.iter().eq(tail.iter())
    }
}

// ============================================================================
//  KeySuffix
// ============================================================================

/// One optional [`BigSuffix`] per border slot.
///
/// Pointers come from `Box::into_raw`; the owning border node frees them
/// when it is dropped, and replaced suffixes go through the garbage collector.
#[derive(Debug)]
pub struct KeySuffix {
    suffixes: [AtomicPtr<BigSuffix>; WIDTH],
}

impl KeySuffix {
    /// All slots empty.
    #[must_use]
    pub fn new() -> Self {
        Self {
            suffixes: std::array::from_fn(|_| AtomicPtr::new(StdPtr::null_mut())),
        }
    }

    /// Raw suffix pointer of `slot`, null if none.
    #[inline]
    #[must_use]
    pub fn get(&self, slot: usize) -> *mut BigSuffix {
        self.suffixes[slot].load(READ_ORD)
    }

    /// Store the suffix pointer of `slot`.
    #[inline]
    pub fn set(&self, slot: usize, suffix: *mut BigSuffix) {
        self.suffixes[slot].store(suffix, WRITE_ORD);
    }

    /// Clear `slot`, returning what it held.
    #[inline]
    pub fn take(&self, slot: usize) -> *mut BigSuffix {
        self.suffixes[slot].swap(StdPtr::null_mut(), WRITE_ORD)
    }
}

impl Default for KeySuffix {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for KeySuffix {
    fn drop(&mut self) {
        for suffix in &mut self.suffixes {
            let ptr: *mut BigSuffix = *suffix.get_mut();
            if !ptr.is_null() {
                // SAFETY: non-null entries came from `Box::into_raw` and are
                // owned by this array once the node is being dropped.
                unsafe { drop(Box::from_raw(ptr)) };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_key_skips_leading_slices() {
        let key = Key::new(vec![10, 20, 30], 3);
        let suffix = BigSuffix::from_key(&key, 1);
        assert_eq!(suffix.slices(), vec![20, 30]);
        assert_eq!(suffix.last_slice_size(), 3);
        assert_eq!(suffix.remain_length(), 11);
        assert!(suffix.has_next());
        assert_eq!(suffix.current_slice(), Slice { slice: 20, size: 8 });
        assert_eq!(suffix.snapshot(), (vec![20, 30], 3));
    }

    #[test]
    fn test_is_same_compares_tail_and_size() {
        let key = Key::new(vec![1, 2, 3], 5);
        let suffix = BigSuffix::new(vec![2, 3], 5);
        assert!(suffix.is_same(&key, 1));
        assert!(!suffix.is_same(&key, 0));
        assert!(!suffix.is_same(&key, 2));

        let other = Key::new(vec![1, 2, 3], 6);
        assert!(!suffix.is_same(&other, 1));
    }

    #[test]
    fn test_shift_and_insert_top() {
        let suffix = BigSuffix::new(vec![0x0A0B_0000_0000_0000, 7], 2);
        suffix.shift();
        assert_eq!(suffix.current_slice(), Slice { slice: 7, size: 2 });
        assert!(!suffix.has_next());

        suffix.insert_top(0x0A0B_0000_0000_0000);
        assert_eq!(suffix.slices(), vec![0x0A0B_0000_0000_0000, 7]);
    }

    #[test]
    #[should_panic(expected = "shift would empty the suffix")]
    fn test_shift_last_slice_panics() {
        BigSuffix::new(vec![1], 8).shift();
    }

    #[test]
    fn test_key_suffix_set_take() {
        let ks = KeySuffix::new();
        assert!(ks.get(3).is_null());

        let ptr = Box::into_raw(Box::new(BigSuffix::new(vec![9], 1)));
        ks.set(3, ptr);
        assert_eq!(ks.get(3), ptr);

        let taken = ks.take(3);
        assert_eq!(taken, ptr);
        assert!(ks.get(3).is_null());
        // SAFETY: taken came from Box::into_raw above and is no longer shared.
        unsafe { drop(Box::from_raw(taken)) };
    }

    #[test]
    fn test_key_suffix_drop_frees_entries() {
        let ks = KeySuffix::new();
        ks.set(0, Box::into_raw(Box::new(BigSuffix::new(vec![1, 2], 8))));
        ks.set(14, Box::into_raw(Box::new(BigSuffix::new(vec![3], 4))));
        drop(ks);
    }
}
