//! Filepath: src/key.rs
//!
//! Key representation for [`MassTree`](crate::MassTree).
//!
//! A key is a sequence of big-endian 8-byte slices plus the number of
//! significant bytes in the last slice. Each slice is handled by one trie
//! layer; the [`Key`] cursor records which layer an operation is at.
//!
//! ```rust
//! use masstrie::key::Key;
//!
//! let mut key = Key::from_bytes(b"hello world!").unwrap();
//! assert_eq!(key.current_slice().slice, u64::from_be_bytes(*b"hello wo"));
//!
//! key.shift();
//! assert_eq!(key.current_slice().slice, u64::from_be_bytes(*b"rld!\0\0\0\0"));
//! assert_eq!(key.current_slice().size, 4);
//! assert_eq!(key.to_bytes(), b"hello world!");
//! ```

use crate::error::TreeError;

/// Size of a slice in bytes.
pub const SLICE_SIZE: usize = 8;

const FULL_SLICE: u8 = 8;

/// The part of a key visible at one layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Slice {
    /// Big-endian, zero-padded slice value.
    pub slice: u64,

    /// Significant bytes, 1 to 8.
    pub size: u8,
}

/// Split `bytes` into big-endian slices.
///
/// Returns the slices and the count of significant bytes in the final slice.
/// An empty input yields no slices and a count of 0.
#[must_use]
pub fn encode(bytes: &[u8]) -> (Vec<u64>, usize) {
    let slices: Vec<u64> = bytes.chunks(SLICE_SIZE).map(read_slice).collect();
    let last: usize = match bytes.len() % SLICE_SIZE {
        0 if bytes.is_empty() => 0,
        0 => SLICE_SIZE,
        n => n,
    };

    (slices, last)
}

/// Inverse of [`encode`].
#[must_use]
pub fn decode(slices: &[u64], last_slice_size: usize) -> Vec<u8> {
    let Some((last, full)) = slices.split_last() else {
        return Vec::new();
    };

    let mut bytes: Vec<u8> = Vec::with_capacity(full.len() * SLICE_SIZE + last_slice_size);
    for slice in full {
        bytes.extend_from_slice(&slice.to_be_bytes());
    }
    bytes.extend(last.to_be_bytes().into_iter().take(last_slice_size));
    bytes
}

/// Big-endian read of up to 8 bytes, zero padded.
#[inline]
pub(crate) fn read_slice(chunk: &[u8]) -> u64 {
    let mut buf: [u8; SLICE_SIZE] = [0; SLICE_SIZE];
    let n: usize = chunk.len().min(SLICE_SIZE);
    buf[..n].copy_from_slice(&chunk[..n]);
    u64::from_be_bytes(buf)
}

/// A key for tree operations.
///
/// # Invariants
/// - at least one slice
/// - `1 <= last_slice_size <= 8`
///
/// Equality compares the cursor too.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Key {
    slices: Vec<u64>,
    last_slice_size: u8,
    cursor: usize,
}

impl Key {
    /// Build a key from slices.
    ///
    /// # Panics
    /// If `slices` is empty or `last_slice_size` is outside `1..=8`.
    #[must_use]
    pub fn new(slices: Vec<u64>, last_slice_size: usize) -> Self {
        assert!(!slices.is_empty(), "a key needs at least one slice");
        assert!(
            (1..=SLICE_SIZE).contains(&last_slice_size),
            "last slice size {last_slice_size} outside 1..=8"
        );

        #[expect(clippy::cast_possible_truncation, reason = "checked to be <= 8 above")]
        let last_slice_size: u8 = last_slice_size as u8;

        Self {
            slices,
            last_slice_size,
            cursor: 0,
        }
    }

    /// Encode a byte string.
    ///
    /// # Errors
    /// [`TreeError::EmptyKey`] for an empty string.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TreeError> {
        if bytes.is_empty() {
            return Err(TreeError::EmptyKey);
        }
        let (slices, last) = encode(bytes);
        Ok(Self::new(slices, last))
    }

    /// The original byte string.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        decode(&self.slices, self.last_slice_size())
    }

    /// All slices.
    #[inline]
    #[must_use]
    pub fn slices(&self) -> &[u64] {
        &self.slices
    }

    /// Number of slices.
    #[inline]
    #[must_use]
    pub fn slice_count(&self) -> usize {
        self.slices.len()
    }

    /// Significant bytes in the last slice.
    #[inline]
    #[must_use]
    pub const fn last_slice_size(&self) -> usize {
        self.last_slice_size as usize
    }

    /// Current layer depth.
    #[inline]
    #[must_use]
    pub const fn cursor(&self) -> usize {
        self.cursor
    }

    /// True if slices remain after the current one.
    #[inline]
    #[must_use]
    pub fn has_next(&self) -> bool {
        self.cursor + 1 < self.slices.len()
    }

    /// The slice at the cursor.
    #[inline]
    #[must_use]
    pub fn current_slice(&self) -> Slice {
        self.slice_at(self.cursor)
    }

    /// The slice at layer `index`.
    ///
    /// # Panics
    /// If `index` is past the last slice.
    #[inline]
    #[must_use]
    pub fn slice_at(&self, index: usize) -> Slice {
        let size: u8 = if index + 1 == self.slices.len() {
            self.last_slice_size
        } else {
            // Only the final slice can be partial.
            FULL_SLICE
        };
        Slice {
            slice: self.slices[index],
            size,
        }
    }

    /// Bytes left from layer `from` to the end of the key.
    #[inline]
    #[must_use]
    pub fn remain_length(&self, from: usize) -> usize {
        (self.slices.len() - from - 1) * SLICE_SIZE + self.last_slice_size()
    }

    /// Move the cursor one layer down.
    ///
    /// # Panics
    /// If there is no next slice.
    #[inline]
    pub fn shift(&mut self) {
        assert!(self.has_next(), "shift past the last slice");
        self.cursor += 1;
    }

    /// Move the cursor one layer up.
    ///
    /// # Panics
    /// If the cursor is already at layer 0.
    #[inline]
    pub fn unshift(&mut self) {
        assert!(self.cursor > 0, "unshift above layer 0");
        self.cursor -= 1;
    }

    /// Move the cursor back to layer 0.
    #[inline]
    pub const fn reset(&mut self) {
        self.cursor = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_boundaries() {
        for len in [0usize, 1, 7, 8, 9, 16, 17, 65, 100] {
            let bytes: Vec<u8> = (0..len).map(|i| (i * 7 + 1) as u8).collect();
            let (slices, last) = encode(&bytes);
            assert_eq!(slices.len(), len.div_ceil(SLICE_SIZE), "len {len}");
            assert_eq!(decode(&slices, last), bytes, "len {len}");
        }
    }

    #[test]
    fn test_encode_pads_final_slice() {
        let (slices, last) = encode(b"abcdefghij");
        assert_eq!(slices, vec![u64::from_be_bytes(*b"abcdefgh"), u64::from_be_bytes(*b"ij\0\0\0\0\0\0")]);
        assert_eq!(last, 2);
    }

    #[test]
    fn test_decode_keeps_trailing_zero_bytes() {
        let bytes = b"ab\0\0";
        let (slices, last) = encode(bytes);
        assert_eq!(last, 4);
        assert_eq!(decode(&slices, last), bytes);
    }

    #[test]
    fn test_equality_depends_on_last_slice_size() {
        let a = Key::new(vec![0x1111_1111_1111_1111], 7);
        let b = Key::new(vec![0x1111_1111_1111_1111], 8);
        assert_ne!(a, b);
    }

    #[test]
    fn test_equality_depends_on_cursor() {
        let a = Key::new(vec![1, 2], 8);
        let mut b = a.clone();
        assert_eq!(a, b);
        b.shift();
        assert_ne!(a, b);
        b.reset();
        assert_eq!(a, b);
    }

    #[test]
    fn test_from_bytes_rejects_empty() {
        assert_eq!(Key::from_bytes(b""), Err(TreeError::EmptyKey));
    }

    #[test]
    fn test_cursor_walk() {
        let mut key = Key::from_bytes(&[0xAB; 20]).unwrap();
        assert_eq!(key.slice_count(), 3);
        assert_eq!(key.remain_length(0), 20);
        assert!(key.has_next());
        assert_eq!(key.current_slice().size, 8);

        key.shift();
        assert_eq!(key.remain_length(key.cursor()), 12);
        key.shift();
        assert!(!key.has_next());
        assert_eq!(key.current_slice().size, 4);

        key.unshift();
        assert_eq!(key.cursor(), 1);
    }

    #[test]
    #[should_panic(expected = "outside 1..=8")]
    fn test_new_rejects_zero_last_slice() {
        let _ = Key::new(vec![1], 0);
    }

    #[test]
    #[should_panic(expected = "shift past the last slice")]
    fn test_shift_past_end_panics() {
        let mut key = Key::new(vec![1], 8);
        key.shift();
    }
}
