//! Filepath: src/permuter.rs
//!
//! Permutation of border-node slots.
//!
//! A [`Permuter`] records, in a single `u64`, which physical slot holds the
//! key at each logical (sorted) position. Inserting a key writes its slot
//! anywhere free and then splices the slot index into the permutation, so
//! slot contents never move outside of a split.
//!
//! # Encoding
//!
//! ```text
//! bits 63..60  59..56  ...  7..4   3..0
//!      pos 0   pos 1   ...  pos 14 count
//! ```
//!
//! Logical position `i` lives in the nibble at bit offset `(15 - i) * 4`.
//! 4 bits * 15 positions + 4 bits of count = 64 bits exactly.

use std::fmt as StdFmt;

/// Slots per border node.
pub const WIDTH: usize = 15;

/// Mask for the count nibble.
const COUNT_MASK: u64 = 0xF;

/// Mask for one nibble.
const NIBBLE_MASK: u64 = 0xF;

/// Packed sorted order over a border node's slots.
///
/// # Invariants
/// - `len() <= 15`
/// - every slot index stored in positions `0..len()` is `<= 14` and appears once
///
/// Mutating methods are only meaningful on a copy taken under the node lock;
/// the node publishes the new word with a single store.
///
/// ```rust
/// use masstrie::permuter::Permuter;
///
/// let mut p = Permuter::from_slots(&[3, 4, 5, 0, 1]);
/// p.insert(3, 2);
/// assert_eq!(p.to_vec(), vec![3, 4, 5, 2, 0, 1]);
/// assert_eq!(p.len(), 6);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Permuter {
    value: u64,
}

impl Permuter {
    /// No keys.
    #[inline]
    #[must_use]
    pub const fn empty() -> Self {
        Self { value: 0 }
    }

    /// Identity over the first `n` slots: position `i` holds slot `i`.
    ///
    /// # Panics
    /// If `n > 15`.
    #[must_use]
    pub fn from_sorted(n: usize) -> Self {
        assert!(n <= WIDTH, "from_sorted: {n} exceeds width");
        let mut p = Self::empty();
        for i in 0..n {
            p.set(i, i);
        }
        p.set_len(n);
        p
    }

    /// Build from an explicit slot order.
    ///
    /// # Panics
    /// If more than 15 slots are given or a slot index is out of range.
    #[must_use]
    pub fn from_slots(slots: &[usize]) -> Self {
        assert!(slots.len() <= WIDTH, "from_slots: too many slots");
        let mut p = Self::empty();
        for (i, &slot) in slots.iter().enumerate() {
            p.set(i, slot);
        }
        p.set_len(slots.len());
        p.debug_assert_valid();
        p
    }

    /// Wrap a raw word.
    #[inline]
    #[must_use]
    pub const fn from_value(value: u64) -> Self {
        Self { value }
    }

    /// The raw word.
    #[inline]
    #[must_use]
    pub const fn value(self) -> u64 {
        self.value
    }

    /// Number of keys.
    #[inline]
    #[must_use]
    pub const fn len(self) -> usize {
        (self.value & COUNT_MASK) as usize
    }

    /// No keys.
    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.len() == 0
    }

    /// All 15 positions used.
    #[inline]
    #[must_use]
    pub const fn is_full(self) -> bool {
        self.len() == WIDTH
    }

    /// Overwrite the count.
    #[inline]
    pub fn set_len(&mut self, n: usize) {
        debug_assert!(n <= WIDTH, "set_len: {n} exceeds width");
        self.value = (self.value & !COUNT_MASK) | (n as u64);
    }

    #[inline]
    const fn shift_of(i: usize) -> usize {
        (WIDTH - i) * 4
    }

    /// Slot at logical position `i`.
    #[inline]
    #[must_use]
    pub const fn get(self, i: usize) -> usize {
        debug_assert!(i < WIDTH);
        ((self.value >> Self::shift_of(i)) & NIBBLE_MASK) as usize
    }

    /// Store `slot` at logical position `i` without touching the count.
    #[inline]
    pub fn set(&mut self, i: usize, slot: usize) {
        debug_assert!(i < WIDTH, "set: position {i} out of range");
        debug_assert!(slot < WIDTH, "set: slot {slot} out of range");
        let shift: usize = Self::shift_of(i);
        self.value = (self.value & !(NIBBLE_MASK << shift)) | ((slot as u64) << shift);
    }

    /// Splice `slot` in at logical position `i`.
    ///
    /// Positions `i..len()` move up by one.
    ///
    /// # Panics
    /// If the permutation is full or `i > len()`.
    pub fn insert(&mut self, i: usize, slot: usize) {
        let n: usize = self.len();
        assert!(n < WIDTH, "insert into a full permutation");
        assert!(i <= n, "insert position {i} past count {n}");

        for p in (i..n).rev() {
            let moved: usize = self.get(p);
            self.set(p + 1, moved);
        }
        self.set(i, slot);
        self.set_len(n + 1);
    }

    /// Remove `slot` from the order, returning the position it held.
    ///
    /// Returns `None` if `slot` is not in use.
    pub fn remove_slot(&mut self, slot: usize) -> Option<usize> {
        let n: usize = self.len();
        let pos: usize = self.position_of(slot)?;

        for p in pos..n - 1 {
            let moved: usize = self.get(p + 1);
            self.set(p, moved);
        }
        self.set(n - 1, 0);
        self.set_len(n - 1);
        Some(pos)
    }

    /// Logical position of `slot`, if in use.
    #[must_use]
    pub fn position_of(self, slot: usize) -> Option<usize> {
        (0..self.len()).find(|&p| self.get(p) == slot)
    }

    /// True if `slot` is in use.
    #[inline]
    #[must_use]
    pub fn contains(self, slot: usize) -> bool {
        self.position_of(slot).is_some()
    }

    /// True if position `i` holds slot `i` for every used position.
    #[must_use]
    pub fn is_identity(self) -> bool {
        (0..self.len()).all(|i| self.get(i) == i)
    }

    /// Slots in logical order.
    pub fn iter(self) -> impl DoubleEndedIterator<Item = usize> + ExactSizeIterator {
        (0..self.len()).map(move |i| self.get(i))
    }

    /// Slots in logical order, collected.
    #[must_use]
    pub fn to_vec(self) -> Vec<usize> {
        self.iter().collect()
    }

    /// Check that no slot appears twice.
    #[cfg(debug_assertions)]
    pub fn debug_assert_valid(self) {
        let mut seen: u16 = 0;
        for slot in self.iter() {
            assert!(slot < WIDTH, "slot {slot} out of range");
            assert!(seen & (1 << slot) == 0, "slot {slot} appears twice in {self:?}");
            seen |= 1 << slot;
        }
    }

    /// Check that no slot appears twice.
    #[cfg(not(debug_assertions))]
    pub const fn debug_assert_valid(self) {}
}

impl StdFmt::Debug for Permuter {
    fn fmt(&self, f: &mut StdFmt::Formatter<'_>) -> StdFmt::Result {
        f.debug_struct("Permuter")
            .field("len", &self.len())
            .field("slots", &self.to_vec())
            .finish()
    }
}
