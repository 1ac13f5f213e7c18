//! Filepath: src/border.rs
//!
//! Border (leaf) node of a layer's B+-tree.
//!
//! A border node holds up to 15 entries. Each slot stores one key slice, a
//! `key_len` tag and a link-or-value word; a [`Permuter`] gives the sorted
//! order of the live slots so inserts never move slot contents.
//!
//! # `key_len` tags
//!
//! ```text
//! 0          empty
//! 1..=8      key ends in this slice, with that many significant bytes
//! 9          key continues; the rest lives in the slot's BigSuffix
//! 10..=18    removed (9 + min(old key_len, 9))
//! 254        unstable, the slot is being turned into a layer link
//! 255        layer, the link-or-value word points at a deeper layer root
//! ```
//!
//! # Link-or-value word
//!
//! ```text
//! null                 nothing
//! Arc<V> ptr | 0b01    value (from Arc::into_raw)
//! node ptr   | 0b10    layer root
//! ```
//!
//! `Arc` data pointers follow two counters and nodes are 64-byte aligned,
//! so the two low bits are always free.

use std::fmt as StdFmt;
use std::ptr as StdPtr;
use std::sync::Arc;
use std::sync::atomic::{AtomicPtr, AtomicU8, AtomicU64};

use crate::key::Key;
use crate::node::{NodeHeader, NodeLink, NodePtr};
use crate::nodeversion::NodeVersion;
use crate::ordering::{READ_ORD, RELAXED, WRITE_ORD};
use crate::permuter::{Permuter, WIDTH};
use crate::suffix::{BigSuffix, KeySuffix};

/// Slot holds nothing.
pub const KEY_LEN_EMPTY: u8 = 0;

/// Key continues past this layer and its tail is in a [`BigSuffix`].
pub const KEY_LEN_HAS_SUFFIX: u8 = 9;

/// Added to `min(key_len, 9)` when an entry is removed.
pub const KEY_LEN_REMOVED_OFFSET: u8 = 9;

/// Slot is mid-conversion into a layer link.
pub const KEY_LEN_UNSTABLE: u8 = 254;

/// Slot links to a deeper layer.
pub const KEY_LEN_LAYER: u8 = 255;

const LV_TAG_MASK: usize = 0b11;
const LV_VALUE: usize = 0b01;
const LV_LAYER: usize = 0b10;

/// True for a `key_len` that marks a removed entry.
#[inline]
#[must_use]
pub const fn is_removed(key_len: u8) -> bool {
    key_len > KEY_LEN_REMOVED_OFFSET && key_len <= KEY_LEN_REMOVED_OFFSET + KEY_LEN_HAS_SUFFIX
}

/// Sort class of a `key_len`: literal lengths order before longer keys.
#[inline]
const fn order_class(key_len: u8) -> u8 {
    if key_len <= 8 { key_len } else { KEY_LEN_HAS_SUFFIX }
}

// ============================================================================
//  LinkOrValue
// ============================================================================

/// Decoded content of one slot.
pub enum LinkOrValue<V> {
    /// Nothing stored.
    Empty,

    /// A value owned by the node.
    Value(*const V),

    /// Root of the next layer, type-erased.
    Layer(*mut u8),

    /// Entry was removed.
    Tombstone,

    /// Entry is being converted into a layer link.
    Unstable,
}

impl<V> Clone for LinkOrValue<V> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<V> Copy for LinkOrValue<V> {}

impl<V> StdFmt::Debug for LinkOrValue<V> {
    fn fmt(&self, f: &mut StdFmt::Formatter<'_>) -> StdFmt::Result {
        match self {
            Self::Empty => write!(f, "Empty"),
            Self::Value(p) => write!(f, "Value({p:p})"),
            Self::Layer(p) => write!(f, "Layer({p:p})"),
            Self::Tombstone => write!(f, "Tombstone"),
            Self::Unstable => write!(f, "Unstable"),
        }
    }
}

/// Tag an owned value for storage in a slot.
#[inline]
pub(crate) fn encode_value<V>(value: Arc<V>) -> *mut u8 {
    Arc::into_raw(value).cast::<u8>().cast_mut().map_addr(|a| a | LV_VALUE)
}

/// Tag a layer root for storage in a slot.
#[inline]
pub(crate) fn encode_layer(root: *mut u8) -> *mut u8 {
    root.map_addr(|a| a | LV_LAYER)
}

#[inline]
fn untag(raw: *mut u8) -> *mut u8 {
    raw.map_addr(|a| a & !LV_TAG_MASK)
}

/// Outcome of searching one border node for a key at its current layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchResult {
    /// The key ends here; the slot holds its value.
    Value(usize),

    /// The key continues in the layer linked from this slot.
    Layer(usize),

    /// No entry for the key.
    NotFound,

    /// The matching slot is being converted; retry.
    Unstable,
}

/// Everything stored in one slot, moved as a unit by splits and sorts.
#[derive(Clone, Copy)]
pub(crate) struct SlotEntry {
    pub(crate) key_len: u8,
    pub(crate) key_slice: u64,
    pub(crate) lv: *mut u8,
    pub(crate) suffix: *mut BigSuffix,
}

// ============================================================================
//  BorderNode
// ============================================================================

/// A leaf of a layer's B+-tree.
///
/// # Invariants
/// - slots named by the permutation are live and sorted by
///   `(key_slice, order class of key_len)`
/// - slots outside the permutation have `key_len` 0 or a removed tag
/// - a slot with `KEY_LEN_HAS_SUFFIX` has a non-null suffix
/// - only this node's value and suffix pointers are owned by it; layer
///   links are owned by the tree
#[repr(C, align(64))]
pub struct BorderNode<V> {
    header: NodeHeader<V>,

    permutation: AtomicU64,

    key_len: [AtomicU8; WIDTH],

    key_slice: [AtomicU64; WIDTH],

    lv: [AtomicPtr<u8>; WIDTH],

    next: AtomicPtr<BorderNode<V>>,

    prev: AtomicPtr<BorderNode<V>>,

    suffixes: KeySuffix,
}

impl<V> StdFmt::Debug for BorderNode<V> {
    fn fmt(&self, f: &mut StdFmt::Formatter<'_>) -> StdFmt::Result {
        let entries: Vec<(u64, u8)> = self
            .permutation()
            .iter()
            .map(|slot| (self.key_slice(slot), self.key_len(slot)))
            .collect();
        f.debug_struct("BorderNode")
            .field("root", &self.version().is_root())
            .field("deleted", &self.version().is_deleted())
            .field("entries", &entries)
            .field("link", &self.header.link)
            .finish_non_exhaustive()
    }
}

impl<V> BorderNode<V> {
    fn with_header(header: NodeHeader<V>) -> Box<Self> {
        Box::new(Self {
            header,
            permutation: AtomicU64::new(Permuter::empty().value()),
            key_len: std::array::from_fn(|_| AtomicU8::new(KEY_LEN_EMPTY)),
            key_slice: std::array::from_fn(|_| AtomicU64::new(0)),
            lv: std::array::from_fn(|_| AtomicPtr::new(StdPtr::null_mut())),
            next: AtomicPtr::new(StdPtr::null_mut()),
            prev: AtomicPtr::new(StdPtr::null_mut()),
            suffixes: KeySuffix::new(),
        })
    }

    /// An empty, unlinked, non-root border node.
    #[must_use]
    pub fn new() -> Box<Self> {
        Self::with_header(NodeHeader::new(NodeVersion::new(true), NodeLink::LayerRoot))
    }

    /// An empty root of layer 0.
    #[must_use]
    pub fn new_root() -> Box<Self> {
        Self::with_header(NodeHeader::new(NodeVersion::new_root(true), NodeLink::LayerRoot))
    }

    /// An empty root of a deeper layer linked from a slot of `upper`.
    #[must_use]
    pub fn new_layer_root(upper: *mut Self) -> Box<Self> {
        Self::with_header(NodeHeader::new(
            NodeVersion::new_root(true),
            NodeLink::BorderChild(upper),
        ))
    }

    // ========================================================================
    //  Header
    // ========================================================================

    /// The node's version.
    #[inline(always)]
    #[must_use]
    pub const fn version(&self) -> &NodeVersion {
        &self.header.version
    }

    /// Upward link.
    #[inline]
    #[must_use]
    pub fn link(&self) -> NodeLink<V> {
        self.header.link.load()
    }

    /// Replace the upward link. Caller holds this node's lock or owns it.
    #[inline]
    pub fn set_link(&self, link: NodeLink<V>) {
        self.header.link.store(link);
    }

    // ========================================================================
    //  Permutation and Siblings
    // ========================================================================

    /// Current permutation.
    #[inline(always)]
    #[must_use]
    pub fn permutation(&self) -> Permuter {
        Permuter::from_value(self.permutation.load(READ_ORD))
    }

    /// Publish a new permutation.
    #[inline(always)]
    pub fn set_permutation(&self, perm: Permuter) {
        self.permutation.store(perm.value(), WRITE_ORD);
    }

    /// Live entries.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.permutation().len()
    }

    /// No live entries.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.permutation().is_empty()
    }

    /// Right sibling, null at the end of the layer.
    #[inline]
    #[must_use]
    pub fn next(&self) -> *mut Self {
        self.next.load(READ_ORD)
    }

    /// Left sibling, null at the start of the layer.
    #[inline]
    #[must_use]
    pub fn prev(&self) -> *mut Self {
        self.prev.load(READ_ORD)
    }

    /// Set the right sibling.
    #[inline]
    pub fn set_next(&self, next: *mut Self) {
        self.next.store(next, WRITE_ORD);
    }

    /// Set the left sibling.
    #[inline]
    pub fn set_prev(&self, prev: *mut Self) {
        self.prev.store(prev, WRITE_ORD);
    }

    // ========================================================================
    //  Slot Accessors
    // ========================================================================

    /// `key_len` tag of `slot`.
    #[inline(always)]
    #[must_use]
    pub fn key_len(&self, slot: usize) -> u8 {
        self.key_len[slot].load(READ_ORD)
    }

    /// Key slice of `slot`.
    #[inline(always)]
    #[must_use]
    pub fn key_slice(&self, slot: usize) -> u64 {
        self.key_slice[slot].load(READ_ORD)
    }

    /// Suffix of `slot`, null if none.
    #[inline]
    #[must_use]
    pub fn suffix(&self, slot: usize) -> *mut BigSuffix {
        self.suffixes.get(slot)
    }

    /// Tagged link-or-value word of `slot`.
    #[inline(always)]
    #[must_use]
    pub fn lv_raw(&self, slot: usize) -> *mut u8 {
        self.lv[slot].load(READ_ORD)
    }

    #[inline]
    pub(crate) fn set_key_len(&self, slot: usize, key_len: u8) {
        self.key_len[slot].store(key_len, WRITE_ORD);
    }

    #[inline]
    pub(crate) fn set_lv_raw(&self, slot: usize, lv: *mut u8) {
        self.lv[slot].store(lv, WRITE_ORD);
    }

    #[inline]
    pub(crate) fn set_suffix(&self, slot: usize, suffix: *mut BigSuffix) {
        self.suffixes.set(slot, suffix);
    }

    /// Decode `slot`.
    #[must_use]
    pub fn link_or_value(&self, slot: usize) -> LinkOrValue<V> {
        let key_len: u8 = self.key_len(slot);
        let raw: *mut u8 = self.lv_raw(slot);

        match key_len {
            KEY_LEN_EMPTY => LinkOrValue::Empty,
            KEY_LEN_UNSTABLE => LinkOrValue::Unstable,
            len if is_removed(len) => LinkOrValue::Tombstone,
            _ => match raw.addr() & LV_TAG_MASK {
                LV_VALUE => LinkOrValue::Value(untag(raw).cast::<V>().cast_const()),
                LV_LAYER => LinkOrValue::Layer(untag(raw)),
                _ => LinkOrValue::Empty,
            },
        }
    }

    /// Value pointer of `slot`, if it holds one.
    #[inline]
    #[must_use]
    pub fn value_ptr(&self, slot: usize) -> Option<*const V> {
        match self.link_or_value(slot) {
            LinkOrValue::Value(ptr) => Some(ptr),
            _ => None,
        }
    }

    /// Layer root linked from `slot`, if it holds one.
    #[inline]
    #[must_use]
    pub fn layer_ptr(&self, slot: usize) -> Option<*mut u8> {
        match self.link_or_value(slot) {
            LinkOrValue::Layer(ptr) => Some(ptr),
            _ => None,
        }
    }

    pub(crate) fn entry(&self, slot: usize) -> SlotEntry {
        SlotEntry {
            key_len: self.key_len[slot].load(RELAXED),
            key_slice: self.key_slice[slot].load(RELAXED),
            lv: self.lv[slot].load(RELAXED),
            suffix: self.suffixes.get(slot),
        }
    }

    pub(crate) fn store_entry(&self, slot: usize, entry: SlotEntry) {
        self.key_slice[slot].store(entry.key_slice, WRITE_ORD);
        self.suffixes.set(slot, entry.suffix);
        self.lv[slot].store(entry.lv, WRITE_ORD);
        self.key_len[slot].store(entry.key_len, WRITE_ORD);
    }

    fn clear_slot(&self, slot: usize) {
        self.store_entry(
            slot,
            SlotEntry {
                key_len: KEY_LEN_EMPTY,
                key_slice: 0,
                lv: StdPtr::null_mut(),
                suffix: StdPtr::null_mut(),
            },
        );
    }

    // ========================================================================
    //  Search
    // ========================================================================

    /// Find the entry for `key` at its current layer.
    ///
    /// Safe to call under an optimistic read; the caller validates the
    /// version before acting on the result.
    #[must_use]
    pub fn search_link_or_value_with_index(&self, key: &Key) -> SearchResult {
        let current = key.current_slice();
        let has_next: bool = key.has_next();

        for slot in self.permutation().iter() {
            if self.key_slice(slot) != current.slice {
                continue;
            }
            match self.key_len(slot) {
                KEY_LEN_UNSTABLE => return SearchResult::Unstable,
                KEY_LEN_LAYER if has_next => return SearchResult::Layer(slot),
                KEY_LEN_HAS_SUFFIX if has_next => {
                    if self.suffix_matches(slot, key) {
                        return SearchResult::Value(slot);
                    }
                }
                len @ 1..=8 if !has_next && len == current.size => {
                    return SearchResult::Value(slot);
                }
                _ => {}
            }
        }

        SearchResult::NotFound
    }

    fn suffix_matches(&self, slot: usize, key: &Key) -> bool {
        let suffix: *mut BigSuffix = self.suffix(slot);
        if suffix.is_null() {
            return false;
        }
        // SAFETY: suffixes are retired through the collector, so a pointer
        // read under a guard stays valid for the rest of the operation.
        unsafe { (*suffix).is_same(key, key.cursor() + 1) }
    }

    /// True if `key` continues past this layer and an entry with the same
    /// slice already keeps its tail in a suffix. Such a pair must be split
    /// into a new layer before `key` can be stored.
    #[must_use]
    pub fn check_break_invariant(&self, key: &Key) -> Option<usize> {
        if !key.has_next() {
            return None;
        }
        let slice: u64 = key.current_slice().slice;
        self.permutation()
            .iter()
            .find(|&slot| self.key_slice(slot) == slice && self.key_len(slot) == KEY_LEN_HAS_SUFFIX)
    }

    /// Slot linking to layer root `layer`.
    #[must_use]
    pub fn find_layer_slot(&self, layer: *mut u8) -> Option<usize> {
        self.permutation()
            .iter()
            .find(|&slot| self.key_len(slot) == KEY_LEN_LAYER && self.layer_ptr(slot) == Some(layer))
    }

    /// Smallest slice held, if any.
    #[must_use]
    pub fn lowest_key(&self) -> Option<u64> {
        let perm: Permuter = self.permutation();
        (!perm.is_empty()).then(|| self.key_slice(perm.get(0)))
    }

    // ========================================================================
    //  Mutation (lock held)
    // ========================================================================

    /// First free slot, or `None` if the node is full.
    #[must_use]
    pub fn insert_point(&self) -> Option<usize> {
        let perm: Permuter = self.permutation();
        if perm.is_full() {
            return None;
        }
        let slot: Option<usize> = (0..WIDTH).find(|&s| {
            let len: u8 = self.key_len(s);
            len == KEY_LEN_EMPTY || is_removed(len)
        });
        debug_assert!(slot.is_none_or(|s| !perm.contains(s)), "free slot {slot:?} is in use");
        slot
    }

    /// Logical position for an entry `(slice, key_len)`.
    #[must_use]
    pub fn insert_position(&self, slice: u64, key_len: u8) -> usize {
        let class: u8 = order_class(key_len);
        let perm: Permuter = self.permutation();
        perm.iter()
            .take_while(|&slot| (self.key_slice(slot), order_class(self.key_len(slot))) < (slice, class))
            .count()
    }

    /// Store a new entry for `key` in free `slot` and splice it into the
    /// permutation. The caller has marked an insert.
    pub fn insert_entry(&self, slot: usize, key: &Key, value: Arc<V>) {
        let current = key.current_slice();
        let (key_len, suffix): (u8, *mut BigSuffix) = if key.has_next() {
            let suffix: Box<BigSuffix> = Box::new(BigSuffix::from_key(key, key.cursor() + 1));
            (KEY_LEN_HAS_SUFFIX, Box::into_raw(suffix))
        } else {
            (current.size, StdPtr::null_mut())
        };

        let position: usize = self.insert_position(current.slice, key_len);
        self.store_entry(
            slot,
            SlotEntry {
                key_len,
                key_slice: current.slice,
                lv: encode_value(value),
                suffix,
            },
        );

        let mut perm: Permuter = self.permutation();
        perm.insert(position, slot);
        self.set_permutation(perm);
    }

    /// Replace the value in `slot`, returning the old value pointer.
    pub fn swap_value(&self, slot: usize, value: Arc<V>) -> *const V {
        let old: *mut u8 = self.lv[slot].swap(encode_value(value), WRITE_ORD);
        debug_assert_eq!(old.addr() & LV_TAG_MASK, LV_VALUE, "swap_value on a non-value slot");
        untag(old).cast::<V>().cast_const()
    }

    /// Take the value back out of an unpublished node.
    pub(crate) fn take_value(&self, slot: usize) -> Option<Arc<V>> {
        let raw: *mut u8 = self.lv[slot].swap(StdPtr::null_mut(), WRITE_ORD);
        (raw.addr() & LV_TAG_MASK == LV_VALUE).then(|| {
            // SAFETY: value words come from `encode_value`, and the swap above
            // moved ownership out of the slot.
            unsafe { Arc::from_raw(untag(raw).cast::<V>().cast_const()) }
        })
    }

    /// Remove the entry in `slot`, leaving a removed tag.
    ///
    /// Returns the value and suffix pointers the node no longer owns.
    pub fn remove_entry(&self, slot: usize) -> (*const V, *mut BigSuffix) {
        let key_len: u8 = self.key_len(slot);
        self.set_key_len(slot, KEY_LEN_REMOVED_OFFSET + key_len.min(KEY_LEN_HAS_SUFFIX));

        let mut perm: Permuter = self.permutation();
        let removed: Option<usize> = perm.remove_slot(slot);
        debug_assert!(removed.is_some(), "remove_entry: slot {slot} not in use");
        self.set_permutation(perm);

        let old: *mut u8 = self.lv[slot].swap(StdPtr::null_mut(), WRITE_ORD);
        let suffix: *mut BigSuffix = self.suffixes.take(slot);
        (untag(old).cast::<V>().cast_const(), suffix)
    }

    /// Drop the layer link in `slot` after its layer was emptied.
    pub fn unlink_layer(&self, slot: usize) {
        debug_assert_eq!(self.key_len(slot), KEY_LEN_LAYER);
        self.set_key_len(slot, KEY_LEN_REMOVED_OFFSET + KEY_LEN_HAS_SUFFIX);

        let mut perm: Permuter = self.permutation();
        perm.remove_slot(slot);
        self.set_permutation(perm);
        self.lv[slot].store(StdPtr::null_mut(), WRITE_ORD);
    }

    // ========================================================================
    //  Split Support (lock held, split marked)
    // ========================================================================

    /// Rewrite the slots so physical order matches logical order.
    ///
    /// Slots past the live count are cleared.
    pub fn sort(&self) {
        let perm: Permuter = self.permutation();
        if perm.is_identity() {
            return;
        }

        let entries: Vec<SlotEntry> = perm.iter().map(|slot| self.entry(slot)).collect();
        for (slot, entry) in entries.iter().enumerate() {
            self.store_entry(slot, *entry);
        }
        for slot in entries.len()..WIDTH {
            self.clear_slot(slot);
        }
        self.set_permutation(Permuter::from_sorted(entries.len()));
    }

    /// Start index and slice of every run of equal slices in a sorted node.
    #[must_use]
    pub fn create_slice_table(&self) -> (Vec<usize>, Vec<u64>) {
        debug_assert!(self.permutation().is_identity(), "create_slice_table on an unsorted node");

        let mut table: Vec<usize> = Vec::new();
        let mut found: Vec<u64> = Vec::new();
        for slot in 0..self.len() {
            let slice: u64 = self.key_slice(slot);
            if found.last() != Some(&slice) {
                table.push(slot);
                found.push(slice);
            }
        }
        (table, found)
    }

    /// Move sorted slots `boundary..len` to `right` and link `right` in as
    /// the new right sibling.
    ///
    /// # Safety
    /// `self_ptr` must be `self` and `right_ptr` must be `right`, a fresh node
    /// no other thread can reach yet.
    pub unsafe fn split_keys_among(&self, self_ptr: *mut Self, right: &Self, right_ptr: *mut Self, boundary: usize) {
        let n: usize = self.len();
        debug_assert!(boundary <= n);

        for (to, from) in (boundary..n).enumerate() {
            right.store_entry(to, self.entry(from));
        }
        right.set_permutation(Permuter::from_sorted(n - boundary));

        self.set_permutation(Permuter::from_sorted(boundary));
        for slot in boundary..n {
            self.clear_slot(slot);
        }

        let old_next: *mut Self = self.next();
        right.set_next(old_next);
        right.set_prev(self_ptr);
        self.set_next(right_ptr);
        if !old_next.is_null() {
            // SAFETY: siblings are border nodes kept alive by the tree.
            unsafe { (*old_next).set_prev(right_ptr) };
        }
    }

    /// Layer roots linked from live slots.
    pub(crate) fn layer_links(&self) -> impl Iterator<Item = (usize, *mut u8)> + '_ {
        self.permutation()
            .iter()
            .filter_map(|slot| self.layer_ptr(slot).map(|ptr| (slot, ptr)))
    }
}

/// Where to split a full, sorted node so that `new_slice` can be inserted.
///
/// Returns the count of entries that stay left. Entries sharing a slice are
/// never separated, so one side may end up empty:
///
/// - `new_slice` matches a run that does not start the node: split at that
///   run, the new key goes right with it
/// - it matches the first run: split after that run, the new key goes left
/// - otherwise: split at the first run with a greater slice (or after
///   everything), the new key goes left
#[must_use]
pub fn split_point(new_slice: u64, table: &[usize], found: &[u64], len: usize) -> usize {
    if let Some(run) = found.iter().position(|&s| s == new_slice) {
        if table[run] > 0 {
            return table[run];
        }
        return table.get(1).copied().unwrap_or(len);
    }
    found
        .iter()
        .position(|&s| s > new_slice)
        .map_or(len, |run| table[run])
}

impl<V> Drop for BorderNode<V> {
    fn drop(&mut self) {
        for lv in &mut self.lv {
            let raw: *mut u8 = *lv.get_mut();
            if raw.addr() & LV_TAG_MASK == LV_VALUE {
                // SAFETY: value words come from `encode_value` and the node
                // owns every value still stored in it.
                unsafe { drop(Arc::from_raw(untag(raw).cast::<V>().cast_const())) };
            }
        }
    }
}

/// Climb from any node of a layer to that layer's current root.
///
/// # Safety
/// `node` must be live, and so must every node on its parent chain.
pub(crate) unsafe fn layer_root_of<V>(node: *mut u8) -> NodePtr<V> {
    // SAFETY: caller guarantees liveness of the chain.
    let mut current: NodePtr<V> = unsafe { NodePtr::from_raw(node) };
    loop {
        // SAFETY: as above.
        match unsafe { current.link().load() } {
            NodeLink::InteriorChild(parent) => current = NodePtr::Interior(parent),
            NodeLink::LayerRoot | NodeLink::BorderChild(_) => return current,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn insert(node: &BorderNode<u64>, bytes: &[u8], value: u64) {
        let key = Key::from_bytes(bytes).unwrap();
        let slot = node.insert_point().unwrap();
        node.insert_entry(slot, &key, Arc::new(value));
    }

    fn get(node: &BorderNode<u64>, bytes: &[u8]) -> Option<u64> {
        let key = Key::from_bytes(bytes).unwrap();
        match node.search_link_or_value_with_index(&key) {
            // SAFETY: the node owns the value and outlives the read.
            SearchResult::Value(slot) => node.value_ptr(slot).map(|p| unsafe { *p }),
            _ => None,
        }
    }

    fn slices(node: &BorderNode<u64>) -> Vec<(u64, u8)> {
        node.permutation()
            .iter()
            .map(|s| (node.key_slice(s), node.key_len(s)))
            .collect()
    }

    #[test]
    fn test_insert_keeps_permutation_sorted() {
        let node = BorderNode::<u64>::new_root();
        insert(&node, b"b", 2);
        insert(&node, b"a", 1);
        insert(&node, b"a\0", 3);
        insert(&node, b"abcdefghij", 4);

        let lens: Vec<u8> = slices(&node).iter().map(|&(_, l)| l).collect();
        assert_eq!(lens, vec![1, 2, KEY_LEN_HAS_SUFFIX, 1]);
        assert_eq!(node.permutation().to_vec(), vec![1, 2, 3, 0]);

        assert_eq!(get(&node, b"a"), Some(1));
        assert_eq!(get(&node, b"a\0"), Some(3));
        assert_eq!(get(&node, b"abcdefghij"), Some(4));
        assert_eq!(get(&node, b"abcdefghik"), None);
        assert_eq!(get(&node, b"abcdefgh"), None);
        assert_eq!(get(&node, b"c"), None);
    }

    #[test]
    fn test_check_break_invariant() {
        let node = BorderNode::<u64>::new_root();
        insert(&node, b"abcdefgh-one", 1);

        let other = Key::from_bytes(b"abcdefgh-two").unwrap();
        assert_eq!(node.search_link_or_value_with_index(&other), SearchResult::NotFound);
        assert!(node.check_break_invariant(&other).is_some());

        let short = Key::from_bytes(b"abcdefgh").unwrap();
        assert!(node.check_break_invariant(&short).is_none());
    }

    #[test]
    fn test_remove_entry_leaves_tombstone_for_reuse() {
        let node = BorderNode::<u64>::new_root();
        insert(&node, b"x", 1);
        insert(&node, b"y", 2);

        let key = Key::from_bytes(b"x").unwrap();
        let SearchResult::Value(slot) = node.search_link_or_value_with_index(&key) else {
            panic!("x not found");
        };
        let (value, suffix) = node.remove_entry(slot);
        assert!(suffix.is_null());
        // SAFETY: the node gave up ownership of the value.
        drop(unsafe { Arc::from_raw(value) });

        assert!(is_removed(node.key_len(slot)));
        assert!(matches!(node.link_or_value(slot), LinkOrValue::Tombstone));
        assert_eq!(node.len(), 1);
        assert_eq!(get(&node, b"x"), None);
        assert_eq!(node.insert_point(), Some(slot));
    }

    #[test]
    fn test_swap_value_returns_old() {
        let node = BorderNode::<u64>::new_root();
        insert(&node, b"k", 1);
        let old = node.swap_value(0, Arc::new(2));
        // SAFETY: the node gave up ownership of the old value.
        assert_eq!(*unsafe { Arc::from_raw(old) }, 1);
        assert_eq!(get(&node, b"k"), Some(2));
    }

    #[test]
    fn test_full_node_has_no_insert_point() {
        let node = BorderNode::<u64>::new_root();
        for i in 0..WIDTH as u8 {
            insert(&node, &[i + 1], u64::from(i));
        }
        assert!(node.permutation().is_full());
        assert_eq!(node.insert_point(), None);
    }

    #[test]
    fn test_sort_compacts_live_slots() {
        let node = BorderNode::<u64>::new_root();
        for b in [b"d", b"a", b"c", b"b"] {
            insert(&node, b, 0);
        }
        let key = Key::from_bytes(b"c").unwrap();
        let SearchResult::Value(slot) = node.search_link_or_value_with_index(&key) else {
            panic!("c not found");
        };
        let (value, _) = node.remove_entry(slot);
        // SAFETY: ownership moved out of the node.
        drop(unsafe { Arc::from_raw(value) });

        node.sort();
        assert!(node.permutation().is_identity());
        assert_eq!(node.len(), 3);
        assert_eq!(node.key_len(3), KEY_LEN_EMPTY);
        let firsts: Vec<u8> = slices(&node).iter().map(|&(s, _)| s.to_be_bytes()[0]).collect();
        assert_eq!(firsts, b"abd".to_vec());
    }

    #[test]
    fn test_slice_table_and_split_point() {
        let node = BorderNode::<u64>::new_root();
        // Five entries per slice: four literal lengths and one long key.
        for run in [0x11u8, 0x22, 0x44] {
            for len in [1usize, 2, 3, 4, 12] {
                let mut bytes = vec![0u8; len];
                bytes[0] = run;
                insert(&node, &bytes, 0);
            }
        }
        node.sort();

        let (table, found) = node.create_slice_table();
        assert_eq!(table, vec![0, 5, 10]);
        assert_eq!(found.len(), 3);

        assert_eq!(split_point(0x0A0B_0000_0000_0000, &table, &found, 15), 0);
        assert_eq!(split_point(found[0], &table, &found, 15), 5);
        assert_eq!(split_point(found[1], &table, &found, 15), 5);
        assert_eq!(split_point(0x3333_3333_3333_3333, &table, &found, 15), 10);
        assert_eq!(split_point(found[2], &table, &found, 15), 10);
        assert_eq!(split_point(u64::MAX, &table, &found, 15), 15);
    }

    #[test]
    fn test_split_keys_among_links_siblings() {
        let left: *mut BorderNode<u64> = Box::into_raw(BorderNode::new_root());
        let right: *mut BorderNode<u64> = Box::into_raw(BorderNode::new());
        // SAFETY: both nodes are live until freed at the end of the test.
        unsafe {
            for i in 0..6u8 {
                insert(&*left, &[i + 1], u64::from(i));
            }
            (*left).split_keys_among(left, &*right, right, 4);

            assert_eq!((*left).len(), 4);
            assert_eq!((*right).len(), 2);
            assert_eq!((*left).next(), right);
            assert_eq!((*right).prev(), left);
            assert_eq!((*right).lowest_key(), Some(u64::from_be_bytes([5, 0, 0, 0, 0, 0, 0, 0])));
            assert_eq!(get(&*right, &[6]), Some(5));
            assert_eq!(get(&*left, &[6]), None);
            assert_eq!((*left).key_len(5), KEY_LEN_EMPTY);

            drop(Box::from_raw(left));
            drop(Box::from_raw(right));
        }
    }

    #[test]
    fn test_take_value_empties_slot() {
        let node = BorderNode::<u64>::new_root();
        insert(&node, b"v", 9);
        assert_eq!(node.take_value(0).as_deref(), Some(&9));
        assert!(node.take_value(0).is_none());
    }
}
