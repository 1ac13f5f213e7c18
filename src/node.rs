//! Filepath: src/node.rs
//!
//! Type-erased node pointers and the upward link every node carries.
//!
//! Both node kinds start with a [`NodeHeader`], so a `*mut u8` naming any
//! node can be classified by reading the border bit of its version.
//!
//! # Link encoding
//!
//! The upward link is one tagged pointer. Nodes are 64-byte aligned, which
//! leaves the low bits free for the tag:
//!
//! ```text
//! null                      LayerRoot      (root of layer 0)
//! ptr | 0b01                InteriorChild  (parent in the same layer)
//! ptr | 0b10                BorderChild    (border node one layer up)
//! ```

use std::fmt as StdFmt;
use std::marker::PhantomData;
use std::ptr as StdPtr;
use std::sync::atomic::AtomicPtr;

use crate::border::BorderNode;
use crate::internode::InteriorNode;
use crate::nodeversion::NodeVersion;
use crate::ordering::{READ_ORD, WRITE_ORD};

const TAG_MASK: usize = 0b11;
const TAG_INTERIOR: usize = 0b01;
const TAG_BORDER: usize = 0b10;

// ============================================================================
//  NodeLink
// ============================================================================

/// Where a node hangs in the trie.
pub enum NodeLink<V> {
    /// Root of layer 0; the tree facade points here.
    LayerRoot,

    /// Child of an interior node in the same layer.
    InteriorChild(*mut InteriorNode<V>),

    /// Root of a deeper layer, linked from a slot of this border node.
    BorderChild(*mut BorderNode<V>),
}

impl<V> NodeLink<V> {
    fn encode(self) -> *mut u8 {
        match self {
            Self::LayerRoot => StdPtr::null_mut(),
            Self::InteriorChild(p) => p.cast::<u8>().map_addr(|a| a | TAG_INTERIOR),
            Self::BorderChild(p) => p.cast::<u8>().map_addr(|a| a | TAG_BORDER),
        }
    }

    fn decode(raw: *mut u8) -> Self {
        let untagged: *mut u8 = raw.map_addr(|a| a & !TAG_MASK);
        match raw.addr() & TAG_MASK {
            TAG_INTERIOR => Self::InteriorChild(untagged.cast()),
            TAG_BORDER => Self::BorderChild(untagged.cast()),
            _ => Self::LayerRoot,
        }
    }
}

impl<V> Clone for NodeLink<V> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<V> Copy for NodeLink<V> {}

impl<V> PartialEq for NodeLink<V> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::LayerRoot, Self::LayerRoot) => true,
            (Self::InteriorChild(a), Self::InteriorChild(b)) => StdPtr::eq(*a, *b),
            (Self::BorderChild(a), Self::BorderChild(b)) => StdPtr::eq(*a, *b),
            _ => false,
        }
    }
}

impl<V> Eq for NodeLink<V> {}

impl<V> StdFmt::Debug for NodeLink<V> {
    fn fmt(&self, f: &mut StdFmt::Formatter<'_>) -> StdFmt::Result {
        match self {
            Self::LayerRoot => write!(f, "LayerRoot"),
            Self::InteriorChild(p) => write!(f, "InteriorChild({p:p})"),
            Self::BorderChild(p) => write!(f, "BorderChild({p:p})"),
        }
    }
}

/// Atomic cell holding a [`NodeLink`].
pub struct LinkCell<V> {
    raw: AtomicPtr<u8>,
    _marker: PhantomData<V>,
}

impl<V> LinkCell<V> {
    /// Cell holding `link`.
    #[must_use]
    pub fn new(link: NodeLink<V>) -> Self {
        Self {
            raw: AtomicPtr::new(link.encode()),
            _marker: PhantomData,
        }
    }

    /// Current link.
    #[inline]
    #[must_use]
    pub fn load(&self) -> NodeLink<V> {
        NodeLink::decode(self.raw.load(READ_ORD))
    }

    /// Replace the link. Caller holds the node lock.
    #[inline]
    pub fn store(&self, link: NodeLink<V>) {
        self.raw.store(link.encode(), WRITE_ORD);
    }
}

impl<V> StdFmt::Debug for LinkCell<V> {
    fn fmt(&self, f: &mut StdFmt::Formatter<'_>) -> StdFmt::Result {
        self.load().fmt(f)
    }
}

// ============================================================================
//  NodeHeader
// ============================================================================

/// Fields shared by both node kinds, always at offset 0.
#[repr(C)]
pub struct NodeHeader<V> {
    pub(crate) version: NodeVersion,
    pub(crate) link: LinkCell<V>,
}

impl<V> NodeHeader<V> {
    pub(crate) fn new(version: NodeVersion, link: NodeLink<V>) -> Self {
        Self {
            version,
            link: LinkCell::new(link),
        }
    }
}

// ============================================================================
//  NodePtr
// ============================================================================

/// A node pointer tagged with its kind.
pub enum NodePtr<V> {
    /// Leaf of a layer's B+-tree.
    Border(*mut BorderNode<V>),

    /// Routing node.
    Interior(*mut InteriorNode<V>),
}

impl<V> NodePtr<V> {
    /// Classify a raw node pointer by its version's border bit.
    ///
    /// # Safety
    /// `raw` must point to a live [`BorderNode`] or [`InteriorNode`].
    #[inline]
    #[must_use]
    pub unsafe fn from_raw(raw: *mut u8) -> Self {
        // SAFETY: both node types are repr(C) with the header first.
        let header: &NodeHeader<V> = unsafe { &*raw.cast::<NodeHeader<V>>() };
        if header.version.is_border() {
            Self::Border(raw.cast())
        } else {
            Self::Interior(raw.cast())
        }
    }

    /// Type-erased pointer.
    #[inline]
    #[must_use]
    pub fn as_raw(&self) -> *mut u8 {
        match *self {
            Self::Border(p) => p.cast(),
            Self::Interior(p) => p.cast(),
        }
    }

    /// Shared header of the node.
    ///
    /// # Safety
    /// The node must stay alive for `'a`.
    #[inline]
    #[must_use]
    pub unsafe fn header<'a>(&self) -> &'a NodeHeader<V>
    where
        V: 'a,
    {
        // SAFETY: caller guarantees liveness; header is at offset 0.
        unsafe { &*self.as_raw().cast::<NodeHeader<V>>() }
    }

    /// Version of the node.
    ///
    /// # Safety
    /// As for [`header`](Self::header).
    #[inline]
    #[must_use]
    pub unsafe fn version<'a>(&self) -> &'a NodeVersion
    where
        V: 'a,
    {
        // SAFETY: forwarded.
        unsafe { &self.header().version }
    }

    /// Upward link of the node.
    ///
    /// # Safety
    /// As for [`header`](Self::header).
    #[inline]
    #[must_use]
    pub unsafe fn link<'a>(&self) -> &'a LinkCell<V>
    where
        V: 'a,
    {
        // SAFETY: forwarded.
        unsafe { &self.header().link }
    }
}

impl<V> Clone for NodePtr<V> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<V> Copy for NodePtr<V> {}

impl<V> StdFmt::Debug for NodePtr<V> {
    fn fmt(&self, f: &mut StdFmt::Formatter<'_>) -> StdFmt::Result {
        match self {
            Self::Border(p) => write!(f, "Border({p:p})"),
            Self::Interior(p) => write!(f, "Interior({p:p})"),
        }
    }
}
