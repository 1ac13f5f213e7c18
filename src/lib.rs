//! # `masstrie`
//!
//! A concurrent ordered map built as a trie of B+-trees.
//!
//! Keys are byte strings cut into 8-byte big-endian slices. Each trie layer is
//! a B+-tree keyed by one slice; a key that shares its first slice with another
//! key continues in the next layer down.
//!
//! - reads are lock-free: version snapshot, read, validate, retry
//! - writes lock one node at a time and publish structure before unlocking
//! - removed nodes, values and suffixes are retired through [`seize`], never
//!   freed while a reader may hold them
//!
//! ## Example
//!
//! ```rust
//! use masstrie::MassTree;
//!
//! let tree: MassTree<u64> = MassTree::new();
//! tree.put(b"hello", 1).unwrap();
//! tree.put(b"hello world, long key", 2).unwrap();
//!
//! assert_eq!(tree.get(b"hello").as_deref(), Some(&1));
//! assert_eq!(tree.range::<&[u8], _>(..).len(), 2);
//!
//! assert_eq!(*tree.remove(b"hello").unwrap(), 1);
//! assert!(tree.get(b"hello").is_none());
//! ```
//!
//! ## Thread Safety
//!
//! `MassTree<V>` is `Send + Sync` when `V: Send + Sync`. Every method takes
//! `&self`; share the tree through an `Arc`. The `*_with_guard` variants let a
//! thread reuse one reclamation guard across many operations.
//!
//! ## Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`key`] | slice encoding, [`Key`] cursor |
//! | [`nodeversion`] | version word and node lock |
//! | [`permuter`] | packed logical order of border slots |
//! | [`suffix`] | key tails beyond the current layer |
//! | [`node`] | upward links and type-erased node pointers |
//! | [`border`] / [`internode`] | the two node kinds |
//! | [`gc`] | staging of retired memory |
//! | [`tree`] | the map |

#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::inline_always)]

mod tracing_helpers;

pub mod border;
pub mod error;
pub mod gc;
pub mod internode;
pub mod key;
pub mod node;
pub mod nodeversion;
pub mod ordering;
pub mod permuter;
pub mod suffix;
pub mod tree;

pub use error::TreeError;
pub use gc::GarbageCollector;
pub use key::Key;
pub use tree::MassTree;
