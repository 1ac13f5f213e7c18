//! Shuttle models of the tree's publication protocols.
//!
//! Each model reduces one protocol to a handful of atomics with the same
//! version-word discipline the nodes use (lock bit, deleted bit, counters
//! bumped on unlock), then lets shuttle explore schedules:
//!
//! - the empty-tree root race, where losers retire their unpublished root
//! - layer collapse racing an insert into the same layer
//!
//! Run with: `cargo test --lib tree::shuttle_tests`

use shuttle::sync::Arc;
use shuttle::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use shuttle::thread;

const LOCK: u64 = 1;
const DELETED: u64 = 1 << 32;
const CHANGE: u64 = 2;

/// Version word with the lock and deleted protocol of a tree node.
struct ModelVersion(AtomicU64);

impl ModelVersion {
    fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    fn lock(&self) {
        loop {
            let v = self.0.load(Ordering::Relaxed);
            if v & LOCK != 0 {
                thread::yield_now();
                continue;
            }
            if self
                .0
                .compare_exchange(v, v | LOCK, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }
        }
    }

    fn unlock(&self) {
        let v = self.0.load(Ordering::Relaxed);
        self.0.store((v & !LOCK) + CHANGE, Ordering::Release);
    }

    fn mark_deleted(&self) {
        self.0.fetch_or(DELETED, Ordering::Relaxed);
    }

    fn stable(&self) -> u64 {
        loop {
            let v = self.0.load(Ordering::Acquire);
            if v & LOCK == 0 {
                return v;
            }
            thread::yield_now();
        }
    }

    fn is_deleted(&self) -> bool {
        self.0.load(Ordering::Acquire) & DELETED != 0
    }
}

// ============================================================================
//  Root race
// ============================================================================

/// A node holding up to four single-byte keys, one value slot per key.
struct ModelNode {
    version: ModelVersion,
    values: [AtomicU64; 4],
}

impl ModelNode {
    fn new() -> Self {
        Self {
            version: ModelVersion::new(),
            values: [AtomicU64::new(0), AtomicU64::new(0), AtomicU64::new(0), AtomicU64::new(0)],
        }
    }
}

/// Tree reduced to one root slot. Node 0 is "no root"; writer `i` owns the
/// candidate node `i + 1`. `lost[i]` records that writer `i` published a
/// candidate and had its root CAS fail.
struct RootModel {
    root: AtomicUsize,
    nodes: Vec<ModelNode>,
    lost: Vec<AtomicBool>,
}

impl RootModel {
    fn new(writers: usize) -> Self {
        Self {
            root: AtomicUsize::new(0),
            nodes: (0..=writers).map(|_| ModelNode::new()).collect(),
            lost: (0..writers).map(|_| AtomicBool::new(false)).collect(),
        }
    }

    fn put(&self, writer: usize, key: usize, value: u64) {
        loop {
            let root = self.root.load(Ordering::Acquire);
            if root == 0 {
                let mine = writer + 1;
                self.nodes[mine].values[key].store(value, Ordering::Relaxed);
                if self
                    .root
                    .compare_exchange(0, mine, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    return;
                }
                self.lost[writer].store(true, Ordering::Relaxed);
                let node = &self.nodes[mine];
                node.version.lock();
                node.values[key].store(0, Ordering::Relaxed);
                node.version.mark_deleted();
                node.version.unlock();
                continue;
            }

            let node = &self.nodes[root];
            node.version.lock();
            if node.version.is_deleted() {
                node.version.unlock();
                continue;
            }
            node.values[key].store(value, Ordering::Relaxed);
            node.version.unlock();
            return;
        }
    }

    fn get(&self, key: usize) -> Option<u64> {
        loop {
            let root = self.root.load(Ordering::Acquire);
            if root == 0 {
                return None;
            }
            let node = &self.nodes[root];
            let v = node.version.stable();
            let value = node.values[key].load(Ordering::Relaxed);
            if node.version.0.load(Ordering::Acquire) != v {
                continue;
            }
            return (value != 0).then_some(value);
        }
    }
}

#[test]
fn test_shuttle_root_race_single_winner() {
    shuttle::check_random(
        || {
            let model = Arc::new(RootModel::new(3));

            let handles: Vec<_> = (0..3)
                .map(|w| {
                    let m = Arc::clone(&model);
                    thread::spawn(move || m.put(w, w, 10 + w as u64))
                })
                .collect();
            for h in handles {
                h.join().unwrap();
            }

            let root = model.root.load(Ordering::Acquire);
            assert_ne!(root, 0);
            assert!(!model.nodes[root].version.is_deleted());
            assert!(!model.lost[root - 1].load(Ordering::Relaxed));
            for (w, lost) in model.lost.iter().enumerate() {
                let node = &model.nodes[w + 1];
                if lost.load(Ordering::Relaxed) {
                    assert!(node.version.is_deleted(), "loser {w} not retired");
                } else {
                    // Never built a candidate, or won.
                    assert!(!node.version.is_deleted(), "writer {w} retired without losing");
                }
            }
            for w in 0..3 {
                assert_eq!(model.get(w), Some(10 + w as u64));
            }
        },
        200,
    );
}

#[test]
fn test_shuttle_root_race_reader_sees_published_only() {
    shuttle::check_random(
        || {
            let model = Arc::new(RootModel::new(2));

            let m1 = Arc::clone(&model);
            let t1 = thread::spawn(move || m1.put(0, 0, 7));
            let m2 = Arc::clone(&model);
            let t2 = thread::spawn(move || m2.put(1, 1, 8));
            let m3 = Arc::clone(&model);
            let reader = thread::spawn(move || (m3.get(0), m3.get(1)));

            t1.join().unwrap();
            t2.join().unwrap();
            let (a, b) = reader.join().unwrap();

            assert!(a.is_none() || a == Some(7));
            assert!(b.is_none() || b == Some(8));
            assert_eq!(model.get(0), Some(7));
            assert_eq!(model.get(1), Some(8));
        },
        200,
    );
}

// ============================================================================
//  Layer collapse
// ============================================================================

/// An upper slot linking at most one layer at a time. Layer `0` means the
/// slot is unlinked; layers are never reused.
struct LayerModel {
    upper: ModelVersion,
    slot: AtomicUsize,
    layers: Vec<ModelNode>,
    next_layer: AtomicUsize,
}

impl LayerModel {
    fn new(layers: usize) -> Self {
        Self {
            upper: ModelVersion::new(),
            slot: AtomicUsize::new(0),
            layers: (0..=layers).map(|_| ModelNode::new()).collect(),
            next_layer: AtomicUsize::new(1),
        }
    }

    fn count(node: &ModelNode) -> usize {
        node.values.iter().filter(|v| v.load(Ordering::Relaxed) != 0).count()
    }

    fn insert(&self, key: usize, value: u64) {
        loop {
            self.upper.lock();
            let layer = self.slot.load(Ordering::Acquire);
            if layer == 0 {
                let fresh = self.next_layer.fetch_add(1, Ordering::Relaxed);
                self.layers[fresh].values[key].store(value, Ordering::Relaxed);
                self.slot.store(fresh, Ordering::Release);
                self.upper.unlock();
                return;
            }
            self.upper.unlock();

            let node = &self.layers[layer];
            node.version.lock();
            if node.version.is_deleted() {
                node.version.unlock();
                continue;
            }
            node.values[key].store(value, Ordering::Relaxed);
            node.version.unlock();
            return;
        }
    }

    /// Remove `key`, then collapse the layer if it emptied.
    fn remove(&self, key: usize) {
        let layer = self.slot.load(Ordering::Acquire);
        if layer == 0 {
            return;
        }
        let node = &self.layers[layer];
        node.version.lock();
        if node.version.is_deleted() {
            node.version.unlock();
            return;
        }
        node.values[key].store(0, Ordering::Relaxed);
        let empty = Self::count(node) == 0;
        node.version.unlock();
        if !empty {
            return;
        }

        self.upper.lock();
        node.version.lock();
        if self.slot.load(Ordering::Relaxed) == layer && !node.version.is_deleted() && Self::count(node) == 0 {
            node.version.mark_deleted();
            self.slot.store(0, Ordering::Release);
        }
        node.version.unlock();
        self.upper.unlock();
    }

    fn get(&self, key: usize) -> Option<u64> {
        loop {
            let layer = self.slot.load(Ordering::Acquire);
            if layer == 0 {
                return None;
            }
            let node = &self.layers[layer];
            let v = node.version.stable();
            if v & DELETED != 0 {
                continue;
            }
            let value = node.values[key].load(Ordering::Relaxed);
            if node.version.0.load(Ordering::Acquire) != v {
                continue;
            }
            return (value != 0).then_some(value);
        }
    }
}

#[test]
fn test_shuttle_collapse_never_loses_insert() {
    shuttle::check_random(
        || {
            let model = Arc::new(LayerModel::new(4));
            model.insert(0, 1);

            let m1 = Arc::clone(&model);
            let remover = thread::spawn(move || m1.remove(0));
            let m2 = Arc::clone(&model);
            let inserter = thread::spawn(move || m2.insert(1, 2));

            remover.join().unwrap();
            inserter.join().unwrap();

            assert_eq!(model.get(1), Some(2));
            assert_eq!(model.get(0), None);

            let layer = model.slot.load(Ordering::Acquire);
            assert!(!model.layers[layer].version.is_deleted());
        },
        300,
    );
}

#[test]
fn test_shuttle_collapse_reader_consistent() {
    shuttle::check_random(
        || {
            let model = Arc::new(LayerModel::new(4));
            model.insert(0, 1);
            model.insert(2, 3);

            let m1 = Arc::clone(&model);
            let remover = thread::spawn(move || {
                m1.remove(0);
                m1.remove(2);
            });
            let m2 = Arc::clone(&model);
            let reader = thread::spawn(move || m2.get(2));

            remover.join().unwrap();
            let seen = reader.join().unwrap();

            assert!(seen.is_none() || seen == Some(3));
            assert_eq!(model.get(2), None);
            assert_eq!(model.slot.load(Ordering::Acquire), 0);
        },
        300,
    );
}
