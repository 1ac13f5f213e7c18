//! Loom models of the version protocol.
//!
//! Loom explores every interleaving of a small model, so the models use
//! loom's own atomics with a copy of the lock/unlock arithmetic.
//!
//! Run with: `RUSTFLAGS="--cfg loom" cargo test --lib nodeversion::loom_tests`

use loom::sync::Arc;
use loom::sync::atomic::{AtomicU32, AtomicU64, Ordering, fence};
use loom::thread;

use super::{DIRTY_MASK, INSERTING_BIT, LOCK_BIT, SPLITTING_BIT, VINSERT_LOWBIT, VSPLIT_LOWBIT};

const SPLIT_UNLOCK_MASK: u32 = !(VSPLIT_LOWBIT - 1);
const UNLOCK_MASK: u32 = !(VINSERT_LOWBIT - 1);

struct ModelVersion {
    value: AtomicU32,
}

struct ModelGuard<'a> {
    version: &'a ModelVersion,
    locked_value: u32,
}

impl Drop for ModelGuard<'_> {
    fn drop(&mut self) {
        let new_value: u32 = if self.locked_value & SPLITTING_BIT != 0 {
            (self.locked_value + VSPLIT_LOWBIT) & SPLIT_UNLOCK_MASK
        } else {
            (self.locked_value + ((self.locked_value & INSERTING_BIT) << 2)) & UNLOCK_MASK
        };
        self.version.value.store(new_value, Ordering::Release);
    }
}

impl ModelGuard<'_> {
    fn mark_insert(&mut self) {
        let value = self.version.value.load(Ordering::Relaxed) | INSERTING_BIT;
        self.version.value.store(value, Ordering::Relaxed);
        fence(Ordering::Release);
        self.locked_value = value;
    }
}

impl ModelVersion {
    fn new() -> Self {
        Self {
            value: AtomicU32::new(0),
        }
    }

    fn stable(&self) -> u32 {
        loop {
            let value = self.value.load(Ordering::Acquire);
            if (value & DIRTY_MASK) == 0 {
                return value;
            }
            thread::yield_now();
        }
    }

    fn has_changed(&self, old: u32) -> bool {
        fence(Ordering::Acquire);
        (old ^ self.value.load(Ordering::Acquire)) > LOCK_BIT
    }

    fn lock(&self) -> ModelGuard<'_> {
        loop {
            let value = self.value.load(Ordering::Relaxed);
            if (value & LOCK_BIT) == 0
                && self
                    .value
                    .compare_exchange(value, value | LOCK_BIT, Ordering::Acquire, Ordering::Acquire)
                    .is_ok()
            {
                return ModelGuard {
                    version: self,
                    locked_value: value | LOCK_BIT,
                };
            }
            thread::yield_now();
        }
    }
}

/// Two lockers never overlap.
#[test]
fn test_loom_mutual_exclusion() {
    loom::model(|| {
        let version = Arc::new(ModelVersion::new());
        let counter = Arc::new(AtomicU32::new(0));

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let v = Arc::clone(&version);
                let c = Arc::clone(&counter);
                thread::spawn(move || {
                    let mut guard = v.lock();
                    guard.mark_insert();
                    let seen = c.load(Ordering::Relaxed);
                    c.store(seen + 1, Ordering::Relaxed);
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(counter.load(Ordering::Relaxed), 2);
        assert_eq!(version.value.load(Ordering::Relaxed), 2 * VINSERT_LOWBIT);
    });
}

/// A validated optimistic read sees both slot fields from the same write.
#[test]
fn test_loom_validated_read_is_consistent() {
    loom::model(|| {
        let version = Arc::new(ModelVersion::new());
        let key_slice = Arc::new(AtomicU64::new(0));
        let key_len = Arc::new(AtomicU64::new(0));

        let writer = {
            let (v, s, l) = (Arc::clone(&version), Arc::clone(&key_slice), Arc::clone(&key_len));
            thread::spawn(move || {
                let mut guard = v.lock();
                guard.mark_insert();
                s.store(7, Ordering::Relaxed);
                l.store(7, Ordering::Relaxed);
            })
        };

        let snapshot = version.stable();
        let s = key_slice.load(Ordering::Relaxed);
        let l = key_len.load(Ordering::Relaxed);
        if !version.has_changed(snapshot) {
            assert_eq!(s, l);
        }

        writer.join().unwrap();
    });
}
