//! Per-key reader/writer lock manager.
//!
//! A process-wide map from key to `RwLock<()>`, lazily populated. Generalizes
//! the teacher's sharded-map idea (many independent locks reduce contention)
//! into an explicit per-key granularity with closure-scoped acquisition, so a
//! lock's lifetime never outlives the critical section that needed it.
//!
//! Locks are never freed by an unlock; only `cleanup` (driven by key
//! deletion) removes the map entry. Freeing on unlock would race a thread
//! that looked the lock up moments earlier and is about to block on it.

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

pub struct KeyLockManager {
    locks: RwLock<HashMap<Bytes, Arc<RwLock<()>>>>,
}

impl KeyLockManager {
    pub fn new() -> Self {
        Self {
            locks: RwLock::new(HashMap::new()),
        }
    }

    fn entry(&self, key: &Bytes) -> Arc<RwLock<()>> {
        if let Some(lock) = self.locks.read().unwrap().get(key) {
            return Arc::clone(lock);
        }
        let mut locks = self.locks.write().unwrap();
        Arc::clone(
            locks
                .entry(key.clone())
                .or_insert_with(|| Arc::new(RwLock::new(()))),
        )
    }

    /// Runs `f` while holding the shared (reader) lock for `key`.
    pub fn with_read<R>(&self, key: &Bytes, f: impl FnOnce() -> R) -> R {
        let lock = self.entry(key);
        let _guard = lock.read().unwrap();
        f()
    }

    /// Runs `f` while holding the exclusive (writer) lock for `key`.
    pub fn with_write<R>(&self, key: &Bytes, f: impl FnOnce() -> R) -> R {
        let lock = self.entry(key);
        let _guard = lock.write().unwrap();
        f()
    }

    /// Removes the lock entry for `key`. Callers must ensure no thread holds
    /// or awaits the lock at the moment of cleanup (satisfied here because
    /// cleanup is only ever called from within the same `with_write` critical
    /// section that just deleted the key).
    pub fn cleanup(&self, key: &Bytes) {
        self.locks.write().unwrap().remove(key);
    }

    /// Clears every registered lock (used by FLUSHDB).
    pub fn clear(&self) {
        self.locks.write().unwrap().clear();
    }
}

impl Default for KeyLockManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn independent_keys_do_not_contend() {
        let mgr = Arc::new(KeyLockManager::new());
        let a = Bytes::from_static(b"a");
        let b = Bytes::from_static(b"b");

        let mgr2 = Arc::clone(&mgr);
        let handle = thread::spawn(move || {
            mgr2.with_write(&a, || {
                thread::sleep(std::time::Duration::from_millis(50));
            });
        });

        // Should not block on `b` while `a` is held.
        let start = std::time::Instant::now();
        mgr.with_write(&b, || {});
        assert!(start.elapsed() < std::time::Duration::from_millis(40));

        handle.join().unwrap();
    }

    #[test]
    fn readers_run_concurrently() {
        let mgr = Arc::new(KeyLockManager::new());
        let key = Bytes::from_static(b"k");
        let concurrent = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let mgr = Arc::clone(&mgr);
                let key = key.clone();
                let concurrent = Arc::clone(&concurrent);
                let max_seen = Arc::clone(&max_seen);
                thread::spawn(move || {
                    mgr.with_read(&key, || {
                        let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        thread::sleep(std::time::Duration::from_millis(20));
                        concurrent.fetch_sub(1, Ordering::SeqCst);
                    });
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        assert!(max_seen.load(Ordering::SeqCst) > 1);
    }

    #[test]
    fn cleanup_removes_entry() {
        let mgr = KeyLockManager::new();
        let key = Bytes::from_static(b"k");
        mgr.with_write(&key, || {});
        assert_eq!(mgr.locks.read().unwrap().len(), 1);
        mgr.cleanup(&key);
        assert_eq!(mgr.locks.read().unwrap().len(), 0);
    }
}
