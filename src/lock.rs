use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use ulid::Ulid;

/// Held exclusion over one scheduling scope. Released on drop, on every exit path.
pub struct ScopedLock {
    _guard: Box<dyn Send + Sync>,
}

impl ScopedLock {
    pub fn new(guard: impl Send + Sync + 'static) -> Self {
        Self {
            _guard: Box::new(guard),
        }
    }
}

/// Mutual exclusion keyed by expert or user id.
///
/// The booking engine holds these across its validate-then-write critical
/// sections, so correctness never depends on the store's isolation level.
/// A multi-instance deployment swaps in a distributed implementation.
#[async_trait]
pub trait LockManager: Send + Sync {
    async fn acquire_exclusive(&self, key: Ulid) -> ScopedLock;
}

type LockTable = DashMap<Ulid, Arc<Mutex<()>>>;

/// In-process locks: one async mutex per key, created on first use and
/// dropped once its last holder or waiter lets go.
#[derive(Default)]
pub struct LocalLocks {
    locks: Arc<LockTable>,
}

impl LocalLocks {
    pub fn new() -> Self {
        Self::default()
    }
}

struct LocalGuard {
    guard: Option<OwnedMutexGuard<()>>,
    key: Ulid,
    locks: Arc<LockTable>,
}

impl Drop for LocalGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Waiters hold their own clone, so a count of one means only the
        // table still refers to it. The check runs under the shard lock.
        self.locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

#[async_trait]
impl LockManager for LocalLocks {
    async fn acquire_exclusive(&self, key: Ulid) -> ScopedLock {
        // Clone the Arc out so the shard guard is gone before we await.
        let mutex = self.locks.entry(key).or_default().value().clone();
        ScopedLock::new(LocalGuard {
            guard: Some(mutex.lock_owned().await),
            key,
            locks: self.locks.clone(),
        })
    }
}
