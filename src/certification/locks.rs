use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Async mutexes keyed by number prefix.
///
/// Holders of the same prefix run one at a time; different prefixes never
/// wait on each other. An entry lives only while someone holds or waits on
/// its mutex.
#[derive(Debug, Default)]
pub struct SequenceLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

/// Held sequence lock. Dropping it releases the mutex and evicts the entry
/// when no other task holds a handle to it.
#[derive(Debug)]
pub struct SequenceGuard<'a> {
    locks: &'a SequenceLocks,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for SequenceGuard<'_> {
    fn drop(&mut self) {
        // The owned guard keeps its own Arc, so release it first.
        self.guard.take();
        self.locks
            .locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

impl SequenceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: &str) -> SequenceGuard<'_> {
        // Clone the Arc out so no shard guard is held across the await.
        let mutex = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = mutex.lock_owned().await;

        SequenceGuard {
            locks: self,
            key: key.to_string(),
            guard: Some(guard),
        }
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn same_key_is_serialized() {
        let locks = Arc::new(SequenceLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let inside = inside.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.lock("D1SK150825ON").await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn entry_outlives_release_while_contended() {
        let locks = SequenceLocks::new();
        let first = locks.lock("D2SK150825ON").await;
        assert_eq!(locks.len(), 1);

        let waiter = locks.lock("D2SK150825ON");
        tokio::pin!(waiter);
        assert!(
            tokio::time::timeout(Duration::from_millis(20), &mut waiter)
                .await
                .is_err()
        );

        drop(first);
        assert_eq!(locks.len(), 1);

        let second = waiter.await;
        drop(second);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn different_keys_do_not_block() {
        let locks = SequenceLocks::new();
        let _a = locks.lock("A").await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.lock("B")).await;
        assert!(b.is_ok());
    }
}
