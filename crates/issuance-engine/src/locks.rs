//! Per-key async locks

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// A lazily populated map of async mutexes, one per key. An entry is dropped
/// once its last holder releases it and nobody is waiting.
#[derive(Debug, Default)]
pub struct KeyedLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

/// Held lock on one key
pub struct KeyedGuard<'a> {
    locks: &'a KeyedLocks,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the lock on `key`
    pub async fn lock(&self, key: &str) -> KeyedGuard<'_> {
        let mutex = self.entry(key);
        let guard = mutex.lock_owned().await;
        KeyedGuard {
            locks: self,
            key: key.to_string(),
            guard: Some(guard),
        }
    }

    /// Keys currently tracked
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    fn entry(&self, key: &str) -> Arc<Mutex<()>> {
        // Cloned under the shard lock, so release() sees every waiter
        self.locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn release(&self, key: &str) {
        self.locks
            .remove_if(key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

impl Drop for KeyedGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks.release(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_key_is_exclusive() {
        let locks = KeyedLocks::new();
        let guard = locks.lock("proj-1").await;

        let blocked = tokio::time::timeout(Duration::from_millis(20), locks.lock("proj-1")).await;
        assert!(blocked.is_err());
        let other = tokio::time::timeout(Duration::from_millis(20), locks.lock("proj-2")).await;
        assert!(other.is_ok());
        drop(other);

        drop(guard);
        let again = tokio::time::timeout(Duration::from_millis(20), locks.lock("proj-1")).await;
        assert!(again.is_ok());
    }

    #[tokio::test]
    async fn released_keys_are_evicted() {
        let locks = KeyedLocks::new();
        for n in 0..100 {
            let _guard = locks.lock(&format!("proj-{}", n)).await;
        }
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn entry_survives_while_contended() {
        let locks = Arc::new(KeyedLocks::new());
        let guard = locks.lock("proj-1").await;

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.lock("proj-1").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        drop(guard);
        assert_eq!(locks.len(), 1);
        waiter.await.unwrap();
        assert!(locks.is_empty());
    }
}
