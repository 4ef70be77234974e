//! Keyed async locks: one mutex per channel address, created on demand and
//! dropped once nobody holds or waits for it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockMap = Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>;

#[derive(Default, Clone)]
pub(crate) struct AddressLocks {
    inner: LockMap,
}

/// Held while an event for one address is routed.
pub(crate) struct AddressGuard {
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
    map: LockMap,
}

impl AddressLocks {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    pub(crate) async fn acquire(&self, key: &str) -> AddressGuard {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(|p| p.into_inner());
            map.entry(key.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        let guard = lock.lock_owned().await;
        AddressGuard {
            key: key.to_string(),
            guard: Some(guard),
            map: self.inner.clone(),
        }
    }

    /// Number of live entries.
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}

impl Drop for AddressGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut map = self.map.lock().unwrap_or_else(|p| p.into_inner());
        // Only the map's own reference left: no holder, no waiter.
        if map
            .get(&self.key)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            map.remove(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_key_is_serialized() {
        let locks = AddressLocks::new();
        let first = locks.acquire("42").await;

        let locks2 = locks.clone();
        let waiter = tokio::spawn(async move {
            let _g = locks2.acquire("42").await;
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(first);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn test_different_keys_run_in_parallel() {
        let locks = AddressLocks::new();
        let _a = locks.acquire("1").await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.acquire("2")).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_entries_are_pruned_after_release() {
        let locks = AddressLocks::new();
        {
            let _g = locks.acquire("1").await;
            assert_eq!(locks.len(), 1);
        }
        assert_eq!(locks.len(), 0);
    }
}
