//! Per-keyset deterministic-derivation counter storage (NUT-13). Kept
//! separate from `ProofStorage` so persistence backends can durably commit
//! counter advances ahead of the proofs they produced (spec §4.3 contract:
//! the counter must never be reused after a crash).
// ----- standard library imports
use std::collections::HashMap;
use std::sync::Mutex;
// ----- extra library imports
use async_trait::async_trait;
// ----- local imports
use crate::{error::Result, types::KeysetId};

// ----- end imports

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KeysetCounterStorage: Send + Sync {
    /// Current counter for `keyset_id`, defaulting to 0.
    async fn counter(&self, keyset_id: KeysetId) -> Result<u32>;

    /// Atomically advances the counter by `n` and returns the starting
    /// index the caller should derive from (i.e. the pre-advance value).
    async fn reserve(&self, keyset_id: KeysetId, n: u32) -> Result<u32>;

    /// Advances the counter to at least `min_value`, used by `restore()`
    /// to avoid colliding with gaps left by aborted operations.
    async fn advance_to_at_least(&self, keyset_id: KeysetId, min_value: u32) -> Result<()>;
}

#[derive(Default)]
pub struct InMemoryCounterStore {
    counters: Mutex<HashMap<KeysetId, u32>>,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeysetCounterStorage for InMemoryCounterStore {
    async fn counter(&self, keyset_id: KeysetId) -> Result<u32> {
        let counters = self.counters.lock().expect("counter store mutex poisoned");
        Ok(*counters.get(&keyset_id).unwrap_or(&0))
    }

    async fn reserve(&self, keyset_id: KeysetId, n: u32) -> Result<u32> {
        let mut counters = self.counters.lock().expect("counter store mutex poisoned");
        let start = *counters.get(&keyset_id).unwrap_or(&0);
        counters.insert(keyset_id, start + n);
        Ok(start)
    }

    async fn advance_to_at_least(&self, keyset_id: KeysetId, min_value: u32) -> Result<()> {
        let mut counters = self.counters.lock().expect("counter store mutex poisoned");
        let current = *counters.get(&keyset_id).unwrap_or(&0);
        if current < min_value {
            counters.insert(keyset_id, min_value);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reserve_advances_counter_monotonically() {
        let store = InMemoryCounterStore::new();
        let kid = KeysetId::from_hex("00ad268c4d1f5826").unwrap();
        let start = store.reserve(kid, 3).await.unwrap();
        assert_eq!(start, 0);
        assert_eq!(store.counter(kid).await.unwrap(), 3);
        let start2 = store.reserve(kid, 2).await.unwrap();
        assert_eq!(start2, 3);
        assert_eq!(store.counter(kid).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn advance_to_at_least_never_decreases() {
        let store = InMemoryCounterStore::new();
        let kid = KeysetId::from_hex("00ad268c4d1f5826").unwrap();
        store.reserve(kid, 10).await.unwrap();
        store.advance_to_at_least(kid, 5).await.unwrap();
        assert_eq!(store.counter(kid).await.unwrap(), 10);
        store.advance_to_at_least(kid, 20).await.unwrap();
        assert_eq!(store.counter(kid).await.unwrap(), 20);
    }
}
