use crate::error::{Result, RingError};
use crate::store::RingStore;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// In-process ring store.
///
/// Backs the test suite and single-process embeds. The ring lock degenerates
/// to an in-process mutex: the TTL is ignored because an in-process lock
/// cannot outlive its holder.
#[derive(Default)]
pub struct MemoryRingStore {
    state: Mutex<MemoryState>,
    ring_lock: Arc<Mutex<()>>,
    held: Mutex<Option<OwnedMutexGuard<()>>>,
}

#[derive(Default)]
struct MemoryState {
    ring: BTreeMap<i64, Vec<String>>,
    replicas: HashMap<String, usize>,
    owned: HashMap<String, HashSet<String>>,
}

impl MemoryRingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RingStore for MemoryRingStore {
    async fn lock(&self, _ttl_seconds: u64) -> Result<()> {
        let guard = Arc::clone(&self.ring_lock).lock_owned().await;
        *self.held.lock().await = Some(guard);
        Ok(())
    }

    async fn unlock(&self) -> Result<()> {
        self.held.lock().await.take();
        Ok(())
    }

    async fn add_virtual_node(&self, score: i64, raw_key: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let bucket = state.ring.entry(score).or_default();
        if !bucket.iter().any(|key| key == raw_key) {
            bucket.push(raw_key.to_string());
        }
        Ok(())
    }

    async fn remove_virtual_node(&self, score: i64, raw_key: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(bucket) = state.ring.get_mut(&score) {
            bucket.retain(|key| key != raw_key);
            if bucket.is_empty() {
                state.ring.remove(&score);
            }
        }
        Ok(())
    }

    async fn ceiling(&self, score: i64) -> Result<Option<i64>> {
        let state = self.state.lock().await;
        Ok(state
            .ring
            .range(score..)
            .next()
            .or_else(|| state.ring.iter().next())
            .map(|(found, _)| *found))
    }

    async fn floor(&self, score: i64) -> Result<Option<i64>> {
        let state = self.state.lock().await;
        Ok(state
            .ring
            .range(..=score)
            .next_back()
            .or_else(|| state.ring.iter().next_back())
            .map(|(found, _)| *found))
    }

    async fn bucket(&self, score: i64) -> Result<Vec<String>> {
        let state = self.state.lock().await;
        state
            .ring
            .get(&score)
            .cloned()
            .ok_or_else(|| RingError::Corrupted(format!("no bucket at score {}", score)))
    }

    async fn replica_counts(&self) -> Result<HashMap<String, usize>> {
        let state = self.state.lock().await;
        Ok(state.replicas.clone())
    }

    async fn set_replica_count(&self, node_id: &str, replicas: usize) -> Result<()> {
        let mut state = self.state.lock().await;
        state.replicas.insert(node_id.to_string(), replicas);
        Ok(())
    }

    async fn delete_replica_count(&self, node_id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.replicas.remove(node_id);
        Ok(())
    }

    async fn data_keys(&self, node_id: &str) -> Result<HashSet<String>> {
        let state = self.state.lock().await;
        Ok(state.owned.get(node_id).cloned().unwrap_or_default())
    }

    async fn add_data_keys(&self, node_id: &str, keys: &HashSet<String>) -> Result<()> {
        let mut state = self.state.lock().await;
        state
            .owned
            .entry(node_id.to_string())
            .or_default()
            .extend(keys.iter().cloned());
        Ok(())
    }

    async fn remove_data_keys(&self, node_id: &str, keys: &HashSet<String>) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(owned) = state.owned.get_mut(node_id) {
            for key in keys {
                owned.remove(key);
            }
            if owned.is_empty() {
                state.owned.remove(node_id);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hasher::RING_SIZE;
    use std::time::Duration;

    fn keys(items: &[&str]) -> HashSet<String> {
        items.iter().map(|item| item.to_string()).collect()
    }

    #[tokio::test]
    async fn ceiling_and_floor_wrap_around_the_ring() {
        let store = MemoryRingStore::new();
        assert_eq!(store.ceiling(0).await.unwrap(), None);
        assert_eq!(store.floor(RING_SIZE - 1).await.unwrap(), None);

        for score in [10, 50, 90] {
            store
                .add_virtual_node(score, &format!("n_{}", score))
                .await
                .unwrap();
        }

        assert_eq!(store.ceiling(50).await.unwrap(), Some(50));
        assert_eq!(store.ceiling(51).await.unwrap(), Some(90));
        assert_eq!(store.ceiling(91).await.unwrap(), Some(10));
        assert_eq!(store.floor(50).await.unwrap(), Some(50));
        assert_eq!(store.floor(49).await.unwrap(), Some(10));
        assert_eq!(store.floor(9).await.unwrap(), Some(90));
    }

    #[tokio::test]
    async fn colliding_keys_queue_in_insertion_order() {
        let store = MemoryRingStore::new();
        store.add_virtual_node(7, "a_0").await.unwrap();
        store.add_virtual_node(7, "b_3").await.unwrap();
        store.add_virtual_node(7, "a_0").await.unwrap();

        assert_eq!(store.bucket(7).await.unwrap(), vec!["a_0", "b_3"]);

        store.remove_virtual_node(7, "a_0").await.unwrap();
        assert_eq!(store.bucket(7).await.unwrap(), vec!["b_3"]);

        store.remove_virtual_node(7, "b_3").await.unwrap();
        assert!(matches!(
            store.bucket(7).await,
            Err(RingError::Corrupted(_))
        ));
        assert_eq!(store.ceiling(0).await.unwrap(), None);
    }

    #[tokio::test]
    async fn ownership_accounting_unions_and_subtracts() {
        let store = MemoryRingStore::new();
        assert!(store.data_keys("a").await.unwrap().is_empty());

        store.add_data_keys("a", &keys(&["k1", "k2"])).await.unwrap();
        store.add_data_keys("a", &keys(&["k2", "k3"])).await.unwrap();
        assert_eq!(store.data_keys("a").await.unwrap(), keys(&["k1", "k2", "k3"]));

        store.remove_data_keys("a", &keys(&["k1", "k3"])).await.unwrap();
        assert_eq!(store.data_keys("a").await.unwrap(), keys(&["k2"]));

        store.remove_data_keys("a", &keys(&["k2"])).await.unwrap();
        assert!(store.data_keys("a").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn lock_is_exclusive_until_released() {
        let store = Arc::new(MemoryRingStore::new());
        store.lock(10).await.unwrap();

        let contender = Arc::clone(&store);
        let waiting = tokio::spawn(async move { contender.lock(10).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiting.is_finished());

        store.unlock().await.unwrap();
        waiting.await.unwrap().unwrap();
    }
}
