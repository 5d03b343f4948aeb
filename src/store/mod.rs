//! Persisted ring state and the ring-wide lock.
//!
//! Provides a trait-based abstraction over backends (Redis is the reference,
//! an in-process backend serves tests and single-process embeds).

pub mod factory;
pub mod memory;
pub mod redis;

use crate::error::Result;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};

pub use factory::RingStoreBuilder;

/// Backing store for one hash ring.
///
/// Buckets are ordered-set elements: a unique score in `[0, RING_SIZE)` whose
/// payload is the insertion-ordered list of raw virtual-node keys colliding at
/// that score. The head of the list owns the bucket's arc. The store also
/// keeps the replica map (real node id to virtual-node count), the per-node
/// ownership accounting, and the ring-wide lock that serializes every
/// operation on the ring.
///
/// Any method may fail with a transport error; callers propagate it without
/// local retries and re-issue the whole operation under a fresh lock.
#[async_trait]
pub trait RingStore: Send + Sync {
    /// Block until the ring lock is acquired. The lock auto-releases after
    /// `ttl_seconds` even if the holder crashes. Cancel by dropping the future.
    async fn lock(&self, ttl_seconds: u64) -> Result<()>;

    /// Release the ring lock if this store instance is the current holder.
    async fn unlock(&self) -> Result<()>;

    /// Append `raw_key` to the bucket at `score`, creating the bucket if
    /// absent. Re-adding a key already present is a no-op.
    async fn add_virtual_node(&self, score: i64, raw_key: &str) -> Result<()>;

    /// Remove `raw_key` from the bucket at `score`; the bucket is dropped
    /// when its payload empties.
    async fn remove_virtual_node(&self, score: i64, raw_key: &str) -> Result<()>;

    /// Smallest bucket score >= `score`, wrapping to the smallest overall.
    /// `None` iff the ring is empty.
    async fn ceiling(&self, score: i64) -> Result<Option<i64>>;

    /// Largest bucket score <= `score`, wrapping to the largest overall.
    /// `None` iff the ring is empty.
    async fn floor(&self, score: i64) -> Result<Option<i64>>;

    /// Ordered raw-key list of the bucket at `score`; error if absent.
    async fn bucket(&self, score: i64) -> Result<Vec<String>>;

    /// Snapshot of the replica map.
    async fn replica_counts(&self) -> Result<HashMap<String, usize>>;

    /// Register `node_id` with its virtual-node count.
    async fn set_replica_count(&self, node_id: &str, replicas: usize) -> Result<()>;

    /// Drop `node_id` from the replica map.
    async fn delete_replica_count(&self, node_id: &str) -> Result<()>;

    /// Snapshot of the data keys accounted to `node_id`, empty if none.
    async fn data_keys(&self, node_id: &str) -> Result<HashSet<String>>;

    /// Union `keys` into the ownership set of `node_id`.
    async fn add_data_keys(&self, node_id: &str, keys: &HashSet<String>) -> Result<()>;

    /// Subtract `keys` from the ownership set of `node_id`; the mapping is
    /// deleted entirely once empty.
    async fn remove_data_keys(&self, node_id: &str, keys: &HashSet<String>) -> Result<()>;
}

/// Type alias for dynamic ring stores.
pub type DynRingStore = dyn RingStore;
