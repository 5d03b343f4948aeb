//! Router core: node registration, removal, and key resolution.
//!
//! Every public operation runs as one cluster-wide critical section: the ring
//! lock is taken up front and released on every exit path. Migration
//! callbacks run only after all store writes of the operation are staged, and
//! the batch is joined before the lock is dropped.

use crate::config::RouterOptions;
use crate::error::{Result, RingError};
use crate::hasher::RingHasher;
use crate::migrator::Migrator;
use crate::planner::{MigrationPlan, MigrationPlanner};
use crate::store::RingStore;
use crate::vnode::{raw_node_key, real_node_id};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::task::JoinSet;

/// Replica batches at or above this size get a lock-TTL warning: there is no
/// automatic lock renewal, so oversized batches risk outliving the lock.
const LOCK_BATCH_WARN_THRESHOLD: usize = 1000;

/// Consistent-hash router over a shared ring store.
pub struct HashRouter {
    store: Arc<dyn RingStore>,
    hasher: Arc<dyn RingHasher>,
    migrator: Option<Arc<dyn Migrator>>,
    planner: MigrationPlanner,
    opts: RouterOptions,
}

impl HashRouter {
    pub fn new(
        store: Arc<dyn RingStore>,
        hasher: Arc<dyn RingHasher>,
        migrator: Option<Arc<dyn Migrator>>,
        mut opts: RouterOptions,
    ) -> Self {
        opts.repair();
        let planner = MigrationPlanner::new(Arc::clone(&store), Arc::clone(&hasher));
        Self {
            store,
            hasher,
            migrator,
            planner,
            opts,
        }
    }

    /// Registers `node_id` and gives it `clamp(weight, 1, 10) * replica_scale`
    /// virtual nodes, migrating the data keys each new virtual node claims.
    pub async fn add_node(&self, node_id: &str, weight: usize) -> Result<()> {
        self.store.lock(self.opts.lock_expire_seconds).await?;
        let outcome = self.add_node_locked(node_id, weight).await;
        self.release_lock().await;
        outcome
    }

    /// Unregisters `node_id`, migrating the data keys of every virtual node
    /// it headed to the ring successors.
    pub async fn remove_node(&self, node_id: &str) -> Result<()> {
        self.store.lock(self.opts.lock_expire_seconds).await?;
        let outcome = self.remove_node_locked(node_id).await;
        self.release_lock().await;
        outcome
    }

    /// Resolves `data_key` to the real node owning its arc and records the
    /// key in that node's ownership accounting.
    pub async fn get_node(&self, data_key: &str) -> Result<String> {
        self.store.lock(self.opts.lock_expire_seconds).await?;
        let outcome = self.get_node_locked(data_key).await;
        self.release_lock().await;
        outcome
    }

    async fn add_node_locked(&self, node_id: &str, weight: usize) -> Result<()> {
        let nodes = self.store.replica_counts().await?;
        if nodes.contains_key(node_id) {
            return Err(RingError::DuplicateNode(node_id.to_string()));
        }

        let replicas = weight.clamp(1, 10) * self.opts.replica_scale;
        if replicas >= LOCK_BATCH_WARN_THRESHOLD {
            tracing::warn!(
                node = %node_id,
                replicas,
                ttl_seconds = self.opts.lock_expire_seconds,
                "large replica batch under a fixed-TTL ring lock"
            );
        }

        self.store.set_replica_count(node_id, replicas).await?;

        let mut plans = Vec::new();
        for index in 0..replicas {
            let raw_key = raw_node_key(node_id, index);
            let score = self.hasher.position(&raw_key);
            self.store.add_virtual_node(score, &raw_key).await?;

            if self.migrator.is_some() {
                let plan = self.planner.migrate_in(score, node_id).await?;
                if !plan.is_empty() {
                    plans.push(plan);
                }
            }
        }

        tracing::info!(node = %node_id, replicas, migrations = plans.len(), "node added");
        self.run_migrations(plans).await;
        Ok(())
    }

    async fn remove_node_locked(&self, node_id: &str) -> Result<()> {
        let nodes = self.store.replica_counts().await?;
        let replicas = match nodes.get(node_id) {
            Some(replicas) => *replicas,
            None => return Err(RingError::UnknownNode(node_id.to_string())),
        };

        self.store.delete_replica_count(node_id).await?;

        let mut plans = Vec::new();
        for index in 0..replicas {
            let raw_key = raw_node_key(node_id, index);
            let score = self.hasher.position(&raw_key);

            if self.migrator.is_some() {
                let plan = self.planner.migrate_out(score, node_id).await?;
                if !plan.is_empty() {
                    plans.push(plan);
                }
            }

            self.store.remove_virtual_node(score, &raw_key).await?;
        }

        tracing::info!(node = %node_id, replicas, migrations = plans.len(), "node removed");
        self.run_migrations(plans).await;
        Ok(())
    }

    async fn get_node_locked(&self, data_key: &str) -> Result<String> {
        let position = self.hasher.position(data_key);
        let score = match self.store.ceiling(position).await? {
            Some(score) => score,
            None => return Err(RingError::NoNodeAvailable),
        };

        let bucket = self.store.bucket(score).await?;
        let owner = match bucket.first() {
            Some(head) => real_node_id(head).to_string(),
            None => {
                return Err(RingError::Corrupted(format!(
                    "empty bucket at score {}",
                    score
                )))
            }
        };

        let mut resolved = HashSet::new();
        resolved.insert(data_key.to_string());
        self.store.add_data_keys(&owner, &resolved).await?;

        Ok(owner)
    }

    /// Runs the staged migration callbacks concurrently and joins them all.
    /// A failing or panicking callback is logged and does not stop the rest:
    /// the ownership accounting has already moved, re-running the physical
    /// transfer is the operator's call.
    async fn run_migrations(&self, plans: Vec<MigrationPlan>) {
        let migrator = match &self.migrator {
            Some(migrator) => migrator,
            None => return,
        };

        let mut tasks = JoinSet::new();
        for plan in plans {
            let migrator = Arc::clone(migrator);
            tasks.spawn(async move {
                let MigrationPlan { from, to, keys } = plan;
                let moved = keys.len();
                if let Err(error) = migrator.migrate(keys, &from, &to).await {
                    tracing::error!(%from, %to, moved, "migration callback failed: {}", error);
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(join_error) = joined {
                if join_error.is_panic() {
                    tracing::error!("migration callback panicked: {}", join_error);
                }
            }
        }
    }

    async fn release_lock(&self) {
        if let Err(error) = self.store.unlock().await {
            tracing::warn!("ring unlock failed, waiting for TTL expiry: {}", error);
        }
    }
}
