//! Ringshift - distributed consistent-hash router with migration orchestration
//!
//! Maps opaque data keys onto a dynamically changing set of backend nodes
//! through a consistent-hash ring persisted in a shared store (Redis is the
//! reference backend), and computes the exact set of data-key transfers every
//! topology change requires:
//! - weight-proportional virtual-node allocation
//! - migration planning with correct ring wrap-around handling
//! - a TTL'd ring-wide lock serializing all operations across processes
//! - concurrent, panic-isolated execution of user migration callbacks

pub mod config;
pub mod error;
pub mod hasher;
pub mod migrator;
pub mod planner;
pub mod router;
pub mod store;
pub mod vnode;

pub use config::{RouterConfig, RouterOptions};
pub use error::{Result, RingError};
pub use hasher::{next_position, prev_position, Murmur3Hasher, RingHasher, RING_SIZE};
pub use migrator::Migrator;
pub use planner::{MigrationPlan, MigrationPlanner};
pub use router::HashRouter;
pub use store::memory::MemoryRingStore;
pub use store::redis::RedisRingStore;
pub use store::{DynRingStore, RingStore, RingStoreBuilder};
