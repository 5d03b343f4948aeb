//! Migration planning for ring topology changes.
//!
//! Every bucket owns the half-open arc `(predecessor score, own score]` of the
//! key space. When a virtual node joins, the keys of that arc move from the
//! successor bucket's head to the newcomer; when one leaves, its arc merges
//! into a successor. The planner enumerates exactly those keys and rewrites
//! the ownership accounting in the store before the physical transfer runs.

use crate::error::{Result, RingError};
use crate::hasher::{next_position, prev_position, RingHasher, RING_SIZE};
use crate::store::RingStore;
use crate::vnode::real_node_id;
use std::collections::HashSet;
use std::sync::Arc;

/// One data transfer: `keys` leave `from` and land on `to`.
#[derive(Debug, Clone)]
pub struct MigrationPlan {
    pub from: String,
    pub to: String,
    pub keys: HashSet<String>,
}

impl MigrationPlan {
    fn empty() -> Self {
        Self {
            from: String::new(),
            to: String::new(),
            keys: HashSet::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// The arc `(last, cur]` normalized for wrap-around comparison.
///
/// A naive `last < p <= cur` test is wrong whenever the arc crosses zero.
/// Shifting the wrapped segment down by `RING_SIZE` restores a contiguous
/// interval: pattern A (`last > cur`) crosses zero between `last` and `cur`,
/// pattern B (`next < cur`) between `cur` and `next`.
#[derive(Debug, Clone, Copy)]
struct ArcBounds {
    last: i64,
    cur: i64,
    pattern_a: bool,
    pattern_b: bool,
}

impl ArcBounds {
    /// Arc of a bucket at `cur` sitting between `last` and `next`.
    fn between(last: i64, cur: i64, next: i64) -> Self {
        let pattern_a = last > cur;
        let pattern_b = next < cur;
        let mut bounds = Self {
            last,
            cur,
            pattern_a,
            pattern_b,
        };
        if pattern_a {
            bounds.last -= RING_SIZE;
        }
        if pattern_b {
            bounds.cur -= RING_SIZE;
            bounds.last -= RING_SIZE;
        }
        bounds
    }

    /// Arc of a bucket at `cur` with predecessor `last`, successor unknown.
    fn before(last: i64, cur: i64) -> Self {
        let pattern_a = last > cur;
        let mut bounds = Self {
            last,
            cur,
            pattern_a,
            pattern_b: false,
        };
        if pattern_a {
            bounds.last -= RING_SIZE;
        }
        bounds
    }

    fn contains(&self, position: i64) -> bool {
        let mut position = position;
        if self.pattern_a && position > self.last + RING_SIZE {
            position -= RING_SIZE;
        }
        if self.pattern_b {
            position -= RING_SIZE;
        }
        self.last < position && position <= self.cur
    }
}

/// Computes the ownership transfers a virtual-node event requires.
pub struct MigrationPlanner {
    store: Arc<dyn RingStore>,
    hasher: Arc<dyn RingHasher>,
}

impl MigrationPlanner {
    pub fn new(store: Arc<dyn RingStore>, hasher: Arc<dyn RingHasher>) -> Self {
        Self { store, hasher }
    }

    /// Plans the transfer into a freshly inserted virtual node at `score`.
    ///
    /// Precondition: the bucket at `score` already contains the newcomer. A
    /// newcomer appended behind an existing head owns nothing, and a ring
    /// with no other bucket has nothing to hand over.
    pub async fn migrate_in(&self, score: i64, node_id: &str) -> Result<MigrationPlan> {
        let bucket = self.store.bucket(score).await?;
        if bucket.len() > 1 {
            return Ok(MigrationPlan::empty());
        }

        let last = match self.store.floor(prev_position(score)).await? {
            Some(last) if last != score => last,
            _ => return Ok(MigrationPlan::empty()),
        };
        let next = match self.store.ceiling(next_position(score)).await? {
            Some(next) if next != score => next,
            _ => return Ok(MigrationPlan::empty()),
        };

        let arc = ArcBounds::between(last, score, next);

        let next_bucket = self.store.bucket(next).await?;
        let donor = match next_bucket.first() {
            Some(head) => real_node_id(head).to_string(),
            None => return Ok(MigrationPlan::empty()),
        };

        let candidates = self.store.data_keys(&donor).await?;
        let keys: HashSet<String> = candidates
            .into_iter()
            .filter(|key| arc.contains(self.hasher.position(key)))
            .collect();

        if !keys.is_empty() {
            self.store.remove_data_keys(&donor, &keys).await?;
            self.store.add_data_keys(node_id, &keys).await?;
            tracing::debug!(
                from = %donor,
                to = %node_id,
                moved = keys.len(),
                score,
                "planned inbound migration"
            );
        }

        Ok(MigrationPlan {
            from: donor,
            to: node_id.to_string(),
            keys,
        })
    }

    /// Plans the transfer out of a departing virtual node at `score`.
    ///
    /// Precondition: the victim's replica entry is already deleted, the bucket
    /// at `score` is not yet removed. Only the bucket head owns keys, so a
    /// non-head victim plans nothing.
    pub async fn migrate_out(&self, score: i64, node_id: &str) -> Result<MigrationPlan> {
        let bucket = self.store.bucket(score).await?;
        let head = match bucket.first() {
            Some(head) => head,
            None => return Ok(MigrationPlan::empty()),
        };
        if real_node_id(head) != node_id {
            return Ok(MigrationPlan::empty());
        }

        let owned = self.store.data_keys(node_id).await?;
        if owned.is_empty() {
            return Ok(MigrationPlan::empty());
        }

        // A predecessor that is the departing score itself means the victim
        // holds the only score on the ring: without a second occupant of the
        // bucket there is nowhere to hand the data over.
        let predecessor = self
            .store
            .floor(prev_position(score))
            .await?
            .filter(|found| *found != score);
        if predecessor.is_none() && bucket.len() == 1 {
            return Err(RingError::NoOtherNode);
        }

        let keys: HashSet<String> = match predecessor {
            // Sole score, standby occupants present: the whole set moves.
            None => owned,
            Some(last) => {
                let arc = ArcBounds::before(last, score);
                owned
                    .into_iter()
                    .filter(|key| arc.contains(self.hasher.position(key)))
                    .collect()
            }
        };

        let to = if bucket.len() > 1 {
            real_node_id(&bucket[1]).to_string()
        } else {
            match self.valid_next_node(score, node_id).await? {
                Some(successor) => successor,
                None => return Err(RingError::NoOtherNode),
            }
        };

        if !keys.is_empty() {
            self.store.remove_data_keys(node_id, &keys).await?;
            self.store.add_data_keys(&to, &keys).await?;
            tracing::debug!(
                from = %node_id,
                to = %to,
                moved = keys.len(),
                score,
                "planned outbound migration"
            );
        }

        Ok(MigrationPlan {
            from: node_id.to_string(),
            to,
            keys,
        })
    }

    /// Walks clockwise from `score` to the first bucket whose owner is not
    /// `victim`. A non-head occupant of a victim-headed bucket also
    /// qualifies. Returns `None` once the walk revisits a score, which means
    /// the ring holds nothing but the victim's own virtual nodes.
    async fn valid_next_node(&self, score: i64, victim: &str) -> Result<Option<String>> {
        let mut visited: HashSet<i64> = HashSet::new();
        let mut current = score;

        loop {
            let next = match self.store.ceiling(next_position(current)).await? {
                Some(next) => next,
                None => return Ok(None),
            };
            if visited.contains(&next) {
                return Ok(None);
            }

            let bucket = self.store.bucket(next).await?;
            let head = match bucket.first() {
                Some(head) => head,
                None => {
                    return Err(RingError::Corrupted(format!(
                        "empty bucket at score {}",
                        next
                    )))
                }
            };

            if real_node_id(head) != victim {
                return Ok(Some(real_node_id(head).to_string()));
            }
            if bucket.len() > 1 {
                return Ok(Some(real_node_id(&bucket[1]).to_string()));
            }

            visited.insert(current);
            current = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryRingStore;
    use std::collections::HashMap;

    /// Test hasher with hand-placed positions.
    struct PinnedHasher {
        positions: HashMap<String, i64>,
    }

    impl PinnedHasher {
        fn new(pins: &[(&str, i64)]) -> Self {
            Self {
                positions: pins
                    .iter()
                    .map(|(key, position)| (key.to_string(), *position))
                    .collect(),
            }
        }
    }

    impl RingHasher for PinnedHasher {
        fn position(&self, raw: &str) -> i64 {
            self.positions
                .get(raw)
                .copied()
                .unwrap_or_else(|| panic!("no pinned position for {}", raw))
        }
    }

    fn keys(items: &[&str]) -> HashSet<String> {
        items.iter().map(|item| item.to_string()).collect()
    }

    async fn planner_with(
        vnodes: &[(i64, &str)],
        owned: &[(&str, &[&str])],
        pins: &[(&str, i64)],
    ) -> (Arc<MemoryRingStore>, MigrationPlanner) {
        let store = Arc::new(MemoryRingStore::new());
        for (score, raw_key) in vnodes {
            store.add_virtual_node(*score, raw_key).await.unwrap();
        }
        for (node_id, data) in owned {
            store.add_data_keys(node_id, &keys(data)).await.unwrap();
        }
        let planner = MigrationPlanner::new(
            Arc::clone(&store) as Arc<dyn RingStore>,
            Arc::new(PinnedHasher::new(pins)),
        );
        (store, planner)
    }

    #[test]
    fn arc_containment_without_wrap() {
        let arc = ArcBounds::between(100, 150, 200);
        assert!(!arc.contains(100));
        assert!(arc.contains(101));
        assert!(arc.contains(150));
        assert!(!arc.contains(151));
        assert!(!arc.contains(RING_SIZE - 1));
    }

    #[test]
    fn arc_containment_pattern_a_crosses_zero_before_cur() {
        // last near the top of the ring, cur just past the seam.
        let arc = ArcBounds::between(RING_SIZE - 10, 5, 1000);
        assert!(arc.contains(RING_SIZE - 9));
        assert!(arc.contains(RING_SIZE - 1));
        assert!(arc.contains(0));
        assert!(arc.contains(5));
        assert!(!arc.contains(6));
        assert!(!arc.contains(RING_SIZE - 10));
        assert!(!arc.contains(RING_SIZE - 20));
    }

    #[test]
    fn arc_containment_pattern_b_crosses_zero_after_cur() {
        // cur near the top of the ring, successor already wrapped.
        let arc = ArcBounds::between(10, RING_SIZE - 5, 10);
        assert!(arc.contains(11));
        assert!(arc.contains(500));
        assert!(arc.contains(RING_SIZE - 5));
        assert!(!arc.contains(RING_SIZE - 4));
        assert!(!arc.contains(10));
        assert!(!arc.contains(7));
    }

    #[tokio::test]
    async fn migrate_in_moves_the_arc_from_the_successor() {
        let (store, planner) = planner_with(
            &[(100, "a_0"), (200, "a_1"), (150, "b_0")],
            &[("a", &["k1", "k2"])],
            &[("k1", 120), ("k2", 180)],
        )
        .await;

        let plan = planner.migrate_in(150, "b").await.unwrap();
        assert_eq!(plan.from, "a");
        assert_eq!(plan.to, "b");
        assert_eq!(plan.keys, keys(&["k1"]));
        assert_eq!(store.data_keys("a").await.unwrap(), keys(&["k2"]));
        assert_eq!(store.data_keys("b").await.unwrap(), keys(&["k1"]));
    }

    #[tokio::test]
    async fn migrate_in_pattern_a_claims_the_wrapped_segment() {
        let (store, planner) = planner_with(
            &[(RING_SIZE - 10, "a_0"), (5, "b_0")],
            &[("a", &["k1", "k2", "k3", "k4", "k5"])],
            &[
                ("k1", RING_SIZE - 3),
                ("k2", RING_SIZE - 20),
                ("k3", 2),
                ("k4", 5),
                ("k5", 6),
            ],
        )
        .await;

        let plan = planner.migrate_in(5, "b").await.unwrap();
        assert_eq!(plan.keys, keys(&["k1", "k3", "k4"]));
        assert_eq!(store.data_keys("a").await.unwrap(), keys(&["k2", "k5"]));
        assert_eq!(store.data_keys("b").await.unwrap(), keys(&["k1", "k3", "k4"]));
    }

    #[tokio::test]
    async fn migrate_in_pattern_b_keeps_the_comparison_interval_contiguous() {
        let (store, planner) = planner_with(
            &[(10, "a_0"), (RING_SIZE - 5, "b_0")],
            &[("a", &["k1", "k2", "k3", "k4"])],
            &[
                ("k1", 500),
                ("k2", RING_SIZE - 2),
                ("k3", 7),
                ("k4", RING_SIZE - 5),
            ],
        )
        .await;

        let plan = planner.migrate_in(RING_SIZE - 5, "b").await.unwrap();
        assert_eq!(plan.keys, keys(&["k1", "k4"]));
        assert_eq!(store.data_keys("a").await.unwrap(), keys(&["k2", "k3"]));
        assert_eq!(store.data_keys("b").await.unwrap(), keys(&["k1", "k4"]));
    }

    #[tokio::test]
    async fn migrate_in_appended_collision_owns_nothing() {
        let (store, planner) = planner_with(
            &[(100, "a_0"), (300, "a_1")],
            &[("a", &["k1"])],
            &[("k1", 50)],
        )
        .await;
        store.add_virtual_node(100, "b_0").await.unwrap();

        let plan = planner.migrate_in(100, "b").await.unwrap();
        assert!(plan.is_empty());
        assert_eq!(store.data_keys("a").await.unwrap(), keys(&["k1"]));
        assert!(store.data_keys("b").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn migrate_in_on_a_lonely_ring_plans_nothing() {
        let (_, planner) = planner_with(&[(100, "a_0")], &[], &[]).await;
        let plan = planner.migrate_in(100, "a").await.unwrap();
        assert!(plan.is_empty());
    }

    #[tokio::test]
    async fn migrate_out_hands_the_arc_to_the_ring_successor() {
        let (store, planner) = planner_with(
            &[(100, "a_0"), (200, "b_0")],
            &[("b", &["k1", "k2", "k3"])],
            &[("k1", 150), ("k2", 180), ("k3", 50)],
        )
        .await;

        let plan = planner.migrate_out(200, "b").await.unwrap();
        assert_eq!(plan.from, "b");
        assert_eq!(plan.to, "a");
        assert_eq!(plan.keys, keys(&["k1", "k2"]));
        assert_eq!(store.data_keys("a").await.unwrap(), keys(&["k1", "k2"]));
        assert_eq!(store.data_keys("b").await.unwrap(), keys(&["k3"]));
    }

    #[tokio::test]
    async fn migrate_out_pattern_a_releases_the_wrapped_arc() {
        let (store, planner) = planner_with(
            &[(5, "b_0"), (RING_SIZE - 10, "a_0")],
            &[("b", &["k1", "k2", "k3"])],
            &[("k1", 2), ("k2", RING_SIZE - 3), ("k3", 100)],
        )
        .await;

        let plan = planner.migrate_out(5, "b").await.unwrap();
        assert_eq!(plan.to, "a");
        assert_eq!(plan.keys, keys(&["k1", "k2"]));
        assert_eq!(store.data_keys("b").await.unwrap(), keys(&["k3"]));
    }

    #[tokio::test]
    async fn migrate_out_sole_score_with_standby_hands_over_everything() {
        let (store, planner) = planner_with(
            &[(100, "b_0")],
            &[("b", &["k1", "k2"])],
            &[],
        )
        .await;
        store.add_virtual_node(100, "a_5").await.unwrap();

        let plan = planner.migrate_out(100, "b").await.unwrap();
        assert_eq!(plan.to, "a");
        assert_eq!(plan.keys, keys(&["k1", "k2"]));
        assert!(store.data_keys("b").await.unwrap().is_empty());
        assert_eq!(store.data_keys("a").await.unwrap(), keys(&["k1", "k2"]));
    }

    #[tokio::test]
    async fn migrate_out_of_the_last_node_fails() {
        let (_, planner) = planner_with(&[(100, "b_0")], &[("b", &["k1"])], &[]).await;
        assert!(matches!(
            planner.migrate_out(100, "b").await,
            Err(RingError::NoOtherNode)
        ));
    }

    #[tokio::test]
    async fn migrate_out_skips_a_non_head_victim() {
        let (store, planner) = planner_with(
            &[(100, "a_0"), (300, "c_0")],
            &[("a", &["k1"]), ("b", &["k2"])],
            &[],
        )
        .await;
        store.add_virtual_node(100, "b_0").await.unwrap();

        let plan = planner.migrate_out(100, "b").await.unwrap();
        assert!(plan.is_empty());
        assert_eq!(store.data_keys("b").await.unwrap(), keys(&["k2"]));
    }

    #[tokio::test]
    async fn successor_walk_skips_the_victims_own_buckets() {
        let (_, planner) = planner_with(
            &[(10, "b_0"), (20, "b_1"), (30, "a_0")],
            &[("b", &["k1"])],
            &[("k1", 8)],
        )
        .await;

        let plan = planner.migrate_out(10, "b").await.unwrap();
        assert_eq!(plan.to, "a");
        assert_eq!(plan.keys, keys(&["k1"]));
    }

    #[tokio::test]
    async fn successor_walk_terminates_when_only_the_victim_remains() {
        let (_, planner) = planner_with(
            &[(10, "b_0"), (20, "b_1")],
            &[("b", &["k1"])],
            &[("k1", 8)],
        )
        .await;

        assert!(matches!(
            planner.migrate_out(10, "b").await,
            Err(RingError::NoOtherNode)
        ));
    }
}
