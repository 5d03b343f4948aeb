//! Virtual-node key derivation.
//!
//! Each real node occupies the ring through `replica_count` virtual nodes,
//! identified by the raw key `"<node_id>_<replica_index>"`. The add and remove
//! paths must derive raw keys through the same function, or removal recomputes
//! different scores than insertion and strands buckets in the ring.

/// Raw key of the `replica_index`-th virtual node of `node_id`.
pub fn raw_node_key(node_id: &str, replica_index: usize) -> String {
    format!("{}_{}", node_id, replica_index)
}

/// Real node id behind a raw virtual-node key: strips the trailing
/// `_<replica_index>` suffix. Node ids may themselves contain underscores;
/// only the last segment is the replica index.
pub fn real_node_id(raw_key: &str) -> &str {
    match raw_key.rfind('_') {
        Some(split) => &raw_key[..split],
        None => raw_key,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_round_trips() {
        assert_eq!(raw_node_key("cache-7", 12), "cache-7_12");
        assert_eq!(real_node_id("cache-7_12"), "cache-7");
    }

    #[test]
    fn node_ids_with_underscores_survive() {
        let raw = raw_node_key("node_a", 0);
        assert_eq!(raw, "node_a_0");
        assert_eq!(real_node_id(&raw), "node_a");
    }

    #[test]
    fn derivation_is_injective_across_nodes() {
        assert_ne!(raw_node_key("n_1", 0), raw_node_key("n", 10));
    }
}
