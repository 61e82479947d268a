use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::hash::hash64;

/// Immutable ring snapshot. `positions` maps each virtual-node position
/// to its owner; `placements` records, per node, exactly the positions
/// that node occupies so removal never has to scan the ring for
/// ownership.
#[derive(Debug, Clone, Default)]
struct RingState {
    positions: BTreeMap<u64, Arc<str>>,
    placements: HashMap<Arc<str>, Vec<u64>>,
}

/// Consistent-hash ring with virtual nodes.
///
/// Readers clone the current `Arc<RingState>` and search it lock-free.
/// Membership changes serialize on `mutate`, build the complete next
/// state from a snapshot, and publish it with a single pointer swap, so
/// a lookup never observes a node half added or half removed.
pub struct ConsistentHashRing {
    state: RwLock<Arc<RingState>>,
    mutate: Mutex<()>,
    virtual_nodes: u32,
}

impl ConsistentHashRing {
    pub fn new(virtual_nodes_per_node: u32) -> Self {
        Self {
            state: RwLock::new(Arc::new(RingState::default())),
            mutate: Mutex::new(()),
            virtual_nodes: virtual_nodes_per_node.max(1),
        }
    }

    /// Insert a node with `weight * virtual_nodes_per_node` positions at
    /// `hash64("{node_id}:{i}")`. Returns false without touching the
    /// ring when the node is already present, so re-adding never
    /// duplicates positions.
    pub fn add_node(&self, node_id: &str, weight: u32) -> bool {
        let _mutating = self.mutate.lock();
        let current = self.snapshot();
        if current.placements.contains_key(node_id) {
            return false;
        }

        let mut next = (*current).clone();
        let id: Arc<str> = Arc::from(node_id);
        let count = weight.max(1) as u64 * self.virtual_nodes as u64;
        let mut placed = Vec::with_capacity(count as usize);
        for i in 0..count {
            let position = hash64(&format!("{}:{}", node_id, i));
            // A position already owned by another node stays with its
            // owner; the loser is simply not recorded in the index.
            if let std::collections::btree_map::Entry::Vacant(slot) =
                next.positions.entry(position)
            {
                slot.insert(id.clone());
                placed.push(position);
            }
        }
        next.placements.insert(id, placed);
        self.publish(next);
        debug!(node_id, weight, "node added to ring");
        true
    }

    /// Remove a node by deleting exactly the positions recorded for it.
    /// Returns false when the node is not on the ring.
    pub fn remove_node(&self, node_id: &str) -> bool {
        let _mutating = self.mutate.lock();
        let current = self.snapshot();
        let Some(placed) = current.placements.get(node_id) else {
            return false;
        };

        let mut next = (*current).clone();
        for position in placed {
            next.positions.remove(position);
        }
        next.placements.remove(node_id);
        self.publish(next);
        debug!(node_id, "node removed from ring");
        true
    }

    /// Owner of `key`: the node at the smallest position at or after
    /// `hash64(key)`, wrapping to the first position. `None` on an empty
    /// ring.
    pub fn node_for_key(&self, key: &str) -> Option<Arc<str>> {
        let state = self.snapshot();
        if state.positions.is_empty() {
            return None;
        }
        let hash = hash64(key);
        state
            .positions
            .range(hash..)
            .next()
            .or_else(|| state.positions.iter().next())
            .map(|(_, node)| node.clone())
    }

    pub fn contains_node(&self, node_id: &str) -> bool {
        self.snapshot().placements.contains_key(node_id)
    }

    pub fn node_count(&self) -> usize {
        self.snapshot().placements.len()
    }

    pub fn position_count(&self) -> usize {
        self.snapshot().positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().positions.is_empty()
    }

    pub fn node_ids(&self) -> Vec<Arc<str>> {
        self.snapshot().placements.keys().cloned().collect()
    }

    fn snapshot(&self) -> Arc<RingState> {
        self.state.read().clone()
    }

    fn publish(&self, next: RingState) {
        *self.state.write() = Arc::new(next);
    }
}

impl std::fmt::Debug for ConsistentHashRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.snapshot();
        f.debug_struct("ConsistentHashRing")
            .field("nodes", &state.placements.len())
            .field("positions", &state.positions.len())
            .field("virtual_nodes", &self.virtual_nodes)
            .finish()
    }
}
