use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::backend::BackendAdapter;
use crate::config::NodeConfig;
use crate::metrics::NodeMetrics;

/// Runtime record for one node. Created once at construction (or by an
/// explicit add); the record outlives health transitions so a
/// recovering node keeps its counters and weight.
pub struct CacheNode {
    id: String,
    config: NodeConfig,
    healthy: AtomicBool,
    last_health_check_ms: AtomicU64,
    backend: Arc<dyn BackendAdapter>,
    metrics: Arc<NodeMetrics>,
}

impl CacheNode {
    pub fn new(
        config: NodeConfig,
        backend: Arc<dyn BackendAdapter>,
        metrics: Arc<NodeMetrics>,
    ) -> Self {
        Self {
            id: config.id(),
            config,
            healthy: AtomicBool::new(true),
            last_health_check_ms: AtomicU64::new(0),
            backend,
            metrics,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn weight(&self) -> u32 {
        self.config.weight
    }

    pub fn backend(&self) -> &Arc<dyn BackendAdapter> {
        &self.backend
    }

    pub fn metrics(&self) -> &Arc<NodeMetrics> {
        &self.metrics
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::Relaxed);
    }

    pub fn mark_checked(&self, now_ms: u64) {
        self.last_health_check_ms.store(now_ms, Ordering::Relaxed);
    }

    /// Unix ms of the last completed health check, 0 before the first.
    pub fn last_health_check_ms(&self) -> u64 {
        self.last_health_check_ms.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for CacheNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheNode")
            .field("id", &self.id)
            .field("weight", &self.config.weight)
            .field("healthy", &self.is_healthy())
            .finish()
    }
}

#[derive(Default)]
pub struct NodeRegistry {
    nodes: DashMap<String, Arc<CacheNode>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            nodes: DashMap::new(),
        }
    }

    /// Returns false without replacing when the id is already present.
    pub fn insert(&self, node: Arc<CacheNode>) -> bool {
        match self.nodes.entry(node.id().to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(node);
                true
            }
        }
    }

    pub fn get(&self, node_id: &str) -> Option<Arc<CacheNode>> {
        self.nodes.get(node_id).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, node_id: &str) -> Option<Arc<CacheNode>> {
        self.nodes.remove(node_id).map(|(_, node)| node)
    }

    pub fn all(&self) -> Vec<Arc<CacheNode>> {
        self.nodes.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn healthy_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|entry| entry.value().is_healthy())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryAdapter;

    fn node(host: &str) -> Arc<CacheNode> {
        Arc::new(CacheNode::new(
            NodeConfig::new(host, 6379),
            Arc::new(MemoryAdapter::new()),
            Arc::new(NodeMetrics::default()),
        ))
    }

    #[test]
    fn test_node_starts_healthy_and_unchecked() {
        let node = node("10.0.0.1");
        assert!(node.is_healthy());
        assert_eq!(node.last_health_check_ms(), 0);

        node.set_healthy(false);
        assert!(!node.is_healthy());
        node.mark_checked(1_234);
        assert_eq!(node.last_health_check_ms(), 1_234);
    }

    #[test]
    fn test_registry_insert_is_first_write_wins() {
        let registry = NodeRegistry::new();
        assert!(registry.insert(node("a")));
        assert!(!registry.insert(node("a")));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_registry_lookup_and_removal() {
        let registry = NodeRegistry::new();
        registry.insert(node("a"));
        registry.insert(node("b"));

        assert_eq!(registry.get("a:6379").map(|n| n.id().to_string()), Some("a:6379".into()));
        assert!(registry.get("missing:1").is_none());

        let removed = registry.remove("a:6379");
        assert!(removed.is_some());
        assert_eq!(registry.len(), 1);
        assert!(registry.get("a:6379").is_none());
    }

    #[test]
    fn test_healthy_count_tracks_flags() {
        let registry = NodeRegistry::new();
        let a = node("a");
        let b = node("b");
        registry.insert(a.clone());
        registry.insert(b);
        assert_eq!(registry.healthy_count(), 2);

        a.set_healthy(false);
        assert_eq!(registry.healthy_count(), 1);
    }
}
