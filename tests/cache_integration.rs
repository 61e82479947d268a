use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use ringcache::{
    BackendAdapter, BackendFactory, BackendKind, CacheConfig, CacheEntry, DistributedCache,
    MemoryAdapter, NodeConfig,
};

fn single_node_config() -> CacheConfig {
    CacheConfig {
        nodes: vec![NodeConfig::new("local", 7000)],
        ..Default::default()
    }
}

#[tokio::test]
async fn test_basic_operations() {
    let cache = DistributedCache::new(single_node_config()).await.unwrap();

    assert!(cache.set("key1", "value1", None).await);
    assert_eq!(
        cache.get::<String>("key1").await.as_deref(),
        Some("value1")
    );

    assert!(cache.delete("key1").await);
    assert_eq!(cache.get::<String>("key1").await, None);
    assert!(!cache.delete("key1").await);
}

#[tokio::test]
async fn test_typed_round_trip() {
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Session {
        user_id: u64,
        token: String,
        scopes: Vec<String>,
    }

    let cache = DistributedCache::new(single_node_config()).await.unwrap();
    let session = Session {
        user_id: 42,
        token: "tok-abc".to_string(),
        scopes: vec!["read".to_string(), "write".to_string()],
    };

    assert!(cache.set("session:42", session.clone(), None).await);
    assert_eq!(cache.get::<Session>("session:42").await, Some(session));
}

#[tokio::test]
async fn test_ttl_expiry() {
    let cache = DistributedCache::new(single_node_config()).await.unwrap();

    assert!(
        cache
            .set("short", "lived", Some(Duration::from_millis(50)))
            .await
    );
    assert_eq!(cache.get::<String>("short").await.as_deref(), Some("lived"));

    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(cache.get::<String>("short").await, None);
}

#[tokio::test]
async fn test_default_ttl_applies_when_none_given() {
    let cache = DistributedCache::builder()
        .node(NodeConfig::new("local", 7000))
        .default_ttl(Duration::from_millis(50))
        .build()
        .await
        .unwrap();

    assert!(cache.set("implicit", 1u32, None).await);
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(cache.get::<u32>("implicit").await, None);
}

#[tokio::test]
async fn test_huge_ttl_round_trip() {
    let cache = DistributedCache::new(single_node_config()).await.unwrap();

    assert!(
        cache
            .set("forever", "value", Some(Duration::from_secs(u64::MAX)))
            .await
    );
    assert_eq!(
        cache.get::<String>("forever").await.as_deref(),
        Some("value")
    );
}

#[tokio::test]
async fn test_clear_removes_everything() {
    let cache = DistributedCache::new(single_node_config()).await.unwrap();

    for i in 0..10 {
        assert!(cache.set(&format!("key_{}", i), i, None).await);
    }
    assert!(cache.clear().await);

    for i in 0..10 {
        assert_eq!(cache.get::<i32>(&format!("key_{}", i)).await, None);
    }
    assert!(cache.metrics().key_distribution.is_empty());
}

#[tokio::test]
async fn test_pattern_invalidation() {
    let cache = DistributedCache::new(single_node_config()).await.unwrap();

    assert!(cache.set("user:1", "alice", None).await);
    assert!(cache.set("user:2", "bob", None).await);
    assert!(cache.set("order:7", "widgets", None).await);

    let invalidated = cache.invalidate_pattern("user:").await;
    assert_eq!(invalidated, 2);

    assert_eq!(cache.get::<String>("user:1").await, None);
    assert_eq!(cache.get::<String>("user:2").await, None);
    assert_eq!(
        cache.get::<String>("order:7").await.as_deref(),
        Some("widgets")
    );
}

#[tokio::test]
async fn test_compression_round_trip() {
    let shared = Arc::new(MemoryAdapter::new());
    let cache = DistributedCache::builder()
        .backend(BackendKind::Custom)
        .backend_factory(Arc::new(SharedBackendFactory {
            adapter: shared.clone(),
        }))
        .node(NodeConfig::new("local", 7000))
        .compression_threshold(100)
        .build()
        .await
        .unwrap();

    let large_value = "A".repeat(500);
    assert!(cache.set("compressed", large_value.clone(), None).await);

    let raw = shared.get("cache:compressed").await.unwrap().unwrap();
    let envelope = CacheEntry::decode(&raw).unwrap();
    assert!(envelope.compressed);
    assert!(envelope.payload.len() < large_value.len());

    assert_eq!(cache.get::<String>("compressed").await, Some(large_value));

    assert!(cache.set("plain", "tiny", None).await);
    let raw = shared.get("cache:plain").await.unwrap().unwrap();
    assert!(!CacheEntry::decode(&raw).unwrap().compressed);
    assert_eq!(cache.get::<String>("plain").await.as_deref(), Some("tiny"));
}

#[tokio::test]
async fn test_multi_megabyte_round_trip() {
    let cache = DistributedCache::new(single_node_config()).await.unwrap();

    let bulk: String = (0..4 * 1024 * 1024 / 16)
        .map(|i| format!("chunk{:010}-", i))
        .collect();
    assert!(cache.set("bulk", bulk.clone(), None).await);
    assert_eq!(
        cache.get::<String>("bulk").await.as_deref(),
        Some(bulk.as_str())
    );
}

#[tokio::test]
async fn test_warmup_populates_cache() {
    let cache = DistributedCache::new(single_node_config()).await.unwrap();

    let entries: Vec<(String, u32)> = (0..25).map(|i| (format!("warm_{}", i), i)).collect();
    let stored = cache.warmup(entries).await;
    assert_eq!(stored, 25);

    for i in 0..25u32 {
        assert_eq!(cache.get::<u32>(&format!("warm_{}", i)).await, Some(i));
    }
}

#[tokio::test]
async fn test_metrics_accounting() {
    let cache = DistributedCache::new(single_node_config()).await.unwrap();

    assert!(cache.set("tracked", "value", None).await);
    assert!(cache.get::<String>("tracked").await.is_some());
    assert!(cache.get::<String>("absent").await.is_none());

    let metrics = cache.metrics();
    assert_eq!(metrics.total_requests, 3);
    assert_eq!(metrics.total_hits, 1);
    assert_eq!(metrics.total_misses, 1);
    assert_eq!(metrics.total_errors, 0);

    let node = metrics.nodes.get("local:7000").unwrap();
    assert_eq!(node.hits, 1);
    assert_eq!(node.misses, 1);
    assert!(node.latency_samples >= 2);
}

#[tokio::test]
async fn test_wrong_type_read_is_a_miss() {
    let cache = DistributedCache::new(single_node_config()).await.unwrap();

    assert!(cache.set("text", "not a number", None).await);
    assert_eq!(cache.get::<u64>("text").await, None);
    assert!(cache.metrics().total_errors >= 1);
}

#[tokio::test]
async fn test_prometheus_exposition() {
    let cache = DistributedCache::new(single_node_config()).await.unwrap();

    cache.set("exported", 1u8, None).await;
    cache.get::<u8>("exported").await;

    let text = cache.export_metrics().unwrap();
    assert!(text.contains("ringcache_operations_total"));
    assert!(text.contains("ringcache_node_operations_total"));
    assert!(text.contains("ringcache_average_latency_ms"));
}

struct SharedBackendFactory {
    adapter: Arc<MemoryAdapter>,
}

impl BackendFactory for SharedBackendFactory {
    fn create(&self, _node: &NodeConfig) -> ringcache::Result<Arc<dyn BackendAdapter>> {
        Ok(self.adapter.clone())
    }
}

#[tokio::test]
async fn test_key_prefix_isolation() {
    let shared = Arc::new(MemoryAdapter::new());

    let cache_a = DistributedCache::builder()
        .backend(BackendKind::Custom)
        .backend_factory(Arc::new(SharedBackendFactory {
            adapter: shared.clone(),
        }))
        .node(NodeConfig::new("shared", 7000))
        .key_prefix("a:")
        .build()
        .await
        .unwrap();
    let cache_b = DistributedCache::builder()
        .backend(BackendKind::Custom)
        .backend_factory(Arc::new(SharedBackendFactory {
            adapter: shared.clone(),
        }))
        .node(NodeConfig::new("shared", 7000))
        .key_prefix("b:")
        .build()
        .await
        .unwrap();

    assert!(cache_a.set("k", "from_a", None).await);
    assert!(cache_b.set("k", "from_b", None).await);

    assert_eq!(cache_a.get::<String>("k").await.as_deref(), Some("from_a"));
    assert_eq!(cache_b.get::<String>("k").await.as_deref(), Some("from_b"));
    assert_eq!(shared.len(), 2);
}

#[tokio::test]
async fn test_concurrent_operations() {
    let cache = Arc::new(
        DistributedCache::builder()
            .nodes([
                NodeConfig::new("a", 7000),
                NodeConfig::new("b", 7000),
                NodeConfig::new("c", 7000),
            ])
            .build()
            .await
            .unwrap(),
    );

    let mut handles = vec![];
    for task_id in 0..8 {
        let cache_clone = Arc::clone(&cache);
        handles.push(tokio::spawn(async move {
            for i in 0..50 {
                let key = format!("task_{}_key_{}", task_id, i);
                let value = format!("task_{}_value_{}", task_id, i);
                assert!(cache_clone.set(&key, value, None).await);
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    for task_id in 0..8 {
        for i in 0..50 {
            let key = format!("task_{}_key_{}", task_id, i);
            let expected = format!("task_{}_value_{}", task_id, i);
            assert_eq!(cache.get::<String>(&key).await, Some(expected));
        }
    }
}

#[tokio::test]
async fn test_runtime_node_management() {
    let cache = DistributedCache::new(single_node_config()).await.unwrap();
    assert_eq!(cache.node_count(), 1);

    cache.add_node(NodeConfig::new("extra", 7001)).unwrap();
    assert_eq!(cache.node_count(), 2);
    assert!(cache.has_node("extra:7001"));

    // Keys keep resolving while membership changes.
    assert!(cache.set("stable", "value", None).await);
    assert!(cache.get::<String>("stable").await.is_some());

    assert!(cache.remove_node("extra:7001"));
    assert!(!cache.has_node("extra:7001"));
    assert_eq!(cache.node_count(), 1);
}
