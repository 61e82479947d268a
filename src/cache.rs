use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::future::join_all;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tracing::{debug, info};

use crate::backend::{resolve_factory, BackendFactory, BackendKind};
use crate::config::{CacheConfig, NodeConfig};
use crate::entry::{now_ms, CacheEntry};
use crate::error::{Error, ErrorContext, ErrorReporter, Result, TracingReporter};
use crate::health::HealthChecker;
use crate::logging::OperationTimer;
use crate::metrics::{DistributedCacheMetrics, MetricsAggregator};
use crate::node::{CacheNode, NodeRegistry};
use crate::ring::ConsistentHashRing;

/// Stored payloads at or above this size are deserialized off the
/// async thread. Writes always encode off-thread since the serialized
/// size is unknown until the value is walked.
const OFFLOAD_THRESHOLD: usize = 16 * 1024;

/// Health-aware cache façade over a consistent-hash ring of backend
/// nodes.
///
/// Construction is the only fallible surface; every cache operation
/// degrades to a miss or a failed write instead of returning an error.
/// Must be created inside a Tokio runtime: connections are opened and
/// health checks run on spawned tasks.
pub struct DistributedCache {
    config: CacheConfig,
    factory: Arc<dyn BackendFactory>,
    ring: Arc<ConsistentHashRing>,
    registry: Arc<NodeRegistry>,
    metrics: Arc<MetricsAggregator>,
    reporter: Arc<dyn ErrorReporter>,
    shutdown: Arc<AtomicBool>,
    health_task: Mutex<Option<JoinHandle<()>>>,
}

impl DistributedCache {
    pub async fn new(config: CacheConfig) -> Result<Self> {
        Self::build_with(config, None, None).await
    }

    pub fn builder() -> CacheBuilder {
        CacheBuilder::new()
    }

    async fn build_with(
        config: CacheConfig,
        factory: Option<Arc<dyn BackendFactory>>,
        reporter: Option<Arc<dyn ErrorReporter>>,
    ) -> Result<Self> {
        config.validate()?;
        let factory = resolve_factory(config.backend, factory)?;
        let reporter: Arc<dyn ErrorReporter> =
            reporter.unwrap_or_else(|| Arc::new(TracingReporter));

        let cache = Self {
            ring: Arc::new(ConsistentHashRing::new(config.virtual_nodes_per_node)),
            registry: Arc::new(NodeRegistry::new()),
            metrics: Arc::new(MetricsAggregator::new(config.key_distribution_capacity)),
            reporter,
            factory,
            shutdown: Arc::new(AtomicBool::new(false)),
            health_task: Mutex::new(None),
            config,
        };

        for node_config in cache.config.nodes.clone() {
            cache.register_node(node_config)?;
        }

        let checker = HealthChecker::new(
            cache.config.health_check_interval,
            cache.config.operation_timeout,
            cache.registry.clone(),
            cache.ring.clone(),
            cache.reporter.clone(),
            cache.shutdown.clone(),
        );
        *cache.health_task.lock() = Some(checker.spawn());

        info!(
            nodes = cache.registry.len(),
            backend = %cache.config.backend,
            "distributed cache ready"
        );
        Ok(cache)
    }

    /// Fetch and deserialize `key`. Any failure along the way (no
    /// healthy owner, backend error, timeout, expired entry, undecodable
    /// payload) comes back as `None`.
    pub async fn get<T>(&self, key: &str) -> Option<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        self.metrics.record_request();
        let full_key = self.full_key(key);
        let _timer = OperationTimer::with_key("get", &full_key);
        let Some(node) = self.route(&full_key) else {
            self.metrics.record_miss(None);
            return None;
        };

        let started = Instant::now();
        match self.with_timeout(node.backend().get(&full_key)).await {
            Ok(Some(raw)) => {
                node.metrics().record_latency(elapsed_ms(started));
                match self.open_entry::<T>(raw).await {
                    Ok(Some(value)) => {
                        self.metrics.record_hit(node.metrics());
                        Some(value)
                    }
                    Ok(None) => {
                        // Lazily expired: drop it in the background and
                        // report a miss now.
                        self.metrics.record_miss(Some(node.metrics()));
                        self.evict_expired(node, full_key);
                        None
                    }
                    Err(err) => {
                        self.reporter.report(&err, "get", Some(key));
                        self.metrics.record_error(Some(node.metrics()));
                        None
                    }
                }
            }
            Ok(None) => {
                node.metrics().record_latency(elapsed_ms(started));
                self.metrics.record_miss(Some(node.metrics()));
                None
            }
            Err(err) => {
                self.reporter.report(&err, "get", Some(key));
                self.metrics.record_error(Some(node.metrics()));
                None
            }
        }
    }

    /// Store `value` under `key` with `ttl` (falling back to the
    /// configured default). Returns false when the write could not be
    /// completed.
    pub async fn set<T>(&self, key: &str, value: T, ttl: Option<Duration>) -> bool
    where
        T: Serialize + Send + 'static,
    {
        self.metrics.record_request();
        let full_key = self.full_key(key);
        let _timer = OperationTimer::with_key("set", &full_key);
        let Some(node) = self.route(&full_key) else {
            return false;
        };

        match self.store(&node, &full_key, value, ttl).await {
            Ok(()) => {
                self.metrics.record_write(&full_key);
                true
            }
            Err(err) => {
                self.reporter.report(&err, "set", Some(key));
                self.metrics.record_error(Some(node.metrics()));
                false
            }
        }
    }

    pub async fn delete(&self, key: &str) -> bool {
        self.metrics.record_request();
        let full_key = self.full_key(key);
        let _timer = OperationTimer::with_key("delete", &full_key);
        let Some(node) = self.route(&full_key) else {
            return false;
        };

        match self.delete_on(&node, &full_key).await {
            Ok(existed) => {
                self.metrics.forget_key(&full_key);
                existed
            }
            Err(err) => {
                self.reporter.report(&err, "delete", Some(key));
                self.metrics.record_error(Some(node.metrics()));
                false
            }
        }
    }

    /// Best-effort clear across every registered node. Per-node failures
    /// are reported and do not fail the operation.
    pub async fn clear(&self) -> bool {
        let nodes = self.registry.all();
        let clears = nodes.iter().map(|node| async move {
            if let Err(err) = self.with_timeout(node.backend().clear()).await {
                self.reporter.report(&err, "clear", Some(node.id()));
                self.metrics.record_error(Some(node.metrics()));
            }
        });
        join_all(clears).await;
        self.metrics.reset_distribution();
        debug!("cache cleared");
        true
    }

    /// Concurrently store a batch of entries with the default TTL.
    /// Returns how many were stored; individual failures do not abort
    /// the batch.
    pub async fn warmup<T>(&self, entries: Vec<(String, T)>) -> usize
    where
        T: Serialize + Send + 'static,
    {
        let requested = entries.len();
        let stores = entries
            .into_iter()
            .map(|(key, value)| async move { self.set(&key, value, None).await });
        let stored = join_all(stores).await.into_iter().filter(|ok| *ok).count();
        info!(requested, stored, "cache warmup finished");
        stored
    }

    /// Delete every tracked key whose full form contains `pattern`.
    /// Returns the number of keys deleted.
    pub async fn invalidate_pattern(&self, pattern: &str) -> usize {
        let matches = self.metrics.keys_matching(pattern);
        let deletions = matches.iter().map(|full_key| async move {
            self.metrics.record_request();
            let Some(node) = self.route(full_key) else {
                return false;
            };
            match self.delete_on(&node, full_key).await {
                Ok(_) => {
                    self.metrics.forget_key(full_key);
                    true
                }
                Err(err) => {
                    self.reporter.report(&err, "invalidate_pattern", Some(full_key));
                    self.metrics.record_error(Some(node.metrics()));
                    false
                }
            }
        });
        let deleted = join_all(deletions)
            .await
            .into_iter()
            .filter(|ok| *ok)
            .count();
        debug!(pattern, deleted, "pattern invalidation finished");
        deleted
    }

    pub fn metrics(&self) -> DistributedCacheMetrics {
        self.metrics.snapshot()
    }

    /// Prometheus text exposition of the current metrics snapshot.
    pub fn export_metrics(&self) -> Result<String> {
        self.metrics.export_prometheus()
    }

    /// Add a node at runtime. Re-adding an existing id is a no-op. The
    /// backend connection is opened in the background; a failed connect
    /// takes the node straight out of the ring.
    pub fn add_node(&self, node_config: NodeConfig) -> Result<()> {
        node_config.validate()?;
        self.register_node(node_config)
    }

    /// Administratively remove a node from ring and registry, closing
    /// its connection in the background. Health-transition removal keeps
    /// the registry record instead; this does not.
    pub fn remove_node(&self, node_id: &str) -> bool {
        let was_on_ring = self.ring.remove_node(node_id);
        let Some(node) = self.registry.remove(node_id) else {
            return was_on_ring;
        };
        self.metrics.unregister_node(node_id);

        let reporter = self.reporter.clone();
        let op_timeout = self.config.operation_timeout;
        tokio::spawn(async move {
            let closed = match timeout(op_timeout, node.backend().close()).await {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout(op_timeout)),
            };
            if let Err(err) = closed {
                reporter.report(&err, "close", Some(node.id()));
            }
        });
        info!(node = node_id, "node removed");
        true
    }

    pub fn has_node(&self, node_id: &str) -> bool {
        self.ring.contains_node(node_id)
    }

    pub fn node_count(&self) -> usize {
        self.registry.len()
    }

    pub fn healthy_nodes(&self) -> Vec<String> {
        self.registry
            .all()
            .into_iter()
            .filter(|node| node.is_healthy())
            .map(|node| node.id().to_string())
            .collect()
    }

    /// Stop the health checker and close every node connection.
    /// Idempotent.
    pub async fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.health_task.lock().take() {
            handle.abort();
        }

        let nodes = self.registry.all();
        let closes = nodes.iter().map(|node| async move {
            if let Err(err) = self.with_timeout(node.backend().close()).await {
                self.reporter.report(&err, "close", Some(node.id()));
            }
        });
        join_all(closes).await;
        info!("distributed cache shut down");
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.config.key_prefix, key)
    }

    /// Ring lookup plus health re-check. Membership changes race with
    /// lookups; an unhealthy or unknown owner is a miss, not an error.
    fn route(&self, full_key: &str) -> Option<Arc<CacheNode>> {
        let owner = self.ring.node_for_key(full_key)?;
        let node = self.registry.get(&owner)?;
        if !node.is_healthy() {
            return None;
        }
        Some(node)
    }

    fn register_node(&self, node_config: NodeConfig) -> Result<()> {
        let backend = self.factory.create(&node_config)?;
        let node_metrics = self.metrics.register_node(&node_config.id());
        let node = Arc::new(CacheNode::new(node_config, backend, node_metrics));
        if !self.registry.insert(node.clone()) {
            return Ok(());
        }
        self.ring.add_node(node.id(), node.weight());
        self.spawn_connect(node);
        Ok(())
    }

    fn spawn_connect(&self, node: Arc<CacheNode>) {
        let ring = self.ring.clone();
        let reporter = self.reporter.clone();
        let op_timeout = self.config.operation_timeout;
        tokio::spawn(async move {
            let connected = match timeout(op_timeout, node.backend().connect()).await {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout(op_timeout)),
            };
            if let Err(err) = connected {
                reporter.report(&err, "connect", Some(node.id()));
                node.set_healthy(false);
                ring.remove_node(node.id());
            }
        });
    }

    async fn store<T>(
        &self,
        node: &Arc<CacheNode>,
        full_key: &str,
        value: T,
        ttl: Option<Duration>,
    ) -> Result<()>
    where
        T: Serialize + Send + 'static,
    {
        let ttl = ttl.or(Some(self.config.default_ttl));
        let threshold = self.config.compression_threshold;

        let encoded = tokio::task::spawn_blocking(move || -> Result<Bytes> {
            let value_bytes = serde_json::to_vec(&value)?;
            let entry = CacheEntry::seal(value_bytes, ttl, threshold)?;
            Ok(Bytes::from(entry.encode()?))
        })
        .await
        .context("encode task")??;

        let started = Instant::now();
        self.with_timeout(node.backend().set(full_key, encoded, ttl))
            .await?;
        node.metrics().record_latency(elapsed_ms(started));
        Ok(())
    }

    /// Decode the stored envelope. `Ok(None)` means the entry has
    /// expired.
    async fn open_entry<T>(&self, raw: Bytes) -> Result<Option<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let entry = CacheEntry::decode(&raw)?;
        if entry.is_expired(now_ms()) {
            return Ok(None);
        }

        let payload_len = entry.payload.len();
        let compressed = entry.compressed;
        let decode = move || -> Result<T> {
            let value_bytes = entry.unseal()?;
            Ok(serde_json::from_slice(&value_bytes)?)
        };
        // Compressed payloads can expand well past their stored size, so
        // they always decode off-thread.
        let value = if compressed || payload_len >= OFFLOAD_THRESHOLD {
            tokio::task::spawn_blocking(decode)
                .await
                .context("decode task")??
        } else {
            decode()?
        };
        Ok(Some(value))
    }

    async fn delete_on(&self, node: &Arc<CacheNode>, full_key: &str) -> Result<bool> {
        let started = Instant::now();
        let existed = self.with_timeout(node.backend().delete(full_key)).await?;
        node.metrics().record_latency(elapsed_ms(started));
        Ok(existed)
    }

    fn evict_expired(&self, node: Arc<CacheNode>, full_key: String) {
        self.metrics.forget_key(&full_key);
        let reporter = self.reporter.clone();
        let op_timeout = self.config.operation_timeout;
        tokio::spawn(async move {
            let deleted = match timeout(op_timeout, node.backend().delete(&full_key)).await {
                Ok(result) => result.map(|_| ()),
                Err(_) => Err(Error::Timeout(op_timeout)),
            };
            match deleted {
                Ok(()) => debug!(key = %full_key, "expired entry evicted"),
                Err(err) => reporter.report(&err, "evict_expired", Some(&full_key)),
            }
        });
    }

    async fn with_timeout<T, F>(&self, operation: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match timeout(self.config.operation_timeout, operation).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(self.config.operation_timeout)),
        }
    }
}

impl Drop for DistributedCache {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.health_task.lock().take() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for DistributedCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedCache")
            .field("backend", &self.config.backend)
            .field("nodes", &self.registry.len())
            .field("key_prefix", &self.config.key_prefix)
            .finish()
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

/// Fluent construction for [`DistributedCache`].
pub struct CacheBuilder {
    config: CacheConfig,
    factory: Option<Arc<dyn BackendFactory>>,
    reporter: Option<Arc<dyn ErrorReporter>>,
}

impl CacheBuilder {
    pub fn new() -> Self {
        Self {
            config: CacheConfig::default(),
            factory: None,
            reporter: None,
        }
    }

    pub fn backend(mut self, kind: BackendKind) -> Self {
        self.config.backend = kind;
        self
    }

    pub fn node(mut self, node: NodeConfig) -> Self {
        self.config.nodes.push(node);
        self
    }

    pub fn nodes(mut self, nodes: impl IntoIterator<Item = NodeConfig>) -> Self {
        self.config.nodes.extend(nodes);
        self
    }

    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.key_prefix = prefix.into();
        self
    }

    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.config.default_ttl = ttl;
        self
    }

    pub fn health_check_interval(mut self, interval: Duration) -> Self {
        self.config.health_check_interval = interval;
        self
    }

    pub fn compression_threshold(mut self, bytes: usize) -> Self {
        self.config.compression_threshold = bytes;
        self
    }

    pub fn virtual_nodes_per_node(mut self, count: u32) -> Self {
        self.config.virtual_nodes_per_node = count;
        self
    }

    pub fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.config.operation_timeout = timeout;
        self
    }

    pub fn key_distribution_capacity(mut self, capacity: usize) -> Self {
        self.config.key_distribution_capacity = capacity;
        self
    }

    pub fn backend_factory(mut self, factory: Arc<dyn BackendFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn error_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub async fn build(self) -> Result<DistributedCache> {
        DistributedCache::build_with(self.config, self.factory, self.reporter).await
    }
}

impl Default for CacheBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_config() -> CacheConfig {
        CacheConfig {
            nodes: vec![NodeConfig::new("local", 6379)],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_construction_requires_nodes() {
        let err = DistributedCache::new(CacheConfig::default()).await.unwrap_err();
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn test_remote_backend_requires_factory() {
        let config = CacheConfig {
            backend: BackendKind::Redis,
            ..memory_config()
        };
        let err = DistributedCache::new(config).await.unwrap_err();
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn test_round_trip_through_facade() {
        let cache = DistributedCache::new(memory_config()).await.unwrap();
        assert!(cache.set("greeting", "hello", None).await);
        assert_eq!(cache.get::<String>("greeting").await.as_deref(), Some("hello"));
        cache.shutdown().await;
    }

    #[tokio::test]
    async fn test_add_node_is_idempotent() {
        let cache = DistributedCache::new(memory_config()).await.unwrap();
        assert_eq!(cache.node_count(), 1);
        cache.add_node(NodeConfig::new("local", 6379)).unwrap();
        assert_eq!(cache.node_count(), 1);
        cache.add_node(NodeConfig::new("second", 6379)).unwrap();
        assert_eq!(cache.node_count(), 2);
        cache.shutdown().await;
    }

    #[tokio::test]
    async fn test_add_node_validates_config() {
        let cache = DistributedCache::new(memory_config()).await.unwrap();
        let err = cache.add_node(NodeConfig::new("", 1)).unwrap_err();
        assert!(err.is_configuration());
        cache.shutdown().await;
    }

    #[tokio::test]
    async fn test_remove_unknown_node_is_false() {
        let cache = DistributedCache::new(memory_config()).await.unwrap();
        assert!(!cache.remove_node("ghost:1"));
        assert!(cache.remove_node("local:6379"));
        assert!(!cache.has_node("local:6379"));
        cache.shutdown().await;
    }

    #[tokio::test]
    async fn test_healthy_nodes_lists_ids() {
        let cache = DistributedCache::builder()
            .node(NodeConfig::new("a", 1000))
            .node(NodeConfig::new("b", 1000))
            .build()
            .await
            .unwrap();
        let mut nodes = cache.healthy_nodes();
        nodes.sort();
        assert_eq!(nodes, vec!["a:1000", "b:1000"]);
        cache.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let cache = DistributedCache::new(memory_config()).await.unwrap();
        cache.shutdown().await;
        cache.shutdown().await;
    }
}
