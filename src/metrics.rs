use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use lru::LruCache;
use parking_lot::Mutex;
use prometheus::{Encoder, Gauge, GaugeVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};
use serde::Serialize;

use crate::error::{Error, Result};

const LATENCY_EMA_ALPHA: f64 = 0.1;

/// Per-node counters. Latency is an exponential moving average kept as
/// f64 bits in an atomic so readers never lock the write path.
#[derive(Debug, Default)]
pub struct NodeMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
    latency_ema_bits: AtomicU64,
    latency_samples: AtomicU64,
}

impl NodeMetrics {
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// ema' = ema * 0.9 + sample * 0.1, seeded at zero.
    pub fn record_latency(&self, sample_ms: f64) {
        self.latency_samples.fetch_add(1, Ordering::Relaxed);
        let _ = self
            .latency_ema_bits
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                let prev = f64::from_bits(bits);
                let next = prev * (1.0 - LATENCY_EMA_ALPHA) + sample_ms * LATENCY_EMA_ALPHA;
                Some(next.to_bits())
            });
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn latency_ema_ms(&self) -> f64 {
        f64::from_bits(self.latency_ema_bits.load(Ordering::Relaxed))
    }

    pub fn latency_samples(&self) -> u64 {
        self.latency_samples.load(Ordering::Relaxed)
    }

    fn snapshot(&self) -> NodeMetricsSnapshot {
        NodeMetricsSnapshot {
            hits: self.hits(),
            misses: self.misses(),
            errors: self.errors(),
            latency_ema_ms: self.latency_ema_ms(),
            latency_samples: self.latency_samples(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeMetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
    pub latency_ema_ms: f64,
    pub latency_samples: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DistributedCacheMetrics {
    pub total_requests: u64,
    pub total_hits: u64,
    pub total_misses: u64,
    pub total_errors: u64,
    /// Mean of the latency EMAs of nodes that have served at least one
    /// sampled operation; 0.0 before any traffic.
    pub average_latency_ms: f64,
    pub nodes: HashMap<String, NodeMetricsSnapshot>,
    /// Full key -> write count, LRU-bounded.
    pub key_distribution: HashMap<String, u64>,
}

/// Aggregates global totals, per-node counters, and the bounded
/// key-distribution index.
pub struct MetricsAggregator {
    total_requests: AtomicU64,
    total_hits: AtomicU64,
    total_misses: AtomicU64,
    total_errors: AtomicU64,
    per_node: DashMap<String, Arc<NodeMetrics>>,
    key_distribution: Mutex<LruCache<String, u64>>,
}

impl MetricsAggregator {
    pub fn new(key_distribution_capacity: usize) -> Self {
        let capacity =
            NonZeroUsize::new(key_distribution_capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            total_requests: AtomicU64::new(0),
            total_hits: AtomicU64::new(0),
            total_misses: AtomicU64::new(0),
            total_errors: AtomicU64::new(0),
            per_node: DashMap::new(),
            key_distribution: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn register_node(&self, node_id: &str) -> Arc<NodeMetrics> {
        self.per_node
            .entry(node_id.to_string())
            .or_insert_with(|| Arc::new(NodeMetrics::default()))
            .value()
            .clone()
    }

    pub fn unregister_node(&self, node_id: &str) {
        self.per_node.remove(node_id);
    }

    pub fn record_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_hit(&self, node: &NodeMetrics) {
        node.record_hit();
        self.total_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self, node: Option<&NodeMetrics>) {
        if let Some(node) = node {
            node.record_miss();
        }
        self.total_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self, node: Option<&NodeMetrics>) {
        if let Some(node) = node {
            node.record_error();
        }
        self.total_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write(&self, full_key: &str) {
        let mut distribution = self.key_distribution.lock();
        if let Some(count) = distribution.get_mut(full_key) {
            *count += 1;
        } else {
            distribution.push(full_key.to_string(), 1);
        }
    }

    pub fn forget_key(&self, full_key: &str) {
        self.key_distribution.lock().pop(full_key);
    }

    pub fn reset_distribution(&self) {
        self.key_distribution.lock().clear();
    }

    /// Full keys currently tracked that contain `pattern`.
    pub fn keys_matching(&self, pattern: &str) -> Vec<String> {
        self.key_distribution
            .lock()
            .iter()
            .filter(|(key, _)| key.contains(pattern))
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub fn snapshot(&self) -> DistributedCacheMetrics {
        let nodes: HashMap<String, NodeMetricsSnapshot> = self
            .per_node
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().snapshot()))
            .collect();

        let sampled: Vec<f64> = nodes
            .values()
            .filter(|node| node.latency_samples > 0)
            .map(|node| node.latency_ema_ms)
            .collect();
        let average_latency_ms = if sampled.is_empty() {
            0.0
        } else {
            sampled.iter().sum::<f64>() / sampled.len() as f64
        };

        let key_distribution = self
            .key_distribution
            .lock()
            .iter()
            .map(|(key, count)| (key.clone(), *count))
            .collect();

        DistributedCacheMetrics {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            total_hits: self.total_hits.load(Ordering::Relaxed),
            total_misses: self.total_misses.load(Ordering::Relaxed),
            total_errors: self.total_errors.load(Ordering::Relaxed),
            average_latency_ms,
            nodes,
            key_distribution,
        }
    }

    /// Prometheus text exposition of the current snapshot. Built on a
    /// registry created per call; nothing is registered globally.
    pub fn export_prometheus(&self) -> Result<String> {
        let snapshot = self.snapshot();
        let registry = Registry::new();

        let totals = IntGaugeVec::new(
            Opts::new("ringcache_operations_total", "Cache operation totals by outcome"),
            &["outcome"],
        )
        .map_err(prom_err)?;
        registry.register(Box::new(totals.clone())).map_err(prom_err)?;
        totals
            .with_label_values(&["requests"])
            .set(snapshot.total_requests as i64);
        totals
            .with_label_values(&["hits"])
            .set(snapshot.total_hits as i64);
        totals
            .with_label_values(&["misses"])
            .set(snapshot.total_misses as i64);
        totals
            .with_label_values(&["errors"])
            .set(snapshot.total_errors as i64);

        let average_latency = Gauge::new(
            "ringcache_average_latency_ms",
            "Mean of per-node latency EMAs",
        )
        .map_err(prom_err)?;
        registry
            .register(Box::new(average_latency.clone()))
            .map_err(prom_err)?;
        average_latency.set(snapshot.average_latency_ms);

        let node_ops = IntGaugeVec::new(
            Opts::new("ringcache_node_operations_total", "Per-node operation totals"),
            &["node", "outcome"],
        )
        .map_err(prom_err)?;
        registry.register(Box::new(node_ops.clone())).map_err(prom_err)?;

        let node_latency = GaugeVec::new(
            Opts::new("ringcache_node_latency_ms", "Per-node latency EMA"),
            &["node"],
        )
        .map_err(prom_err)?;
        registry
            .register(Box::new(node_latency.clone()))
            .map_err(prom_err)?;

        for (node_id, node) in &snapshot.nodes {
            node_ops
                .with_label_values(&[node_id, "hits"])
                .set(node.hits as i64);
            node_ops
                .with_label_values(&[node_id, "misses"])
                .set(node.misses as i64);
            node_ops
                .with_label_values(&[node_id, "errors"])
                .set(node.errors as i64);
            node_latency
                .with_label_values(&[node_id])
                .set(node.latency_ema_ms);
        }

        let tracked_keys = IntGauge::new(
            "ringcache_tracked_keys",
            "Keys currently tracked in the distribution index",
        )
        .map_err(prom_err)?;
        registry
            .register(Box::new(tracked_keys.clone()))
            .map_err(prom_err)?;
        tracked_keys.set(snapshot.key_distribution.len() as i64);

        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&registry.gather(), &mut buffer)
            .map_err(prom_err)?;
        String::from_utf8(buffer)
            .map_err(|e| Error::Serialization(format!("metrics encoding: {}", e)))
    }
}

fn prom_err(err: prometheus::Error) -> Error {
    Error::Operation(format!("prometheus: {}", err))
}
