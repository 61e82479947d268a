pub mod backend;
pub mod cache;
pub mod compression;
pub mod config;
pub mod entry;
pub mod error;
pub mod hash;
pub mod health;
pub mod logging;
pub mod metrics;
pub mod node;
pub mod ring;

pub use backend::{
    BackendAdapter, BackendFactory, BackendKind, MemoryAdapter, MemoryBackendFactory,
};
pub use cache::{CacheBuilder, DistributedCache};
pub use compression::{CompressionType, Compressor};
pub use config::{CacheConfig, NodeConfig};
pub use entry::CacheEntry;
pub use error::{Error, ErrorContext, ErrorReporter, Result, TracingReporter};
pub use health::HealthChecker;
pub use logging::{init_logging, OperationTimer};
pub use metrics::{DistributedCacheMetrics, MetricsAggregator, NodeMetrics, NodeMetricsSnapshot};
pub use node::{CacheNode, NodeRegistry};
pub use ring::ConsistentHashRing;
