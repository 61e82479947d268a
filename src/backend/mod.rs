pub mod memory;

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::config::NodeConfig;
use crate::error::{Error, Result};

pub use memory::MemoryAdapter;

/// Storage capability implemented per backend technology. One adapter
/// instance serves one node; the façade never branches on the backend
/// kind after construction, it only calls through this trait.
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    async fn connect(&self) -> Result<()>;
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;
    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<bool>;
    async fn clear(&self) -> Result<()>;
    async fn ping(&self) -> Result<bool>;
    async fn close(&self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Memory,
    Redis,
    Memcached,
    Custom,
}

impl FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(BackendKind::Memory),
            "redis" => Ok(BackendKind::Redis),
            "memcached" => Ok(BackendKind::Memcached),
            "custom" => Ok(BackendKind::Custom),
            other => Err(Error::Config(format!("unknown backend kind: {}", other))),
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BackendKind::Memory => "memory",
            BackendKind::Redis => "redis",
            BackendKind::Memcached => "memcached",
            BackendKind::Custom => "custom",
        };
        f.write_str(name)
    }
}

/// Builds one adapter per node. Implementations for real backend
/// technologies live with their protocol clients outside this crate.
pub trait BackendFactory: Send + Sync {
    fn create(&self, node: &NodeConfig) -> Result<Arc<dyn BackendAdapter>>;
}

pub struct MemoryBackendFactory;

impl BackendFactory for MemoryBackendFactory {
    fn create(&self, _node: &NodeConfig) -> Result<Arc<dyn BackendAdapter>> {
        Ok(Arc::new(MemoryAdapter::new()))
    }
}

/// Resolve the configured kind to a factory exactly once, at
/// construction. Kinds this crate ships no client for require an
/// injected factory.
pub(crate) fn resolve_factory(
    kind: BackendKind,
    custom: Option<Arc<dyn BackendFactory>>,
) -> Result<Arc<dyn BackendFactory>> {
    match (kind, custom) {
        (_, Some(factory)) => Ok(factory),
        (BackendKind::Memory, None) => Ok(Arc::new(MemoryBackendFactory)),
        (kind, None) => Err(Error::Config(format!(
            "backend kind '{}' requires an injected backend factory",
            kind
        ))),
    }
}
