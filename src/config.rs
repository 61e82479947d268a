use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backend::BackendKind;
use crate::error::{Error, Result};

/// Static description of one cache node. The runtime identity is
/// `host:port`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_weight")]
    pub weight: u32,
    #[serde(default)]
    pub priority: i32,
}

fn default_weight() -> u32 {
    1
}

impl NodeConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            weight: 1,
            priority: 0,
        }
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn id(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(Error::Config("node host must not be empty".into()));
        }
        if self.port == 0 {
            return Err(Error::Config(format!("node {}: port must be non-zero", self.host)));
        }
        if self.weight == 0 {
            return Err(Error::Config(format!("node {}: weight must be at least 1", self.id())));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub backend: BackendKind,
    pub nodes: Vec<NodeConfig>,
    pub key_prefix: String,
    pub default_ttl: Duration,
    pub health_check_interval: Duration,
    pub compression_threshold: usize,
    pub virtual_nodes_per_node: u32,
    pub operation_timeout: Duration,
    pub key_distribution_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Memory,
            nodes: Vec::new(),
            key_prefix: "cache:".to_string(),
            default_ttl: Duration::from_secs(3600),
            health_check_interval: Duration::from_secs(30),
            compression_threshold: 1024,
            virtual_nodes_per_node: 150,
            operation_timeout: Duration::from_secs(5),
            key_distribution_capacity: 10_000,
        }
    }
}

impl CacheConfig {
    /// The single construction-time gate. Everything past this point
    /// degrades instead of failing.
    pub fn validate(&self) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(Error::Config("node list must not be empty".into()));
        }
        let mut seen = HashSet::new();
        for node in &self.nodes {
            node.validate()?;
            if !seen.insert(node.id()) {
                return Err(Error::Config(format!("duplicate node id: {}", node.id())));
            }
        }
        if self.virtual_nodes_per_node == 0 {
            return Err(Error::Config("virtual_nodes_per_node must be at least 1".into()));
        }
        if self.default_ttl.is_zero() {
            return Err(Error::Config("default_ttl must be non-zero".into()));
        }
        if self.health_check_interval.is_zero() {
            return Err(Error::Config("health_check_interval must be non-zero".into()));
        }
        if self.operation_timeout.is_zero() {
            return Err(Error::Config("operation_timeout must be non-zero".into()));
        }
        if self.key_distribution_capacity == 0 {
            return Err(Error::Config("key_distribution_capacity must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> CacheConfig {
        CacheConfig {
            nodes: vec![NodeConfig::new("10.0.0.1", 6379)],
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.key_prefix, "cache:");
        assert_eq!(config.default_ttl, Duration::from_secs(3600));
        assert_eq!(config.health_check_interval, Duration::from_secs(30));
        assert_eq!(config.compression_threshold, 1024);
        assert_eq!(config.virtual_nodes_per_node, 150);
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_empty_node_list_rejected() {
        let config = CacheConfig::default();
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_duplicate_node_ids_rejected() {
        let mut config = valid();
        config.nodes.push(NodeConfig::new("10.0.0.1", 6379));
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_zero_weight_rejected() {
        let mut config = valid();
        config.nodes[0].weight = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_port_rejected() {
        let mut config = valid();
        config.nodes[0].port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_virtual_nodes_rejected() {
        let mut config = valid();
        config.virtual_nodes_per_node = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_node_id_format() {
        let node = NodeConfig::new("cache-1.internal", 11211).with_weight(2);
        assert_eq!(node.id(), "cache-1.internal:11211");
        assert_eq!(node.weight, 2);
    }
}
