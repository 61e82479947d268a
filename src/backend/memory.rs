use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tracing::debug;

use super::BackendAdapter;
use crate::error::Result;

struct StoredValue {
    data: Bytes,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| now >= deadline)
    }
}

/// In-process reference backend. Doubles as the test double for the
/// whole adapter surface; real deployments point the factory at a
/// networked implementation instead.
#[derive(Default)]
pub struct MemoryAdapter {
    store: DashMap<String, StoredValue>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self {
            store: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}

#[async_trait]
impl BackendAdapter for MemoryAdapter {
    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let now = Instant::now();
        if let Some(entry) = self.store.get(key) {
            if entry.is_expired(now) {
                drop(entry);
                self.store.remove(key);
                return Ok(None);
            }
            return Ok(Some(entry.data.clone()));
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<()> {
        let stored = StoredValue {
            data: value,
            // A deadline past what the clock can represent means no expiry.
            expires_at: ttl.and_then(|t| Instant::now().checked_add(t)),
        };
        self.store.insert(key.to_string(), stored);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.store.remove(key).is_some())
    }

    async fn clear(&self) -> Result<()> {
        let count = self.store.len();
        self.store.clear();
        debug!(evicted = count, "memory backend cleared");
        Ok(())
    }

    async fn ping(&self) -> Result<bool> {
        Ok(true)
    }

    async fn close(&self) -> Result<()> {
        self.store.clear();
        Ok(())
    }
}
