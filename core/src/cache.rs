//! External TTL key/value collaborator.
//!
//! Both the short-TTL live-data cache and the tracking archive speak this
//! interface. The in-memory implementation is used in tests and in
//! single-process deployments; production deployments back it with an
//! external store.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[async_trait]
pub trait TtlStore: Send + Sync {
    async fn set(&self, key: &str, value: Value, ttl: Duration);
    async fn get(&self, key: &str) -> Option<Value>;
}

struct Entry {
    value: Value,
    expires_at: Instant,
}

/// In-memory TTL store with lazy expiry on read.
#[derive(Default)]
pub struct MemoryTtlStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryTtlStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries currently held, including not-yet-purged expired ones.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Drop every expired entry.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.entries.write().retain(|_, e| e.expires_at > now);
    }
}

#[async_trait]
impl TtlStore for MemoryTtlStore {
    async fn set(&self, key: &str, value: Value, ttl: Duration) {
        let entry = Entry {
            value,
            expires_at: Instant::now() + ttl,
        };
        self.entries.write().insert(key.to_string(), entry);
    }

    async fn get(&self, key: &str) -> Option<Value> {
        let expired = {
            let entries = self.entries.read();
            let entry = entries.get(key)?;
            if entry.expires_at > Instant::now() {
                return Some(entry.value.clone());
            }
            true
        };
        if expired {
            self.entries.write().remove(key);
        }
        None
    }
}
