//! Cache storage used by metadata.
//!
//! [`CacheStorage`] is the key-value contract the metadata layer relies on.
//! It is object safe so a storage can be chosen at runtime and shared between
//! several `Metadata` instances. [`MemoryStorage`] is the in-process reference
//! implementation.

use crate::error::DbResult;
use futures_util::future::BoxFuture;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Key-value cache collaborator.
pub trait CacheStorage: Send + Sync {
    /// Stored value, or `None` on a miss.
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, DbResult<Option<JsonValue>>>;

    fn has<'a>(&'a self, key: &'a str) -> BoxFuture<'a, DbResult<bool>>;

    /// Store a value. Returns whether it was stored.
    fn set<'a>(
        &'a self,
        key: &'a str,
        value: JsonValue,
        ttl: Option<Duration>,
    ) -> BoxFuture<'a, DbResult<bool>>;

    /// Returns whether a value was removed.
    fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, DbResult<bool>>;

    /// Check the storage is reachable.
    fn ping(&self) -> BoxFuture<'_, DbResult<()>>;
}

struct Entry {
    value: JsonValue,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// In-process storage. Clones share the same entries.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
    default_ttl: Option<Duration>,
}

impl std::fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStorage")
            .field("default_ttl", &self.default_ttl)
            .finish_non_exhaustive()
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expire entries stored without an explicit ttl after `ttl`.
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    /// Number of live entries.
    pub async fn len(&self) -> usize {
        self.entries
            .read()
            .await
            .values()
            .filter(|e| !e.is_expired())
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop every entry.
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}

impl CacheStorage for MemoryStorage {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, DbResult<Option<JsonValue>>> {
        Box::pin(async move {
            let entries = self.entries.read().await;
            Ok(entries
                .get(key)
                .filter(|e| !e.is_expired())
                .map(|e| e.value.clone()))
        })
    }

    fn has<'a>(&'a self, key: &'a str) -> BoxFuture<'a, DbResult<bool>> {
        Box::pin(async move {
            let entries = self.entries.read().await;
            Ok(entries.get(key).is_some_and(|e| !e.is_expired()))
        })
    }

    fn set<'a>(
        &'a self,
        key: &'a str,
        value: JsonValue,
        ttl: Option<Duration>,
    ) -> BoxFuture<'a, DbResult<bool>> {
        Box::pin(async move {
            let expires_at = ttl.or(self.default_ttl).map(|ttl| Instant::now() + ttl);
            let mut entries = self.entries.write().await;
            entries.retain(|_, e| !e.is_expired());
            entries.insert(key.to_string(), Entry { value, expires_at });
            Ok(true)
        })
    }

    fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, DbResult<bool>> {
        Box::pin(async move { Ok(self.entries.write().await.remove(key).is_some()) })
    }

    fn ping(&self) -> BoxFuture<'_, DbResult<()>> {
        Box::pin(async { Ok(()) })
    }
}
