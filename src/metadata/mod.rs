//! Schema metadata with caching.
//!
//! [`Metadata`] answers "which columns does this table have" and "which of
//! them form the primary key". Answers are loaded once per `schema.table` key
//! from a [`MetadataSource`] and kept either in an external [`CacheStorage`] or
//! in process.
//!
//! # Example
//!
//! ```ignore
//! let driver = Driver::pdo(ConnectionParameters::from_url("sqlite::memory:")?, DriverOptions::default())?;
//! let mut metadata = Metadata::new(driver, None).await;
//! let keys = metadata.get_primarys("users", None).await?;
//! ```

pub mod cache;
pub mod loader;

pub use cache::{CacheStorage, MemoryStorage};

use crate::config::DEFAULT_SCHEMA;
use crate::db::{Connector, Driver};
use crate::error::DbResult;
use crate::models::TableColumns;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

/// Where metadata comes from.
pub trait MetadataSource: Send {
    /// Active schema of the underlying connection, if it can be determined.
    fn current_schema(&mut self) -> impl Future<Output = DbResult<Option<String>>> + Send;

    /// Read the column definitions of `schema.table` from the catalog.
    fn load(
        &mut self,
        table: &str,
        schema: &str,
    ) -> impl Future<Output = DbResult<TableColumns>> + Send;
}

impl<C: Connector> MetadataSource for Driver<C> {
    async fn current_schema(&mut self) -> DbResult<Option<String>> {
        self.connection_mut().get_current_schema().await
    }

    async fn load(&mut self, table: &str, schema: &str) -> DbResult<TableColumns> {
        loader::load_columns(self, table, schema).await
    }
}

impl<S: MetadataSource> MetadataSource for &mut S {
    async fn current_schema(&mut self) -> DbResult<Option<String>> {
        (**self).current_schema().await
    }

    async fn load(&mut self, table: &str, schema: &str) -> DbResult<TableColumns> {
        (**self).load(table, schema).await
    }
}

/// Cached table metadata.
pub struct Metadata<S: MetadataSource> {
    source: S,
    default_schema: String,
    cache: Option<Arc<dyn CacheStorage>>,
    data: HashMap<String, TableColumns>,
}

impl<S: MetadataSource> std::fmt::Debug for Metadata<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metadata")
            .field("default_schema", &self.default_schema)
            .field("external_cache", &self.cache.is_some())
            .field("entries", &self.data.len())
            .finish()
    }
}

impl<S: MetadataSource> Metadata<S> {
    /// Create metadata over `source`.
    ///
    /// The cache is pinged first; an unreachable cache is logged and replaced
    /// by in-process storage. The default schema is the source's current
    /// schema, or [`DEFAULT_SCHEMA`] when it cannot be determined.
    pub async fn new(mut source: S, cache: Option<Arc<dyn CacheStorage>>) -> Self {
        let cache = match cache {
            Some(storage) => match storage.ping().await {
                Ok(()) => Some(storage),
                Err(e) => {
                    warn!(error = %e, "Metadata cache unavailable, caching in process");
                    None
                }
            },
            None => None,
        };

        let default_schema = match source.current_schema().await {
            Ok(Some(schema)) if !schema.is_empty() => schema,
            Ok(_) => DEFAULT_SCHEMA.to_string(),
            Err(e) => {
                warn!(error = %e, "Could not detect the current schema");
                DEFAULT_SCHEMA.to_string()
            }
        };
        debug!(schema = %default_schema, external_cache = cache.is_some(), "Metadata ready");

        Self {
            source,
            default_schema,
            cache,
            data: HashMap::new(),
        }
    }

    pub fn default_schema(&self) -> &str {
        &self.default_schema
    }

    /// Whether entries go to an external cache rather than in-process storage.
    pub fn is_external_cache(&self) -> bool {
        self.cache.is_some()
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    pub fn into_source(self) -> S {
        self.source
    }

    fn cache_key(table: &str, schema: &str) -> String {
        format!("{}.{}", schema, table)
    }

    /// Columns of `table` in ordinal order.
    pub async fn get_columns(&mut self, table: &str, schema: Option<&str>) -> DbResult<TableColumns> {
        let schema = schema.unwrap_or(&self.default_schema).to_string();
        let key = Self::cache_key(table, &schema);

        if let Some(columns) = self.lookup(&key).await {
            debug!(key = %key, "Metadata cache hit");
            return Ok(columns);
        }

        debug!(key = %key, "Metadata cache miss");
        let columns = self.source.load(table, &schema).await?;
        self.store(&key, &columns).await;
        Ok(columns)
    }

    /// Names of the primary-key columns of `table` in ordinal order.
    pub async fn get_primarys(&mut self, table: &str, schema: Option<&str>) -> DbResult<Vec<String>> {
        Ok(self.get_columns(table, schema).await?.primary_keys())
    }

    /// Forget the cached entry for `table`. Returns whether one existed.
    pub async fn invalidate(&mut self, table: &str, schema: Option<&str>) -> bool {
        let schema = schema.unwrap_or(&self.default_schema).to_string();
        let key = Self::cache_key(table, &schema);

        match &self.cache {
            None => self.data.remove(&key).is_some(),
            Some(storage) => storage.remove(&key).await.unwrap_or_else(|e| {
                warn!(key = %key, error = %e, "Failed to remove metadata from cache");
                false
            }),
        }
    }

    async fn lookup(&self, key: &str) -> Option<TableColumns> {
        let Some(storage) = &self.cache else {
            return self.data.get(key).cloned();
        };

        match storage.has(key).await {
            Ok(true) => {}
            Ok(false) => return None,
            Err(e) => {
                warn!(key = %key, error = %e, "Metadata cache lookup failed");
                return None;
            }
        }

        match storage.get(key).await {
            Ok(Some(value)) => match serde_json::from_value(value) {
                Ok(columns) => Some(columns),
                Err(e) => {
                    warn!(key = %key, error = %e, "Discarding undecodable metadata cache entry");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(key = %key, error = %e, "Metadata cache read failed");
                None
            }
        }
    }

    async fn store(&mut self, key: &str, columns: &TableColumns) {
        let Some(storage) = &self.cache else {
            self.data.insert(key.to_string(), columns.clone());
            return;
        };

        let value = match serde_json::to_value(columns) {
            Ok(value) => value,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to serialize metadata");
                return;
            }
        };
        match storage.set(key, value, None).await {
            Ok(true) => {}
            Ok(false) => warn!(key = %key, "Metadata cache refused the entry"),
            Err(e) => warn!(key = %key, error = %e, "Metadata cache write failed"),
        }
    }
}
