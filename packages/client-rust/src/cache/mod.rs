//! Response caching.
//!
//! The cache store is an external collaborator reached through
//! [`CacheProvider`], which hands out a scoped [`CacheClient`] per call for a
//! logical cache name. [`MemoryCacheProvider`] is the in-process store.

pub mod advice;
pub mod memory;
pub mod server;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

pub use advice::{CachingStrategy, ClientCachingStrategy, ResponseCachingAdvice};
pub use memory::MemoryCacheProvider;
pub use server::{DirectiveTable, ServerCachingStrategy};

/// Logical cache name used for responses unless configured otherwise.
pub const DEFAULT_RESPONSE_CACHE: &str = "relay.responses";

/// Per-call handle onto one logical cache. Entries are addressed by
/// `(region, key)`.
#[async_trait]
pub trait CacheClient: Send + Sync {
    async fn get(&self, key: &str, region: &str) -> anyhow::Result<Option<Value>>;

    async fn put(&self, key: &str, value: Value, region: &str, ttl: Duration)
        -> anyhow::Result<()>;

    async fn remove(&self, key: &str, region: &str) -> anyhow::Result<()>;

    async fn region_exists(&self, region: &str) -> anyhow::Result<bool>;

    async fn clear_region(&self, region: &str) -> anyhow::Result<()>;
}

/// Factory for cache clients, keyed by logical cache name.
pub trait CacheProvider: Send + Sync {
    fn create_client(&self, cache_id: &str) -> Box<dyn CacheClient>;
}
