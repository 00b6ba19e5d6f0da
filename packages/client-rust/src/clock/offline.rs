//! Offline fallback store for small values that must survive restarts.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::Mutex;

/// Keyed persistent store consulted only when the network is unavailable.
#[async_trait]
pub trait OfflineCache: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Value>>;

    async fn put(&self, key: &str, value: Value) -> anyhow::Result<()>;

    async fn remove(&self, key: &str) -> anyhow::Result<()>;
}

/// Stores nothing. The default when no offline cache is configured.
#[derive(Debug, Default)]
pub struct NullOfflineCache;

#[async_trait]
impl OfflineCache for NullOfflineCache {
    async fn get(&self, _key: &str) -> anyhow::Result<Option<Value>> {
        Ok(None)
    }

    async fn put(&self, _key: &str, _value: Value) -> anyhow::Result<()> {
        Ok(())
    }

    async fn remove(&self, _key: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Process-lifetime store.
#[derive(Debug, Default)]
pub struct MemoryOfflineCache {
    entries: DashMap<String, Value>,
}

impl MemoryOfflineCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OfflineCache for MemoryOfflineCache {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Value>> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    async fn put(&self, key: &str, value: Value) -> anyhow::Result<()> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> anyhow::Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}

/// Single JSON document on disk mapping keys to values. Every write rewrites
/// the whole file through a temporary sibling and a rename.
#[derive(Debug)]
pub struct FileOfflineCache {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileOfflineCache {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> anyhow::Result<BTreeMap<String, Value>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .with_context(|| format!("corrupt offline cache {}", self.path.display())),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(err) => Err(err)
                .with_context(|| format!("reading offline cache {}", self.path.display())),
        }
    }

    async fn store(&self, entries: &BTreeMap<String, Value>) -> anyhow::Result<()> {
        let bytes = serde_json::to_vec_pretty(entries)?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes)
            .await
            .with_context(|| format!("writing offline cache {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("replacing offline cache {}", self.path.display()))
    }
}

#[async_trait]
impl OfflineCache for FileOfflineCache {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Value>> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.remove(key))
    }

    async fn put(&self, key: &str, value: Value) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        let mut entries = self.load().await?;
        entries.insert(key.to_string(), value);
        self.store(&entries).await
    }

    async fn remove(&self, key: &str) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        let mut entries = self.load().await?;
        if entries.remove(key).is_some() {
            self.store(&entries).await?;
        }
        Ok(())
    }
}
