//! In-process cache store with per-entry expiry.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use relay_core::clock::duration_ms;
use relay_core::{ClockSource, SystemClock};
use serde_json::Value;

use super::{CacheClient, CacheProvider};

/// Regions smaller than this are never swept on write.
const SWEEP_MIN_LEN: usize = 64;

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at_ms: u64,
}

/// Entries of one region plus the bookkeeping that drives write-time sweeps.
struct Region {
    entries: DashMap<String, Entry>,
    /// Earliest expiry among the entries, `u64::MAX` when none can expire.
    next_expiry_ms: AtomicU64,
    /// Length at which the next write may sweep. Doubles with the live set so
    /// sweeping stays amortised O(1) per write.
    sweep_at: AtomicUsize,
}

impl Default for Region {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
            next_expiry_ms: AtomicU64::new(u64::MAX),
            sweep_at: AtomicUsize::new(SWEEP_MIN_LEN),
        }
    }
}

impl Region {
    fn insert(&self, key: String, entry: Entry, now_ms: u64) {
        self.next_expiry_ms
            .fetch_min(entry.expires_at_ms, Ordering::Relaxed);
        self.entries.insert(key, entry);
        if self.entries.len() >= self.sweep_at.load(Ordering::Relaxed)
            && now_ms >= self.next_expiry_ms.load(Ordering::Relaxed)
        {
            self.sweep(now_ms);
        }
    }

    /// Drops expired entries and returns how many are left.
    fn sweep(&self, now_ms: u64) -> usize {
        let mut next_expiry = u64::MAX;
        self.entries.retain(|_, entry| {
            let live = entry.expires_at_ms > now_ms;
            if live {
                next_expiry = next_expiry.min(entry.expires_at_ms);
            }
            live
        });
        self.next_expiry_ms.store(next_expiry, Ordering::Relaxed);
        let remaining = self.entries.len();
        self.sweep_at
            .store(SWEEP_MIN_LEN.max(remaining.saturating_mul(2)), Ordering::Relaxed);
        remaining
    }
}

/// Regions of one logical cache.
#[derive(Default)]
struct Regions {
    regions: DashMap<String, Region>,
}

impl Regions {
    /// Drops `region` if nothing is left in it.
    fn release_if_empty(&self, region: &str) {
        self.regions
            .remove_if(region, |_, slot| slot.entries.is_empty());
    }
}

/// `DashMap`-backed [`CacheProvider`]. Entries expire by the injected clock.
/// Expired entries are dropped on access, swept from a region once it has
/// grown past its sweep mark, or all at once by
/// [`purge_expired`](Self::purge_expired). Regions left empty are removed.
#[derive(Clone)]
pub struct MemoryCacheProvider {
    caches: Arc<DashMap<String, Arc<Regions>>>,
    clock: Arc<dyn ClockSource>,
}

impl MemoryCacheProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    #[must_use]
    pub fn with_clock(clock: Arc<dyn ClockSource>) -> Self {
        Self {
            caches: Arc::new(DashMap::new()),
            clock,
        }
    }

    /// Sweeps every region of every cache and drops the regions left empty.
    /// Returns the number of entries still held.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let mut remaining = 0;
        for cache in self.caches.iter() {
            cache.regions.retain(|_, region| {
                let live = region.sweep(now);
                remaining += live;
                live > 0
            });
        }
        remaining
    }
}

impl Default for MemoryCacheProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheProvider for MemoryCacheProvider {
    fn create_client(&self, cache_id: &str) -> Box<dyn CacheClient> {
        let regions = Arc::clone(
            self.caches
                .entry(cache_id.to_string())
                .or_default()
                .value(),
        );
        Box::new(MemoryCacheClient {
            regions,
            clock: Arc::clone(&self.clock),
        })
    }
}

struct MemoryCacheClient {
    regions: Arc<Regions>,
    clock: Arc<dyn ClockSource>,
}

#[async_trait]
impl CacheClient for MemoryCacheClient {
    async fn get(&self, key: &str, region: &str) -> anyhow::Result<Option<Value>> {
        let now = self.clock.now_ms();
        let emptied = {
            let Some(slot) = self.regions.regions.get(region) else {
                return Ok(None);
            };
            if slot
                .entries
                .remove_if(key, |_, entry| entry.expires_at_ms <= now)
                .is_none()
            {
                return Ok(slot.entries.get(key).map(|entry| entry.value.clone()));
            }
            slot.entries.is_empty()
        };
        if emptied {
            self.regions.release_if_empty(region);
        }
        Ok(None)
    }

    async fn put(
        &self,
        key: &str,
        value: Value,
        region: &str,
        ttl: Duration,
    ) -> anyhow::Result<()> {
        let now = self.clock.now_ms();
        let expires_at_ms = now.saturating_add(duration_ms(ttl));
        self.regions
            .regions
            .entry(region.to_string())
            .or_default()
            .insert(key.to_string(), Entry { value, expires_at_ms }, now);
        Ok(())
    }

    async fn remove(&self, key: &str, region: &str) -> anyhow::Result<()> {
        let emptied = match self.regions.regions.get(region) {
            Some(slot) => slot.entries.remove(key).is_some() && slot.entries.is_empty(),
            None => false,
        };
        if emptied {
            self.regions.release_if_empty(region);
        }
        Ok(())
    }

    async fn region_exists(&self, region: &str) -> anyhow::Result<bool> {
        Ok(self.regions.regions.contains_key(region))
    }

    async fn clear_region(&self, region: &str) -> anyhow::Result<()> {
        self.regions.regions.remove(region);
        Ok(())
    }
}
