//! Two-tier read cache
//!
//! Lookups try the in-process memory tier, then the optional distributed tier.
//! A distributed hit is copied back into memory. Nothing in here ever fails a
//! read: a broken distributed tier is logged and counted as a miss.

mod distributed;
mod key;
mod memory;

pub use distributed::{DistributedTier, RedisTier};
pub use key::{UNFILTERED, cache_key, filter_digest, namespace_prefix};
pub use memory::{Admission, MemoryStats, MemoryTier, hit_rate};

use crate::config::CacheConfig;
use crate::error::CacheError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributedStats {
    pub enabled: bool,
    pub connected: bool,
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
    pub hit_rate: f64,
    /// The shared tier does not report its footprint
    pub bytes_used: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverallStats {
    pub total_queries: u64,
    pub hits: u64,
    /// Lookups that missed every tier
    pub misses: u64,
    pub hit_rate: f64,
    pub last_reset: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub enabled: bool,
    pub memory: MemoryStats,
    pub distributed: DistributedStats,
    pub overall: OverallStats,
}

#[derive(Default)]
struct Counters {
    queries: AtomicU64,
    misses: AtomicU64,
    remote_hits: AtomicU64,
    remote_misses: AtomicU64,
    remote_errors: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        _ = counter.fetch_add(1, Ordering::Relaxed);
    }

    fn reset(&self) {
        for c in [
            &self.queries,
            &self.misses,
            &self.remote_hits,
            &self.remote_misses,
            &self.remote_errors,
        ] {
            c.store(0, Ordering::Relaxed);
        }
    }
}

pub struct TieredCache {
    enabled: bool,
    key_prefix: String,
    memory: MemoryTier,
    distributed: RwLock<Option<Arc<dyn DistributedTier>>>,
    distributed_ttl: Duration,
    counters: Counters,
    last_reset: Mutex<DateTime<Utc>>,
}

impl TieredCache {
    /// Build the tiers from configuration, connecting the distributed tier
    /// when enabled. A failed connection leaves the cache memory-only.
    pub async fn initialize(config: &CacheConfig) -> Self {
        let mut distributed: Option<Arc<dyn DistributedTier>> = None;
        if config.enabled && config.distributed.enabled {
            match RedisTier::connect(&config.distributed).await {
                Ok(tier) => distributed = Some(Arc::new(tier)),
                Err(e) => {
                    diagnostics::log_warn!(
                        "Distributed cache unavailable, continuing memory-only: {error}",
                        error: e
                    );
                }
            }
        }
        Self::with_distributed(config, distributed)
    }

    /// Build with an explicit distributed tier (or none)
    #[must_use]
    pub fn with_distributed(
        config: &CacheConfig,
        distributed: Option<Arc<dyn DistributedTier>>,
    ) -> Self {
        Self {
            enabled: config.enabled,
            key_prefix: config.key_prefix.clone(),
            memory: MemoryTier::new(&config.memory),
            distributed: RwLock::new(distributed),
            distributed_ttl: config.distributed.ttl,
            counters: Counters::default(),
            last_reset: Mutex::new(Utc::now()),
        }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    #[must_use]
    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    #[must_use]
    pub fn memory(&self) -> &MemoryTier {
        &self.memory
    }

    /// Key for one page of a filtered read of `dataset_id`
    #[must_use]
    pub fn key_for(&self, dataset_id: &str, page: u64, limit: u64, filter: &serde_json::Value) -> String {
        cache_key(&self.key_prefix, dataset_id, page, limit, filter)
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        if !self.enabled {
            return None;
        }
        Counters::bump(&self.counters.queries);

        if let Some(value) = self.memory.get(key) {
            diagnostics::log_debug!("Memory cache hit {key}", key: key);
            return Some(value);
        }

        if let Some(tier) = self.remote() {
            match tier.get(key).await {
                Ok(Some(value)) => {
                    Counters::bump(&self.counters.remote_hits);
                    diagnostics::log_debug!("Distributed cache hit {key}", key: key);
                    _ = self.memory.set(key, value.clone(), None);
                    return Some(value);
                }
                Ok(None) => Counters::bump(&self.counters.remote_misses),
                Err(e) => {
                    Counters::bump(&self.counters.remote_errors);
                    Counters::bump(&self.counters.remote_misses);
                    diagnostics::log_warn!("Distributed cache get failed for {key}: {error}", key: key, error: e);
                }
            }
        }

        Counters::bump(&self.counters.misses);
        diagnostics::log_debug!("Cache miss {key}", key: key);
        None
    }

    /// Store in both tiers. Returns true when any tier accepted the value.
    pub async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> bool {
        if !self.enabled {
            return false;
        }
        let remote_ttl = ttl.unwrap_or(self.distributed_ttl);
        let mut stored = false;
        if let Some(tier) = self.remote() {
            match tier.set_ex(key, &value, remote_ttl).await {
                Ok(()) => stored = true,
                Err(e) => {
                    Counters::bump(&self.counters.remote_errors);
                    diagnostics::log_warn!("Distributed cache set failed for {key}: {error}", key: key, error: e);
                }
            }
        }
        let admitted = self.memory.set(key, value, ttl) == Admission::Stored;
        stored || admitted
    }

    /// Typed lookup; an undecodable value counts as a miss
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let text = self.get(key).await?;
        match decode(&text) {
            Ok(value) => Some(value),
            Err(e) => {
                diagnostics::log_warn!("Discarding undecodable cache entry {key}: {error}", key: key, error: e);
                _ = self.delete(key).await;
                None
            }
        }
    }

    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>) -> bool {
        match encode(value) {
            Ok(text) => self.set(key, text, ttl).await,
            Err(e) => {
                diagnostics::log_warn!("Cannot serialize cache entry {key}: {error}", key: key, error: e);
                false
            }
        }
    }

    pub async fn delete(&self, key: &str) -> bool {
        if !self.enabled {
            return false;
        }
        let removed = self.memory.delete(key);
        if let Some(tier) = self.remote() {
            if let Err(e) = tier.del(&[key.to_string()]).await {
                Counters::bump(&self.counters.remote_errors);
                diagnostics::log_warn!("Distributed cache delete failed for {key}: {error}", key: key, error: e);
            }
        }
        removed
    }

    /// Drop every cached read of `dataset_id` from both tiers
    pub async fn invalidate_namespace(&self, dataset_id: &str) -> usize {
        if !self.enabled {
            return 0;
        }
        let prefix = namespace_prefix(&self.key_prefix, dataset_id);
        let mut removed = self.memory.remove_prefix(&prefix);
        removed += self.remove_remote_matching(&format!("{prefix}*")).await;
        diagnostics::log_info!(
            "Invalidated {removed} cache entries for {dataset_id}",
            removed: removed,
            dataset_id: dataset_id
        );
        removed
    }

    /// Drop everything under this cache's key prefix
    pub async fn clear_all(&self) {
        self.memory.clear();
        if self.enabled {
            _ = self
                .remove_remote_matching(&format!("{}*", self.key_prefix))
                .await;
        }
        diagnostics::log_info!("Cleared all cache entries");
    }

    async fn remove_remote_matching(&self, pattern: &str) -> usize {
        let Some(tier) = self.remote() else {
            return 0;
        };
        let result = match tier.keys(pattern).await {
            Ok(keys) => tier.del(&keys).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(n) => usize::try_from(n).unwrap_or(usize::MAX),
            Err(e) => {
                Counters::bump(&self.counters.remote_errors);
                diagnostics::log_warn!("Distributed cache invalidation failed for {pattern}: {error}", pattern: pattern, error: e);
                0
            }
        }
    }

    pub fn purge_expired(&self) -> usize {
        self.memory.purge_expired()
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let c = &self.counters;
        let queries = c.queries.load(Ordering::Relaxed);
        let misses = c.misses.load(Ordering::Relaxed);
        let remote_hits = c.remote_hits.load(Ordering::Relaxed);
        let remote_misses = c.remote_misses.load(Ordering::Relaxed);
        let hits = queries.saturating_sub(misses);
        let last_reset = *self.last_reset.lock().unwrap_or_else(PoisonError::into_inner);
        let remote = self.remote();

        CacheStats {
            enabled: self.enabled,
            memory: self.memory.stats(),
            distributed: DistributedStats {
                enabled: remote.is_some(),
                connected: remote.as_ref().is_some_and(|t| t.is_connected()),
                hits: remote_hits,
                misses: remote_misses,
                errors: c.remote_errors.load(Ordering::Relaxed),
                hit_rate: hit_rate(remote_hits, remote_misses),
                bytes_used: None,
            },
            overall: OverallStats {
                total_queries: queries,
                hits,
                misses,
                hit_rate: hit_rate(hits, misses),
                last_reset,
            },
        }
    }

    pub fn reset_stats(&self) {
        self.counters.reset();
        self.memory.reset_stats();
        *self.last_reset.lock().unwrap_or_else(PoisonError::into_inner) = Utc::now();
    }

    fn remote(&self) -> Option<Arc<dyn DistributedTier>> {
        self.distributed
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Release both tiers. The cache keeps working memory-only afterwards.
    pub fn close(&self) {
        self.memory.clear();
        let previous = self
            .distributed
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if previous.is_some() {
            diagnostics::log_info!("Closed distributed cache connection");
        }
    }
}

fn decode<T: DeserializeOwned>(text: &str) -> Result<T, CacheError> {
    Ok(serde_json::from_str(text)?)
}

fn encode<T: Serialize>(value: &T) -> Result<String, CacheError> {
    Ok(serde_json::to_string(value)?)
}
