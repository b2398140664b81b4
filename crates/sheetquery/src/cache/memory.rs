//! Byte-bounded in-process LRU tier
//!
//! Each entry costs `key.len() + value.len()` bytes against the budget. An
//! insertion that does not fit evicts least-recently-used entries, but only up
//! to a per-insertion allowance. When that is not enough the entry is turned
//! away, and if usage is still at or above the re-enable ratio the tier also
//! stops accepting entries until usage falls below it. Reads keep being
//! served while the tier is disabled.

use crate::config::MemoryTierConfig;
use lru::LruCache;
use serde::Serialize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug)]
struct Entry {
    value: String,
    size: u64,
    expires_at: Instant,
}

#[derive(Debug)]
struct Inner {
    entries: LruCache<String, Entry>,
    bytes_used: u64,
    enabled: bool,
    hits: u64,
    misses: u64,
    evictions: u64,
}

/// Snapshot of the memory tier's counters
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStats {
    pub enabled: bool,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub bytes_used: u64,
    pub max_bytes: u64,
    pub usage_percent: f64,
    pub entries: usize,
    pub evictions: u64,
}

/// Outcome of [`MemoryTier::set`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Stored,
    /// The tier is disabled under memory pressure
    Disabled,
    /// Eviction could not make room. The tier is disabled as well when
    /// usage is still at or above the re-enable mark.
    Rejected,
}

pub struct MemoryTier {
    inner: Mutex<Inner>,
    max_bytes: u64,
    reenable_below: u64,
    eviction_allowance: u64,
    default_ttl: Duration,
}

impl MemoryTier {
    #[must_use]
    pub fn new(config: &MemoryTierConfig) -> Self {
        let max = config.max_bytes as f64;
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::unbounded(),
                bytes_used: 0,
                enabled: true,
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
            max_bytes: config.max_bytes,
            reenable_below: (max * config.reenable_ratio) as u64,
            eviction_allowance: (max * config.eviction_allowance) as u64,
            default_ttl: config.default_ttl,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Look up a live entry, refreshing its recency
    pub fn get(&self, key: &str) -> Option<String> {
        let mut inner = self.lock();
        let now = Instant::now();
        let expired = match inner.entries.get(key) {
            Some(entry) if entry.expires_at > now => {
                let value = entry.value.clone();
                inner.hits += 1;
                return Some(value);
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            self.remove_locked(&mut inner, key);
        }
        inner.misses += 1;
        None
    }

    /// Store `value` under `key` for `ttl` (the tier default when `None`)
    pub fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Admission {
        let size = (key.len() + value.len()) as u64;
        let expires_at = Instant::now() + ttl.unwrap_or(self.default_ttl);
        let mut inner = self.lock();

        // Replacing an entry releases its bytes first
        self.remove_locked(&mut inner, key);

        if !inner.enabled {
            if inner.bytes_used >= self.reenable_below {
                return Admission::Disabled;
            }
            self.reenable_locked(&mut inner);
        }

        if inner.bytes_used + size > self.max_bytes {
            self.purge_expired_locked(&mut inner);
        }

        let mut freed = 0;
        while inner.bytes_used + size > self.max_bytes && freed < self.eviction_allowance {
            let Some((_, evicted)) = inner.entries.pop_lru() else {
                break;
            };
            inner.bytes_used = inner.bytes_used.saturating_sub(evicted.size);
            inner.evictions += 1;
            freed += evicted.size;
        }

        if inner.bytes_used + size > self.max_bytes {
            // Only pressure disables the tier; an entry that is simply too
            // large is turned away on its own
            if inner.bytes_used >= self.reenable_below {
                inner.enabled = false;
                diagnostics::log_warn!(
                    "Memory cache disabled: {used} of {max} bytes in use, entry needs {size}",
                    used: inner.bytes_used,
                    max: self.max_bytes,
                    size: size
                );
            } else {
                diagnostics::log_debug!(
                    "Memory cache rejected a {size} byte entry",
                    size: size
                );
            }
            return Admission::Rejected;
        }

        _ = inner.entries.put(
            key.to_string(),
            Entry {
                value,
                size,
                expires_at,
            },
        );
        inner.bytes_used += size;
        Admission::Stored
    }

    /// Remove one key. Returns true when it was present.
    pub fn delete(&self, key: &str) -> bool {
        let mut inner = self.lock();
        let present = inner.entries.contains(key);
        self.remove_locked(&mut inner, key);
        present
    }

    /// Remove every key starting with `prefix`. Returns the count removed.
    pub fn remove_prefix(&self, prefix: &str) -> usize {
        let mut inner = self.lock();
        let keys: Vec<String> = inner
            .entries
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &keys {
            self.remove_locked(&mut inner, key);
        }
        keys.len()
    }

    /// Drop expired entries now instead of on their next lookup
    pub fn purge_expired(&self) -> usize {
        let mut inner = self.lock();
        self.purge_expired_locked(&mut inner)
    }

    /// Drop everything and re-enable the tier
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.bytes_used = 0;
        inner.enabled = true;
    }

    pub fn reset_stats(&self) {
        let mut inner = self.lock();
        inner.hits = 0;
        inner.misses = 0;
        inner.evictions = 0;
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.lock().enabled
    }

    #[must_use]
    pub fn stats(&self) -> MemoryStats {
        let inner = self.lock();
        MemoryStats {
            enabled: inner.enabled,
            hits: inner.hits,
            misses: inner.misses,
            hit_rate: hit_rate(inner.hits, inner.misses),
            bytes_used: inner.bytes_used,
            max_bytes: self.max_bytes,
            usage_percent: if self.max_bytes == 0 {
                0.0
            } else {
                inner.bytes_used as f64 / self.max_bytes as f64 * 100.0
            },
            entries: inner.entries.len(),
            evictions: inner.evictions,
        }
    }

    fn purge_expired_locked(&self, inner: &mut Inner) -> usize {
        let now = Instant::now();
        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, e)| e.expires_at <= now)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            self.remove_locked(inner, key);
        }
        expired.len()
    }

    fn remove_locked(&self, inner: &mut Inner, key: &str) {
        if let Some(entry) = inner.entries.pop(key) {
            inner.bytes_used = inner.bytes_used.saturating_sub(entry.size);
            if !inner.enabled && inner.bytes_used < self.reenable_below {
                self.reenable_locked(inner);
            }
        }
    }

    fn reenable_locked(&self, inner: &mut Inner) {
        inner.enabled = true;
        diagnostics::log_info!(
            "Memory cache re-enabled at {used} bytes",
            used: inner.bytes_used
        );
    }
}

/// Hits over lookups as a percentage; zero before any lookup
#[must_use]
pub fn hit_rate(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64 * 100.0
    }
}
