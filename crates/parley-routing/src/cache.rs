//! Route memoization using moka
//!
//! Verdicts are keyed by user and normalized message. Semantic verdicts are
//! expensive to recompute and live longer than the cheaper layers' ones.

use moka::future::Cache;
use moka::Expiry;
use parley_core::{RouteLayer, RouteResult, UserId};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Cache performance counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouteCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entry_count: u64,
}

impl RouteCacheStats {
    /// Fraction of lookups served from cache
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Per-entry TTL chosen by the layer that produced the verdict
struct LayerExpiry {
    ttl: Duration,
    semantic_ttl: Duration,
}

impl Expiry<String, RouteResult> for LayerExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &RouteResult,
        _created_at: Instant,
    ) -> Option<Duration> {
        match value.layer {
            RouteLayer::Semantic => Some(self.semantic_ttl),
            _ => Some(self.ttl),
        }
    }
}

/// Cache key: `route:` + hex of the first 8 bytes of the SHA-256 digest
#[must_use]
pub fn cache_key(user: UserId, normalized: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(user.0.to_le_bytes());
    hasher.update([0u8]);
    hasher.update(normalized.as_bytes());
    let digest = hasher.finalize();
    format!("route:{}", hex::encode(&digest[..8]))
}

/// Memoized router verdicts
pub struct RouteCache {
    inner: Cache<String, RouteResult>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl RouteCache {
    /// Create cache with capacity and per-layer TTLs
    #[must_use]
    pub fn new(max_capacity: u64, ttl: Duration, semantic_ttl: Duration) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(max_capacity)
                .expire_after(LayerExpiry { ttl, semantic_ttl })
                .build(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Look up a verdict, counting the hit or miss
    pub async fn get(&self, key: &str) -> Option<RouteResult> {
        let found = self.inner.get(key).await;
        let counter = if found.is_some() {
            &self.hits
        } else {
            &self.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    pub async fn insert(&self, key: String, verdict: RouteResult) {
        self.inner.insert(key, verdict).await;
    }

    pub async fn invalidate(&self, key: &str) {
        self.inner.invalidate(key).await;
    }

    pub fn invalidate_all(&self) {
        self.inner.invalidate_all();
    }

    #[must_use]
    pub fn stats(&self) -> RouteCacheStats {
        RouteCacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count: self.inner.entry_count(),
        }
    }
}

impl std::fmt::Debug for RouteCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteCache")
            .field("stats", &self.stats())
            .finish()
    }
}
