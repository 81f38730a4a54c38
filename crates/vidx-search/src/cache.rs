//! Query embedding cache
//!
//! Repeated searches ("red car", "goal") skip the embedding provider.
//! Uses the moka crate for a concurrent, async-aware cache with TTL.
//!
//! Author: hephaex@gmail.com

use moka::future::Cache;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use vidx_core::{AiConfig, Result};

// ============================================================================
// Cache Configuration
// ============================================================================

/// Configuration for cache behavior
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of cached query vectors
    pub max_capacity: u64,

    /// Time-to-live for entries (in seconds)
    pub ttl_seconds: u64,
}

impl CacheConfig {
    pub fn from_ai_config(config: &AiConfig) -> Self {
        Self {
            max_capacity: config.query_cache_capacity,
            ttl_seconds: config.query_cache_ttl_secs,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::from_ai_config(&AiConfig::default())
    }
}

// ============================================================================
// Query Embedding Cache
// ============================================================================

/// Cache for query-side embeddings, keyed by normalized query text
#[derive(Clone)]
pub struct QueryEmbeddingCache {
    cache: Cache<u64, Arc<Vec<f32>>>,
    stats: Arc<CacheStats>,
}

impl QueryEmbeddingCache {
    pub fn new() -> Self {
        Self::with_config(&CacheConfig::default())
    }

    pub fn with_config(config: &CacheConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.max_capacity)
            .time_to_live(Duration::from_secs(config.ttl_seconds))
            .build();

        Self {
            cache,
            stats: Arc::new(CacheStats::new("query_embedding")),
        }
    }

    pub async fn get(&self, query: &str) -> Option<Arc<Vec<f32>>> {
        let result = self.cache.get(&hash_text(query)).await;
        if result.is_some() {
            self.stats.record_hit();
        } else {
            self.stats.record_miss();
        }
        result
    }

    pub async fn put(&self, query: &str, embedding: Vec<f32>) -> Arc<Vec<f32>> {
        let value = Arc::new(embedding);
        self.cache.insert(hash_text(query), value.clone()).await;
        self.stats.record_write();
        value
    }

    /// Cached vector for `query`, computing and storing it on a miss.
    /// Failures are not cached.
    pub async fn get_or_embed<F, Fut>(&self, query: &str, embed: F) -> Result<Arc<Vec<f32>>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<f32>>>,
    {
        if let Some(hit) = self.get(query).await {
            return Ok(hit);
        }
        let embedding = embed().await?;
        Ok(self.put(query, embedding).await)
    }

    /// Clear all cached vectors (e.g. after an embedding provider change)
    pub async fn clear(&self) {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
        self.stats.reset();
    }

    pub fn stats(&self) -> Arc<CacheStats> {
        Arc::clone(&self.stats)
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

impl Default for QueryEmbeddingCache {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Cache Statistics
// ============================================================================

/// Statistics for cache performance monitoring
#[derive(Debug)]
pub struct CacheStats {
    name: String,
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
}

impl CacheStats {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.writes.store(0, Ordering::Relaxed);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Calculate hit rate (0.0 - 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits() + self.misses();
        if total == 0 {
            0.0
        } else {
            self.hits() as f64 / total as f64
        }
    }

    pub fn report(&self) -> CacheStatsReport {
        CacheStatsReport {
            name: self.name.clone(),
            hits: self.hits(),
            misses: self.misses(),
            writes: self.writes(),
            hit_rate: self.hit_rate(),
        }
    }
}

/// Serializable cache statistics report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStatsReport {
    pub name: String,
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    /// Hit rate (0.0 - 1.0)
    pub hit_rate: f64,
}

/// Queries differing only in surrounding whitespace share an entry. Case is
/// kept: the embedder sees the query as typed.
fn hash_text(text: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    text.trim().hash(&mut hasher);
    hasher.finish()
}
