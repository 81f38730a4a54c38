//! Application state management
//!
//! Author: hephaex@gmail.com

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use vidx_core::AppConfig;
use vidx_pipeline::{Orchestrator, Services};
use vidx_search::{CacheConfig, QueryEmbeddingCache, SearchEngine};
use vidx_vector::IndexManager;

/// Latency histogram buckets
#[derive(Debug, Default, Clone)]
pub struct LatencyBuckets {
    pub under_10ms: u64,
    pub ms_10_50: u64,
    pub ms_50_100: u64,
    pub ms_100_500: u64,
    pub ms_500_1000: u64,
    pub over_1s: u64,
}

impl LatencyBuckets {
    fn observe(&mut self, latency_us: u64) {
        match latency_us {
            0..=9_999 => self.under_10ms += 1,
            10_000..=49_999 => self.ms_10_50 += 1,
            50_000..=99_999 => self.ms_50_100 += 1,
            100_000..=499_999 => self.ms_100_500 += 1,
            500_000..=999_999 => self.ms_500_1000 += 1,
            _ => self.over_1s += 1,
        }
    }
}

/// Per-endpoint request metrics
#[derive(Debug, Default, Clone)]
pub struct EndpointMetrics {
    pub status_counts: HashMap<u16, u64>,
    pub latency_count: u64,
    pub total_latency_us: u64,
    pub latency_buckets: LatencyBuckets,
}

/// Application state shared across handlers
pub struct AppState {
    /// Application configuration
    pub config: AppConfig,
    /// Store, gateway, index and orchestrator
    pub services: Services,
    /// Query side of the index
    pub search: Arc<SearchEngine>,
    /// Server start time
    pub start_time: Instant,
    /// Request counter
    pub request_count: AtomicU64,
    /// Ready status
    pub is_ready: AtomicBool,
    /// Metrics keyed by normalized endpoint
    pub metrics: RwLock<HashMap<String, EndpointMetrics>>,
}

impl AppState {
    /// Create application state over assembled services
    pub fn new(config: AppConfig, services: Services) -> Self {
        let cache = QueryEmbeddingCache::with_config(&CacheConfig::from_ai_config(&config.ai));
        let search = Arc::new(
            SearchEngine::new(
                services.gateway.clone(),
                services.index.clone(),
                config.search.clone(),
            )
            .with_cache(cache),
        );
        Self {
            config,
            services,
            search,
            start_time: Instant::now(),
            request_count: AtomicU64::new(0),
            is_ready: AtomicBool::new(true),
            metrics: RwLock::new(HashMap::new()),
        }
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.services.orchestrator
    }

    pub fn index(&self) -> &Arc<IndexManager> {
        &self.services.index
    }

    /// Increment request counter
    pub fn increment_requests(&self) -> u64 {
        self.request_count.fetch_add(1, Ordering::SeqCst)
    }

    /// Get total request count
    pub fn get_request_count(&self) -> u64 {
        self.request_count.load(Ordering::SeqCst)
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Check if service is ready
    pub fn is_ready(&self) -> bool {
        self.is_ready.load(Ordering::SeqCst)
    }

    /// Set ready status
    pub fn set_ready(&self, ready: bool) {
        self.is_ready.store(ready, Ordering::SeqCst);
    }

    /// Record one finished request
    pub async fn record_request(&self, endpoint: String, status: u16, latency_us: u64) {
        let mut metrics = self.metrics.write().await;
        let entry = metrics.entry(endpoint).or_default();
        *entry.status_counts.entry(status).or_insert(0) += 1;
        entry.latency_count += 1;
        entry.total_latency_us += latency_us;
        entry.latency_buckets.observe(latency_us);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_buckets() {
        let mut buckets = LatencyBuckets::default();
        for us in [500, 9_999, 10_000, 75_000, 250_000, 750_000, 2_000_000] {
            buckets.observe(us);
        }
        assert_eq!(buckets.under_10ms, 2);
        assert_eq!(buckets.ms_10_50, 1);
        assert_eq!(buckets.ms_50_100, 1);
        assert_eq!(buckets.ms_100_500, 1);
        assert_eq!(buckets.ms_500_1000, 1);
        assert_eq!(buckets.over_1s, 1);
    }
}
