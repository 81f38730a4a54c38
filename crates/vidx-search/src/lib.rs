//! vidx Search - Semantic timestamp search
//!
//! A query is embedded with the same provider that indexed the video, the
//! video's collection is searched for nearest frames and transcript
//! segments, and the candidates are ranked:
//! threshold, same-type temporal dedup, sort, truncate.
//!
//! Author: hephaex@gmail.com

pub mod cache;
pub mod ranking;

pub use cache::{CacheConfig, CacheStatsReport, QueryEmbeddingCache};
pub use ranking::{rank, thumbnail_url, RankParams};

use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;
use vidx_ai::AiGateway;
use vidx_core::{Result, SearchConfig, SearchResponse, VidxError};
use vidx_vector::IndexManager;

/// Search over indexed videos
pub struct SearchEngine {
    gateway: Arc<AiGateway>,
    index: Arc<IndexManager>,
    config: SearchConfig,
    cache: QueryEmbeddingCache,
}

impl SearchEngine {
    pub fn new(gateway: Arc<AiGateway>, index: Arc<IndexManager>, config: SearchConfig) -> Self {
        Self {
            gateway,
            index,
            config,
            cache: QueryEmbeddingCache::new(),
        }
    }

    pub fn with_cache(mut self, cache: QueryEmbeddingCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    pub fn cache_stats(&self) -> CacheStatsReport {
        self.cache.stats().report()
    }

    /// Check the query and resolve `top_k`. Returns the trimmed query.
    pub fn validate<'q>(&self, query: &'q str, top_k: Option<usize>) -> Result<(&'q str, usize)> {
        let query = query.trim();
        let length = query.chars().count();
        if length == 0 {
            return Err(VidxError::Validation("Query must not be empty".to_string()));
        }
        if length > self.config.max_query_length {
            return Err(VidxError::Validation(format!(
                "Query exceeds {} characters",
                self.config.max_query_length
            )));
        }

        let top_k = top_k.unwrap_or(self.config.default_top_k);
        if top_k == 0 || top_k > self.config.max_top_k {
            return Err(VidxError::Validation(format!(
                "top_k must be between 1 and {}",
                self.config.max_top_k
            )));
        }
        Ok((query, top_k))
    }

    /// Find the moments of a video matching `query`
    pub async fn search(
        &self,
        video_id: Uuid,
        query: &str,
        top_k: Option<usize>,
    ) -> Result<SearchResponse> {
        let started = Instant::now();
        let (query, top_k) = self.validate(query, top_k)?;

        let gateway = &self.gateway;
        let vector = self
            .cache
            .get_or_embed(query, || gateway.embed_query(query))
            .await?;

        let limit = (top_k * self.config.candidate_multiplier).max(self.config.min_candidates);
        let candidates = self.index.query(video_id, &vector, limit).await?;
        let fetched = candidates.len();

        let results = rank(
            candidates,
            &RankParams {
                min_score: self.config.min_score,
                dedup_window: self.config.dedup_window_secs,
                top_k,
            },
        );

        tracing::info!(
            video_id = %video_id,
            top_k,
            candidates = fetched,
            results = results.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Search completed"
        );

        Ok(SearchResponse {
            query: query.to_string(),
            video_id,
            total_results: results.len(),
            results,
        })
    }
}
