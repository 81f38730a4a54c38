//! Result ranking: threshold, same-type temporal dedup, order, truncate

use vidx_core::{Modality, SearchResult};
use vidx_vector::VectorHit;

/// Ranking knobs for one request
#[derive(Debug, Clone, Copy)]
pub struct RankParams {
    pub min_score: f32,
    /// Seconds; a same-type hit this close to a kept one is a duplicate
    pub dedup_window: f64,
    pub top_k: usize,
}

/// Public URL of a stored thumbnail
pub fn thumbnail_url(file_name: &str) -> String {
    format!("/thumbnails/{file_name}")
}

/// Higher score first, earlier timestamp on ties
fn by_score_then_time(a: &VectorHit, b: &VectorHit) -> std::cmp::Ordering {
    b.score
        .total_cmp(&a.score)
        .then(a.timestamp.total_cmp(&b.timestamp))
}

/// Turn raw nearest-neighbour hits into the final result list.
///
/// Order of operations is fixed: clamp to [0, 1], drop below `min_score`,
/// greedy dedup by score within each modality, sort, truncate.
pub fn rank(hits: Vec<VectorHit>, params: &RankParams) -> Vec<SearchResult> {
    let mut candidates: Vec<VectorHit> = hits
        .into_iter()
        .map(|mut hit| {
            hit.score = if hit.score.is_nan() {
                0.0
            } else {
                hit.score.clamp(0.0, 1.0)
            };
            hit
        })
        .filter(|hit| hit.score >= params.min_score)
        .collect();
    candidates.sort_by(by_score_then_time);

    let mut kept: Vec<VectorHit> = Vec::with_capacity(candidates.len());
    for hit in candidates {
        let duplicate = kept.iter().any(|k| {
            k.modality == hit.modality && (k.timestamp - hit.timestamp).abs() <= params.dedup_window
        });
        if !duplicate {
            kept.push(hit);
        }
    }

    // Already in final order: greedy selection preserves the sort
    kept.truncate(params.top_k);
    kept.into_iter().map(into_result).collect()
}

fn into_result(hit: VectorHit) -> SearchResult {
    let (thumbnail_url, transcript_snippet) = match hit.modality {
        Modality::Visual => (hit.thumbnail.as_deref().map(thumbnail_url), None),
        Modality::Audio => (None, hit.text),
    };
    SearchResult {
        timestamp: hit.timestamp,
        score: hit.score,
        modality: hit.modality,
        thumbnail_url,
        transcript_snippet,
    }
}
