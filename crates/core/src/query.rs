use chrono::{DateTime, Utc};

use crate::models::SearchFilter;

/// Results requested from the index per requested result.
pub const OVERSAMPLE_FACTOR: usize = 3;
/// Lower bound on approximate nearest-neighbour candidates evaluated per shard.
pub const MIN_NUM_CANDIDATES: usize = 100;

/// Backend-neutral description of one hybrid lexical + vector search.
#[derive(Debug, Clone, PartialEq)]
pub struct HybridQuery {
    /// Every whitespace-separated term of `text` must match the content field.
    pub text: String,
    pub vector: Vec<f32>,
    pub effective_at: DateTime<Utc>,
    /// Each tag becomes its own term filter.
    pub tags: Vec<String>,
    /// Hits requested from the index and nearest neighbours returned (`k`).
    pub size: usize,
    pub num_candidates: usize,
}

impl HybridQuery {
    pub fn new(text: impl Into<String>, vector: Vec<f32>, filter: &SearchFilter) -> Self {
        let size = filter.top_k.saturating_mul(OVERSAMPLE_FACTOR);
        Self {
            text: text.into(),
            vector,
            effective_at: filter.effective_at,
            tags: filter.tags.clone(),
            size,
            num_candidates: size.saturating_mul(2).max(MIN_NUM_CANDIDATES),
        }
    }

    pub fn terms(&self) -> Vec<String> {
        self.text
            .split_whitespace()
            .map(str::to_lowercase)
            .collect()
    }
}
