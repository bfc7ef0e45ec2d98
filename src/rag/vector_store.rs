use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use super::chunker::Chunk;
use super::embeddings::EmbeddingProvider;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorEntry {
    #[serde(flatten)]
    pub chunk: Chunk,
    pub embedding: Option<Vec<f32>>,
}

/// Only entries with an embedding are kept. A new dataset gets a new index;
/// entries are never inserted or removed afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorIndex {
    pub fingerprint: String,
    pub entries: Vec<VectorEntry>,
}

impl VectorIndex {
    pub fn new(fingerprint: impl Into<String>, entries: Vec<VectorEntry>) -> Self {
        let entries = entries
            .into_iter()
            .filter(|e| e.embedding.as_ref().is_some_and(|v| !v.is_empty()))
            .collect();
        Self { fingerprint: fingerprint.into(), entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Equal scores keep chunk order. There is no score floor.
    pub fn rank(&self, query: &[f32], k: usize) -> Vec<RankedChunk> {
        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .filter_map(|(pos, entry)| {
                let embedding = entry.embedding.as_deref()?;
                Some((pos, cosine_similarity(query, embedding)))
            })
            .collect();

        scored.sort_by(|left, right| right.1.partial_cmp(&left.1).unwrap_or(Ordering::Equal));
        scored.truncate(k);

        scored
            .into_iter()
            .map(|(pos, score)| RankedChunk {
                chunk: self.entries[pos].chunk.clone(),
                score,
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RankedChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// `dot(a, b) / (|a| * |b|)`, or 0 when either vector has no magnitude or
/// the lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        return 0.0;
    }
    let score = (dot / denom) as f32;
    if score.is_finite() {
        score
    } else {
        0.0
    }
}

/// A failed query embedding yields an empty result instead of an error.
pub async fn search<E>(embedder: &E, query: &str, index: &VectorIndex, k: usize) -> Vec<RankedChunk>
where
    E: EmbeddingProvider + ?Sized,
{
    if index.is_empty() {
        tracing::debug!("Search skipped: index is empty");
        return Vec::new();
    }

    match embedder.embed(query).await {
        Ok(query_vector) => index.rank(&query_vector, k),
        Err(e) => {
            tracing::warn!("Query embedding failed, returning no results: {}", e);
            Vec::new()
        }
    }
}
