use std::time::Duration;

use futures::future::join_all;

use super::chunker::Chunk;
use super::embeddings::EmbeddingProvider;
use super::vector_store::VectorEntry;
use crate::config::IndexSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPolicy {
    pub batch_size: usize,
    pub delay: Duration,
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self { batch_size: 5, delay: Duration::from_millis(1000) }
    }
}

impl From<&IndexSettings> for BatchPolicy {
    fn from(settings: &IndexSettings) -> Self {
        Self {
            batch_size: settings.batch_size.max(1),
            delay: settings.batch_delay(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildProgress {
    pub completed: usize,
    pub total: usize,
}

impl BuildProgress {
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.completed as f64 / self.total as f64
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BuildOutcome {
    pub entries: Vec<VectorEntry>,
    /// Chunks dropped because their embedding failed.
    pub failed: usize,
}

/// Embeds every chunk, `batch_size` calls at a time with `delay` between
/// batches. Failed chunks are dropped and not retried.
///
/// `on_progress` fires after each batch; the last report is `total/total`.
pub async fn build_entries<E, F>(
    embedder: &E,
    chunks: Vec<Chunk>,
    policy: BatchPolicy,
    mut on_progress: F,
) -> BuildOutcome
where
    E: EmbeddingProvider + ?Sized,
    F: FnMut(BuildProgress),
{
    let total = chunks.len();
    let batch_size = policy.batch_size.max(1);
    let mut entries = Vec::with_capacity(total);
    let mut failed = 0usize;
    let mut completed = 0usize;

    if total == 0 {
        on_progress(BuildProgress { completed: 0, total: 0 });
        return BuildOutcome { entries, failed };
    }

    let batch_count = total.div_ceil(batch_size);
    tracing::info!("Embedding {} chunks in {} batches of {}", total, batch_count, batch_size);

    let mut remaining = chunks.into_iter().peekable();
    let mut batch_no = 0usize;
    while remaining.peek().is_some() {
        let batch: Vec<Chunk> = remaining.by_ref().take(batch_size).collect();
        batch_no += 1;

        // join_all yields results in input order regardless of completion order.
        let results = join_all(batch.iter().map(|chunk| embedder.embed(&chunk.text))).await;

        for (chunk, result) in batch.into_iter().zip(results) {
            match result {
                Ok(embedding) => entries.push(VectorEntry { chunk, embedding: Some(embedding) }),
                Err(e) => {
                    tracing::warn!("Dropping chunk {} from index: {}", chunk.id, e);
                    failed += 1;
                }
            }
        }

        completed = (completed + batch_size).min(total);
        on_progress(BuildProgress { completed, total });
        tracing::debug!("Batch {}/{} done ({}/{})", batch_no, batch_count, completed, total);

        if remaining.peek().is_some() && !policy.delay.is_zero() {
            tokio::time::sleep(policy.delay).await;
        }
    }

    tracing::info!("Embedding finished: {} embedded, {} failed", entries.len(), failed);
    BuildOutcome { entries, failed }
}
