use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use super::chunker::build_chunks;
use super::embeddings::EmbeddingProvider;
use super::index_builder::{build_entries, BatchPolicy};
use super::index_cache::IndexCache;
use super::vector_store::VectorIndex;
use super::Dataset;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexStatus {
    pub is_indexing: bool,
    pub completed: usize,
    pub total: usize,
    pub total_entries: usize,
    pub failed_embeddings: usize,
    pub fingerprint: Option<String>,
    pub from_cache: bool,
    pub last_indexed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone)]
pub enum QueryIndex {
    Ready(Arc<VectorIndex>),
    /// The first build for the dataset is running and nothing is committed.
    Building,
    /// The build failed and nothing is committed.
    Unavailable,
}

/// Builds never touch the committed index; a finished build is swapped in
/// whole. Searches running meanwhile keep their `Arc` to the old one.
pub struct IndexManager {
    status: Mutex<IndexStatus>,
    progress: AtomicUsize,
    current: RwLock<Option<Arc<VectorIndex>>>,
    wanted: Mutex<Option<String>>,
    embeddings: Arc<dyn EmbeddingProvider>,
    cache: IndexCache,
    policy: BatchPolicy,
}

impl IndexManager {
    pub fn new(
        embeddings: Arc<dyn EmbeddingProvider>,
        cache: IndexCache,
        policy: BatchPolicy,
    ) -> Self {
        Self {
            status: Mutex::new(IndexStatus::default()),
            progress: AtomicUsize::new(0),
            current: RwLock::new(None),
            wanted: Mutex::new(None),
            embeddings,
            cache,
            policy,
        }
    }

    pub async fn get_status(&self) -> IndexStatus {
        let mut status = self.status.lock().await.clone();
        if status.is_indexing {
            status.completed = self.progress.load(Ordering::Acquire);
        }
        status
    }

    pub async fn is_indexing(&self) -> bool {
        self.status.lock().await.is_indexing
    }

    pub async fn current(&self) -> Option<Arc<VectorIndex>> {
        self.current.read().await.clone()
    }

    /// Marks `fingerprint` as the dataset builds should be committed for.
    /// Builds for any other dataset finish but are discarded.
    pub async fn select_dataset(&self, fingerprint: &str) {
        *self.wanted.lock().await = Some(fingerprint.to_string());
    }

    pub async fn ensure_index(&self, dataset: &Dataset) -> Result<Arc<VectorIndex>> {
        if let Some(index) = self.current().await {
            if index.fingerprint == dataset.fingerprint {
                return Ok(index);
            }
        }
        self.run_index(dataset, false).await
    }

    /// Drops the cache slot and builds from scratch. Fails without touching
    /// the slot when a build is already running.
    pub async fn rebuild(&self, dataset: &Dataset) -> Result<Arc<VectorIndex>> {
        self.run_index(dataset, true).await
    }

    /// Index a query should run against. While a build is running the last
    /// committed index is used, even if it belongs to the previous dataset.
    pub async fn index_for_query(&self, dataset: &Dataset) -> QueryIndex {
        if let Some(index) = self.current().await {
            if index.fingerprint == dataset.fingerprint || self.is_indexing().await {
                return QueryIndex::Ready(index);
            }
        } else if self.is_indexing().await {
            return QueryIndex::Building;
        }

        match self.ensure_index(dataset).await {
            Ok(index) => QueryIndex::Ready(index),
            Err(e) => {
                tracing::warn!("Index unavailable for query: {}", e);
                match self.current().await {
                    Some(index) => QueryIndex::Ready(index),
                    None if self.is_indexing().await => QueryIndex::Building,
                    None => QueryIndex::Unavailable,
                }
            }
        }
    }

    async fn run_index(&self, dataset: &Dataset, force: bool) -> Result<Arc<VectorIndex>> {
        {
            let mut status = self.status.lock().await;
            if status.is_indexing {
                anyhow::bail!("Indexing already in progress");
            }
            status.is_indexing = true;
            status.last_error = None;
            status.completed = 0;
            status.total = dataset.records.len();
            self.progress.store(0, Ordering::Release);
        }

        // catch_unwind so is_indexing always resets
        let result = std::panic::AssertUnwindSafe(self.do_index(dataset, force))
            .catch_unwind()
            .await;

        let mut status = self.status.lock().await;
        status.is_indexing = false;
        match result {
            Ok(Ok(index)) => Ok(index),
            Ok(Err(e)) => {
                let error_msg = format!("Indexing error: {}", e);
                tracing::error!("{}", error_msg);
                status.last_error = Some(error_msg);
                Err(e)
            }
            Err(panic_info) => {
                let panic_msg = if let Some(s) = panic_info.downcast_ref::<&str>() {
                    format!("Indexing panicked: {}", s)
                } else if let Some(s) = panic_info.downcast_ref::<String>() {
                    format!("Indexing panicked: {}", s)
                } else {
                    "Indexing panicked with unknown error".to_string()
                };
                tracing::error!("{}", panic_msg);
                status.last_error = Some(panic_msg.clone());
                anyhow::bail!(panic_msg)
            }
        }
    }

    async fn do_index(&self, dataset: &Dataset, force: bool) -> Result<Arc<VectorIndex>> {
        let model = self.embeddings.model().to_string();

        if force {
            if let Err(e) = self.cache.clear().await {
                tracing::warn!("Failed to invalidate index cache: {}", e);
            }
        } else if let Some(cached) = self.cache.fetch(&dataset.fingerprint, &model).await {
            let index = Arc::new(cached.index);
            let failed = dataset.records.len().saturating_sub(index.len());
            self.commit(index.clone(), failed, true, cached.built_at).await;
            return Ok(index);
        }

        tracing::info!(
            "Building index for {} records (fingerprint {})",
            dataset.records.len(),
            &dataset.fingerprint[..dataset.fingerprint.len().min(12)]
        );
        let chunks = build_chunks(&dataset.records);
        let outcome = build_entries(self.embeddings.as_ref(), chunks, self.policy, |p| {
            self.progress.store(p.completed, Ordering::Release);
        })
        .await;

        let index = Arc::new(VectorIndex::new(dataset.fingerprint.clone(), outcome.entries));
        let built_at = Utc::now();

        if self.is_superseded(&index.fingerprint).await {
            tracing::info!("Discarding index build for a dataset that is no longer active");
            return Ok(index);
        }

        if let Err(e) = self.cache.persist(index.clone(), &model, built_at).await {
            tracing::warn!("Failed to store index cache: {}", e);
        }
        self.commit(index.clone(), outcome.failed, false, Some(built_at)).await;
        Ok(index)
    }

    async fn is_superseded(&self, fingerprint: &str) -> bool {
        self.wanted
            .lock()
            .await
            .as_deref()
            .is_some_and(|wanted| wanted != fingerprint)
    }

    async fn commit(
        &self,
        index: Arc<VectorIndex>,
        failed: usize,
        from_cache: bool,
        built_at: Option<DateTime<Utc>>,
    ) {
        if self.is_superseded(&index.fingerprint).await {
            tracing::info!("Not committing index for a dataset that is no longer active");
            return;
        }

        *self.current.write().await = Some(index.clone());

        let mut status = self.status.lock().await;
        status.completed = status.total;
        status.total_entries = index.len();
        status.failed_embeddings = failed;
        status.fingerprint = Some(index.fingerprint.clone());
        status.from_cache = from_cache;
        status.last_indexed_at = built_at;
        tracing::info!(
            "Index ready: {} entries, {} failed, from_cache={}",
            index.len(),
            failed,
            from_cache
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use crate::rag::test_support::{candidate, sample_dataset, FailingEmbedder, KeywordEmbedder};

    fn fast_policy() -> BatchPolicy {
        BatchPolicy { batch_size: 5, delay: Duration::ZERO }
    }

    fn manager_with(embedder: Arc<dyn EmbeddingProvider>, dir: &tempfile::TempDir) -> IndexManager {
        IndexManager::new(embedder, IndexCache::new(dir.path().join("index.json")), fast_policy())
    }

    #[tokio::test]
    async fn test_cold_start_builds_and_caches() {
        let dir = tempfile::tempdir().unwrap();
        let embedder = Arc::new(KeywordEmbedder::default());
        let manager = manager_with(embedder.clone(), &dir);
        let dataset = Dataset::new(sample_dataset());

        let index = manager.ensure_index(&dataset).await.unwrap();
        assert_eq!(index.len(), 5);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 5);

        let status = manager.get_status().await;
        assert!(!status.is_indexing);
        assert!(!status.from_cache);
        assert_eq!(status.total_entries, 5);
        assert_eq!(status.completed, 5);
        assert!(dir.path().join("index.json").exists());
    }

    #[tokio::test]
    async fn test_warm_start_uses_cache() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = Dataset::new(sample_dataset());
        manager_with(Arc::new(KeywordEmbedder::default()), &dir)
            .ensure_index(&dataset)
            .await
            .unwrap();

        let embedder = Arc::new(KeywordEmbedder::default());
        let manager = manager_with(embedder.clone(), &dir);
        let index = manager.ensure_index(&dataset).await.unwrap();

        assert_eq!(index.len(), 5);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
        assert!(manager.get_status().await.from_cache);
    }

    #[tokio::test]
    async fn test_changed_dataset_triggers_rebuild() {
        let dir = tempfile::tempdir().unwrap();
        let embedder = Arc::new(KeywordEmbedder::default());
        let manager = manager_with(embedder.clone(), &dir);

        let first = Dataset::new(sample_dataset());
        manager.ensure_index(&first).await.unwrap();

        let mut records = sample_dataset();
        records.push(candidate("Fay Lind", "QA Engineer", "Sweden", &["Selenium"]));
        let second = Dataset::new(records);
        assert_ne!(first.fingerprint, second.fingerprint);

        let index = manager.ensure_index(&second).await.unwrap();
        assert_eq!(index.len(), 6);
        assert_eq!(index.fingerprint, second.fingerprint);
        // 5 for the first build, 6 for the rebuild.
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 11);
    }

    #[tokio::test]
    async fn test_same_dataset_reuses_committed_index() {
        let dir = tempfile::tempdir().unwrap();
        let embedder = Arc::new(KeywordEmbedder::default());
        let manager = manager_with(embedder.clone(), &dir);
        let dataset = Dataset::new(sample_dataset());

        let a = manager.ensure_index(&dataset).await.unwrap();
        let b = manager.ensure_index(&dataset).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_all_embeddings_failing_gives_empty_index() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with(Arc::new(FailingEmbedder), &dir);
        let dataset = Dataset::new(sample_dataset());

        let index = manager.ensure_index(&dataset).await.unwrap();
        assert!(index.is_empty());
        let status = manager.get_status().await;
        assert_eq!(status.failed_embeddings, 5);
        assert_eq!(status.total_entries, 0);
    }

    #[tokio::test]
    async fn test_rebuild_ignores_cache() {
        let dir = tempfile::tempdir().unwrap();
        let embedder = Arc::new(KeywordEmbedder::default());
        let manager = manager_with(embedder.clone(), &dir);
        let dataset = Dataset::new(sample_dataset());

        manager.ensure_index(&dataset).await.unwrap();
        manager.rebuild(&dataset).await.unwrap();
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn test_superseded_build_not_committed() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with(Arc::new(KeywordEmbedder::default()), &dir);
        let old = Dataset::new(sample_dataset());
        let new = Dataset::new(vec![candidate("Solo", "Dev", "UK", &["Rust"])]);

        manager.select_dataset(&new.fingerprint).await;
        let index = manager.ensure_index(&old).await.unwrap();
        assert_eq!(index.len(), 5);
        assert!(manager.current().await.is_none());
        assert!(IndexCache::new(dir.path().join("index.json"))
            .load(&old.fingerprint, "keyword-test")
            .is_none());
    }

    #[tokio::test]
    async fn test_query_during_build_uses_committed_index() {
        let dir = tempfile::tempdir().unwrap();
        let manager = Arc::new(IndexManager::new(
            Arc::new(KeywordEmbedder::default()),
            IndexCache::new(dir.path().join("index.json")),
            BatchPolicy { batch_size: 1, delay: Duration::from_millis(200) },
        ));
        let old = Dataset::new(vec![candidate("Solo", "Dev", "UK", &["Rust"])]);
        let committed = manager.ensure_index(&old).await.unwrap();

        let new = Dataset::new(sample_dataset());
        manager.select_dataset(&new.fingerprint).await;
        let builder = {
            let manager = manager.clone();
            let new = new.clone();
            tokio::spawn(async move { manager.ensure_index(&new).await })
        };

        // Wait until the background build is underway.
        while !manager.is_indexing().await {
            tokio::task::yield_now().await;
        }
        match manager.index_for_query(&new).await {
            QueryIndex::Ready(during) => assert!(Arc::ptr_eq(&during, &committed)),
            other => panic!("expected the committed index, got {:?}", other),
        }

        let built = builder.await.unwrap().unwrap();
        assert_eq!(built.len(), 5);
        match manager.index_for_query(&new).await {
            QueryIndex::Ready(after) => assert!(Arc::ptr_eq(&after, &built)),
            other => panic!("expected the new index, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cold_build_is_not_an_empty_index() {
        let dir = tempfile::tempdir().unwrap();
        let manager = Arc::new(IndexManager::new(
            Arc::new(KeywordEmbedder::default()),
            IndexCache::new(dir.path().join("index.json")),
            BatchPolicy { batch_size: 1, delay: Duration::from_millis(200) },
        ));
        let dataset = Dataset::new(sample_dataset());
        let builder = {
            let manager = manager.clone();
            let dataset = dataset.clone();
            tokio::spawn(async move { manager.ensure_index(&dataset).await })
        };

        while !manager.is_indexing().await {
            tokio::task::yield_now().await;
        }
        assert!(matches!(manager.index_for_query(&dataset).await, QueryIndex::Building));

        builder.await.unwrap().unwrap();
        match manager.index_for_query(&dataset).await {
            QueryIndex::Ready(index) => assert_eq!(index.len(), 5),
            other => panic!("expected a committed index, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_rebuild_while_indexing_keeps_cache_slot() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with(Arc::new(KeywordEmbedder::default()), &dir);
        let dataset = Dataset::new(sample_dataset());
        manager.ensure_index(&dataset).await.unwrap();

        manager.status.lock().await.is_indexing = true;
        assert!(manager.rebuild(&dataset).await.is_err());
        assert!(dir.path().join("index.json").exists());
    }
}
