use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::vector_store::{VectorEntry, VectorIndex};
use crate::error::CacheError;
use crate::models::CandidateRecord;

/// SHA-256 of the serialized dataset, hex encoded.
pub fn fingerprint(records: &[CandidateRecord]) -> String {
    let mut hasher = Sha256::new();
    // Serializing plain structs and BTreeMaps cannot fail.
    let bytes = serde_json::to_vec(records).unwrap_or_default();
    hasher.update(&bytes);
    hex::encode(hasher.finalize())
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheSlot {
    fingerprint: String,
    #[serde(default)]
    embedding_model: String,
    #[serde(default)]
    built_at: Option<DateTime<Utc>>,
    entries: Vec<VectorEntry>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CachedIndex {
    pub index: VectorIndex,
    pub built_at: Option<DateTime<Utc>>,
}

/// Storing always replaces the previous slot. Anything unreadable or built
/// for another dataset or model reads as a miss.
#[derive(Debug, Clone)]
pub struct IndexCache {
    path: PathBuf,
}

impl IndexCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self, fingerprint: &str, embedding_model: &str) -> Option<CachedIndex> {
        let slot = match self.read_slot() {
            Ok(Some(slot)) => slot,
            Ok(None) => {
                tracing::info!("Index cache miss: no slot at {}", self.path.display());
                return None;
            }
            Err(e) => {
                tracing::warn!("Index cache unreadable, rebuilding: {}", e);
                return None;
            }
        };

        if slot.fingerprint != fingerprint {
            tracing::info!("Index cache miss: dataset fingerprint changed");
            return None;
        }
        if slot.embedding_model != embedding_model {
            tracing::info!(
                "Index cache miss: built with {} but {} is configured",
                slot.embedding_model,
                embedding_model
            );
            return None;
        }
        if !consistent_dimensions(&slot.entries) {
            tracing::warn!("Index cache holds vectors of mixed length, rebuilding");
            return None;
        }

        let index = VectorIndex::new(slot.fingerprint, slot.entries);
        tracing::info!("Index cache hit: {} entries", index.len());
        Some(CachedIndex { index, built_at: slot.built_at })
    }

    pub fn store(
        &self,
        index: &VectorIndex,
        embedding_model: &str,
        built_at: DateTime<Utc>,
    ) -> Result<(), CacheError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let slot = CacheSlot {
            fingerprint: index.fingerprint.clone(),
            embedding_model: embedding_model.to_string(),
            built_at: Some(built_at),
            entries: index.entries.clone(),
        };
        let data = serde_json::to_vec(&slot)?;

        // Write then rename so a crash never leaves a half-written slot.
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, data)?;
        std::fs::rename(&tmp, &self.path)?;

        tracing::info!("Index cache stored: {} entries at {}", index.len(), self.path.display());
        Ok(())
    }

    pub fn invalidate(&self) -> Result<(), CacheError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// [`IndexCache::load`] on the blocking pool.
    pub async fn fetch(&self, fingerprint: &str, embedding_model: &str) -> Option<CachedIndex> {
        let cache = self.clone();
        let fingerprint = fingerprint.to_string();
        let model = embedding_model.to_string();
        match tokio::task::spawn_blocking(move || cache.load(&fingerprint, &model)).await {
            Ok(cached) => cached,
            Err(e) => {
                tracing::warn!("Index cache load task failed: {}", e);
                None
            }
        }
    }

    pub async fn persist(
        &self,
        index: Arc<VectorIndex>,
        embedding_model: &str,
        built_at: DateTime<Utc>,
    ) -> Result<(), CacheError> {
        let cache = self.clone();
        let model = embedding_model.to_string();
        tokio::task::spawn_blocking(move || cache.store(&index, &model, built_at)).await?
    }

    pub async fn clear(&self) -> Result<(), CacheError> {
        let cache = self.clone();
        tokio::task::spawn_blocking(move || cache.invalidate()).await?
    }

    fn read_slot(&self) -> Result<Option<CacheSlot>, CacheError> {
        let data = match std::fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_slice(&data)?))
    }
}

fn consistent_dimensions(entries: &[VectorEntry]) -> bool {
    let mut dims = entries
        .iter()
        .filter_map(|e| e.embedding.as_ref())
        .map(Vec::len);
    match dims.next() {
        Some(first) => dims.all(|d| d == first),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::chunker::build_chunks;
    use crate::rag::test_support::{candidate, sample_dataset};

    const MODEL: &str = "keyword-test";

    fn sample_index(records: &[CandidateRecord]) -> VectorIndex {
        let entries = build_chunks(records)
            .into_iter()
            .map(|chunk| {
                let embedding = Some(vec![chunk.id as f32, 0.5, -1.25]);
                VectorEntry { chunk, embedding }
            })
            .collect();
        VectorIndex::new(fingerprint(records), entries)
    }

    #[test]
    fn test_fingerprint_deterministic() {
        let records = sample_dataset();
        assert_eq!(fingerprint(&records), fingerprint(&records.clone()));
        assert_eq!(fingerprint(&records).len(), 64);
    }

    #[test]
    fn test_fingerprint_changes_when_record_added() {
        let records = sample_dataset();
        let mut grown = records.clone();
        grown.push(candidate("Fay Lind", "QA Engineer", "Sweden", &["Selenium"]));
        assert_ne!(fingerprint(&records), fingerprint(&grown));
    }

    #[test]
    fn test_equal_length_datasets_do_not_collide() {
        let a = vec![candidate("Ann", "Dev", "UK", &["Go"])];
        let b = vec![candidate("Bob", "Dev", "UK", &["Go"])];
        assert_eq!(
            serde_json::to_vec(&a).unwrap().len(),
            serde_json::to_vec(&b).unwrap().len()
        );
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn test_store_then_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = IndexCache::new(dir.path().join("nested").join("index.json"));
        let records = sample_dataset();
        let index = sample_index(&records);

        cache.store(&index, MODEL, Utc::now()).unwrap();
        let loaded = cache.load(&fingerprint(&records), MODEL).unwrap();

        assert_eq!(loaded.index.len(), index.len());
        for (a, b) in loaded.index.entries.iter().zip(index.entries.iter()) {
            assert_eq!(a.chunk.id, b.chunk.id);
            assert_eq!(a.chunk.text, b.chunk.text);
            assert_eq!(a.embedding, b.embedding);
            assert_eq!(a.chunk.full_data, b.chunk.full_data);
        }
        assert!(loaded.built_at.is_some());
    }

    #[test]
    fn test_persisted_layout() {
        let dir = tempfile::tempdir().unwrap();
        let cache = IndexCache::new(dir.path().join("index.json"));
        let records = sample_dataset();
        cache.store(&sample_index(&records), MODEL, Utc::now()).unwrap();

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(cache.path()).unwrap()).unwrap();
        assert_eq!(raw["fingerprint"], fingerprint(&records));
        let entry = &raw["entries"][0];
        for key in ["id", "text", "fullData", "metadata", "embedding"] {
            assert!(entry.get(key).is_some(), "missing {}", key);
        }
    }

    #[test]
    fn test_fingerprint_mismatch_is_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = IndexCache::new(dir.path().join("index.json"));
        let records = sample_dataset();
        cache.store(&sample_index(&records), MODEL, Utc::now()).unwrap();

        let mut grown = records.clone();
        grown.push(candidate("Fay Lind", "QA Engineer", "Sweden", &["Selenium"]));
        assert!(cache.load(&fingerprint(&grown), MODEL).is_none());
    }

    #[test]
    fn test_model_mismatch_is_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = IndexCache::new(dir.path().join("index.json"));
        let records = sample_dataset();
        cache.store(&sample_index(&records), MODEL, Utc::now()).unwrap();
        assert!(cache.load(&fingerprint(&records), "other-model").is_none());
    }

    #[test]
    fn test_corrupt_slot_is_miss() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        std::fs::write(&path, b"{not json").unwrap();
        let cache = IndexCache::new(&path);
        assert!(cache.load("anything", MODEL).is_none());
    }

    #[test]
    fn test_mixed_dimensions_is_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = IndexCache::new(dir.path().join("index.json"));
        let records = sample_dataset();
        let mut index = sample_index(&records);
        index.entries[1].embedding = Some(vec![1.0]);
        cache.store(&index, MODEL, Utc::now()).unwrap();
        assert!(cache.load(&fingerprint(&records), MODEL).is_none());
    }

    #[test]
    fn test_store_replaces_slot_and_invalidate() {
        let dir = tempfile::tempdir().unwrap();
        let cache = IndexCache::new(dir.path().join("index.json"));
        let first = sample_dataset();
        let second = vec![candidate("Solo", "Dev", "UK", &["Rust"])];

        cache.store(&sample_index(&first), MODEL, Utc::now()).unwrap();
        cache.store(&sample_index(&second), MODEL, Utc::now()).unwrap();
        assert!(cache.load(&fingerprint(&first), MODEL).is_none());
        assert!(cache.load(&fingerprint(&second), MODEL).is_some());

        cache.invalidate().unwrap();
        assert!(cache.load(&fingerprint(&second), MODEL).is_none());
        cache.invalidate().unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_async_persist_fetch_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let cache = IndexCache::new(dir.path().join("index.json"));
        let records = sample_dataset();
        let index = Arc::new(sample_index(&records));

        cache.persist(index.clone(), MODEL, Utc::now()).await.unwrap();
        let loaded = cache.fetch(&fingerprint(&records), MODEL).await.unwrap();
        assert_eq!(loaded.index.len(), index.len());

        cache.clear().await.unwrap();
        assert!(cache.fetch(&fingerprint(&records), MODEL).await.is_none());
    }
}
