//! Per-profession vector store, persisted as one bincode file.

use super::embeddings::cosine_similarity;
use crate::error::{BenchError, Result};
use crate::persistence;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A chunk returned by a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub text: String,
    pub source: String,
    pub chunk_index: usize,
    /// `1 - cosine similarity`; lower is closer.
    pub distance: f32,
}

/// Store metadata of a chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub source: String,
    pub chunk_index: usize,
}

/// An embedded chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredChunk {
    /// `{filename}_{chunk_index}`.
    pub id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
    pub embedding: Vec<f32>,
}

/// Collection name for a profession: `rag_` plus the name with every
/// non-alphanumeric character replaced by `_`.
pub fn collection_name(profession: &str) -> String {
    let sanitized: String = profession
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect();
    format!("rag_{}", sanitized)
}

/// A named collection of embedded chunks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorCollection {
    pub name: String,
    pub embedding_model: String,
    entries: Vec<StoredChunk>,
}

impl VectorCollection {
    pub fn new(name: impl Into<String>, embedding_model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            embedding_model: embedding_model.into(),
            entries: Vec::new(),
        }
    }

    /// File holding the collection inside `db_dir`.
    pub fn file_path(db_dir: &Path, name: &str) -> PathBuf {
        db_dir.join(format!("{}.bin", name))
    }

    /// Load collection `name` from `db_dir`.
    pub fn load(db_dir: &Path, name: &str) -> Result<Self> {
        let path = Self::file_path(db_dir, name);
        if !path.is_file() {
            return Err(BenchError::StoreNotFound(path));
        }
        persistence::load(&path)
    }

    /// Load collection `name`, or start an empty one.
    pub fn open_or_create(db_dir: &Path, name: &str, embedding_model: &str) -> Result<Self> {
        match Self::load(db_dir, name) {
            Ok(collection) => Ok(collection),
            Err(BenchError::StoreNotFound(_)) => Ok(Self::new(name, embedding_model)),
            Err(e) => Err(e),
        }
    }

    pub fn save(&self, db_dir: &Path) -> Result<()> {
        persistence::save(self, &Self::file_path(db_dir, &self.name))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[StoredChunk] {
        &self.entries
    }

    fn dimension(&self) -> Option<usize> {
        self.entries.first().map(|e| e.embedding.len())
    }

    /// Insert chunks, replacing existing entries with the same id.
    pub fn upsert(&mut self, chunks: Vec<StoredChunk>) -> Result<()> {
        for chunk in chunks {
            if let Some(dim) = self.dimension() {
                if chunk.embedding.len() != dim {
                    return Err(BenchError::Embedding(format!(
                        "Embedding dimension {} does not match collection dimension {}",
                        chunk.embedding.len(),
                        dim
                    )));
                }
            }

            match self.entries.iter_mut().find(|e| e.id == chunk.id) {
                Some(existing) => *existing = chunk,
                None => self.entries.push(chunk),
            }
        }
        Ok(())
    }

    /// The `k` chunks closest to `embedding`, closest first.
    pub fn query(&self, embedding: &[f32], k: usize) -> Vec<RetrievedChunk> {
        let mut scored: Vec<(f32, &StoredChunk)> = self
            .entries
            .iter()
            .map(|entry| (cosine_similarity(embedding, &entry.embedding), entry))
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);

        scored
            .into_iter()
            .map(|(similarity, entry)| RetrievedChunk {
                text: entry.text.clone(),
                source: entry.metadata.source.clone(),
                chunk_index: entry.metadata.chunk_index,
                distance: 1.0 - similarity,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn chunk(id: &str, source: &str, index: usize, embedding: Vec<f32>) -> StoredChunk {
        StoredChunk {
            id: id.to_string(),
            text: format!("text of {}", id),
            metadata: ChunkMetadata {
                source: source.to_string(),
                chunk_index: index,
            },
            embedding,
        }
    }

    #[test]
    fn test_collection_name() {
        assert_eq!(collection_name("Informatiker"), "rag_Informatiker");
        assert_eq!(collection_name("Koch EFZ/2024"), "rag_Koch_EFZ_2024");
        assert_eq!(collection_name("Bäcker"), "rag_Bäcker");
    }

    #[test]
    fn test_query_ranks_by_similarity() {
        let mut collection = VectorCollection::new("rag_test", "m");
        collection
            .upsert(vec![
                chunk("a.md_0", "a.md", 0, vec![1.0, 0.0]),
                chunk("a.md_1", "a.md", 1, vec![0.7, 0.7]),
                chunk("b.md_0", "b.md", 0, vec![0.0, 1.0]),
            ])
            .unwrap();

        let results = collection.query(&[1.0, 0.1], 2);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].source, "a.md");
        assert_eq!(results[0].chunk_index, 0);
        assert_eq!(results[1].chunk_index, 1);
        assert!(results[0].distance < results[1].distance);
        assert!(results[0].distance >= 0.0);
    }

    #[test]
    fn test_upsert_replaces_by_id() {
        let mut collection = VectorCollection::new("rag_test", "m");
        collection.upsert(vec![chunk("a.md_0", "a.md", 0, vec![1.0, 0.0])]).unwrap();
        let mut replacement = chunk("a.md_0", "a.md", 0, vec![0.0, 1.0]);
        replacement.text = "updated".to_string();
        collection.upsert(vec![replacement]).unwrap();

        assert_eq!(collection.len(), 1);
        assert_eq!(collection.entries()[0].text, "updated");
    }

    #[test]
    fn test_upsert_rejects_dimension_mismatch() {
        let mut collection = VectorCollection::new("rag_test", "m");
        collection.upsert(vec![chunk("a", "a", 0, vec![1.0, 0.0])]).unwrap();
        let err = collection
            .upsert(vec![chunk("b", "b", 0, vec![1.0, 0.0, 0.0])])
            .unwrap_err();
        assert!(matches!(err, BenchError::Embedding(_)));
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let mut collection = VectorCollection::new("rag_Koch", "all-MiniLM-L6-v2");
        collection.upsert(vec![chunk("a.md_0", "a.md", 0, vec![0.5, 0.5])]).unwrap();
        collection.save(dir.path()).unwrap();

        let loaded = VectorCollection::load(dir.path(), "rag_Koch").unwrap();
        assert_eq!(loaded, collection);

        let missing = VectorCollection::load(dir.path(), "rag_Maurer");
        assert!(matches!(missing, Err(BenchError::StoreNotFound(_))));

        let fresh = VectorCollection::open_or_create(dir.path(), "rag_Maurer", "m").unwrap();
        assert!(fresh.is_empty());
    }
}
