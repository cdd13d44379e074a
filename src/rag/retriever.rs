//! Top-k retrieval from a profession's vector store.

use super::database_dir;
use super::embeddings::Embedder;
use super::store::{RetrievedChunk, VectorCollection, collection_name};
use crate::error::{BenchError, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

/// Queries one profession's collection.
pub struct RagRetriever {
    collection: VectorCollection,
    embedder: Arc<dyn Embedder>,
}

impl RagRetriever {
    /// Open the store of `profession` under `data_dir`.
    pub fn open(data_dir: &Path, profession: &str, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let db_dir = database_dir(data_dir, profession);
        if !db_dir.is_dir() {
            return Err(BenchError::StoreNotFound(db_dir));
        }

        let collection = VectorCollection::load(&db_dir, &collection_name(profession))?;
        if collection.embedding_model != embedder.model_id() {
            warn!(
                "Collection {} was built with '{}' but queries use '{}'",
                collection.name,
                collection.embedding_model,
                embedder.model_id()
            );
        }

        Ok(Self::new(collection, embedder))
    }

    pub fn new(collection: VectorCollection, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            collection,
            embedder,
        }
    }

    /// The `k` chunks closest to `query`.
    ///
    /// E5 models expect a `query: ` prefix on queries.
    pub async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<RetrievedChunk>> {
        let query = if self.embedder.model_id().to_lowercase().contains("e5") {
            format!("query: {}", query)
        } else {
            query.to_string()
        };

        let embedding = self.embedder.embed(&query).await?;
        Ok(self.collection.query(&embedding, k))
    }
}

/// Render retrieved chunks as a block appended to a question.
///
/// No chunks render as an empty string.
pub fn format_context(chunks: &[RetrievedChunk]) -> String {
    if chunks.is_empty() {
        return String::new();
    }

    let mut context = String::from("\n\nRETRIEVED CONTEXT:\n");
    for (i, chunk) in chunks.iter().enumerate() {
        context.push_str(&format!(
            "--- Chunk {} (Source: {}) ---\n{}\n",
            i + 1,
            chunk.source,
            chunk.text
        ));
    }
    context
}
