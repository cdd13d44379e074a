//! Reference document ingestion into a profession's vector store.

use super::chunker::{ChunkConfig, chunk_text};
use super::embeddings::Embedder;
use super::store::{ChunkMetadata, StoredChunk, VectorCollection, collection_name};
use super::{database_dir, documents_dir};
use crate::error::{BenchError, Result};
use crate::persistence::save_json;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use walkdir::WalkDir;

/// Chunks per embedding request.
const EMBED_BATCH_SIZE: usize = 100;

/// Name of the chunk dump written next to the documents.
pub const CHUNKS_DEBUG_FILE: &str = "chunks_debug.json";

/// Entry of `chunks_debug.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebugChunk {
    pub id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// Summary of one ingestion run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestReport {
    pub documents: usize,
    pub chunks: usize,
}

/// Chunks, embeds and stores the reference documents of one profession.
pub struct RagIngestor {
    profession: String,
    docs_dir: PathBuf,
    db_dir: PathBuf,
    chunk_config: ChunkConfig,
    embedder: Arc<dyn Embedder>,
}

impl RagIngestor {
    pub fn new(
        data_dir: &Path,
        profession: &str,
        chunk_config: ChunkConfig,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            profession: profession.to_string(),
            docs_dir: documents_dir(data_dir, profession),
            db_dir: database_dir(data_dir, profession),
            chunk_config,
            embedder,
        }
    }

    pub fn documents_dir(&self) -> &Path {
        &self.docs_dir
    }

    /// `.md` and `.txt` files under the documents folder, sorted.
    fn source_files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = WalkDir::new(&self.docs_dir)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| {
                path.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| e.eq_ignore_ascii_case("md") || e.eq_ignore_ascii_case("txt"))
            })
            .collect();
        files.sort();
        files
    }

    /// Source name of a file: its path relative to the documents folder.
    fn source_name(&self, path: &Path) -> String {
        path.strip_prefix(&self.docs_dir)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    }

    /// Chunk all documents without embedding them.
    pub fn collect_chunks(&self) -> Result<(usize, Vec<DebugChunk>)> {
        let mut documents = 0;
        let mut chunks = Vec::new();

        for path in self.source_files() {
            let text = fs::read_to_string(&path).map_err(|e| BenchError::io(&path, e))?;
            let source = self.source_name(&path);

            let pieces = chunk_text(&text, &self.chunk_config);
            if pieces.is_empty() {
                warn!(source = %source, "Document has no text, skipping");
                continue;
            }

            documents += 1;
            chunks.extend(pieces.into_iter().map(|piece| DebugChunk {
                id: format!("{}_{}", source, piece.index),
                text: piece.text,
                metadata: ChunkMetadata {
                    source: source.clone(),
                    chunk_index: piece.index,
                },
            }));
        }

        Ok((documents, chunks))
    }

    /// Run ingestion. An empty documents folder is reported, not an error.
    pub async fn ingest(&self) -> Result<IngestReport> {
        fs::create_dir_all(&self.docs_dir).map_err(|e| BenchError::io(&self.docs_dir, e))?;

        let (documents, chunks) = self.collect_chunks()?;
        if chunks.is_empty() {
            warn!(
                profession = %self.profession,
                "No documents to ingest in {}",
                self.docs_dir.display()
            );
            return Ok(IngestReport::default());
        }

        save_json(&chunks, &self.docs_dir.join(CHUNKS_DEBUG_FILE))?;
        info!(
            profession = %self.profession,
            "Ingesting {} chunks from {} documents",
            chunks.len(),
            documents
        );

        let name = collection_name(&self.profession);
        let mut collection =
            VectorCollection::open_or_create(&self.db_dir, &name, self.embedder.model_id())?;
        if collection.embedding_model != self.embedder.model_id() && !collection.is_empty() {
            return Err(BenchError::Embedding(format!(
                "Collection {} was built with '{}', not '{}'. Remove {} to rebuild it.",
                name,
                collection.embedding_model,
                self.embedder.model_id(),
                self.db_dir.display()
            )));
        }

        let total = chunks.len();
        for batch in chunks.chunks(EMBED_BATCH_SIZE) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let embeddings = self.embedder.embed_batch(&texts).await?;

            let stored = batch
                .iter()
                .zip(embeddings)
                .map(|(chunk, embedding)| StoredChunk {
                    id: chunk.id.clone(),
                    text: chunk.text.clone(),
                    metadata: chunk.metadata.clone(),
                    embedding,
                })
                .collect();
            collection.upsert(stored)?;
        }

        collection.save(&self.db_dir)?;
        info!(
            profession = %self.profession,
            "Stored {} chunks in collection {}",
            collection.len(),
            name
        );

        Ok(IngestReport {
            documents,
            chunks: total,
        })
    }
}
