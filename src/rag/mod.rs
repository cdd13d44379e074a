//! Retrieval-augmented generation: document ingestion and chunk retrieval.
//!
//! Reference documents for a profession live in
//! `{data_dir}/rag/documents/{profession}/`, its vector store in
//! `{data_dir}/rag/vector_database/{profession}/`.

pub mod chunker;
pub mod embeddings;
pub mod ingest;
#[cfg(feature = "local-embeddings")]
mod local;
pub mod retriever;
pub mod store;

pub use chunker::{Chunk, ChunkConfig, chunk_text};
pub use embeddings::{ApiEmbedder, Embedder, embedder_from_params};
pub use ingest::{IngestReport, RagIngestor};
#[cfg(feature = "local-embeddings")]
pub use local::LocalEmbedder;
pub use retriever::{RagRetriever, format_context};
pub use store::{RetrievedChunk, VectorCollection, collection_name};

use std::path::{Path, PathBuf};

/// Folder with a profession's reference documents.
pub fn documents_dir(data_dir: &Path, profession: &str) -> PathBuf {
    data_dir.join("rag").join("documents").join(profession)
}

/// Folder with a profession's vector store.
pub fn database_dir(data_dir: &Path, profession: &str) -> PathBuf {
    data_dir.join("rag").join("vector_database").join(profession)
}
