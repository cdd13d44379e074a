//! Error types for the exam benchmark pipeline.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our custom error.
pub type Result<T> = std::result::Result<T, BenchError>;

/// Errors that can occur in any pipeline stage.
#[derive(Error, Debug)]
pub enum BenchError {
    /// Error reading or writing files.
    #[error("I/O error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Error during serialization/deserialization.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A required input file does not exist.
    #[error("File not found at '{0}'")]
    FileNotFound(PathBuf),

    /// An exam folder is missing its PDFs.
    #[error("No PDF files found in '{0}'")]
    NoPdfs(PathBuf),

    /// The vector store for a profession has not been built.
    #[error("Vector database not found at '{0}'. Run the ingest stage first.")]
    StoreNotFound(PathBuf),

    /// LLM API error.
    #[error("LLM API error: {0}")]
    LlmApi(String),

    /// LLM response parsing error.
    #[error("Failed to parse LLM response: {0}")]
    LlmParse(String),

    /// HTTP request error.
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// Embedding backend error.
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Configuration file error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Plot rendering error.
    #[error("Plot error: {0}")]
    Plot(String),
}

impl BenchError {
    /// Create an I/O error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether a failed request is worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, BenchError::Http(_))
    }
}

impl From<reqwest::Error> for BenchError {
    fn from(err: reqwest::Error) -> Self {
        BenchError::Http(err.to_string())
    }
}

impl From<serde_json::Error> for BenchError {
    fn from(err: serde_json::Error) -> Self {
        BenchError::LlmParse(err.to_string())
    }
}
