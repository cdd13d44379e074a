//! Text embedding backends.

use crate::config::{EmbeddingBackend, RagParameters};
use crate::error::{BenchError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

/// Produces embedding vectors for text.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier, stored with the vector store.
    fn model_id(&self) -> &str;

    /// Embed a batch of texts, one vector per input in order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| BenchError::Embedding("No embedding returned".to_string()))
    }
}

/// Build the embedder selected by `embedding_backend`.
pub fn embedder_from_params(params: &RagParameters) -> Result<Arc<dyn Embedder>> {
    match params.embedding_backend {
        EmbeddingBackend::Api => {
            let api_key = std::env::var(&params.embedding_api_key_env).map_err(|_| {
                BenchError::Config(format!(
                    "{} not found in environment variables (needed for embedding model '{}')",
                    params.embedding_api_key_env, params.embedding_model
                ))
            })?;
            Ok(Arc::new(ApiEmbedder::new(
                &params.embedding_api_base,
                api_key,
                &params.embedding_model,
            )))
        }
        #[cfg(feature = "local-embeddings")]
        EmbeddingBackend::Local => Ok(Arc::new(super::local::LocalEmbedder::load(
            &params.embedding_model,
        )?)),
        #[cfg(not(feature = "local-embeddings"))]
        EmbeddingBackend::Local => Err(BenchError::Config(
            "embedding_backend 'local' needs the `local-embeddings` feature; \
             rebuild with it or set embedding_backend: api"
                .to_string(),
        )),
    }
}

/// Client for an OpenAI-compatible `/v1/embeddings` endpoint.
pub struct ApiEmbedder {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

impl ApiEmbedder {
    pub fn new(api_base: &str, api_key: String, model: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key,
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl Embedder for ApiEmbedder {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
            "encoding_format": "float",
        });

        let response = self
            .client
            .post(format!("{}/v1/embeddings", self.api_base))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(BenchError::Embedding(format!(
                "Embeddings API error ({}): {}",
                status, error_text
            )));
        }

        let mut parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| BenchError::Embedding(format!("Invalid embeddings response: {}", e)))?;

        if parsed.data.len() != texts.len() {
            return Err(BenchError::Embedding(format!(
                "Expected {} embeddings, got {}",
                texts.len(),
                parsed.data.len()
            )));
        }

        parsed.data.sort_by_key(|d| d.index);
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

/// Compute cosine similarity between two vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Deterministic embedder: counts of a few marker words.
    pub struct KeywordEmbedder;

    const KEYWORDS: &[&str] = &["tcp", "udp", "dns", "bread"];

    #[async_trait]
    impl Embedder for KeywordEmbedder {
        fn model_id(&self) -> &str {
            "keyword-test"
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|text| {
                    let lower = text.to_lowercase();
                    KEYWORDS
                        .iter()
                        .map(|k| lower.matches(k).count() as f32 + 0.01)
                        .collect()
                })
                .collect())
        }
    }
}
