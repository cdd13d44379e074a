//! Local embedding model using candle + sentence-transformers.

use super::embeddings::Embedder;
use crate::error::{BenchError, Result};
use async_trait::async_trait;
use candle_core::{Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig, DTYPE};
use hf_hub::{Repo, RepoType, api::sync::Api};
use tokenizers::Tokenizer;

fn embedding_error(context: &str, err: impl std::fmt::Display) -> BenchError {
    BenchError::Embedding(format!("{}: {}", context, err))
}

/// BERT sentence-transformer running on the CPU.
pub struct LocalEmbedder {
    model_id: String,
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
}

impl LocalEmbedder {
    /// Load a sentence-transformers model from Hugging Face Hub.
    ///
    /// Bare names such as `all-MiniLM-L6-v2` resolve under
    /// `sentence-transformers/`.
    pub fn load(name: &str) -> Result<Self> {
        let model_id = if name.contains('/') {
            name.to_string()
        } else {
            format!("sentence-transformers/{}", name)
        };
        let device = Device::Cpu;

        let api = Api::new().map_err(|e| embedding_error("Failed to create HF Hub API", e))?;
        let repo = api.repo(Repo::new(model_id.clone(), RepoType::Model));

        let config_path = repo
            .get("config.json")
            .map_err(|e| embedding_error("Failed to get config.json", e))?;
        let tokenizer_path = repo
            .get("tokenizer.json")
            .map_err(|e| embedding_error("Failed to get tokenizer.json", e))?;
        let weights_path = repo
            .get("model.safetensors")
            .map_err(|e| embedding_error("Failed to get model weights", e))?;

        let config_text = std::fs::read_to_string(&config_path)
            .map_err(|e| BenchError::io(&config_path, e))?;
        let config: BertConfig = serde_json::from_str(&config_text)
            .map_err(|e| embedding_error("Failed to parse config", e))?;

        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| embedding_error("Failed to load tokenizer", e))?;

        // SAFETY: the weights file is downloaded to the local cache and not
        // modified while mapped.
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights_path], DTYPE, &device)
                .map_err(|e| embedding_error("Failed to load model weights", e))?
        };

        let model = BertModel::load(vb, &config)
            .map_err(|e| embedding_error("Failed to load BERT model", e))?;

        Ok(Self {
            model_id,
            model,
            tokenizer,
            device,
        })
    }

    fn encode(&self, texts: &[String]) -> candle_core::Result<Vec<Vec<f32>>> {
        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(candle_core::Error::msg)?;

        let max_len = encodings
            .iter()
            .map(|e| e.get_ids().len())
            .max()
            .unwrap_or(0);

        let mut input_ids = Vec::with_capacity(texts.len() * max_len);
        let mut attention_mask = Vec::with_capacity(texts.len() * max_len);

        for encoding in &encodings {
            let mut ids = encoding.get_ids().to_vec();
            let mut mask = encoding.get_attention_mask().to_vec();
            ids.resize(max_len, 0);
            mask.resize(max_len, 0);
            input_ids.extend(ids);
            attention_mask.extend(mask);
        }

        let shape = (texts.len(), max_len);
        let input_ids = Tensor::from_vec(input_ids, shape, &self.device)?;
        let attention_mask = Tensor::from_vec(attention_mask, shape, &self.device)?;
        let token_type_ids = input_ids.zeros_like()?;

        let output = self
            .model
            .forward(&input_ids, &token_type_ids, Some(&attention_mask))?;

        // Mean pooling over the sequence, ignoring padding.
        let mask = attention_mask
            .unsqueeze(2)?
            .to_dtype(output.dtype())?
            .broadcast_as(output.shape())?;
        let summed = (output * &mask)?.sum(1)?;
        let counts = mask.sum(1)?.clamp(1e-9, f64::MAX)?;
        let mean = (summed / counts)?;

        let norms = mean.sqr()?.sum_keepdim(1)?.sqrt()?;
        let normalized = mean.broadcast_div(&norms)?;

        normalized.to_vec2::<f32>()
    }
}

#[async_trait]
impl Embedder for LocalEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.encode(texts)
            .map_err(|e| embedding_error("Local embedding failed", e))
    }
}
