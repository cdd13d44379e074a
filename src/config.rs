//! Configuration for the exam benchmark pipeline.
//!
//! All stages read one YAML file. Environment variables take precedence over
//! config file values for the LLM endpoint; API keys are only ever read from
//! the environment.

use crate::error::{BenchError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::env;
use std::path::{Path, PathBuf};

/// Default model used to turn PDFs into sheets.
pub const DEFAULT_PROCESSING_MODEL: &str = "anthropic/claude-haiku-4.5";

/// Default OpenRouter endpoint (the client appends `/v1/chat/completions`).
pub const DEFAULT_API_BASE: &str = "https://openrouter.ai/api";

/// Default environment variable holding the API key.
pub const DEFAULT_API_KEY_ENV: &str = "OPENROUTER_API_KEY";

/// Which exams (or professions) a stage should consider.
///
/// In YAML this is either the string `all` or a list of names. Numbers in
/// the list are accepted and compared as strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Selection {
    #[default]
    All,
    Only(Vec<String>),
}

impl Selection {
    /// Whether `name` passes this selection.
    pub fn includes(&self, name: &str) -> bool {
        match self {
            Selection::All => true,
            Selection::Only(names) => names.iter().any(|n| n == name),
        }
    }
}

impl<'de> Deserialize<'de> for Selection {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Scalar {
            Int(i64),
            Str(String),
        }

        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Keyword(String),
            List(Vec<Scalar>),
        }

        let selection = match Option::<Raw>::deserialize(deserializer)? {
            None => Selection::All,
            Some(Raw::Keyword(word)) if word.eq_ignore_ascii_case("all") => Selection::All,
            Some(Raw::Keyword(word)) => Selection::Only(vec![word]),
            Some(Raw::List(items)) if items.is_empty() => Selection::All,
            Some(Raw::List(items)) => Selection::Only(
                items
                    .into_iter()
                    .map(|s| match s {
                        Scalar::Int(i) => i.to_string(),
                        Scalar::Str(s) => s,
                    })
                    .collect(),
            ),
        };
        Ok(selection)
    }
}

impl Serialize for Selection {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Selection::All => serializer.serialize_str("all"),
            Selection::Only(names) => names.serialize(serializer),
        }
    }
}

/// Settings for a single OpenAI-compatible chat endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Base URL for the LLM API (e.g., "https://openrouter.ai/api")
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// API key for authentication. Filled from the environment.
    #[serde(skip)]
    pub api_key: String,

    /// Environment variable that holds the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Model name (e.g., "openai/gpt-4o"). Set per call site.
    #[serde(default)]
    pub model: String,

    /// Maximum tokens for response. Not sent when absent.
    #[serde(default)]
    pub max_tokens: Option<u32>,

    /// Temperature for generation. Not sent when absent.
    #[serde(default)]
    pub temperature: Option<f32>,

    /// Per-request timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Attempts per request, including the first one.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Wait `backoff_factor^attempt` seconds between attempts.
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

fn default_api_key_env() -> String {
    DEFAULT_API_KEY_ENV.to_string()
}

fn default_timeout_secs() -> u64 {
    1000
}

fn default_max_retries() -> u32 {
    5
}

fn default_backoff_factor() -> f64 {
    2.0
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            api_key: String::new(),
            api_key_env: default_api_key_env(),
            model: String::new(),
            max_tokens: None,
            temperature: None,
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            backoff_factor: default_backoff_factor(),
        }
    }
}

/// Alternative endpoint for models whose name starts with `prefix`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub prefix: String,
    pub api_base: String,
    pub api_key_env: String,
}

/// `processing:` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    #[serde(default = "default_processing_model")]
    pub processing_model: String,
    #[serde(default)]
    pub professions: Selection,
    #[serde(default)]
    pub exam_numbers: Selection,
}

fn default_processing_model() -> String {
    DEFAULT_PROCESSING_MODEL.to_string()
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            processing_model: default_processing_model(),
            professions: Selection::All,
            exam_numbers: Selection::All,
        }
    }
}

/// `benchmarking:` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkingConfig {
    #[serde(default)]
    pub professions: Selection,
    #[serde(default)]
    pub exam_numbers: Selection,
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default)]
    pub judges: Vec<String>,
    #[serde(default = "default_judge_runs")]
    pub num_judge_runs: u32,
}

fn default_judge_runs() -> u32 {
    1
}

impl Default for BenchmarkingConfig {
    fn default() -> Self {
        Self {
            professions: Selection::All,
            exam_numbers: Selection::All,
            models: Vec::new(),
            judges: Vec::new(),
            num_judge_runs: default_judge_runs(),
        }
    }
}

/// How chunk embeddings are computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    /// In-process sentence-transformer (requires the `local-embeddings` feature).
    #[default]
    Local,
    /// OpenAI-compatible `/v1/embeddings` endpoint.
    Api,
}

/// `benchmarking_rag.rag_parameters:` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagParameters {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default)]
    pub embedding_backend: EmbeddingBackend,
    /// Base URL for the `api` backend.
    #[serde(default = "default_embedding_api_base")]
    pub embedding_api_base: String,
    /// Environment variable with the key for the `api` backend.
    #[serde(default = "default_embedding_key_env")]
    pub embedding_api_key_env: String,
}

fn default_top_k() -> usize {
    3
}

fn default_chunk_size() -> usize {
    1000
}

fn default_chunk_overlap() -> usize {
    200
}

fn default_embedding_model() -> String {
    "all-MiniLM-L6-v2".to_string()
}

fn default_embedding_api_base() -> String {
    "https://api.openai.com".to_string()
}

fn default_embedding_key_env() -> String {
    "EMBEDDING_API_KEY".to_string()
}

impl Default for RagParameters {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            embedding_model: default_embedding_model(),
            embedding_backend: EmbeddingBackend::default(),
            embedding_api_base: default_embedding_api_base(),
            embedding_api_key_env: default_embedding_key_env(),
        }
    }
}

/// `benchmarking_rag:` section.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RagBenchmarkingConfig {
    #[serde(flatten)]
    pub benchmarking: BenchmarkingConfig,
    /// Use this profession's store for every exam instead of the exam's own.
    #[serde(default)]
    pub rag_database: Option<String>,
    #[serde(default)]
    pub rag_parameters: RagParameters,
}

/// `evaluation:` section.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EvaluationConfig {
    #[serde(default)]
    pub professions: Vec<String>,
    #[serde(default)]
    pub exam_numbers: Selection,
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default)]
    pub judges: Vec<String>,
    /// Order bars by score, best first.
    #[serde(default)]
    pub sort: bool,
}

/// Full application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub raw_data_dir: PathBuf,
    pub processed_data_dir: PathBuf,
    #[serde(default)]
    pub benchmarked_data_dir: Option<PathBuf>,
    #[serde(default)]
    pub eval_data_dir: Option<PathBuf>,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub processing: ProcessingConfig,
    #[serde(default)]
    pub benchmarking: BenchmarkingConfig,
    #[serde(default)]
    pub benchmarking_rag: RagBenchmarkingConfig,
    #[serde(default)]
    pub evaluation: EvaluationConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            raw_data_dir: PathBuf::from("data/raw"),
            processed_data_dir: PathBuf::from("data/processed"),
            benchmarked_data_dir: None,
            eval_data_dir: None,
            llm: LlmConfig::default(),
            providers: Vec::new(),
            processing: ProcessingConfig::default(),
            benchmarking: BenchmarkingConfig::default(),
            benchmarking_rag: RagBenchmarkingConfig::default(),
            evaluation: EvaluationConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from `path`, falling back to the user config file.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables (LLM_API_BASE, LLM_MAX_TOKENS, LLM_TEMPERATURE)
    /// 2. The given file, or ~/.config/exam-bench/config.yaml if it is missing
    pub fn load(path: &Path) -> Result<Self> {
        let source = if path.exists() {
            path.to_path_buf()
        } else {
            match Self::config_file_path() {
                Some(fallback) if fallback.exists() => fallback,
                _ => return Err(BenchError::FileNotFound(path.to_path_buf())),
            }
        };

        let mut config = Self::load_from_file(&source)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a specific file path, without env overrides.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| BenchError::io(path, e))?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML text.
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| BenchError::Config(format!("Failed to parse config file: {}", e)))
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(api_base) = env::var("LLM_API_BASE") {
            self.llm.api_base = api_base;
        }

        if let Ok(max_tokens) = env::var("LLM_MAX_TOKENS") {
            if let Ok(tokens) = max_tokens.parse() {
                self.llm.max_tokens = Some(tokens);
            }
        }

        if let Ok(temperature) = env::var("LLM_TEMPERATURE") {
            if let Ok(temp) = temperature.parse() {
                self.llm.temperature = Some(temp);
            }
        }
    }

    /// Get the default user config file path.
    pub fn config_file_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "exam-bench")
            .map(|dirs| dirs.config_dir().join("config.yaml"))
    }

    /// Where benchmark runs are written.
    pub fn benchmarked_dir(&self) -> PathBuf {
        self.benchmarked_data_dir
            .clone()
            .unwrap_or_else(|| sibling_of(&self.processed_data_dir, "benchmarked"))
    }

    /// Where evaluation runs are written.
    pub fn eval_dir(&self) -> PathBuf {
        self.eval_data_dir
            .clone()
            .unwrap_or_else(|| sibling_of(&self.processed_data_dir, "eval"))
    }

    /// Root of the data tree (parent of `raw_data_dir`), home of `rag/`.
    pub fn data_dir(&self) -> PathBuf {
        self.raw_data_dir
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Resolve endpoint and credentials for `model`.
    ///
    /// The first provider whose prefix matches the model name wins; otherwise
    /// the `llm` section is used as is.
    pub fn llm_for(&self, model: &str) -> Result<LlmConfig> {
        self.llm_with_keys(model, |name| env::var(name).ok())
    }

    /// Like [`Config::llm_for`], reading keys through `lookup`.
    fn llm_with_keys(
        &self,
        model: &str,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<LlmConfig> {
        let mut llm = self.llm.clone();
        llm.model = model.to_string();

        if let Some(provider) = self.providers.iter().find(|p| model.starts_with(&p.prefix)) {
            llm.api_base = provider.api_base.clone();
            llm.api_key_env = provider.api_key_env.clone();
        }

        llm.api_key = lookup(&llm.api_key_env).ok_or_else(|| {
            BenchError::Config(format!(
                "{} not found in environment variables (needed for model '{}')",
                llm.api_key_env, model
            ))
        })?;

        Ok(llm)
    }

    /// Validate that required configuration is present.
    pub fn validate(&self) -> Result<()> {
        if self.llm.api_base.is_empty() {
            return Err(BenchError::Config(
                "LLM API base URL is required. Set LLM_API_BASE or llm.api_base.".to_string(),
            ));
        }

        if self.raw_data_dir.as_os_str().is_empty() {
            return Err(BenchError::Config("raw_data_dir is required.".to_string()));
        }

        if self.processed_data_dir.as_os_str().is_empty() {
            return Err(BenchError::Config(
                "processed_data_dir is required.".to_string(),
            ));
        }

        if self.benchmarking.num_judge_runs == 0 || self.benchmarking_rag.benchmarking.num_judge_runs == 0
        {
            return Err(BenchError::Config(
                "num_judge_runs must be at least 1.".to_string(),
            ));
        }

        let rag = &self.benchmarking_rag.rag_parameters;
        if rag.chunk_size == 0 || rag.chunk_overlap >= rag.chunk_size {
            return Err(BenchError::Config(format!(
                "rag_parameters: chunk_overlap ({}) must be smaller than chunk_size ({})",
                rag.chunk_overlap, rag.chunk_size
            )));
        }

        Ok(())
    }
}

fn sibling_of(path: &Path, name: &str) -> PathBuf {
    match path.parent() {
        Some(parent) => parent.join(name),
        None => PathBuf::from(name),
    }
}
