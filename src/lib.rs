//! Exam Bench - benchmark LLMs on professional exams.
//!
//! Exam and solution PDFs are turned into structured JSON sheets by a
//! multimodal model. Candidate models answer the sheets question by question,
//! optionally with chunks retrieved from per-profession reference documents,
//! and judge models grade the answers against the official solutions.
//!
//! # Overview
//!
//! Every stage reads the previous stage's output folder and writes a new
//! timestamped folder:
//! 1. `process`: raw PDFs to `answer_sheet.json` / `solution_sheet.json`
//! 2. `ingest`: reference documents to a vector store (for RAG runs)
//! 3. `benchmark`: model answers plus graded answers per judge
//! 4. `evaluate`: aggregated scores and a comparison plot
//!
//! # Quick Start
//!
//! ```no_run
//! use exam_bench::{
//!     benchmark::{BenchmarkRunner, print_summary},
//!     config::Config,
//!     processing::ExamProcessor,
//! };
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load(Path::new("config/config.yaml"))?;
//!     config.validate()?;
//!
//!     // Extract sheets from the raw PDFs
//!     let processor = ExamProcessor::from_config(&config)?;
//!     processor.process_all().await?;
//!
//!     // Answer and grade
//!     let runner = BenchmarkRunner::from_config(&config)?;
//!     let outcomes = runner.run().await?;
//!     print_summary(&outcomes, &config.benchmarked_dir());
//!
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **ExamSheet**: the question tree shared by all stages
//! - **LlmClient**: OpenAI-compatible API client with retries
//! - **ExamProcessor**: PDF to sheet extraction
//! - **RagIngestor / RagRetriever**: chunking, embedding and top-k retrieval
//! - **ExamTaker / Judge / BenchmarkRunner**: answering and grading
//! - **Evaluator**: cross-run aggregation and plotting

pub mod benchmark;
pub mod config;
pub mod error;
pub mod evaluation;
pub mod layout;
pub mod llm;
pub mod persistence;
pub mod processing;
pub mod rag;
pub mod sheet;

// Re-export commonly used types
pub use benchmark::{BenchmarkRunner, ExamTaker, Judge};
pub use config::Config;
pub use error::{BenchError, Result};
pub use evaluation::Evaluator;
pub use llm::LlmClient;
pub use persistence::{load_json, save_json};
pub use processing::ExamProcessor;
pub use rag::{RagIngestor, RagRetriever};
pub use sheet::{ExamSheet, Question};
