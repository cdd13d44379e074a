//! Exam Bench CLI
//!
//! Runs the exam benchmark pipeline stage by stage.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use exam_bench::{
    benchmark::{self, BenchmarkRunner, regrade},
    config::{Config, Selection},
    evaluation::{self, Evaluator},
    layout,
    llm::LlmClient,
    persistence::{load_json, save_json},
    processing::ExamProcessor,
    rag::{self, ChunkConfig, RagIngestor, embedder_from_params},
    sheet::ExamSheet,
};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing_subscriber::EnvFilter;

/// Exam Bench - benchmark LLMs on professional exams
#[derive(Parser)]
#[command(name = "exam-bench")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true, default_value = "config/config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract answer and solution sheets from the raw exam PDFs
    Process,

    /// Chunk and embed reference documents for RAG benchmarks
    Ingest,

    /// Answer processed exams with the configured models and grade them
    Benchmark {
        /// Augment questions with retrieved reference chunks
        #[arg(long)]
        rag: bool,
    },

    /// Aggregate graded results and plot a model comparison
    Evaluate,

    /// Recompute scores and summary of a graded_answers.json in place
    Regrade {
        /// Path to the graded answers file
        file: PathBuf,
    },

    /// Test LLM connection
    Test {
        /// Model to test (defaults to the processing model)
        #[arg(short, long)]
        model: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Process => cmd_process(&cli.config).await,
        Commands::Ingest => cmd_ingest(&cli.config).await,
        Commands::Benchmark { rag } => cmd_benchmark(&cli.config, rag).await,
        Commands::Evaluate => cmd_evaluate(&cli.config),
        Commands::Regrade { file } => cmd_regrade(&file),
        Commands::Test { model } => cmd_test(&cli.config, model).await,
    }
}

fn load_config(path: &Path) -> Result<Config> {
    println!("Loading configuration...");
    let config = Config::load(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

async fn cmd_process(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let processor = ExamProcessor::from_config(&config).context("Failed to create processor")?;

    println!("Processing exams from: {}", config.raw_data_dir.display());
    println!("Using model: {}", config.processing.processing_model);

    let start = Instant::now();
    let outcomes = processor.process_all().await.context("Processing failed")?;

    if outcomes.is_empty() {
        println!("No exams found.");
        return Ok(());
    }

    println!("\nProcessing Results:");
    println!("{}", "─".repeat(60));
    for outcome in &outcomes {
        match &outcome.result {
            Ok(run) => println!(
                "  {:<30} {} questions ({} answerable) -> {}",
                outcome.exam_id,
                run.num_questions,
                run.total_questions,
                run.output_dir.display()
            ),
            Err(e) => println!("  {:<30} FAILED: {}", outcome.exam_id, e),
        }
    }
    println!("{}", "─".repeat(60));

    let ok = outcomes.iter().filter(|o| o.result.is_ok()).count();
    println!(
        "Processed {}/{} exams in {:.2?}",
        ok,
        outcomes.len(),
        start.elapsed()
    );
    Ok(())
}

/// Professions to ingest: the RAG selection plus the shared database, or
/// every folder under the documents root.
fn ingest_professions(config: &Config) -> Result<Vec<String>> {
    let rag_config = &config.benchmarking_rag;
    let mut professions = match &rag_config.benchmarking.professions {
        Selection::Only(names) => names.clone(),
        Selection::All => {
            let root = config.data_dir().join("rag").join("documents");
            layout::subdirs(&root)?
                .iter()
                .filter_map(|dir| dir.file_name().map(|n| n.to_string_lossy().to_string()))
                .collect()
        }
    };

    if let Some(database) = &rag_config.rag_database {
        if !professions.contains(database) {
            professions.push(database.clone());
        }
    }
    Ok(professions)
}

async fn cmd_ingest(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let params = &config.benchmarking_rag.rag_parameters;

    let professions = ingest_professions(&config)?;
    if professions.is_empty() {
        println!("No professions selected for ingestion.");
        return Ok(());
    }

    println!("Embedding model: {}", params.embedding_model);
    let embedder = embedder_from_params(params).context("Failed to create embedder")?;
    let chunk_config = ChunkConfig {
        chunk_size: params.chunk_size,
        chunk_overlap: params.chunk_overlap,
    };

    let data_dir = config.data_dir();
    for profession in &professions {
        println!("\nIngesting profession: {}", profession);
        let ingestor = RagIngestor::new(&data_dir, profession, chunk_config.clone(), embedder.clone());

        match ingestor.ingest().await {
            Ok(report) if report.chunks == 0 => println!(
                "  No documents found. Put .md or .txt files in {}",
                ingestor.documents_dir().display()
            ),
            Ok(report) => println!(
                "  {} documents, {} chunks -> {}",
                report.documents,
                report.chunks,
                rag::database_dir(&data_dir, profession).display()
            ),
            Err(e) => println!("  FAILED: {}", e),
        }
    }
    Ok(())
}

async fn cmd_benchmark(config_path: &Path, rag: bool) -> Result<()> {
    let config = load_config(config_path)?;

    let runner = if rag {
        BenchmarkRunner::rag_from_config(&config)
    } else {
        BenchmarkRunner::from_config(&config)
    }
    .context("Failed to set up benchmark")?;

    let start = Instant::now();
    let outcomes = runner.run().await.context("Benchmark failed")?;

    if outcomes.is_empty() {
        println!("No processed exams found for benchmarking.");
        return Ok(());
    }

    benchmark::print_summary(&outcomes, &config.benchmarked_dir());
    println!("Total time: {:.2?}", start.elapsed());
    Ok(())
}

fn cmd_evaluate(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let evaluator = Evaluator::from_config(&config);

    println!("Evaluating results in: {}", config.benchmarked_dir().display());
    let report = evaluator.run().context("Evaluation failed")?;
    evaluation::print_summary(&report);
    Ok(())
}

fn cmd_regrade(path: &Path) -> Result<()> {
    let mut sheet: ExamSheet = load_json(path)
        .with_context(|| format!("Failed to load graded answers from {}", path.display()))?;

    let summary = regrade(&mut sheet).clone();
    save_json(&sheet, path).context("Failed to save graded answers")?;

    println!("Regraded: {}", path.display());
    println!("  Total points: {}", summary.total_points);
    for (run, score) in &summary.judge_runs {
        println!(
            "  {:<40} {:>7.2} pts ({:.2}%)",
            run, score.awarded_points, score.percentage
        );
    }
    if let Some(agg) = summary.aggregation {
        println!(
            "  Average: {:.2} pts ({:.2}%), std dev {:.2} pts ({:.2}%)",
            agg.average_points, agg.average_percentage, agg.std_dev_points, agg.std_dev_percentage
        );
    }
    Ok(())
}

async fn cmd_test(config_path: &Path, model: Option<String>) -> Result<()> {
    println!("Testing LLM connection...\n");

    let config = Config::load(config_path).context("Failed to load configuration")?;
    let model = model.unwrap_or_else(|| config.processing.processing_model.clone());

    let llm = match config.llm_for(&model) {
        Ok(llm) => llm,
        Err(e) => {
            println!("Configuration error: {}", e);
            return Ok(());
        }
    };

    println!("Configuration:");
    println!("  API Base:  {}", llm.api_base);
    println!("  Model:     {}", llm.model);
    println!(
        "  API Key:   {}...",
        llm.api_key.chars().take(8).collect::<String>()
    );
    println!();

    let client = LlmClient::new(llm);

    println!("Sending test request...");
    match client.test_connection().await {
        Ok(()) => println!("Connection successful!"),
        Err(e) => println!("Connection failed: {}", e),
    }

    Ok(())
}
