//! Benchmark orchestration: answer every selected exam with every model and
//! grade the answers with every judge.

use super::answerer::{ExamTaker, Retrieval};
use super::grading::{
    aggregate_judgments, collect_judgments, compute_summary, init_judgments, inject_max_points,
};
use super::judge::Judge;
use crate::config::{BenchmarkingConfig, Config};
use crate::error::{BenchError, Result};
use crate::layout::{self, ProcessedExam};
use crate::llm::LlmClient;
use crate::persistence::{load_json, save_json};
use crate::rag::{Embedder, RagRetriever, embedder_from_params};
use crate::sheet::{ExamSheet, GradingMetadata, GradingSummary};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Retrieval settings of a RAG benchmark.
pub struct RagSetup {
    /// Parent of `rag/`.
    pub data_dir: PathBuf,
    /// Store to query for every exam; the exam's profession when unset.
    pub database: Option<String>,
    pub top_k: usize,
    pub embedder: Arc<dyn Embedder>,
}

/// Outcome of benchmarking one exam.
#[derive(Debug)]
pub struct ExamOutcome {
    pub exam_id: String,
    /// Why the exam was skipped, if it was.
    pub skipped: Option<String>,
    pub models: Vec<ModelOutcome>,
}

/// Outcome of one model on one exam.
#[derive(Debug)]
pub struct ModelOutcome {
    pub model: String,
    pub run_dir: PathBuf,
    /// Set when answer generation failed; no grading happens then.
    pub error: Option<String>,
    pub graded: Vec<JudgeOutcome>,
}

/// Outcome of one judge for one model.
#[derive(Debug)]
pub struct JudgeOutcome {
    pub judge: String,
    pub result: Result<GradedRun>,
}

/// A written graded sheet.
#[derive(Debug, Clone)]
pub struct GradedRun {
    pub path: PathBuf,
    pub summary: GradingSummary,
}

/// Runs candidates and judges over processed exams.
pub struct BenchmarkRunner {
    processed_dir: PathBuf,
    benchmarked_dir: PathBuf,
    settings: BenchmarkingConfig,
    models: Vec<LlmClient>,
    judges: Vec<Judge>,
    rag: Option<RagSetup>,
}

impl BenchmarkRunner {
    pub fn new(
        config: &Config,
        settings: BenchmarkingConfig,
        models: Vec<LlmClient>,
        judges: Vec<LlmClient>,
        rag: Option<RagSetup>,
    ) -> Self {
        Self {
            processed_dir: config.processed_data_dir.clone(),
            benchmarked_dir: config.benchmarked_dir(),
            settings,
            models,
            judges: judges.into_iter().map(Judge::new).collect(),
            rag,
        }
    }

    /// Plain benchmark from the `benchmarking` section.
    pub fn from_config(config: &Config) -> Result<Self> {
        let settings = config.benchmarking.clone();
        let (models, judges) = clients(config, &settings)?;
        Ok(Self::new(config, settings, models, judges, None))
    }

    /// RAG benchmark from the `benchmarking_rag` section.
    pub fn rag_from_config(config: &Config) -> Result<Self> {
        let rag_config = &config.benchmarking_rag;
        let settings = rag_config.benchmarking.clone();
        let (models, judges) = clients(config, &settings)?;

        let rag = RagSetup {
            data_dir: config.data_dir(),
            database: rag_config.rag_database.clone(),
            top_k: rag_config.rag_parameters.top_k,
            embedder: embedder_from_params(&rag_config.rag_parameters)?,
        };
        Ok(Self::new(config, settings, models, judges, Some(rag)))
    }

    pub fn is_rag(&self) -> bool {
        self.rag.is_some()
    }

    /// Latest processed run of every selected exam.
    pub fn find_exams(&self) -> Result<Vec<ProcessedExam>> {
        layout::find_processed(
            &self.processed_dir,
            &self.settings.professions,
            &self.settings.exam_numbers,
        )
    }

    /// Benchmark every selected exam. A failing exam does not stop the rest.
    pub async fn run(&self) -> Result<Vec<ExamOutcome>> {
        let exams = self.find_exams()?;
        if exams.is_empty() {
            warn!(
                "No processed exams found in {}",
                self.processed_dir.display()
            );
            return Ok(Vec::new());
        }
        info!("Benchmarking {} exam(s)", exams.len());

        let mut outcomes = Vec::with_capacity(exams.len());
        for exam in &exams {
            let exam_id = exam.exam_id();
            let outcome = match self.run_exam(exam).await {
                Ok(models) => ExamOutcome {
                    exam_id,
                    skipped: None,
                    models,
                },
                Err(e) => {
                    warn!(exam = %exam_id, "Skipping exam: {}", e);
                    ExamOutcome {
                        exam_id,
                        skipped: Some(e.to_string()),
                        models: Vec::new(),
                    }
                }
            };
            outcomes.push(outcome);
        }

        Ok(outcomes)
    }

    fn open_retrieval(&self, exam: &ProcessedExam) -> Result<Option<Retrieval>> {
        let Some(rag) = &self.rag else {
            return Ok(None);
        };

        let database = rag.database.as_deref().unwrap_or(&exam.profession);
        let retriever =
            RagRetriever::open(&rag.data_dir, database, rag.embedder.clone()).map_err(|e| match e {
                BenchError::StoreNotFound(path) => BenchError::Config(format!(
                    "No vector store for '{}' at {}. Run `exam-bench ingest` first.",
                    database,
                    path.display()
                )),
                other => other,
            })?;

        Ok(Some(Retrieval {
            retriever: Arc::new(retriever),
            top_k: rag.top_k,
        }))
    }

    /// Benchmark one exam under a single new benchmark timestamp.
    pub async fn run_exam(&self, exam: &ProcessedExam) -> Result<Vec<ModelOutcome>> {
        let exam_id = exam.exam_id();
        info!(exam = %exam_id, "Benchmarking from {}", exam.dir.display());

        let answer_sheet: ExamSheet = load_json(&exam.answer_sheet_path())?;
        let solution_sheet: ExamSheet = load_json(&exam.solution_sheet_path())?;
        let retrieval = self.open_retrieval(exam)?;
        let bench_ts = layout::timestamp();

        let mut outcomes = Vec::with_capacity(self.models.len());
        for client in &self.models {
            let model = client.model().to_string();
            let taker = match &retrieval {
                Some(retrieval) => ExamTaker::with_retrieval(client.clone(), retrieval.clone()),
                None => ExamTaker::new(client.clone()),
            };
            info!(exam = %exam_id, model = %model, rag = self.is_rag(), "Generating answers");

            let (mut answers, error) = match taker.answer(&answer_sheet).await {
                Ok(filled) => (ExamSheet::reconcile_answers(&answer_sheet, filled), None),
                Err(e) => {
                    warn!(exam = %exam_id, model = %model, "Answer generation failed: {}", e);
                    let reason = format!("Model answer generation failed: {}", e);
                    (ExamSheet::failed_copy(&answer_sheet, &reason), Some(reason))
                }
            };

            let metadata = &mut answers.exam_metadata;
            metadata.annotate("evaluated_model", model.as_str());
            metadata.annotate("benchmark_timestamp", bench_ts.as_str());
            metadata.annotate("source_processing_run", exam.timestamp.as_str());
            if self.is_rag() {
                metadata.flag("rag_enabled", true);
            }

            let run_dir = exam
                .benchmark_dir(&self.benchmarked_dir, &model, self.is_rag())
                .join(&bench_ts);

            if self.is_rag() {
                let chunks = answers.take_retrieved_chunks();
                save_json(&chunks, &run_dir.join(layout::RETRIEVED_CHUNKS_FILE))?;
            }
            save_json(&answers, &run_dir.join(layout::MODEL_ANSWERS_FILE))?;

            let mut graded = Vec::new();
            if error.is_none() {
                for judge in &self.judges {
                    let meta = GradingMetadata {
                        evaluation_model: model.clone(),
                        judge_model: judge.model().to_string(),
                        benchmark_timestamp: bench_ts.clone(),
                        source_processing_run: exam.timestamp.clone(),
                        rag_enabled: self.is_rag(),
                    };
                    let result = self
                        .grade_answers(judge, &answers, &solution_sheet, meta, &run_dir)
                        .await;
                    if let Err(e) = &result {
                        warn!(exam = %exam_id, model = %model, judge = %judge.model(), "Grading failed: {}", e);
                    }
                    graded.push(JudgeOutcome {
                        judge: judge.model().to_string(),
                        result,
                    });
                }
            }

            outcomes.push(ModelOutcome {
                model,
                run_dir,
                error,
                graded,
            });
        }

        Ok(outcomes)
    }

    /// Grade `answers` `num_judge_runs` times with `judge` and write the
    /// graded sheet below `run_dir`.
    async fn grade_answers(
        &self,
        judge: &Judge,
        answers: &ExamSheet,
        solution: &ExamSheet,
        meta: GradingMetadata,
        run_dir: &Path,
    ) -> Result<GradedRun> {
        let mut graded = answers.clone();
        init_judgments(&mut graded);
        graded.grading_metadata = Some(meta);

        let runs = self.settings.num_judge_runs;
        for run_id in 1..=runs {
            info!(judge = %judge.model(), "Grading run {}/{}", run_id, runs);
            let grades = judge.grade(answers, solution).await?;
            collect_judgments(&mut graded, &grades, judge.model(), run_id);
        }

        aggregate_judgments(&mut graded);
        inject_max_points(&mut graded, solution);
        let summary = compute_summary(&graded);
        graded.grading_summary = Some(summary.clone());

        let path = run_dir
            .join(layout::judge_dir_name(judge.model()))
            .join(layout::GRADED_ANSWERS_FILE);
        save_json(&graded, &path)?;

        Ok(GradedRun { path, summary })
    }
}

fn clients(config: &Config, settings: &BenchmarkingConfig) -> Result<(Vec<LlmClient>, Vec<LlmClient>)> {
    if settings.models.is_empty() {
        return Err(BenchError::Config("No models configured for benchmarking.".to_string()));
    }
    if settings.judges.is_empty() {
        return Err(BenchError::Config("No judges configured for benchmarking.".to_string()));
    }

    let build = |names: &[String]| -> Result<Vec<LlmClient>> {
        names
            .iter()
            .map(|name| Ok(LlmClient::new(config.llm_for(name)?)))
            .collect()
    };
    Ok((build(&settings.models)?, build(&settings.judges)?))
}

/// Print a per-exam summary of a benchmark.
pub fn print_summary(outcomes: &[ExamOutcome], benchmarked_dir: &Path) {
    println!("\n========== Benchmark Results ==========");
    for exam in outcomes {
        println!("{}", exam.exam_id);
        if let Some(reason) = &exam.skipped {
            println!("  skipped: {}", reason);
            continue;
        }
        for model in &exam.models {
            if let Some(error) = &model.error {
                println!("  {:<40} FAILED: {}", model.model, error);
                continue;
            }
            for judge in &model.graded {
                match &judge.result {
                    Ok(run) => {
                        let agg = run.summary.aggregation.unwrap_or_default();
                        println!(
                            "  {:<40} judge {:<30} {:>6.2}% (±{:.2})",
                            model.model, judge.judge, agg.average_percentage, agg.std_dev_percentage
                        );
                    }
                    Err(e) => {
                        println!("  {:<40} judge {:<30} FAILED: {}", model.model, judge.judge, e)
                    }
                }
            }
        }
    }
    println!("----------------------------------------");
    println!("Results saved to: {}", benchmarked_dir.display());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LlmConfig;
    use crate::rag::embeddings::testing::KeywordEmbedder;
    use crate::rag::store::{ChunkMetadata, StoredChunk};
    use crate::rag::{VectorCollection, collection_name, database_dir};
    use crate::sheet::{ChunkReport, ExamMetadata, Question};
    use tempfile::TempDir;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn completion(content: &str) -> serde_json::Value {
        serde_json::json!({ "choices": [{ "message": { "content": content } }] })
    }

    fn client(server: &MockServer, model: &str) -> LlmClient {
        LlmClient::new(LlmConfig {
            api_base: server.uri(),
            api_key: "k".to_string(),
            model: model.to_string(),
            max_retries: 1,
            ..Default::default()
        })
    }

    fn write_processed(root: &Path) -> ProcessedExam {
        let dir = root.join("processed/Informatiker/1/20250101_120000");
        let answer = ExamSheet::new(
            ExamMetadata::new("Informatiker", "1"),
            vec![
                Question::leaf("1", "What does TCP guarantee?"),
                Question::leaf("2", "Which protocol resolves names?"),
            ],
        );
        let mut solution = answer.clone();
        solution.visit_mut(&mut |q| {
            q.points = Some(2.0);
            q.solution_field = Some("see notes".to_string());
        });
        save_json(&answer, &dir.join(layout::ANSWER_SHEET_FILE)).unwrap();
        save_json(&solution, &dir.join(layout::SOLUTION_SHEET_FILE)).unwrap();

        ProcessedExam {
            profession: "Informatiker".to_string(),
            exam_number: "1".to_string(),
            timestamp: "20250101_120000".to_string(),
            dir,
        }
    }

    fn config(root: &Path) -> Config {
        Config {
            raw_data_dir: root.join("raw"),
            processed_data_dir: root.join("processed"),
            ..Default::default()
        }
    }

    fn settings(runs: u32) -> BenchmarkingConfig {
        BenchmarkingConfig {
            num_judge_runs: runs,
            ..Default::default()
        }
    }

    async fn mount_judge_and_candidate(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_string_contains("CANDIDATE ANSWER"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion(
                r#"{"points": 1, "feedback": "Partly right"}"#,
            )))
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("An answer")))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_plain_benchmark_writes_answers_and_grades() {
        let server = MockServer::start().await;
        mount_judge_and_candidate(&server).await;

        let dir = TempDir::new().unwrap();
        write_processed(dir.path());
        let runner = BenchmarkRunner::new(
            &config(dir.path()),
            settings(2),
            vec![client(&server, "openai/gpt-4o")],
            vec![client(&server, "judge/one")],
            None,
        );

        let outcomes = runner.run().await.unwrap();
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].skipped.is_none());

        let model = &outcomes[0].models[0];
        assert!(model.error.is_none());
        assert!(model.run_dir.to_string_lossy().contains("20250101_120000/model=openai__gpt-4o/"));

        let answers: ExamSheet = load_json(&model.run_dir.join(layout::MODEL_ANSWERS_FILE)).unwrap();
        assert_eq!(answers.questions[0].answer_field.as_deref(), Some("An answer"));
        assert_eq!(answers.exam_metadata.annotation("evaluated_model"), Some("openai/gpt-4o"));
        assert_eq!(
            answers.exam_metadata.annotation("source_processing_run"),
            Some("20250101_120000")
        );
        assert!(!model.run_dir.join(layout::RETRIEVED_CHUNKS_FILE).exists());
        assert!(!answers.exam_metadata.extra.contains_key("rag_enabled"));

        let graded_run = model.graded[0].result.as_ref().unwrap();
        assert!(graded_run.path.ends_with("judge=judge__one/graded_answers.json"));

        let graded: ExamSheet = load_json(&graded_run.path).unwrap();
        let q = &graded.questions[0];
        assert_eq!(q.judgments.as_ref().unwrap().len(), 2);
        assert_eq!(q.awarded_points, Some(1.0));
        assert_eq!(q.points, Some(2.0));
        assert_eq!(graded.grading_metadata.as_ref().unwrap().judge_model, "judge/one");
        assert!(!graded.grading_metadata.as_ref().unwrap().rag_enabled);

        let summary = graded.grading_summary.unwrap();
        assert_eq!(summary.total_points, 4.0);
        assert_eq!(summary.judge_runs.len(), 2);
        assert_eq!(summary.judge_runs["judge/one|1"].percentage, 50.0);
        assert_eq!(summary.aggregation.unwrap().std_dev_points, 0.0);
    }

    #[tokio::test]
    async fn test_failed_model_is_recorded_and_not_graded() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad model"))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        write_processed(dir.path());
        let runner = BenchmarkRunner::new(
            &config(dir.path()),
            settings(1),
            vec![client(&server, "broken/model")],
            vec![client(&server, "judge/one")],
            None,
        );

        let outcomes = runner.run().await.unwrap();
        let model = &outcomes[0].models[0];
        assert!(model.error.is_some());
        assert!(model.graded.is_empty());

        let answers: ExamSheet = load_json(&model.run_dir.join(layout::MODEL_ANSWERS_FILE)).unwrap();
        assert!(
            answers
                .exam_metadata
                .annotation("error")
                .unwrap()
                .starts_with("Model answer generation failed")
        );
        assert_eq!(answers.questions[0].answer_field.as_deref(), Some(""));
    }

    #[tokio::test]
    async fn test_rag_benchmark_splits_out_chunks() {
        let server = MockServer::start().await;
        mount_judge_and_candidate(&server).await;

        let dir = TempDir::new().unwrap();
        write_processed(dir.path());

        let db = database_dir(dir.path(), "Informatiker");
        let mut collection = VectorCollection::new(collection_name("Informatiker"), "keyword-test");
        collection
            .upsert(vec![StoredChunk {
                id: "dns.md_0".to_string(),
                text: "DNS resolves names.".to_string(),
                metadata: ChunkMetadata {
                    source: "dns.md".to_string(),
                    chunk_index: 0,
                },
                embedding: vec![0.01, 0.01, 1.01, 0.01],
            }])
            .unwrap();
        collection.save(&db).unwrap();

        let rag = RagSetup {
            data_dir: dir.path().to_path_buf(),
            database: None,
            top_k: 2,
            embedder: Arc::new(KeywordEmbedder),
        };
        let runner = BenchmarkRunner::new(
            &config(dir.path()),
            settings(1),
            vec![client(&server, "openai/gpt-4o")],
            vec![client(&server, "judge/one")],
            Some(rag),
        );

        let outcomes = runner.run().await.unwrap();
        let model = &outcomes[0].models[0];
        assert!(model.run_dir.to_string_lossy().contains("model=openai__gpt-4o_rag"));

        let chunks: Vec<ChunkReport> =
            load_json(&model.run_dir.join(layout::RETRIEVED_CHUNKS_FILE)).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].question_id, "2");
        assert_eq!(chunks[1].retrieved_chunks[0].source, "dns.md");

        let answers: ExamSheet = load_json(&model.run_dir.join(layout::MODEL_ANSWERS_FILE)).unwrap();
        assert!(answers.questions.iter().all(|q| q.retrieved_chunks.is_none()));
        assert_eq!(
            answers.exam_metadata.extra["rag_enabled"],
            serde_json::Value::Bool(true)
        );
        let graded = model.graded[0].result.as_ref().unwrap();
        let graded: ExamSheet = load_json(&graded.path).unwrap();
        assert!(graded.questions.iter().all(|q| q.retrieved_chunks.is_none()));
        assert!(graded.grading_metadata.as_ref().unwrap().rag_enabled);
    }

    #[tokio::test]
    async fn test_rag_without_store_skips_exam() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        write_processed(dir.path());

        let rag = RagSetup {
            data_dir: dir.path().to_path_buf(),
            database: Some("Koch".to_string()),
            top_k: 2,
            embedder: Arc::new(KeywordEmbedder),
        };
        let runner = BenchmarkRunner::new(
            &config(dir.path()),
            settings(1),
            vec![client(&server, "m")],
            vec![client(&server, "j")],
            Some(rag),
        );

        let outcomes = runner.run().await.unwrap();
        let reason = outcomes[0].skipped.as_ref().unwrap();
        assert!(reason.contains("ingest"));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[test]
    fn test_clients_require_models_and_judges() {
        let config = Config::default();
        let err = clients(&config, &BenchmarkingConfig::default()).unwrap_err();
        assert!(matches!(err, BenchError::Config(_)));
    }
}
