//! PDF processing: raw exam and solution PDFs to answer and solution sheets.
//!
//! The PDFs are sent whole to a multimodal model, once to extract the
//! questions and once more to fill in solutions, grading criteria and points.

use crate::config::{Config, Selection};
use crate::error::{BenchError, Result};
use crate::layout::{self, RawExam};
use crate::llm::parse::parse_json_object;
use crate::llm::{ContentPart, FileData, LlmClient, Message, Prompts};
use crate::persistence::save_json;
use crate::sheet::{ExamMetadata, ExamSheet, questions_from_value};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// `metadata.json` of a processing run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingMetadata {
    pub profession: String,
    pub exam_number: String,
    pub exam_id: String,
    /// Top-level questions in the answer sheet.
    pub num_questions: usize,
    pub processing_model: String,
    pub processing_date: String,
}

/// Result of processing one exam.
#[derive(Debug)]
pub struct ProcessOutcome {
    pub exam_id: String,
    pub result: Result<ProcessedRun>,
}

/// A successfully written processing run.
#[derive(Debug, Clone)]
pub struct ProcessedRun {
    pub output_dir: PathBuf,
    pub num_questions: usize,
    pub total_questions: usize,
}

/// Turns raw exam folders into processed sheets.
pub struct ExamProcessor {
    client: LlmClient,
    raw_dir: PathBuf,
    processed_dir: PathBuf,
    professions: Selection,
    exam_numbers: Selection,
}

impl ExamProcessor {
    pub fn new(config: &Config, client: LlmClient) -> Self {
        Self {
            client,
            raw_dir: config.raw_data_dir.clone(),
            processed_dir: config.processed_data_dir.clone(),
            professions: config.processing.professions.clone(),
            exam_numbers: config.processing.exam_numbers.clone(),
        }
    }

    /// Build a processor using the configured processing model.
    pub fn from_config(config: &Config) -> Result<Self> {
        let llm = config.llm_for(&config.processing.processing_model)?;
        Ok(Self::new(config, LlmClient::new(llm)))
    }

    /// Exam folders selected by the processing filters.
    pub fn scan_raw_data(&self) -> Result<Vec<RawExam>> {
        layout::scan_raw(&self.raw_dir, &self.professions, &self.exam_numbers)
    }

    /// Process every selected exam. One failing exam does not stop the rest.
    pub async fn process_all(&self) -> Result<Vec<ProcessOutcome>> {
        let exams = self.scan_raw_data()?;
        if exams.is_empty() {
            warn!("No exam folders found in {}", self.raw_dir.display());
            return Ok(Vec::new());
        }

        info!("Found {} exam(s) to process", exams.len());

        let mut outcomes = Vec::with_capacity(exams.len());
        for exam in &exams {
            let exam_id = format!("{}/{}", exam.profession, exam.exam_number);
            let result = self.process_exam(exam).await;
            if let Err(e) = &result {
                warn!(exam = %exam_id, "Processing failed: {}", e);
            }
            outcomes.push(ProcessOutcome { exam_id, result });
        }

        Ok(outcomes)
    }

    /// Process one exam into a new timestamped run directory.
    pub async fn process_exam(&self, exam: &RawExam) -> Result<ProcessedRun> {
        let exam_id = format!("{}/{}", exam.profession, exam.exam_number);
        info!(exam = %exam_id, "Processing");

        let exam_pdfs = read_pdfs(&exam.exam_dir)?;
        let solution_pdfs = read_pdfs(&exam.solution_dir)?;
        info!(
            exam = %exam_id,
            "Exam: {} PDF file(s), solution: {} PDF file(s)",
            exam_pdfs.len(),
            solution_pdfs.len()
        );

        let answer_sheet = self
            .generate_answer_sheet(&exam_pdfs, &exam.profession, &exam.exam_number)
            .await?;
        let solution_sheet = self
            .generate_solution_sheet(
                &solution_pdfs,
                &answer_sheet,
                &exam.profession,
                &exam.exam_number,
            )
            .await?;

        let output_dir = self
            .processed_dir
            .join(&exam.profession)
            .join(&exam.exam_number)
            .join(layout::timestamp());

        save_json(&answer_sheet, &output_dir.join(layout::ANSWER_SHEET_FILE))?;
        save_json(&solution_sheet, &output_dir.join(layout::SOLUTION_SHEET_FILE))?;

        let metadata = ProcessingMetadata {
            profession: exam.profession.clone(),
            exam_number: exam.exam_number.clone(),
            exam_id: exam_id.clone(),
            num_questions: answer_sheet.questions.len(),
            processing_model: self.client.model().to_string(),
            processing_date: chrono::Local::now().to_rfc3339(),
        };
        save_json(&metadata, &output_dir.join(layout::METADATA_FILE))?;

        info!(exam = %exam_id, "Saved to {}", output_dir.display());

        Ok(ProcessedRun {
            output_dir,
            num_questions: metadata.num_questions,
            total_questions: answer_sheet.exam_metadata.total_questions.unwrap_or(0),
        })
    }

    /// Extract the question tree from the exam PDFs.
    pub async fn generate_answer_sheet(
        &self,
        pdfs: &[FileData],
        profession: &str,
        year: &str,
    ) -> Result<ExamSheet> {
        let instructions = Prompts::fill(
            Prompts::answer_sheet_instructions(),
            &[("profession", profession), ("year", year)],
        );

        let mut parts = vec![ContentPart::text(instructions)];
        parts.extend(pdfs.iter().cloned().map(ContentPart::file));

        let messages = [
            Message::system(Prompts::answer_sheet_system()),
            Message::user_parts(parts),
        ];

        let reply = self.client.ask(&messages).await?;
        let questions = match parse_json_object(&reply) {
            Some(value) => questions_from_value(&value),
            None => {
                warn!("Could not parse answer sheet reply, using an empty question list");
                Vec::new()
            }
        };

        let mut sheet = ExamSheet::new(ExamMetadata::new(profession, year), questions);
        sheet.ensure_answer_fields();
        sheet.exam_metadata.total_questions = Some(sheet.count_answerable());
        Ok(sheet)
    }

    /// Fill solutions, grading criteria and points into `answer_sheet`.
    ///
    /// Falls back to a blank template when the reply has no `questions`.
    pub async fn generate_solution_sheet(
        &self,
        pdfs: &[FileData],
        answer_sheet: &ExamSheet,
        profession: &str,
        year: &str,
    ) -> Result<ExamSheet> {
        let answer_json = serde_json::to_string_pretty(answer_sheet)
            .map_err(|e| BenchError::Serialization(e.to_string()))?;
        let input = Prompts::fill(
            Prompts::solution_sheet_input(),
            &[
                ("profession", profession),
                ("year", year),
                ("answer_sheet", answer_json.as_str()),
            ],
        );

        let mut parts = vec![ContentPart::text(input)];
        parts.extend(pdfs.iter().cloned().map(ContentPart::file));

        let messages = [
            Message::system(Prompts::solution_sheet_system()),
            Message::user_parts(parts),
        ];

        let reply = self.client.ask(&messages).await?;
        let Some(value) = parse_json_object(&reply).filter(|v| v.get("questions").is_some())
        else {
            warn!("Solution reply did not contain 'questions', using an empty template");
            return Ok(answer_sheet.solution_template(profession, year));
        };

        let mut sheet = ExamSheet::new(answer_sheet.exam_metadata.clone(), questions_from_value(&value));
        if let Some(metadata) = value
            .get("exam_metadata")
            .and_then(|m| serde_json::from_value::<ExamMetadata>(m.clone()).ok())
        {
            sheet.exam_metadata = metadata;
        }
        Ok(sheet)
    }
}

/// Load all PDFs of a folder, failing when there are none.
fn read_pdfs(dir: &Path) -> Result<Vec<FileData>> {
    let paths = layout::list_pdfs(dir)?;
    if paths.is_empty() {
        return Err(BenchError::NoPdfs(dir.to_path_buf()));
    }
    paths.iter().map(|p| FileData::from_pdf(p)).collect()
}
