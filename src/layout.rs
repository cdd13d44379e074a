//! On-disk layout shared by all stages.
//!
//! ```text
//! raw/{profession}/{exam_number}/exam/*.pdf
//! raw/{profession}/{exam_number}/solution/*.pdf
//! processed/{profession}/{exam_number}/{ts}/answer_sheet.json
//! benchmarked/{profession}/{exam_number}/{processing_ts}/model={model}[_rag]/{bench_ts}/model_answers.json
//! benchmarked/.../judge={judge}/graded_answers.json
//! ```

use crate::config::Selection;
use crate::error::{BenchError, Result};
use crate::persistence::artifact_exists;
use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};

pub const ANSWER_SHEET_FILE: &str = "answer_sheet.json";
pub const SOLUTION_SHEET_FILE: &str = "solution_sheet.json";
pub const METADATA_FILE: &str = "metadata.json";
pub const MODEL_ANSWERS_FILE: &str = "model_answers.json";
pub const GRADED_ANSWERS_FILE: &str = "graded_answers.json";
pub const RETRIEVED_CHUNKS_FILE: &str = "retrieved_chunks.json";

/// Suffix of the model folder for retrieval-augmented runs.
pub const RAG_SUFFIX: &str = "_rag";

/// Timestamp format of run directories.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Name for a new run directory.
pub fn timestamp() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Make a model or judge name safe for a path component.
pub fn sanitize_name(name: &str) -> String {
    name.replace('/', "__").replace(':', "_").replace(' ', "_")
}

/// `model={name}` folder, with the RAG suffix when requested.
pub fn model_dir_name(model: &str, rag: bool) -> String {
    let suffix = if rag { RAG_SUFFIX } else { "" };
    format!("model={}{}", sanitize_name(model), suffix)
}

/// `judge={name}` folder.
pub fn judge_dir_name(judge: &str) -> String {
    format!("judge={}", sanitize_name(judge))
}

/// Immediate subdirectories of `dir`, sorted by name. Missing dirs yield none.
pub fn subdirs(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut dirs = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| BenchError::io(dir, e))? {
        let entry = entry.map_err(|e| BenchError::io(dir, e))?;
        let path = entry.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// PDF files in `dir` (extension match is case-insensitive), sorted.
pub fn list_pdfs(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut pdfs = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| BenchError::io(dir, e))? {
        let path = entry.map_err(|e| BenchError::io(dir, e))?.path();
        let is_pdf = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("pdf"));
        if is_pdf && path.is_file() {
            pdfs.push(path);
        }
    }
    pdfs.sort();
    Ok(pdfs)
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Exam numbers sort numerically when both are numbers.
fn compare_exam_numbers(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        _ => a.cmp(b),
    }
}

/// An exam folder under the raw data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawExam {
    pub profession: String,
    pub exam_number: String,
    pub exam_dir: PathBuf,
    pub solution_dir: PathBuf,
}

/// Find raw exams that have both `exam/` and `solution/` folders.
pub fn scan_raw(
    raw_dir: &Path,
    professions: &Selection,
    exam_numbers: &Selection,
) -> Result<Vec<RawExam>> {
    if !raw_dir.is_dir() {
        return Err(BenchError::FileNotFound(raw_dir.to_path_buf()));
    }

    let mut exams = Vec::new();
    for profession_dir in subdirs(raw_dir)? {
        let profession = dir_name(&profession_dir);
        if !professions.includes(&profession) {
            continue;
        }

        for exam_dir in subdirs(&profession_dir)? {
            let exam_number = dir_name(&exam_dir);
            if !exam_numbers.includes(&exam_number) {
                continue;
            }

            let exam = exam_dir.join("exam");
            let solution = exam_dir.join("solution");
            if exam.is_dir() && solution.is_dir() {
                exams.push(RawExam {
                    profession: profession.clone(),
                    exam_number,
                    exam_dir: exam,
                    solution_dir: solution,
                });
            }
        }
    }

    exams.sort_by(|a, b| {
        a.profession
            .cmp(&b.profession)
            .then_with(|| compare_exam_numbers(&a.exam_number, &b.exam_number))
    });
    Ok(exams)
}

/// The newest processing run of one exam.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedExam {
    pub profession: String,
    pub exam_number: String,
    pub timestamp: String,
    pub dir: PathBuf,
}

impl ProcessedExam {
    pub fn answer_sheet_path(&self) -> PathBuf {
        self.dir.join(ANSWER_SHEET_FILE)
    }

    pub fn solution_sheet_path(&self) -> PathBuf {
        self.dir.join(SOLUTION_SHEET_FILE)
    }

    /// `{profession}/{exam_number}`.
    pub fn exam_id(&self) -> String {
        format!("{}/{}", self.profession, self.exam_number)
    }

    /// Directory holding this run's results for one model.
    pub fn benchmark_dir(&self, benchmarked_dir: &Path, model: &str, rag: bool) -> PathBuf {
        benchmarked_dir
            .join(&self.profession)
            .join(&self.exam_number)
            .join(&self.timestamp)
            .join(model_dir_name(model, rag))
    }
}

/// Latest processing run per exam that contains an answer sheet.
pub fn find_processed(
    processed_dir: &Path,
    professions: &Selection,
    exam_numbers: &Selection,
) -> Result<Vec<ProcessedExam>> {
    let mut exams = Vec::new();

    for profession_dir in subdirs(processed_dir)? {
        let profession = dir_name(&profession_dir);
        if !professions.includes(&profession) {
            continue;
        }

        for exam_dir in subdirs(&profession_dir)? {
            let exam_number = dir_name(&exam_dir);
            if !exam_numbers.includes(&exam_number) {
                continue;
            }

            // subdirs() is sorted, so the last match is the newest.
            let latest = subdirs(&exam_dir)?
                .into_iter()
                .filter(|run| artifact_exists(&run.join(ANSWER_SHEET_FILE)))
                .next_back();

            if let Some(run) = latest {
                exams.push(ProcessedExam {
                    profession: profession.clone(),
                    exam_number: exam_number.clone(),
                    timestamp: dir_name(&run),
                    dir: run,
                });
            }
        }
    }

    exams.sort_by(|a, b| {
        a.profession
            .cmp(&b.profession)
            .then_with(|| compare_exam_numbers(&a.exam_number, &b.exam_number))
    });
    Ok(exams)
}

/// A located benchmark run of one model on one exam.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BenchmarkRun {
    pub processing_timestamp: String,
    pub benchmark_timestamp: String,
    pub dir: PathBuf,
}

impl BenchmarkRun {
    pub fn graded_answers_path(&self, judge: &str) -> PathBuf {
        self.dir.join(judge_dir_name(judge)).join(GRADED_ANSWERS_FILE)
    }
}

/// Newest benchmark run of `model_dir` for an exam, across all processing runs.
///
/// `model_dir` is the literal folder name (see [`model_dir_name`]), so a
/// plain model and its `_rag` variant never match each other.
pub fn latest_benchmark_run(
    benchmarked_dir: &Path,
    profession: &str,
    exam_number: &str,
    model_dir: &str,
) -> Result<Option<BenchmarkRun>> {
    let exam_dir = benchmarked_dir.join(profession).join(exam_number);
    let mut latest: Option<BenchmarkRun> = None;

    for processing_run in subdirs(&exam_dir)? {
        let model_path = processing_run.join(model_dir);
        for bench_run in subdirs(&model_path)? {
            let bench_ts = dir_name(&bench_run);
            let newer = latest
                .as_ref()
                .is_none_or(|current| bench_ts > current.benchmark_timestamp);
            if newer {
                latest = Some(BenchmarkRun {
                    processing_timestamp: dir_name(&processing_run),
                    benchmark_timestamp: bench_ts,
                    dir: bench_run,
                });
            }
        }
    }

    Ok(latest)
}
