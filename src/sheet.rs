//! Exam sheets: the JSON documents every stage reads and writes.
//!
//! One shape covers answer sheets, solution sheets, model answers and graded
//! answers. Questions form a tree: a question with subquestions is a group
//! that only carries shared context, a question with an `answer_field` is an
//! answerable leaf. Keys the extraction model adds on its own are kept in
//! `extra` so nothing is lost on a round-trip.

use crate::rag::RetrievedChunk;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};

/// One grade from one judge run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Judgment {
    pub judge_name: String,
    pub run_id: u32,
    /// Unreadable or non-finite values load as 0.
    #[serde(serialize_with = "serialize_number", deserialize_with = "points_or_zero")]
    pub awarded_points: f64,
    #[serde(default)]
    pub feedback: String,
}

/// A question node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Question {
    #[serde(default, deserialize_with = "lenient_text")]
    pub question_id: String,

    #[serde(default, deserialize_with = "lenient_text")]
    pub question_text: String,

    /// Present on answerable leaves.
    #[serde(
        default,
        deserialize_with = "lenient_opt_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub answer_field: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subquestions: Option<Vec<Question>>,

    #[serde(
        default,
        deserialize_with = "lenient_opt_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub solution_field: Option<String>,

    #[serde(
        default,
        deserialize_with = "lenient_opt_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub grading_criteria: Option<String>,

    /// Maximum points.
    #[serde(
        default,
        deserialize_with = "lenient_number",
        serialize_with = "serialize_opt_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub points: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retrieved_chunks: Option<Vec<RetrievedChunk>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub judgments: Option<Vec<Judgment>>,

    #[serde(
        default,
        deserialize_with = "lenient_number",
        serialize_with = "serialize_opt_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub awarded_points: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Question {
    /// An answerable leaf with an empty answer.
    pub fn leaf(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            question_id: id.into(),
            question_text: text.into(),
            answer_field: Some(String::new()),
            ..Default::default()
        }
    }

    /// A group holding shared context for its subquestions.
    pub fn group(id: impl Into<String>, text: impl Into<String>, subs: Vec<Question>) -> Self {
        Self {
            question_id: id.into(),
            question_text: text.into(),
            subquestions: Some(subs),
            ..Default::default()
        }
    }

    /// Builder-style max points.
    pub fn with_points(mut self, points: f64) -> Self {
        self.points = Some(points);
        self
    }

    /// Non-empty subquestions, if this is a group.
    pub fn children(&self) -> &[Question] {
        self.subquestions.as_deref().unwrap_or_default()
    }

    /// Whether this node has subquestions.
    pub fn is_group(&self) -> bool {
        !self.children().is_empty()
    }

    /// Whether this node is an answerable leaf.
    pub fn is_answerable(&self) -> bool {
        !self.is_group() && self.answer_field.is_some()
    }

    /// Visit this node and all descendants, parents first.
    pub fn visit<'a>(&'a self, f: &mut impl FnMut(&'a Question)) {
        f(self);
        for child in self.children() {
            child.visit(f);
        }
    }

    /// Mutable variant of [`Question::visit`].
    pub fn visit_mut(&mut self, f: &mut impl FnMut(&mut Question)) {
        f(self);
        if let Some(children) = self.subquestions.as_mut() {
            for child in children {
                child.visit_mut(f);
            }
        }
    }
}

/// `exam_metadata` block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExamMetadata {
    #[serde(default, deserialize_with = "lenient_text")]
    pub profession: String,

    /// Exam number of the source folder.
    #[serde(default, deserialize_with = "lenient_text")]
    pub year: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_questions: Option<usize>,

    /// Stage annotations (evaluated_model, benchmark_timestamp, error, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ExamMetadata {
    pub fn new(profession: impl Into<String>, year: impl Into<String>) -> Self {
        Self {
            profession: profession.into(),
            year: year.into(),
            ..Default::default()
        }
    }

    /// Set a string annotation.
    pub fn annotate(&mut self, key: &str, value: impl Into<String>) {
        self.extra.insert(key.to_string(), Value::String(value.into()));
    }

    /// Set a boolean annotation.
    pub fn flag(&mut self, key: &str, value: bool) {
        self.extra.insert(key.to_string(), Value::Bool(value));
    }

    /// Read a string annotation.
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(Value::as_str)
    }
}

/// `grading_metadata` block of a graded sheet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GradingMetadata {
    pub evaluation_model: String,
    pub judge_model: String,
    pub benchmark_timestamp: String,
    pub source_processing_run: String,
    /// Set on retrieval-augmented runs only.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub rag_enabled: bool,
}

/// Score of one judge run over the whole exam.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RunScore {
    pub awarded_points: f64,
    pub percentage: f64,
}

/// Statistics across all judge runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Aggregation {
    pub average_points: f64,
    pub average_percentage: f64,
    pub std_dev_points: f64,
    pub std_dev_percentage: f64,
}

/// `grading_summary` block of a graded sheet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GradingSummary {
    #[serde(default)]
    pub total_points: f64,

    /// Keyed by `"{judge}|{run}"`.
    #[serde(default)]
    pub judge_runs: BTreeMap<String, RunScore>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregation: Option<Aggregation>,

    /// Flat percentage written by early versions of the grader.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percentage: Option<f64>,
}

/// Retrieval record for one question, written to `retrieved_chunks.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkReport {
    pub question_id: String,
    pub question_text: String,
    pub retrieved_chunks: Vec<RetrievedChunk>,
}

/// A complete sheet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExamSheet {
    #[serde(default)]
    pub exam_metadata: ExamMetadata,

    #[serde(default)]
    pub questions: Vec<Question>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grading_metadata: Option<GradingMetadata>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grading_summary: Option<GradingSummary>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ExamSheet {
    pub fn new(metadata: ExamMetadata, questions: Vec<Question>) -> Self {
        Self {
            exam_metadata: metadata,
            questions,
            ..Default::default()
        }
    }

    /// Visit every question, parents first.
    pub fn visit<'a>(&'a self, f: &mut impl FnMut(&'a Question)) {
        for question in &self.questions {
            question.visit(f);
        }
    }

    /// Visit every question mutably, parents first.
    pub fn visit_mut(&mut self, f: &mut impl FnMut(&mut Question)) {
        for question in &mut self.questions {
            question.visit_mut(f);
        }
    }

    /// All questions by id, at any depth. Later duplicates win.
    pub fn index(&self) -> HashMap<&str, &Question> {
        let mut map = HashMap::new();
        self.visit(&mut |q| {
            map.insert(q.question_id.as_str(), q);
        });
        map
    }

    /// Number of answerable leaves.
    pub fn count_answerable(&self) -> usize {
        let mut count = 0;
        self.visit(&mut |q| {
            if q.is_answerable() {
                count += 1;
            }
        });
        count
    }

    /// Sum of max points over all leaves (groups are not counted).
    pub fn total_points(&self) -> f64 {
        let mut total = 0.0;
        self.visit(&mut |q| {
            if !q.is_group() {
                total += q.points.unwrap_or(0.0);
            }
        });
        total
    }

    /// Give every leaf without subquestions an empty `answer_field`.
    pub fn ensure_answer_fields(&mut self) {
        self.visit_mut(&mut |q| {
            if q.subquestions.is_none() && q.answer_field.is_none() {
                q.answer_field = Some(String::new());
            }
        });
    }

    /// Solution sheet skeleton with blank solutions, used when the model
    /// reply is unusable.
    pub fn solution_template(&self, profession: &str, year: &str) -> ExamSheet {
        let mut template = self.clone();
        if template.exam_metadata.profession.is_empty() && template.exam_metadata.year.is_empty()
        {
            template.exam_metadata = ExamMetadata::new(profession, year);
        }
        template.visit_mut(&mut |q| {
            q.solution_field.get_or_insert_with(String::new);
            q.grading_criteria.get_or_insert_with(String::new);
        });
        template
    }

    /// Rebuild `candidate` on the question structure of `reference`.
    ///
    /// Answers (and retrieved chunks) are taken from the candidate by
    /// question id; questions the candidate lacks get empty answers and
    /// questions only the candidate has are dropped.
    pub fn reconcile_answers(reference: &ExamSheet, mut candidate: ExamSheet) -> ExamSheet {
        candidate.questions = merge_questions(&reference.questions, &candidate.questions);
        candidate
    }

    /// Reference copy marked as failed, for a model that produced nothing.
    pub fn failed_copy(reference: &ExamSheet, reason: &str) -> ExamSheet {
        let mut sheet = reference.clone();
        sheet.exam_metadata.annotate("error", reason);
        sheet
    }

    /// Remove retrieved chunks from all questions and return them.
    pub fn take_retrieved_chunks(&mut self) -> Vec<ChunkReport> {
        let mut reports = Vec::new();
        self.visit_mut(&mut |q| {
            if let Some(chunks) = q.retrieved_chunks.take() {
                reports.push(ChunkReport {
                    question_id: q.question_id.clone(),
                    question_text: q.question_text.clone(),
                    retrieved_chunks: chunks,
                });
            }
        });
        reports
    }
}

fn merge_questions(reference: &[Question], candidate: &[Question]) -> Vec<Question> {
    let by_id: HashMap<&str, &Question> = candidate
        .iter()
        .map(|q| (q.question_id.as_str(), q))
        .collect();

    reference
        .iter()
        .map(|ref_q| {
            let mut merged = ref_q.clone();
            match by_id.get(ref_q.question_id.as_str()) {
                Some(cand_q) => {
                    if cand_q.answer_field.is_some() {
                        merged.answer_field = cand_q.answer_field.clone();
                    }
                    if cand_q.retrieved_chunks.is_some() {
                        merged.retrieved_chunks = cand_q.retrieved_chunks.clone();
                    }
                    if let Some(ref_subs) = &ref_q.subquestions {
                        merged.subquestions = Some(merge_questions(ref_subs, cand_q.children()));
                    }
                }
                None => {
                    if merged.answer_field.is_some() {
                        merged.answer_field = Some(String::new());
                    }
                    if let Some(ref_subs) = &ref_q.subquestions {
                        merged.subquestions = Some(merge_questions(ref_subs, &[]));
                    }
                }
            }
            merged
        })
        .collect()
}

/// Parse the `questions` array out of a raw model reply object.
///
/// Entries that are not valid questions are skipped; a missing or non-array
/// `questions` key yields an empty list.
pub fn questions_from_value(value: &Value) -> Vec<Question> {
    let Some(items) = value.get("questions").and_then(Value::as_array) else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| match serde_json::from_value::<Question>(item.clone()) {
            Ok(q) => Some(q),
            Err(e) => {
                tracing::warn!("Skipping malformed question entry: {}", e);
                None
            }
        })
        .collect()
}

/// Round to two decimals, as stored in summaries.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn lenient_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_opt_text(deserializer)?.unwrap_or_default())
}

fn lenient_opt_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => None,
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    })
}

fn lenient_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let number = match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().replace(',', ".").parse::<f64>().ok(),
        _ => None,
    };
    Ok(number.filter(|v| v.is_finite()))
}

fn points_or_zero<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_number(deserializer)?.unwrap_or(0.0))
}

fn serialize_number<S>(value: &f64, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    if value.fract() == 0.0 && value.abs() < 1e15 {
        serializer.serialize_i64(*value as i64)
    } else {
        serializer.serialize_f64(*value)
    }
}

fn serialize_opt_number<S>(value: &Option<f64>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match value {
        Some(v) => serialize_number(v, serializer),
        None => serializer.serialize_none(),
    }
}
