//! LLM-as-judge grading of a filled answer sheet against the solution.

use super::grading::LeafGrade;
use crate::error::{BenchError, Result};
use crate::llm::parse::parse_json_object;
use crate::llm::{LlmClient, Message, Prompts};
use crate::sheet::{ExamSheet, Question};
use serde_json::Value;
use std::collections::HashMap;
use tracing::warn;

/// Attempts per question to get a parseable verdict.
const MAX_PARSE_RETRIES: usize = 3;

/// Feedback recorded when no attempt produced a parseable verdict.
pub const PARSE_FAILURE_FEEDBACK: &str = "Error parsing judge response";

/// Verdict of the judge for one question.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub points: f64,
    pub feedback: String,
}

/// Grades answers with one judge model.
///
/// Conversation branching follows the candidate: each leaf is graded in a
/// branch holding the system prompt and its enclosing groups' context.
pub struct Judge {
    client: LlmClient,
}

impl Judge {
    pub fn new(client: LlmClient) -> Self {
        Self { client }
    }

    pub fn model(&self) -> &str {
        self.client.model()
    }

    /// Grade every answerable question of `answers` once.
    pub async fn grade(&self, answers: &ExamSheet, solution: &ExamSheet) -> Result<Vec<LeafGrade>> {
        let solutions = solution.index();
        let history = vec![Message::system(Prompts::judge_system())];
        let mut grades = Vec::new();

        self.grade_questions(&answers.questions, &solutions, &history, &mut grades)
            .await?;
        Ok(grades)
    }

    async fn grade_questions(
        &self,
        questions: &[Question],
        solutions: &HashMap<&str, &Question>,
        history: &[Message],
        grades: &mut Vec<LeafGrade>,
    ) -> Result<()> {
        for question in questions {
            let mut branch = history.to_vec();

            if question.is_group() {
                branch.push(Message::user(Prompts::fill(
                    Prompts::judge_group_context(),
                    &[("text", question.question_text.as_str())],
                )));
                let reply = self.client.ask(&branch).await?;
                branch.push(Message::assistant(reply));

                Box::pin(self.grade_questions(question.children(), solutions, &branch, grades))
                    .await?;
                continue;
            }

            if question.is_answerable() {
                let reference = solutions.get(question.question_id.as_str()).copied();
                let verdict = self.grade_leaf(question, reference, branch).await?;
                grades.push(LeafGrade {
                    question_id: question.question_id.clone(),
                    points: verdict.points,
                    feedback: verdict.feedback,
                });
            }
        }
        Ok(())
    }

    async fn grade_leaf(
        &self,
        question: &Question,
        reference: Option<&Question>,
        mut branch: Vec<Message>,
    ) -> Result<Verdict> {
        let solution = reference
            .and_then(|q| q.solution_field.as_deref())
            .unwrap_or("N/A");
        let criteria = reference
            .and_then(|q| q.grading_criteria.as_deref())
            .unwrap_or("N/A");
        let max_points = reference.and_then(|q| q.points);

        let max_label = format_points(max_points.unwrap_or(0.0));
        let prompt = Prompts::fill(
            Prompts::judge_question(),
            &[
                ("question", question.question_text.as_str()),
                ("answer", question.answer_field.as_deref().unwrap_or_default()),
                ("solution", solution),
                ("criteria", criteria),
                ("max_points", max_label.as_str()),
            ],
        );
        branch.push(Message::user(prompt));

        for attempt in 1..=MAX_PARSE_RETRIES {
            let reply = self.client.ask(&branch).await?;
            match parse_verdict(&reply, max_points) {
                Ok(verdict) => return Ok(verdict),
                Err(e) => warn!(
                    judge = %self.client.model(),
                    question_id = %question.question_id,
                    "Unparseable verdict (attempt {}/{}): {}",
                    attempt,
                    MAX_PARSE_RETRIES,
                    e
                ),
            }
        }

        Ok(Verdict {
            points: 0.0,
            feedback: PARSE_FAILURE_FEEDBACK.to_string(),
        })
    }
}

/// Render points without a trailing `.0` for whole numbers.
fn format_points(points: f64) -> String {
    if points.fract() == 0.0 {
        format!("{}", points as i64)
    } else {
        points.to_string()
    }
}

/// Parse a `{"points": <number>, "feedback": "<string>"}` reply.
///
/// Null or missing points count as 0. Numeric strings are accepted, but
/// `NaN` and infinities are rejected so the caller asks again.
/// Points are clamped to `[0, max_points]` when the maximum is known.
pub fn parse_verdict(reply: &str, max_points: Option<f64>) -> Result<Verdict> {
    let object = parse_json_object(reply)
        .ok_or_else(|| BenchError::LlmParse(format!("No JSON object in reply: {}", reply)))?;

    let points = match object.get("points") {
        None | Some(Value::Null) => 0.0,
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| BenchError::LlmParse(format!("Invalid points value: {}", s)))?,
        Some(other) => {
            return Err(BenchError::LlmParse(format!("Invalid points value: {}", other)));
        }
    };

    if !points.is_finite() {
        return Err(BenchError::LlmParse(format!("Non-finite points value: {}", points)));
    }

    let points = match max_points {
        Some(max) if max >= 0.0 => points.clamp(0.0, max),
        _ => points.max(0.0),
    };

    let feedback = match object.get("feedback") {
        Some(Value::String(s)) => s.clone(),
        None | Some(Value::Null) => String::new(),
        Some(other) => other.to_string(),
    };

    Ok(Verdict { points, feedback })
}
