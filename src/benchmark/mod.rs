//! Benchmarking: candidate models answer processed exams, judge models
//! grade the answers.

mod answerer;
pub mod grading;
mod judge;
mod runner;

pub use answerer::{ExamTaker, Retrieval};
pub use grading::{LeafGrade, compute_summary, regrade};
pub use judge::{Judge, PARSE_FAILURE_FEEDBACK, Verdict, parse_verdict};
pub use runner::{
    BenchmarkRunner, ExamOutcome, GradedRun, JudgeOutcome, ModelOutcome, RagSetup, print_summary,
};
