//! Evaluation: compare models across graded benchmark runs.
//!
//! Each evaluation writes a new `{eval_dir}/{ts}/` folder with the comparison
//! plot, the per-model values behind it, and the benchmark runs it used.

pub mod aggregate;
pub mod plot;

pub use aggregate::{Aggregated, ModelBar, UsedRun, aggregate, compute_bars, display_name};
pub use plot::{PlotLabels, render_comparison};

use crate::config::{Config, EvaluationConfig};
use crate::error::Result;
use crate::layout;
use crate::persistence::save_json;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{info, warn};

pub const EVALUATION_METADATA_FILE: &str = "evaluation_metadata.json";
pub const EVALUATION_SUMMARY_FILE: &str = "evaluation_summary.json";

/// `evaluation_metadata.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationMetadata {
    pub evaluation_timestamp: String,
    pub configuration: EvaluationConfig,
    pub benchmarking_runs_used: BTreeMap<String, UsedRun>,
}

/// `evaluation_summary.json`: the plotted values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationSummary {
    pub evaluation_timestamp: String,
    pub num_exams: usize,
    pub models: Vec<ModelBar>,
}

/// Result of one evaluation run.
#[derive(Debug, Clone)]
pub struct EvaluationReport {
    pub output_dir: PathBuf,
    /// Absent when no model had results.
    pub plot_path: Option<PathBuf>,
    pub bars: Vec<ModelBar>,
    pub aggregated: Aggregated,
}

/// Aggregates graded results and renders the comparison.
pub struct Evaluator {
    benchmarked_dir: PathBuf,
    eval_dir: PathBuf,
    config: EvaluationConfig,
}

impl Evaluator {
    pub fn new(benchmarked_dir: PathBuf, eval_dir: PathBuf, config: EvaluationConfig) -> Self {
        Self {
            benchmarked_dir,
            eval_dir,
            config,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.benchmarked_dir(),
            config.eval_dir(),
            config.evaluation.clone(),
        )
    }

    /// Evaluate into a new timestamped folder.
    pub fn run(&self) -> Result<EvaluationReport> {
        self.run_at(&layout::timestamp())
    }

    /// Evaluate into `{eval_dir}/{timestamp}`.
    pub fn run_at(&self, timestamp: &str) -> Result<EvaluationReport> {
        let output_dir = self.eval_dir.join(timestamp);
        info!("Aggregating results from {}", self.benchmarked_dir.display());

        let aggregated = aggregate(&self.benchmarked_dir, &self.config)?;
        let bars = compute_bars(&aggregated, self.config.sort);

        let plot_path = if bars.is_empty() {
            warn!("No data to plot");
            None
        } else {
            let path = output_dir.join(format!("model_comparison_{}.svg", timestamp));
            render_comparison(&bars, &plot_labels(&self.config, &aggregated), &path)?;
            info!("Plot saved to {}", path.display());
            Some(path)
        };

        let metadata = EvaluationMetadata {
            evaluation_timestamp: timestamp.to_string(),
            configuration: self.config.clone(),
            benchmarking_runs_used: aggregated.runs_used.clone(),
        };
        save_json(&metadata, &output_dir.join(EVALUATION_METADATA_FILE))?;

        let summary = EvaluationSummary {
            evaluation_timestamp: timestamp.to_string(),
            num_exams: aggregated.exams().len(),
            models: bars.clone(),
        };
        save_json(&summary, &output_dir.join(EVALUATION_SUMMARY_FILE))?;

        Ok(EvaluationReport {
            output_dir,
            plot_path,
            bars,
            aggregated,
        })
    }
}

/// Title lines and caption for the comparison plot.
pub fn plot_labels(config: &EvaluationConfig, aggregated: &Aggregated) -> PlotLabels {
    let num_exams = aggregated.exams().len();
    let multi_exam = num_exams > 1;
    let runs = aggregated
        .judge_runs()
        .map(|n| n.to_string())
        .unwrap_or_else(|| "N/A".to_string());

    let mut exam = config.professions.join(", ");
    if multi_exam {
        exam.push_str(&format!(" ({} exams)", num_exams));
    }

    let judges: Vec<&str> = config.judges.iter().map(|j| display_name(j)).collect();
    let judge = format!("{} ({} runs)", judges.join(", "), runs);

    let caption = if multi_exam {
        format!("Error bars represent standard deviation across {} exams.", num_exams)
    } else if config.judges.len() > 1 {
        format!(
            "Error bars represent standard deviation across {} judges.",
            config.judges.len()
        )
    } else {
        format!("Error bars represent standard deviation across {} judge runs.", runs)
    };

    PlotLabels {
        title: vec![
            "Model Performance Comparison".to_string(),
            format!("Exam: {}", exam),
            format!("Judge: {}", judge),
        ],
        caption,
    }
}

/// Print per-model results and where they were written.
pub fn print_summary(report: &EvaluationReport) {
    println!("\nResults Summary:");
    for model in &report.aggregated.models {
        if model.scores.is_empty() {
            println!("  {}: No results found", model.model);
            continue;
        }
        let percentages: Vec<f64> = model.scores.iter().map(|s| s.percentage).collect();
        println!(
            "  {}: {:.2}% ± {:.2}% (n={} results)",
            model.model,
            aggregate::mean(&percentages),
            aggregate::std_dev(&percentages),
            percentages.len()
        );
    }

    if !report.bars.is_empty() {
        println!("\nPlotted:");
        for bar in &report.bars {
            println!(
                "  {:<30} {:>6.1}% (±{:.1})",
                bar.display_name, bar.average_percentage, bar.std_dev_percentage
            );
        }
    }

    println!();
    if let Some(path) = &report.plot_path {
        println!("Plot saved to:     {}", path.display());
    }
    println!("Metadata saved to: {}", report.output_dir.join(EVALUATION_METADATA_FILE).display());
}
