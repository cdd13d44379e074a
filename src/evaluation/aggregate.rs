//! Collect graded results across exams and reduce them to one bar per model.

use crate::config::EvaluationConfig;
use crate::error::Result;
use crate::layout::{self, latest_benchmark_run, model_dir_name};
use crate::persistence::{artifact_exists, load_json};
use crate::sheet::GradingSummary;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::{debug, warn};

/// Benchmark run picked for one `{profession}/{exam}/{model}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsedRun {
    pub processing_timestamp: String,
    pub benchmark_timestamp: String,
}

/// Score of one model on one exam from one judge.
#[derive(Debug, Clone, PartialEq)]
pub struct JudgeScore {
    pub profession: String,
    pub exam_number: String,
    pub judge: String,
    pub percentage: f64,
    pub std_dev: f64,
    /// Entries in `grading_summary.judge_runs`.
    pub judge_runs: usize,
}

/// All scores found for one configured model.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelScores {
    pub model: String,
    pub scores: Vec<JudgeScore>,
}

/// Result of walking the benchmark tree.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Aggregated {
    /// One entry per configured model, in configuration order.
    pub models: Vec<ModelScores>,
    /// Keyed by `{profession}/{exam_number}/{model}`.
    pub runs_used: BTreeMap<String, UsedRun>,
}

impl Aggregated {
    /// Distinct `(profession, exam_number)` pairs with at least one score.
    pub fn exams(&self) -> BTreeSet<(String, String)> {
        self.models
            .iter()
            .flat_map(|m| &m.scores)
            .map(|s| (s.profession.clone(), s.exam_number.clone()))
            .collect()
    }

    pub fn is_multi_exam(&self) -> bool {
        self.exams().len() > 1
    }

    /// Judge run count of the first score of the first model.
    pub fn judge_runs(&self) -> Option<usize> {
        self.models
            .first()
            .and_then(|m| m.scores.first())
            .map(|s| s.judge_runs)
    }
}

/// One plotted bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelBar {
    pub model: String,
    pub display_name: String,
    pub average_percentage: f64,
    pub std_dev_percentage: f64,
    /// Scores that went into the bar.
    pub num_results: usize,
}

#[derive(Deserialize)]
struct GradedFile {
    #[serde(default)]
    grading_summary: Option<GradingSummary>,
}

/// `(percentage, std_dev)` of a graded file.
///
/// Files without an `aggregation` block fall back to the flat `percentage`
/// with no deviation.
pub fn summary_score(summary: Option<&GradingSummary>) -> (f64, f64) {
    match summary {
        Some(GradingSummary {
            aggregation: Some(agg),
            ..
        }) => (agg.average_percentage, agg.std_dev_percentage),
        Some(summary) => (summary.percentage.unwrap_or(0.0), 0.0),
        None => (0.0, 0.0),
    }
}

/// Walk `benchmarked_dir` for every configured profession, exam and model,
/// reading the latest run's graded file of every configured judge.
pub fn aggregate(benchmarked_dir: &Path, config: &EvaluationConfig) -> Result<Aggregated> {
    let mut result = Aggregated {
        models: config
            .models
            .iter()
            .map(|model| ModelScores {
                model: model.clone(),
                scores: Vec::new(),
            })
            .collect(),
        runs_used: BTreeMap::new(),
    };

    for profession in &config.professions {
        let profession_dir = benchmarked_dir.join(profession);
        for exam_dir in layout::subdirs(&profession_dir)? {
            let Some(exam_number) = exam_dir.file_name().map(|n| n.to_string_lossy().to_string())
            else {
                continue;
            };
            if !config.exam_numbers.includes(&exam_number) {
                continue;
            }

            for entry in result.models.iter_mut() {
                let model_dir = model_dir_name(&entry.model, false);
                let Some(run) =
                    latest_benchmark_run(benchmarked_dir, profession, &exam_number, &model_dir)?
                else {
                    debug!(model = %entry.model, "No run for {}/{}", profession, exam_number);
                    continue;
                };

                result.runs_used.insert(
                    format!("{}/{}/{}", profession, exam_number, entry.model),
                    UsedRun {
                        processing_timestamp: run.processing_timestamp.clone(),
                        benchmark_timestamp: run.benchmark_timestamp.clone(),
                    },
                );

                for judge in &config.judges {
                    let path = run.graded_answers_path(judge);
                    if !artifact_exists(&path) {
                        warn!("Graded file not found: {}", path.display());
                        continue;
                    }
                    let graded: GradedFile = match load_json(&path) {
                        Ok(graded) => graded,
                        Err(e) => {
                            warn!("Skipping unreadable graded file {}: {}", path.display(), e);
                            continue;
                        }
                    };

                    let summary = graded.grading_summary.as_ref();
                    let (percentage, std_dev) = summary_score(summary);
                    entry.scores.push(JudgeScore {
                        profession: profession.clone(),
                        exam_number: exam_number.clone(),
                        judge: judge.clone(),
                        percentage,
                        std_dev,
                        judge_runs: summary.map(|s| s.judge_runs.len()).unwrap_or(0),
                    });
                }
            }
        }
    }

    Ok(result)
}

/// Model name without its provider prefix.
pub fn display_name(model: &str) -> &str {
    model.rsplit('/').next().unwrap_or(model)
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation; 0 for fewer than two values.
pub fn sample_std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let avg = mean(values);
    let variance =
        values.iter().map(|v| (v - avg).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}

/// Population standard deviation.
pub fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let avg = mean(values);
    (values.iter().map(|v| (v - avg).powi(2)).sum::<f64>() / values.len() as f64).sqrt()
}

/// Reduce the scores of each model to one bar.
///
/// Across several exams a bar is the mean over exams of the per-exam mean
/// across judges, with the sample deviation across exams. For a single exam
/// one score is shown as is, and several scores (judges) are reduced to
/// their mean and sample deviation. Models without scores get no bar.
pub fn compute_bars(aggregated: &Aggregated, sort: bool) -> Vec<ModelBar> {
    let multi_exam = aggregated.is_multi_exam();

    let mut bars: Vec<ModelBar> = aggregated
        .models
        .iter()
        .filter(|m| !m.scores.is_empty())
        .map(|m| {
            let (average, deviation) = if multi_exam {
                let mut per_exam: BTreeMap<(&str, &str), Vec<f64>> = BTreeMap::new();
                for score in &m.scores {
                    per_exam
                        .entry((score.profession.as_str(), score.exam_number.as_str()))
                        .or_default()
                        .push(score.percentage);
                }
                let exam_means: Vec<f64> = per_exam.values().map(|v| mean(v)).collect();
                (mean(&exam_means), sample_std_dev(&exam_means))
            } else if m.scores.len() == 1 {
                (m.scores[0].percentage, m.scores[0].std_dev)
            } else {
                let percentages: Vec<f64> = m.scores.iter().map(|s| s.percentage).collect();
                (mean(&percentages), sample_std_dev(&percentages))
            };

            ModelBar {
                model: m.model.clone(),
                display_name: display_name(&m.model).to_string(),
                average_percentage: average,
                std_dev_percentage: deviation,
                num_results: m.scores.len(),
            }
        })
        .collect();

    if sort {
        bars.sort_by(|a, b| {
            b.average_percentage
                .partial_cmp(&a.average_percentage)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
    }
    bars
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Selection;
    use crate::persistence::save_json;
    use crate::sheet::Aggregation;
    use std::fs;
    use tempfile::TempDir;

    fn score(exam: &str, judge: &str, percentage: f64, std_dev: f64) -> JudgeScore {
        JudgeScore {
            profession: "Koch".to_string(),
            exam_number: exam.to_string(),
            judge: judge.to_string(),
            percentage,
            std_dev,
            judge_runs: 3,
        }
    }

    fn aggregated(scores: Vec<(&str, Vec<JudgeScore>)>) -> Aggregated {
        Aggregated {
            models: scores
                .into_iter()
                .map(|(model, scores)| ModelScores {
                    model: model.to_string(),
                    scores,
                })
                .collect(),
            runs_used: BTreeMap::new(),
        }
    }

    fn write_graded(
        root: &Path,
        exam: &str,
        proc_ts: &str,
        model_dir: &str,
        bench_ts: &str,
        judge_dir: &str,
        summary: serde_json::Value,
    ) {
        let path = root
            .join("Koch")
            .join(exam)
            .join(proc_ts)
            .join(model_dir)
            .join(bench_ts)
            .join(judge_dir)
            .join("graded_answers.json");
        save_json(&serde_json::json!({ "questions": [], "grading_summary": summary }), &path)
            .unwrap();
    }

    fn summary(avg: f64, std: f64) -> serde_json::Value {
        serde_json::json!({
            "total_points": 10.0,
            "judge_runs": { "j|1": { "awarded_points": 5.0, "percentage": 50.0 } },
            "aggregation": {
                "average_points": 5.0,
                "average_percentage": avg,
                "std_dev_points": 0.0,
                "std_dev_percentage": std
            }
        })
    }

    #[test]
    fn test_display_name() {
        assert_eq!(display_name("openai/gpt-4o"), "gpt-4o");
        assert_eq!(display_name("local-model"), "local-model");
    }

    #[test]
    fn test_statistics() {
        assert_eq!(mean(&[]), 0.0);
        assert_eq!(sample_std_dev(&[50.0]), 0.0);
        assert!((sample_std_dev(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]) - 2.138).abs() < 1e-3);
        assert_eq!(std_dev(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]), 2.0);
    }

    #[test]
    fn test_summary_score_fallbacks() {
        let modern = GradingSummary {
            aggregation: Some(Aggregation {
                average_percentage: 72.5,
                std_dev_percentage: 3.0,
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(summary_score(Some(&modern)), (72.5, 3.0));

        let legacy = GradingSummary {
            percentage: Some(61.0),
            ..Default::default()
        };
        assert_eq!(summary_score(Some(&legacy)), (61.0, 0.0));
        assert_eq!(summary_score(None), (0.0, 0.0));
    }

    #[test]
    fn test_bars_single_exam() {
        let data = aggregated(vec![
            ("a/one-judge", vec![score("1", "j1", 70.0, 4.0)]),
            (
                "b/two-judges",
                vec![score("1", "j1", 60.0, 1.0), score("1", "j2", 80.0, 1.0)],
            ),
            ("c/none", vec![]),
        ]);

        let bars = compute_bars(&data, false);
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].display_name, "one-judge");
        assert_eq!(bars[0].average_percentage, 70.0);
        assert_eq!(bars[0].std_dev_percentage, 4.0);
        assert_eq!(bars[1].average_percentage, 70.0);
        assert!((bars[1].std_dev_percentage - 14.142).abs() < 1e-3);
    }

    #[test]
    fn test_bars_multi_exam() {
        let data = aggregated(vec![(
            "m",
            vec![
                score("1", "j1", 40.0, 5.0),
                score("1", "j2", 60.0, 5.0),
                score("2", "j1", 70.0, 5.0),
            ],
        )]);

        let bars = compute_bars(&data, false);
        // Exam means 50 and 70.
        assert_eq!(bars[0].average_percentage, 60.0);
        assert!((bars[0].std_dev_percentage - 14.142).abs() < 1e-3);
        assert_eq!(bars[0].num_results, 3);
    }

    #[test]
    fn test_bars_sorted() {
        let data = aggregated(vec![
            ("low", vec![score("1", "j", 30.0, 0.0)]),
            ("high", vec![score("1", "j", 90.0, 0.0)]),
        ]);
        let bars = compute_bars(&data, true);
        assert_eq!(bars[0].model, "high");
        assert_eq!(compute_bars(&data, false)[0].model, "low");
    }

    #[test]
    fn test_aggregate_picks_latest_run() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write_graded(root, "1", "20250101_000000", "model=openai__gpt-4o", "20250102_000000", "judge=j", summary(40.0, 1.0));
        write_graded(root, "1", "20250103_000000", "model=openai__gpt-4o", "20250104_000000", "judge=j", summary(80.0, 2.0));
        write_graded(root, "1", "20250103_000000", "model=openai__gpt-4o_rag", "20250105_000000", "judge=j", summary(95.0, 0.0));
        write_graded(root, "2", "20250101_000000", "model=openai__gpt-4o", "20250101_100000", "judge=j", summary(60.0, 0.0));
        fs::create_dir_all(root.join("Koch/3")).unwrap();

        let config = EvaluationConfig {
            professions: vec!["Koch".to_string()],
            exam_numbers: Selection::Only(vec!["1".to_string(), "3".to_string()]),
            models: vec!["openai/gpt-4o".to_string()],
            judges: vec!["j".to_string(), "missing".to_string()],
            sort: false,
        };

        let result = aggregate(root, &config).unwrap();
        let scores = &result.models[0].scores;
        assert_eq!(scores.len(), 1);
        assert_eq!(scores[0].percentage, 80.0);
        assert_eq!(scores[0].std_dev, 2.0);
        assert_eq!(scores[0].judge_runs, 1);

        let used = &result.runs_used["Koch/1/openai/gpt-4o"];
        assert_eq!(used.processing_timestamp, "20250103_000000");
        assert_eq!(used.benchmark_timestamp, "20250104_000000");
        assert!(!result.is_multi_exam());
    }

    #[test]
    fn test_aggregate_rag_by_name() {
        let dir = TempDir::new().unwrap();
        write_graded(dir.path(), "1", "p", "model=openai__gpt-4o_rag", "b", "judge=j", summary(95.0, 0.0));

        let config = EvaluationConfig {
            professions: vec!["Koch".to_string()],
            models: vec!["openai/gpt-4o".to_string(), "openai/gpt-4o_rag".to_string()],
            judges: vec!["j".to_string()],
            ..Default::default()
        };

        let result = aggregate(dir.path(), &config).unwrap();
        assert!(result.models[0].scores.is_empty());
        assert_eq!(result.models[1].scores[0].percentage, 95.0);
    }
}
