//! Judgment bookkeeping and score statistics for graded sheets.

use crate::sheet::{
    Aggregation, ExamSheet, GradingSummary, Judgment, Question, RunScore, round2,
};
use std::collections::{BTreeMap, HashMap};

/// Grade of one leaf from one judge run.
#[derive(Debug, Clone, PartialEq)]
pub struct LeafGrade {
    pub question_id: String,
    pub points: f64,
    pub feedback: String,
}

/// Give every question an empty judgment list and drop stale scores.
pub fn init_judgments(sheet: &mut ExamSheet) {
    sheet.visit_mut(&mut |q| {
        q.judgments = Some(Vec::new());
        q.awarded_points = None;
        q.feedback = None;
    });
}

/// Append the grades of one judge run to the matching questions.
pub fn collect_judgments(sheet: &mut ExamSheet, grades: &[LeafGrade], judge: &str, run_id: u32) {
    let by_id: HashMap<&str, &LeafGrade> = grades
        .iter()
        .map(|g| (g.question_id.as_str(), g))
        .collect();

    sheet.visit_mut(&mut |q| {
        if let Some(grade) = by_id.get(q.question_id.as_str()) {
            q.judgments.get_or_insert_with(Vec::new).push(Judgment {
                judge_name: judge.to_string(),
                run_id,
                awarded_points: grade.points,
                feedback: grade.feedback.clone(),
            });
        }
    });
}

fn mean_judgment(q: &Question) -> Option<f64> {
    let judgments = q.judgments.as_deref().filter(|j| !j.is_empty())?;
    let total: f64 = judgments.iter().map(|j| j.awarded_points).sum();
    Some(total / judgments.len() as f64)
}

/// Set `awarded_points` to the mean over each question's judgments.
pub fn aggregate_judgments(sheet: &mut ExamSheet) {
    sheet.visit_mut(&mut |q| {
        if let Some(mean) = mean_judgment(q) {
            q.awarded_points = Some(mean);
        }
    });
}

/// Copy max `points` from the solution sheet by question id.
pub fn inject_max_points(graded: &mut ExamSheet, solution: &ExamSheet) {
    let mut points: HashMap<String, f64> = HashMap::new();
    solution.visit(&mut |q| {
        if let Some(p) = q.points {
            points.insert(q.question_id.clone(), p);
        }
    });

    graded.visit_mut(&mut |q| {
        if let Some(p) = points.get(&q.question_id) {
            q.points = Some(*p);
        }
    });
}

/// Total max points over leaves and awarded points per `"{judge}|{run}"`.
fn run_totals(sheet: &ExamSheet) -> (f64, BTreeMap<String, f64>) {
    let mut total_max = 0.0;
    let mut totals: BTreeMap<String, f64> = BTreeMap::new();

    sheet.visit(&mut |q| {
        if q.is_group() {
            return;
        }
        total_max += q.points.unwrap_or(0.0);
        for j in q.judgments.as_deref().unwrap_or_default() {
            *totals
                .entry(format!("{}|{}", j.judge_name, j.run_id))
                .or_insert(0.0) += j.awarded_points;
        }
    });

    (total_max, totals)
}

fn percentage(points: f64, total: f64) -> f64 {
    if total > 0.0 { points / total * 100.0 } else { 0.0 }
}

/// Summary statistics across judge runs. Standard deviations are population
/// deviations; stored values are rounded to two decimals.
pub fn compute_summary(sheet: &ExamSheet) -> GradingSummary {
    let (total_max, totals) = run_totals(sheet);

    if totals.is_empty() {
        return GradingSummary {
            total_points: round2(total_max),
            judge_runs: BTreeMap::new(),
            aggregation: Some(Aggregation::default()),
            percentage: None,
        };
    }

    let scores: Vec<f64> = totals.values().copied().collect();
    let n = scores.len() as f64;
    let avg = scores.iter().sum::<f64>() / n;
    let variance = scores.iter().map(|x| (x - avg).powi(2)).sum::<f64>() / n;
    let std_dev = variance.sqrt();

    let judge_runs = totals
        .into_iter()
        .map(|(key, points)| {
            let score = RunScore {
                awarded_points: round2(points),
                percentage: round2(percentage(points, total_max)),
            };
            (key, score)
        })
        .collect();

    GradingSummary {
        total_points: round2(total_max),
        judge_runs,
        aggregation: Some(Aggregation {
            average_points: round2(avg),
            average_percentage: round2(percentage(avg, total_max)),
            std_dev_points: round2(std_dev),
            std_dev_percentage: round2(percentage(std_dev, total_max)),
        }),
        percentage: None,
    }
}

/// Recompute per-leaf means and the summary of an existing graded sheet.
///
/// Leaves without judgments are set to 0 points.
pub fn regrade(sheet: &mut ExamSheet) -> &GradingSummary {
    sheet.visit_mut(&mut |q| {
        if q.is_group() {
            return;
        }
        q.awarded_points = Some(mean_judgment(q).unwrap_or(0.0));
    });

    sheet.grading_summary.insert(compute_summary(sheet))
}
