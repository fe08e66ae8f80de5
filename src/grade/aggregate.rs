#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use serde::Serialize;

use super::evaluate::{MAX_SCORE, TaskEvaluation, round2};
use crate::submission::AnswerStatus;

/// Percentage breakpoints, highest first.
const LETTER_TABLE: [(f64, &str); 12] = [
    (97.0, "A+"),
    (93.0, "A"),
    (90.0, "A-"),
    (87.0, "B+"),
    (83.0, "B"),
    (80.0, "B-"),
    (77.0, "C+"),
    (73.0, "C"),
    (70.0, "C-"),
    (67.0, "D+"),
    (63.0, "D"),
    (60.0, "D-"),
];

/// Letter grade for a percentage in `0..=100`.
pub fn letter_grade(percentage: f64) -> &'static str {
    LETTER_TABLE
        .iter()
        .find(|(floor, _)| percentage >= *floor)
        .map(|(_, letter)| *letter)
        .unwrap_or("F")
}

/// Count of answers per status across the whole task set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CompletionSummary {
    /// Complete answers.
    pub complete:      usize,
    /// Partial answers.
    pub partial:       usize,
    /// Tasks with no work.
    pub not_attempted: usize,
}

/// Totals and grade over every task evaluation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverallEvaluation {
    /// Sum of awarded scores; failure markers add nothing.
    pub total_awarded:      f64,
    /// 10 per task, failure markers included.
    pub total_max:          f64,
    /// `total_awarded / total_max * 100`, clamped to `0..=100` and rounded
    /// to two decimals.
    pub percentage:         f64,
    /// Letter for the unrounded percentage.
    pub letter_grade:       String,
    /// Status counts.
    pub completion_summary: CompletionSummary,
    /// Evaluations with a score.
    pub evaluated:          usize,
    /// Failure markers.
    pub failed:             usize,
    /// Strengths of every task, prefixed with its id.
    pub strengths:          Vec<String>,
    /// Weaknesses of every task, prefixed with its id.
    pub weaknesses:         Vec<String>,
}

/// Combines task evaluations into an overall result.
///
/// Pure: the same evaluations always give the same result. Failure markers
/// count toward `total_max` but award nothing, so they can only lower the
/// percentage.
pub fn aggregate(evaluations: &[TaskEvaluation]) -> OverallEvaluation {
    let total_max = MAX_SCORE * evaluations.len() as f64;
    let total_awarded = round2(evaluations.iter().filter_map(|e| e.awarded_score).sum());
    let exact = if total_max > 0.0 {
        (total_awarded / total_max * 100.0).clamp(0.0, 100.0)
    } else {
        0.0
    };

    let mut completion_summary = CompletionSummary::default();
    for evaluation in evaluations {
        match evaluation.status {
            AnswerStatus::Complete => completion_summary.complete += 1,
            AnswerStatus::Partial => completion_summary.partial += 1,
            AnswerStatus::NotAttempted => completion_summary.not_attempted += 1,
        }
    }

    let failed = evaluations.iter().filter(|e| e.is_failure()).count();
    let tagged = |pick: fn(&TaskEvaluation) -> &Vec<String>| {
        evaluations
            .iter()
            .flat_map(|e| pick(e).iter().map(move |item| format!("{}: {item}", e.task_id)))
            .collect::<Vec<_>>()
    };

    OverallEvaluation {
        total_awarded,
        total_max,
        percentage: round2(exact),
        letter_grade: letter_grade(exact).to_string(),
        completion_summary,
        evaluated: evaluations.len() - failed,
        failed,
        strengths: tagged(|e| &e.strengths),
        weaknesses: tagged(|e| &e.weaknesses),
    }
}
