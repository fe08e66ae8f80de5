#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::criteria::{Criterion, CriterionWeights};
use crate::{
    assignment::TaskSpec,
    document::ReferencedVisual,
    error::SchemaValidationError,
    payload,
    reasoning::{ExtractPurpose, ExtractRequest, ReasoningService},
    submission::{AnswerStatus, TaskAnswer},
};

/// Highest score a criterion or a task can receive.
pub const MAX_SCORE: f64 = 10.0;

/// Feedback given to tasks with no submitted work.
pub const NO_SUBMISSION_FEEDBACK: &str =
    "No submission was found for this task, so no points could be awarded.";

/// JSON shape requested from the reasoning service.
pub const SCHEMA_HINT: &str = r#"{
  "scores": {
    "completeness": "number 0-10",
    "correctness": "number 0-10",
    "code_quality": "number 0-10",
    "documentation": "number 0-10",
    "testing": "number 0-10"
  },
  "strengths": ["string"],
  "weaknesses": ["string"],
  "suggestions": ["string"],
  "mistakes": ["string"],
  "feedback": "string addressed to the student"
}"#;

/// Rounds to two decimals.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// One row of the weighted breakdown.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CriterionScore {
    /// Criterion.
    pub criterion: Criterion,
    /// Weight applied.
    pub weight:    f64,
    /// 0 to 10; `None` when not scored.
    pub score:     Option<f64>,
}

/// The scored judgment for one task, or a failure marker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskEvaluation {
    /// Task this evaluation belongs to.
    pub task_id:       String,
    /// Status of the answer that was evaluated.
    pub status:        AnswerStatus,
    /// Weighted score out of 10, two decimals; `None` for failure markers.
    pub awarded_score: Option<f64>,
    /// Per-criterion breakdown; weights sum to 1.0.
    pub breakdown:     Vec<CriterionScore>,
    /// What the student did well.
    pub strengths:     Vec<String>,
    /// What fell short.
    pub weaknesses:    Vec<String>,
    /// How to improve.
    pub suggestions:   Vec<String>,
    /// Concrete errors found.
    pub mistakes:      Vec<String>,
    /// Feedback text.
    pub feedback:      String,
    /// Why evaluation failed, for failure markers.
    pub failure:       Option<String>,
}

impl TaskEvaluation {
    /// Breakdown rows with no scores.
    fn unscored(weights: &CriterionWeights, score: Option<f64>) -> Vec<CriterionScore> {
        weights
            .iter()
            .map(|(criterion, weight)| CriterionScore {
                criterion,
                weight,
                score,
            })
            .collect()
    }

    /// Deterministic zero evaluation for tasks without submitted work.
    pub fn not_attempted(task_id: impl Into<String>, weights: &CriterionWeights) -> Self {
        Self {
            task_id:       task_id.into(),
            status:        AnswerStatus::NotAttempted,
            awarded_score: Some(0.0),
            breakdown:     Self::unscored(weights, Some(0.0)),
            strengths:     Vec::new(),
            weaknesses:    vec!["No submission for this task.".to_string()],
            suggestions:   Vec::new(),
            mistakes:      Vec::new(),
            feedback:      NO_SUBMISSION_FEEDBACK.to_string(),
            failure:       None,
        }
    }

    /// Failure marker: no score, reason recorded.
    pub fn failed(
        task_id: impl Into<String>,
        status: AnswerStatus,
        weights: &CriterionWeights,
        reason: impl Into<String>,
    ) -> Self {
        let reason = reason.into();
        Self {
            task_id: task_id.into(),
            status,
            awarded_score: None,
            breakdown: Self::unscored(weights, None),
            strengths: Vec::new(),
            weaknesses: Vec::new(),
            suggestions: Vec::new(),
            mistakes: Vec::new(),
            feedback: format!("This task could not be evaluated: {reason}"),
            failure: Some(reason),
        }
    }

    /// Validates a reasoning service payload and computes the weighted score.
    ///
    /// Every criterion with a non-zero weight needs a finite score in
    /// `0..=10`. Scores may sit under `scores` or at the top level.
    pub fn from_payload(
        value: &Value,
        task_id: &str,
        status: AnswerStatus,
        weights: &CriterionWeights,
    ) -> Result<Self, SchemaValidationError> {
        let record = format!("evaluation of {task_id}");
        let root = payload::object(value, &record)?;
        let scores = match root.get("scores").or_else(|| root.get("criteria_scores")) {
            Some(Value::Object(scores)) => scores,
            _ => root,
        };

        let mut breakdown = Vec::with_capacity(Criterion::ALL.len());
        for (criterion, weight) in weights.iter() {
            let raw = scores.get(criterion.key());
            let score = match (payload::number(raw), raw) {
                (Some(score), _) if (0.0..=MAX_SCORE).contains(&score) => Some(score),
                (Some(score), _) => {
                    return Err(SchemaValidationError::invalid(
                        &record,
                        criterion.key(),
                        format!("score {score} is outside 0-10"),
                    ));
                }
                (None, None | Some(Value::Null)) if weight == 0.0 => None,
                (None, None | Some(Value::Null)) => {
                    return Err(SchemaValidationError::missing(&record, criterion.key()));
                }
                (None, Some(other)) => {
                    return Err(SchemaValidationError::invalid(
                        &record,
                        criterion.key(),
                        format!("`{other}` is not a number"),
                    ));
                }
            };
            breakdown.push(CriterionScore {
                criterion,
                weight,
                score,
            });
        }

        let weighted: f64 = breakdown
            .iter()
            .map(|row| row.score.unwrap_or(0.0) * row.weight)
            .sum();

        Ok(Self {
            task_id: task_id.to_string(),
            status,
            awarded_score: Some(round2(weighted).clamp(0.0, MAX_SCORE)),
            breakdown,
            strengths: payload::string_list(root, "strengths"),
            weaknesses: payload::string_list(root, "weaknesses"),
            suggestions: payload::string_list(root, "suggestions"),
            mistakes: payload::string_list(root, "mistakes"),
            feedback: payload::opt_text(root, "feedback").unwrap_or_default(),
            failure: None,
        })
    }

    /// Whether this is a failure marker.
    pub fn is_failure(&self) -> bool {
        self.awarded_score.is_none()
    }

    /// Sum of breakdown weights.
    pub fn weight_sum(&self) -> f64 {
        self.breakdown.iter().map(|row| row.weight).sum()
    }
}

/// Scores one task.
///
/// A `not_attempted` answer short-circuits to [`TaskEvaluation::not_attempted`]
/// without calling the service. Service errors and invalid payloads produce a
/// failure marker instead of an error. `visuals` are the resolved visuals the
/// answer cites; their descriptions are sent along with the answer.
pub async fn evaluate(
    service: &dyn ReasoningService,
    task: &TaskSpec,
    answer: &TaskAnswer,
    weights: &CriterionWeights,
    visuals: &[ReferencedVisual],
) -> TaskEvaluation {
    if answer.status == AnswerStatus::NotAttempted {
        debug!("Task {} not attempted; skipping evaluation call", task.id);
        return TaskEvaluation::not_attempted(&task.id, weights);
    }

    let weight_table: serde_json::Map<String, Value> = weights
        .iter()
        .map(|(criterion, weight)| (criterion.key().to_string(), json!(weight)))
        .collect();
    let mut context = format!(
        "## Task specification\n\n{}\n\n## Student submission for this task\n\n{}\n\n## \
         Criterion weights\n\n{}",
        serde_json::to_string_pretty(task).unwrap_or_default(),
        serde_json::to_string_pretty(answer).unwrap_or_default(),
        Value::Object(weight_table)
    );
    if !visuals.is_empty() {
        context.push_str("\n\n## Referenced visuals\n");
        for visual in visuals {
            context.push_str(&format!(
                "\n{} ({})\n{}\n",
                visual.marker,
                visual.kind,
                visual.description.trim_end()
            ));
        }
    }
    let request = ExtractRequest {
        purpose: ExtractPurpose::TaskEvaluation,
        subject: Some(task.id.clone()),
        context,
        schema_hint: SCHEMA_HINT.to_string(),
    };

    let outcome = match service.structured_extract(&request).await {
        Ok(value) => TaskEvaluation::from_payload(&value, &task.id, answer.status, weights)
            .map_err(|e| e.to_string()),
        Err(e) => Err(e.to_string()),
    };

    match outcome {
        Ok(evaluation) => {
            debug!("Task {} scored {:?}", task.id, evaluation.awarded_score);
            evaluation
        }
        Err(reason) => {
            warn!("Evaluation of task {} failed: {reason}", task.id);
            TaskEvaluation::failed(&task.id, answer.status, weights, reason)
        }
    }
}
