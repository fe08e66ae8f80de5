#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Submission records and the Submission Mapper.

use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::{
    assignment::{AssignmentSpec, TaskSpec},
    document::{ContentBlock, DocumentRole, render_blocks},
    error::SchemaValidationError,
    payload,
    pipeline::{FailureKey, FailureRecord, Stage},
    reasoning::{ExtractPurpose, ExtractRequest, ReasoningService},
};

/// JSON shape requested from the reasoning service.
pub const SCHEMA_HINT: &str = r#"{
  "submission_metadata": {"student_name": "string", "group": "string", "variant": "string", "submission_date": "string"},
  "task_answers": [
    {
      "task_id": "id from the assignment task list",
      "task_title": "string",
      "status": "not_attempted | partial | complete",
      "implementation_summary": "string",
      "code_excerpts": {"filename": "verbatim code"},
      "evidence": ["verbatim excerpts from the submission"],
      "deviations_from_requirements": ["string"],
      "missing_elements": ["string"],
      "extra_features": ["string"],
      "visual_references": ["[VISUAL page P #k] markers used as evidence"]
    }
  ],
  "overall_submission_quality": {
    "code_organization": "string",
    "naming_conventions": "string",
    "documentation_level": "poor | fair | good | excellent",
    "completeness": "string"
  },
  "general_observations": ["string"]
}"#;

/// Summary used for tasks the student did not address.
const NOT_ATTEMPTED_SUMMARY: &str = "No work for this task was found in the submission.";

/// How far a student got with a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerStatus {
    /// No work found.
    NotAttempted,
    /// Some but not all requirements addressed.
    Partial,
    /// All requirements addressed.
    Complete,
}

impl AnswerStatus {
    /// Parses the spellings models actually produce.
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_lowercase().replace([' ', '-'], "_");
        match normalized.as_str() {
            "complete" | "completed" => Some(AnswerStatus::Complete),
            "partial" | "incomplete" => Some(AnswerStatus::Partial),
            "not_attempted" => Some(AnswerStatus::NotAttempted),
            _ => None,
        }
    }
}

impl fmt::Display for AnswerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AnswerStatus::NotAttempted => "not_attempted",
            AnswerStatus::Partial => "partial",
            AnswerStatus::Complete => "complete",
        };
        f.write_str(name)
    }
}

/// Submission evidence for one task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskAnswer {
    /// Id of the task this answer addresses.
    pub task_id:                      String,
    /// Task title as the service saw it.
    pub task_title:                   Option<String>,
    /// Completion status.
    pub status:                       AnswerStatus,
    /// What the student implemented.
    pub implementation_summary:       String,
    /// Filename to verbatim code.
    pub code_excerpts:                BTreeMap<String, String>,
    /// Verbatim excerpts supporting the status.
    pub evidence:                     Vec<String>,
    /// Where the work departs from the requirements.
    pub deviations_from_requirements: Vec<String>,
    /// Requirements with no corresponding work.
    pub missing_elements:             Vec<String>,
    /// Work beyond the requirements.
    pub extra_features:               Vec<String>,
    /// Visual markers used as evidence.
    pub visual_references:            Vec<String>,
    /// Whether the mapper created this entry rather than the service.
    pub synthesized:                  bool,
}

impl TaskAnswer {
    /// Placeholder for a task with no usable answer.
    pub fn not_attempted(task: &TaskSpec) -> Self {
        Self {
            task_id:                      task.id.clone(),
            task_title:                   Some(task.title.clone()),
            status:                       AnswerStatus::NotAttempted,
            implementation_summary:       NOT_ATTEMPTED_SUMMARY.to_string(),
            code_excerpts:                BTreeMap::new(),
            evidence:                     Vec::new(),
            deviations_from_requirements: Vec::new(),
            missing_elements:             task.requirements.clone(),
            extra_features:               Vec::new(),
            visual_references:            Vec::new(),
            synthesized:                  true,
        }
    }

    /// Validates one entry of `task_answers`.
    pub fn from_payload(value: &Value, record: &str) -> Result<Self, SchemaValidationError> {
        let obj = payload::object(value, record)?;
        let task_id = payload::required_text(obj, "task_id", record)?;
        let raw_status = payload::required_text(obj, "status", record)?;
        let status = AnswerStatus::parse(&raw_status).ok_or_else(|| {
            SchemaValidationError::invalid(record, "status", format!("unknown status `{raw_status}`"))
        })?;

        Ok(Self {
            task_id,
            task_title: payload::opt_text(obj, "task_title"),
            status,
            implementation_summary: payload::opt_text(obj, "implementation_summary")
                .unwrap_or_default(),
            code_excerpts: payload::string_map(obj, "code_excerpts"),
            evidence: payload::string_list(obj, "evidence"),
            deviations_from_requirements: payload::string_list(
                obj,
                "deviations_from_requirements",
            ),
            missing_elements: payload::string_list(obj, "missing_elements"),
            extra_features: payload::string_list(obj, "extra_features"),
            visual_references: payload::string_list(obj, "visual_references"),
            synthesized: false,
        })
    }
}

/// Overall quality impressions of the submission.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OverallQuality {
    /// Code organization.
    pub code_organization:   Option<String>,
    /// Naming conventions.
    pub naming_conventions:  Option<String>,
    /// poor, fair, good or excellent.
    pub documentation_level: Option<String>,
    /// Overall completeness.
    pub completeness:        Option<String>,
}

/// Validated mapping of a submission onto the assignment's tasks.
///
/// `task_answers` holds exactly one entry per task, in assignment order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmissionReport {
    /// Student name, group, variant, dates.
    pub submission_metadata:  BTreeMap<String, String>,
    /// One answer per task, in assignment order.
    pub task_answers:         Vec<TaskAnswer>,
    /// Answers whose task id matches no task: unmapped evidence.
    pub orphaned:             Vec<TaskAnswer>,
    /// Overall quality impressions, if the service gave any.
    pub overall_quality:      Option<OverallQuality>,
    /// Free-form observations.
    pub general_observations: Vec<String>,
}

impl SubmissionReport {
    /// A report in which every task is `not_attempted`.
    pub fn all_not_attempted(spec: &AssignmentSpec) -> Self {
        Self {
            submission_metadata:  BTreeMap::new(),
            task_answers:         spec.tasks.iter().map(TaskAnswer::not_attempted).collect(),
            orphaned:             Vec::new(),
            overall_quality:      None,
            general_observations: Vec::new(),
        }
    }

    /// Validates a reasoning service payload against `spec`.
    ///
    /// Only a payload that is not an object, or whose `task_answers` is not
    /// an array, is rejected outright. Malformed entries are dropped with an
    /// error record, duplicates keep the first entry, unknown task ids become
    /// orphans, and tasks left without an answer are synthesized as
    /// `not_attempted`.
    pub fn from_payload(
        value: &Value,
        spec: &AssignmentSpec,
    ) -> Result<(Self, Vec<FailureRecord>), SchemaValidationError> {
        let root = payload::object(value, "submission")?;
        let entries: &[Value] = match root.get("task_answers") {
            Some(Value::Array(items)) => items.as_slice(),
            None | Some(Value::Null) => &[],
            Some(_) => {
                return Err(SchemaValidationError::invalid(
                    "submission",
                    "task_answers",
                    "expected an array",
                ));
            }
        };

        let mut failures = Vec::new();
        let mut by_task: BTreeMap<String, TaskAnswer> = BTreeMap::new();
        let mut orphaned = Vec::new();

        for (index, entry) in entries.iter().enumerate() {
            let record = format!("task_answers[{index}]");
            let mut answer = match TaskAnswer::from_payload(entry, &record) {
                Ok(answer) => answer,
                Err(e) => {
                    warn!("Dropping malformed answer {record}: {e}");
                    let key = entry
                        .get("task_id")
                        .and_then(|id| payload::text(Some(id)))
                        .and_then(|id| canonical_id(spec, &id))
                        .map(|task_id| FailureKey::Task { task_id })
                        .unwrap_or(FailureKey::Answer { index });
                    failures.push(FailureRecord::error(Stage::Map, key, e.to_string()));
                    continue;
                }
            };

            let Some(task_id) = canonical_id(spec, &answer.task_id) else {
                warn!("Answer for unknown task `{}` kept as orphaned", answer.task_id);
                orphaned.push(answer);
                continue;
            };
            answer.task_id = task_id.clone();

            if by_task.contains_key(&task_id) {
                warn!("Duplicate answer for task `{task_id}` dropped");
                failures.push(FailureRecord::warning(
                    Stage::Map,
                    FailureKey::Task { task_id },
                    format!("duplicate answer at {record} ignored; the first answer was kept"),
                ));
                continue;
            }
            by_task.insert(task_id, answer);
        }

        let task_answers = spec
            .tasks
            .iter()
            .map(|task| {
                by_task
                    .remove(&task.id)
                    .unwrap_or_else(|| TaskAnswer::not_attempted(task))
            })
            .collect();

        let overall_quality = match root.get("overall_submission_quality") {
            Some(Value::Object(quality)) => Some(OverallQuality {
                code_organization:   payload::opt_text(quality, "code_organization"),
                naming_conventions:  payload::opt_text(quality, "naming_conventions"),
                documentation_level: payload::opt_text(quality, "documentation_level"),
                completeness:        payload::opt_text(quality, "completeness"),
            }),
            _ => None,
        };

        let report = Self {
            submission_metadata: payload::string_map(root, "submission_metadata"),
            task_answers,
            orphaned,
            overall_quality,
            general_observations: payload::string_list(root, "general_observations"),
        };
        Ok((report, failures))
    }

    /// Answer for `task_id`.
    pub fn answer(&self, task_id: &str) -> Option<&TaskAnswer> {
        self.task_answers.iter().find(|answer| answer.task_id == task_id)
    }
}

/// Matches `id` against the spec's task ids, exactly first and then ignoring
/// ASCII case.
fn canonical_id(spec: &AssignmentSpec, id: &str) -> Option<String> {
    let id = id.trim();
    spec.task_ids()
        .find(|known| *known == id)
        .or_else(|| spec.task_ids().find(|known| known.eq_ignore_ascii_case(id)))
        .map(str::to_string)
}

/// Context sent alongside the submission: the task list the answers must
/// refer to.
fn task_outline(spec: &AssignmentSpec) -> String {
    let tasks: Vec<Value> = spec
        .tasks
        .iter()
        .map(|task| {
            json!({
                "task_id": task.id,
                "title": task.title,
                "requirements": task.requirements,
                "deliverables": task.deliverables,
            })
        })
        .collect();
    serde_json::to_string_pretty(&tasks).unwrap_or_default()
}

/// Maps the resolved submission onto `spec`.
///
/// Never fails: if the service call fails or its payload is unusable, every
/// task is reported `not_attempted` and one error record explains why.
pub async fn map(
    service: &dyn ReasoningService,
    blocks: &[ContentBlock],
    spec: &AssignmentSpec,
) -> (SubmissionReport, Vec<FailureRecord>) {
    let request = ExtractRequest {
        purpose:     ExtractPurpose::SubmissionMapping,
        subject:     None,
        context:     format!(
            "## Assignment tasks\n\n{}\n\n## Student submission\n\n{}",
            task_outline(spec),
            render_blocks(blocks)
        ),
        schema_hint: SCHEMA_HINT.to_string(),
    };

    let outcome = match service.structured_extract(&request).await {
        Ok(value) => SubmissionReport::from_payload(&value, spec).map_err(|e| e.to_string()),
        Err(e) => Err(e.to_string()),
    };

    match outcome {
        Ok((report, failures)) => {
            let synthesized = report.task_answers.iter().filter(|a| a.synthesized).count();
            info!(
                "Mapped submission: {} answer(s), {synthesized} synthesized as not attempted, {} orphaned",
                report.task_answers.len(),
                report.orphaned.len()
            );
            (report, failures)
        }
        Err(cause) => {
            warn!("Submission mapping failed, treating every task as not attempted: {cause}");
            let failure = FailureRecord::error(
                Stage::Map,
                FailureKey::Document {
                    document: DocumentRole::Submission,
                },
                cause,
            );
            (SubmissionReport::all_not_attempted(spec), vec![failure])
        }
    }
}
