#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Assignment records and the Assignment Structurer.
//!
//! The structurer sends the resolved assignment document to the reasoning
//! service and validates what comes back. Validation is strict about the
//! fields everything downstream keys off (`id`, `title`) and lenient about
//! everything else: optional lists default to empty, single strings become
//! one-element lists, and the deprecated `input_data` field is ignored.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::{
    document::{ContentBlock, render_blocks},
    error::{SchemaValidationError, StructureError},
    payload,
    reasoning::{ExtractPurpose, ExtractRequest, ReasoningService},
};

/// JSON shape requested from the reasoning service.
pub const SCHEMA_HINT: &str = r#"{
  "document_metadata": {
    "title": "string",
    "course": "string or null",
    "academic_period": "string or null",
    "total_tasks": "integer or null"
  },
  "tasks": [
    {
      "id": "short unique id, e.g. T1",
      "title": "string",
      "description": "string",
      "requirements": ["string"],
      "deliverables": ["string"],
      "technical_specs": {
        "languages": ["string"],
        "frameworks": ["string"],
        "tools": ["string"],
        "constraints": ["string"]
      },
      "evaluation": {
        "total_points": "string or null",
        "criteria": ["string"],
        "deadline": "string or null",
        "weights": {"completeness": 0.3, "correctness": 0.4, "code_quality": 0.15, "documentation": 0.1, "testing": 0.05}
      },
      "learning_objectives": ["string"],
      "hints": ["string"],
      "examples": ["string"],
      "visual_references": ["[VISUAL page P #k] markers this task depends on"]
    }
  ],
  "global_requirements": {
    "general_guidelines": ["string"],
    "submission_format": "string or null",
    "academic_integrity": "string or null"
  }
}"#;

/// Metadata about the assignment document.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DocumentMetadata {
    /// Assignment title.
    pub title:           Option<String>,
    /// Course name.
    pub course:          Option<String>,
    /// Term or semester.
    pub academic_period: Option<String>,
    /// Number of tasks the document claims to define.
    pub total_tasks:     Option<u32>,
}

/// Languages, tools and constraints a task prescribes.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TechnicalSpecs {
    /// Programming languages.
    pub languages:   Vec<String>,
    /// Frameworks or libraries.
    pub frameworks:  Vec<String>,
    /// Tools.
    pub tools:       Vec<String>,
    /// Constraints on the solution.
    pub constraints: Vec<String>,
}

/// How a task is assessed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EvaluationCriteria {
    /// Points as stated in the document, verbatim.
    pub total_points: Option<String>,
    /// Free-text criteria.
    pub criteria:     Vec<String>,
    /// Deadline as stated in the document.
    pub deadline:     Option<String>,
    /// Per-criterion weight overrides; empty means the defaults apply.
    pub weights:      BTreeMap<String, f64>,
}

/// One structured assignment requirement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskSpec {
    /// Unique, stable identifier.
    pub id:                  String,
    /// Short title.
    pub title:               String,
    /// Full description.
    pub description:         String,
    /// Individual requirements.
    pub requirements:        Vec<String>,
    /// Required deliverables.
    pub deliverables:        Vec<String>,
    /// Technical specifications.
    pub technical_specs:     TechnicalSpecs,
    /// Evaluation criteria.
    pub evaluation:          EvaluationCriteria,
    /// Learning objectives.
    pub learning_objectives: Vec<String>,
    /// Hints given to students.
    pub hints:               Vec<String>,
    /// Worked examples.
    pub examples:            Vec<String>,
    /// Visual markers the task refers to.
    pub visual_references:   Vec<String>,
}

/// Assignment-wide rules.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GlobalRequirements {
    /// Guidelines that apply to every task.
    pub general_guidelines: Vec<String>,
    /// Expected submission format.
    pub submission_format:  Option<String>,
    /// Academic integrity policy.
    pub academic_integrity: Option<String>,
}

/// Validated assignment structure. Task ids are unique.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssignmentSpec {
    /// Document metadata.
    pub document_metadata:   DocumentMetadata,
    /// Tasks in document order.
    pub tasks:               Vec<TaskSpec>,
    /// Assignment-wide rules.
    pub global_requirements: GlobalRequirements,
}

impl AssignmentSpec {
    /// Validates a reasoning service payload.
    ///
    /// Fails when `tasks` is missing or not an array, or when any task lacks
    /// a non-empty `id` or `title`. Duplicate ids are kept and renamed with a
    /// `-2`, `-3`, ... suffix.
    pub fn from_payload(value: &Value) -> Result<Self, SchemaValidationError> {
        let root = payload::object(value, "assignment")?;

        let raw_tasks = match root.get("tasks") {
            Some(Value::Array(items)) => items,
            Some(_) => {
                return Err(SchemaValidationError::invalid("assignment", "tasks", "expected an array"));
            }
            None => return Err(SchemaValidationError::missing("assignment", "tasks")),
        };

        let mut tasks = raw_tasks
            .iter()
            .enumerate()
            .map(|(i, raw)| parse_task(raw, &format!("tasks[{i}]")))
            .collect::<Result<Vec<_>, _>>()?;
        dedup_ids(&mut tasks);

        let document_metadata = match root.get("document_metadata") {
            Some(Value::Object(meta)) => DocumentMetadata {
                title:           payload::opt_text(meta, "title"),
                course:          payload::opt_text(meta, "course"),
                academic_period: payload::opt_text(meta, "academic_period"),
                total_tasks:     payload::number(meta.get("total_tasks"))
                    .filter(|n| *n >= 0.0)
                    .map(|n| n as u32),
            },
            _ => DocumentMetadata::default(),
        };

        let global_requirements = match root.get("global_requirements") {
            Some(Value::Object(global)) => GlobalRequirements {
                general_guidelines: payload::string_list(global, "general_guidelines"),
                submission_format:  payload::opt_text(global, "submission_format"),
                academic_integrity: payload::opt_text(global, "academic_integrity"),
            },
            _ => GlobalRequirements::default(),
        };

        Ok(Self {
            document_metadata,
            tasks,
            global_requirements,
        })
    }

    /// Looks a task up by id.
    pub fn task(&self, id: &str) -> Option<&TaskSpec> {
        self.tasks.iter().find(|task| task.id == id)
    }

    /// Task ids in document order.
    pub fn task_ids(&self) -> impl Iterator<Item = &str> {
        self.tasks.iter().map(|task| task.id.as_str())
    }
}

/// Validates one task record.
fn parse_task(raw: &Value, record: &str) -> Result<TaskSpec, SchemaValidationError> {
    let obj = payload::object(raw, record)?;

    Ok(TaskSpec {
        id:                  payload::required_text(obj, "id", record)?,
        title:               payload::required_text(obj, "title", record)?,
        description:         payload::opt_text(obj, "description").unwrap_or_default(),
        requirements:        payload::string_list(obj, "requirements"),
        deliverables:        payload::string_list(obj, "deliverables"),
        technical_specs:     match obj.get("technical_specs") {
            Some(Value::Object(specs)) => TechnicalSpecs {
                languages:   payload::string_list(specs, "languages"),
                frameworks:  payload::string_list(specs, "frameworks"),
                tools:       payload::string_list(specs, "tools"),
                constraints: payload::string_list(specs, "constraints"),
            },
            _ => TechnicalSpecs::default(),
        },
        evaluation:          match obj.get("evaluation") {
            Some(Value::Object(evaluation)) => parse_evaluation(evaluation),
            _ => EvaluationCriteria::default(),
        },
        learning_objectives: payload::string_list(obj, "learning_objectives"),
        hints:               payload::string_list(obj, "hints"),
        examples:            payload::string_list(obj, "examples"),
        visual_references:   payload::string_list(obj, "visual_references"),
    })
}

/// Reads the `evaluation` record. Non-numeric weights are kept as NaN so the
/// override is rejected as a whole later on.
fn parse_evaluation(obj: &Map<String, Value>) -> EvaluationCriteria {
    let weights = match obj.get("weights") {
        Some(Value::Object(weights)) => weights
            .iter()
            .map(|(name, weight)| {
                (name.trim().to_ascii_lowercase(), payload::number(Some(weight)).unwrap_or(f64::NAN))
            })
            .collect(),
        _ => BTreeMap::new(),
    };

    EvaluationCriteria {
        total_points: payload::opt_text(obj, "total_points"),
        criteria: payload::string_list(obj, "criteria"),
        deadline: payload::opt_text(obj, "deadline"),
        weights,
    }
}

/// Renames duplicate task ids with the first free `-N` suffix.
fn dedup_ids(tasks: &mut [TaskSpec]) {
    let mut taken: HashSet<String> = tasks.iter().map(|task| task.id.clone()).collect();
    let mut seen = HashSet::new();

    for task in tasks.iter_mut() {
        if seen.insert(task.id.clone()) {
            continue;
        }

        let mut n = 2;
        let renamed = loop {
            let candidate = format!("{}-{n}", task.id);
            if !taken.contains(&candidate) {
                break candidate;
            }
            n += 1;
        };
        warn!("Duplicate task id `{}` renamed to `{renamed}`", task.id);
        taken.insert(renamed.clone());
        seen.insert(renamed.clone());
        task.id = renamed;
    }
}

/// Turns the resolved assignment document into an [`AssignmentSpec`].
///
/// Any service failure or unusable payload is returned as an error; the
/// Coordinator treats it as fatal.
pub async fn structure(
    service: &dyn ReasoningService,
    blocks: &[ContentBlock],
) -> Result<AssignmentSpec, StructureError> {
    let request = ExtractRequest {
        purpose:     ExtractPurpose::AssignmentStructure,
        subject:     None,
        context:     render_blocks(blocks),
        schema_hint: SCHEMA_HINT.to_string(),
    };

    let value = service.structured_extract(&request).await?;
    let spec = AssignmentSpec::from_payload(&value)?;

    if spec.tasks.is_empty() {
        warn!("The assignment payload defines no tasks");
    }
    info!("Structured assignment into {} task(s)", spec.tasks.len());
    Ok(spec)
}
