#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! The narrow interface every stage uses to reach a language model.
//!
//! Stages only see [`ReasoningService`]. Timeouts and retries live in
//! [`GuardedService`], and the concrete model integration in
//! [`OpenAiService`], so none of that leaks into pipeline logic.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    document::{BlockKind, VisualData},
    error::{ReasoningServiceError, SchemaValidationError},
    payload,
};

/// Per-call timeout and retry wrapper
pub mod guard;
/// OpenAI-compatible chat completions adapter
pub mod openai;

pub use guard::GuardedService;
pub use openai::OpenAiService;

/// Which stage is asking for a structured extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractPurpose {
    /// Assignment document to task list.
    AssignmentStructure,
    /// Submission document to per-task evidence.
    SubmissionMapping,
    /// One task and its evidence to criterion scores.
    TaskEvaluation,
}

impl fmt::Display for ExtractPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExtractPurpose::AssignmentStructure => "assignment_structure",
            ExtractPurpose::SubmissionMapping => "submission_mapping",
            ExtractPurpose::TaskEvaluation => "task_evaluation",
        };
        f.write_str(name)
    }
}

/// Input to [`ReasoningService::structured_extract`].
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractRequest {
    /// Calling stage.
    pub purpose:     ExtractPurpose,
    /// Task id for per-task requests.
    pub subject:     Option<String>,
    /// Rendered document content and any structured inputs.
    pub context:     String,
    /// Description of the JSON shape expected back.
    pub schema_hint: String,
}

/// Input to [`ReasoningService::describe_visual`].
#[derive(Debug, Clone, PartialEq)]
pub struct VisualRequest {
    /// Opaque block reference.
    pub reference: String,
    /// Block kind as detected by the ingestor.
    pub kind:      BlockKind,
    /// 1-based page number.
    pub page:      u32,
    /// Encoded visual data.
    pub data:      VisualData,
}

/// Classification of a visual region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisualCategory {
    /// Flowcharts, process diagrams, decision trees.
    Flowchart,
    /// Class, sequence, state and other UML diagrams.
    Uml,
    /// Plots and data visualizations.
    Chart,
    /// Pseudocode or code listings.
    Algorithm,
    /// Tables and matrices.
    Table,
    /// Circuit diagrams and technical drawings.
    Schematic,
    /// Predominantly text.
    Text,
    /// Anything else.
    Other,
}

impl VisualCategory {
    /// Maps a free-form label from a model onto a category.
    pub fn from_label(label: &str) -> Self {
        let label = label.to_ascii_lowercase();
        let has = |needle: &str| label.contains(needle);

        if has("uml") || has("class diagram") || has("sequence") {
            VisualCategory::Uml
        } else if has("flow") || has("diagram") || has("decision") {
            VisualCategory::Flowchart
        } else if has("chart") || has("graph") || has("plot") {
            VisualCategory::Chart
        } else if has("algorithm") || has("pseudo") || has("code") {
            VisualCategory::Algorithm
        } else if has("table") || has("matrix") || has("data") {
            VisualCategory::Table
        } else if has("schematic") || has("circuit") || has("technical") {
            VisualCategory::Schematic
        } else if has("text") || has("document") {
            VisualCategory::Text
        } else {
            VisualCategory::Other
        }
    }
}

impl fmt::Display for VisualCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VisualCategory::Flowchart => "flowchart",
            VisualCategory::Uml => "uml",
            VisualCategory::Chart => "chart",
            VisualCategory::Algorithm => "algorithm",
            VisualCategory::Table => "table",
            VisualCategory::Schematic => "schematic",
            VisualCategory::Text => "text",
            VisualCategory::Other => "other",
        };
        f.write_str(name)
    }
}

/// Classified, structured text for one visual region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualDescription {
    /// What kind of visual this is.
    pub category: VisualCategory,
    /// Transcription or structured rendering (graph notation, table, text).
    pub content:  String,
    /// One-sentence summary.
    pub summary:  Option<String>,
}

impl VisualDescription {
    /// Validates a JSON payload of the form
    /// `{"category": .., "content": .., "summary": ..}`.
    pub fn from_payload(value: &Value) -> Result<Self, SchemaValidationError> {
        let obj = payload::object(value, "visual description")?;
        let content = payload::required_text(obj, "content", "visual description")?;
        let category = payload::opt_text(obj, "category")
            .map(|label| VisualCategory::from_label(&label))
            .unwrap_or(VisualCategory::Other);

        Ok(Self {
            category,
            content,
            summary: payload::opt_text(obj, "summary"),
        })
    }

    /// Text merged into the block sequence in place of the visual.
    pub fn render(&self) -> String {
        let mut out = format!("Type: {}\n", self.category);
        if let Some(summary) = &self.summary {
            out.push_str(&format!("Summary: {summary}\n"));
        }
        out.push_str(&self.content);
        out
    }
}

/// External capability performing structured extraction and visual
/// description.
///
/// Implementations return [`ReasoningServiceError::Transient`] for failures
/// that may succeed on retry and [`ReasoningServiceError::Permanent`]
/// otherwise.
#[async_trait]
pub trait ReasoningService: Send + Sync {
    /// Returns a JSON payload shaped after `request.schema_hint`.
    async fn structured_extract(
        &self,
        request: &ExtractRequest,
    ) -> Result<Value, ReasoningServiceError>;

    /// Classifies and transcribes one visual region.
    async fn describe_visual(
        &self,
        request: &VisualRequest,
    ) -> Result<VisualDescription, ReasoningServiceError>;
}
