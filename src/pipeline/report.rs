#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::fmt;

use serde::Serialize;
use uuid::Uuid;

use super::state::{PipelineState, Stage};
use crate::{
    assignment::AssignmentSpec,
    document::DocumentRole,
    grade::{OverallEvaluation, TaskEvaluation},
    submission::SubmissionReport,
};

/// How much information a failure cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Degraded but usable.
    Warning,
    /// Information was lost.
    Error,
}

/// What a failure record refers to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureKey {
    /// A task, by id.
    Task {
        /// Task id.
        task_id: String,
    },
    /// A content block, by position.
    Block {
        /// Document the block belongs to.
        document: DocumentRole,
        /// 1-based page.
        page:     u32,
        /// Position on the page.
        ordinal:  u32,
    },
    /// A submission answer entry with no usable task id.
    Answer {
        /// Index in the payload's answer list.
        index: usize,
    },
    /// A whole document.
    Document {
        /// Which document.
        document: DocumentRole,
    },
}

impl fmt::Display for FailureKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKey::Task { task_id } => write!(f, "task {task_id}"),
            FailureKey::Block {
                document,
                page,
                ordinal,
            } => write!(f, "{document} page {page} #{ordinal}"),
            FailureKey::Answer { index } => write!(f, "answer #{index}"),
            FailureKey::Document { document } => write!(f, "{document} document"),
        }
    }
}

/// One non-fatal failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureRecord {
    /// Stage that recorded it.
    pub stage:    Stage,
    /// What it concerns.
    pub key:      FailureKey,
    /// Warning or error.
    pub severity: Severity,
    /// Human-readable cause.
    pub cause:    String,
}

impl FailureRecord {
    /// A degraded-but-usable item.
    pub fn warning(stage: Stage, key: FailureKey, cause: impl Into<String>) -> Self {
        Self {
            stage,
            key,
            severity: Severity::Warning,
            cause: cause.into(),
        }
    }

    /// An item that lost information.
    pub fn error(stage: Stage, key: FailureKey, cause: impl Into<String>) -> Self {
        Self {
            stage,
            key,
            severity: Severity::Error,
            cause: cause.into(),
        }
    }
}

/// Everything a completed run produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineResult {
    /// Identifies the run in logs.
    pub run_id:      Uuid,
    /// Structured assignment.
    pub assignment:  AssignmentSpec,
    /// Mapped submission.
    pub submission:  SubmissionReport,
    /// One evaluation per task, in assignment order.
    pub evaluations: Vec<TaskEvaluation>,
    /// Aggregate over `evaluations`.
    pub overall:     OverallEvaluation,
    /// Every non-fatal failure, in pipeline order.
    pub failures:    Vec<FailureRecord>,
    /// States visited, from `Init` to `Done`.
    pub state_trace: Vec<PipelineState>,
}

impl PipelineResult {
    /// Whether every item was handled without loss or degradation.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Failures recorded by `stage`.
    pub fn failures_in(&self, stage: Stage) -> impl Iterator<Item = &FailureRecord> {
        self.failures.iter().filter(move |f| f.stage == stage)
    }
}
