#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::fmt;

use serde::Serialize;

use crate::document::DocumentRole;

/// Pipeline stage, used for failure records and error context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Document Ingestor.
    Ingest,
    /// Visual Block Resolver.
    Resolve,
    /// Assignment Structurer.
    Structure,
    /// Submission Mapper.
    Map,
    /// Task Evaluator.
    Evaluate,
    /// Evaluation Aggregator.
    Aggregate,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Ingest => "ingest",
            Stage::Resolve => "resolve",
            Stage::Structure => "structure",
            Stage::Map => "map",
            Stage::Evaluate => "evaluate",
            Stage::Aggregate => "aggregate",
        };
        f.write_str(name)
    }
}

/// Why the pipeline stopped without a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailedStage {
    /// A document could not be ingested.
    Ingest,
    /// The assignment could not be structured.
    Structure,
    /// Cancellation was requested.
    Cancelled,
}

/// Coordinator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum PipelineState {
    /// Nothing has run yet.
    Init,
    /// Parsing one of the PDFs.
    Ingesting(DocumentRole),
    /// Describing one document's visual blocks.
    Resolving(DocumentRole),
    /// Building the `AssignmentSpec`.
    Structuring,
    /// Building the `SubmissionReport`.
    Mapping,
    /// Per-task evaluation fan-out.
    Evaluating,
    /// Computing the overall evaluation.
    Aggregating,
    /// A result was produced.
    Done,
    /// Terminal failure.
    Failed(FailedStage),
}

/// Input to [`PipelineState::next`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineEvent {
    /// The current stage finished, with or without non-fatal failures.
    StageCompleted,
    /// The current stage hit an error it cannot recover from.
    Fatal,
    /// Cancellation was observed.
    Cancelled,
}

/// An event that the current state does not accept.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Event {event:?} is not valid in state {state:?}")]
pub struct TransitionError {
    /// State the event was applied to.
    pub state: PipelineState,
    /// Rejected event.
    pub event: PipelineEvent,
}

impl PipelineState {
    /// Applies `event`. Transitions only move forward; `Fatal` is accepted
    /// only while ingesting or structuring, and terminal states accept
    /// nothing.
    pub fn next(self, event: PipelineEvent) -> Result<PipelineState, TransitionError> {
        use DocumentRole::{Assignment, Submission};
        use PipelineEvent::*;
        use PipelineState::*;

        let next = match (self, event) {
            (Done | Failed(_), _) => None,
            (Init, StageCompleted) => Some(Ingesting(Assignment)),
            (Ingesting(Assignment), StageCompleted) => Some(Ingesting(Submission)),
            (Ingesting(Submission), StageCompleted) => Some(Resolving(Assignment)),
            (Resolving(Assignment), StageCompleted) => Some(Resolving(Submission)),
            (Resolving(Submission), StageCompleted) => Some(Structuring),
            (Structuring, StageCompleted) => Some(Mapping),
            (Mapping, StageCompleted) => Some(Evaluating),
            (Evaluating, StageCompleted) => Some(Aggregating),
            (Aggregating, StageCompleted) => Some(Done),
            (Ingesting(_), Fatal) => Some(Failed(FailedStage::Ingest)),
            (Structuring, Fatal) => Some(Failed(FailedStage::Structure)),
            (_, Cancelled) => Some(Failed(FailedStage::Cancelled)),
            (_, Fatal) => None,
        };

        next.ok_or(TransitionError { state: self, event })
    }

    /// Whether no further transitions are possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Failed(_))
    }

    /// Stage this state runs, if any.
    pub fn stage(self) -> Option<Stage> {
        match self {
            PipelineState::Ingesting(_) => Some(Stage::Ingest),
            PipelineState::Resolving(_) => Some(Stage::Resolve),
            PipelineState::Structuring => Some(Stage::Structure),
            PipelineState::Mapping => Some(Stage::Map),
            PipelineState::Evaluating => Some(Stage::Evaluate),
            PipelineState::Aggregating => Some(Stage::Aggregate),
            PipelineState::Init | PipelineState::Done | PipelineState::Failed(_) => None,
        }
    }
}
