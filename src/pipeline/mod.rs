#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! The Pipeline Coordinator.
//!
//! [`Coordinator::run_full_analysis`] drives both PDFs through ingestion,
//! visual resolution, structuring, mapping, per-task evaluation and
//! aggregation. Control flow follows the explicit [`PipelineState`] machine:
//! ingestion and structuring failures are fatal, everything after the
//! `AssignmentSpec` exists degrades into [`FailureRecord`]s instead.

use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

use crate::{
    assignment::{self, TaskSpec},
    config::PipelineConfig,
    document::{self, DocumentRole, IngestedDocument, ReferencedVisual, VisualIndex},
    error::PipelineError,
    grade::{self, CriterionWeights, TaskEvaluation},
    reasoning::{GuardedService, ReasoningService},
    submission::{self, TaskAnswer},
};

/// Bounded, cancellable fan-out
pub mod fanout;
/// Failure records and the result envelope
pub mod report;
/// Coordinator state machine
pub mod state;

pub use report::{FailureKey, FailureRecord, PipelineResult, Severity};
pub use state::{FailedStage, PipelineEvent, PipelineState, Stage, TransitionError};

/// Task position, task, answer, weights and cited visuals for one evaluation.
type EvaluationUnit<'a> =
    (usize, &'a TaskSpec, &'a TaskAnswer, CriterionWeights, Vec<ReferencedVisual>);

/// States visited by one run.
struct Run {
    /// Current state.
    state: PipelineState,
    /// Every state so far, `Init` first.
    trace: Vec<PipelineState>,
}

impl Run {
    /// A run in `Init`.
    fn new() -> Self {
        Self {
            state: PipelineState::Init,
            trace: vec![PipelineState::Init],
        }
    }

    /// Applies `event`, recording the new state.
    fn advance(&mut self, event: PipelineEvent) {
        match self.state.next(event) {
            Ok(next) => {
                info!("Pipeline state: {:?} -> {:?}", self.state, next);
                self.state = next;
                self.trace.push(next);
            }
            Err(e) => error!("{e}"),
        }
    }

    /// Stage currently running; `Ingest` before the first stage starts.
    fn stage(&self) -> Stage {
        self.state.stage().unwrap_or(Stage::Ingest)
    }
}

/// Owns the end-to-end control flow and builds the [`PipelineResult`].
pub struct Coordinator {
    /// Reasoning service; each run wraps it in a [`GuardedService`].
    service:    Arc<dyn ReasoningService>,
    /// Concurrency, timeout and retry limits.
    config:     PipelineConfig,
    /// Cooperative cancellation signal.
    cancel:     CancellationToken,
    /// States visited by the most recent run.
    last_trace: Mutex<Vec<PipelineState>>,
}

impl Coordinator {
    /// Creates a coordinator. Every call to `service` goes through a
    /// [`GuardedService`] configured from `config` that stops retrying once
    /// the run is cancelled.
    pub fn new(service: Arc<dyn ReasoningService>, config: PipelineConfig) -> Self {
        Self {
            service,
            config,
            cancel: CancellationToken::new(),
            last_trace: Mutex::new(Vec::new()),
        }
    }

    /// Uses `token` instead of a fresh one, e.g. a child of an outer token.
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Token that cancels the current and any later run when triggered.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Requests cooperative cancellation. Calls already dispatched finish;
    /// no new calls are made.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// States visited by the most recent run, including failed runs.
    pub fn last_trace(&self) -> Vec<PipelineState> {
        self.last_trace
            .lock()
            .map(|trace| trace.clone())
            .unwrap_or_default()
    }

    /// Grades `submission_pdf` against `assignment_pdf`.
    ///
    /// Returns an error only for fatal failures: an unreadable or empty PDF,
    /// an assignment that cannot be structured, or cancellation. Everything
    /// else is reported in [`PipelineResult::failures`].
    pub async fn run_full_analysis(
        &self,
        assignment_pdf: &[u8],
        submission_pdf: &[u8],
    ) -> Result<PipelineResult, PipelineError> {
        let mut run = Run::new();
        let run_id = Uuid::new_v4();
        let outcome = self
            .drive(&mut run, run_id, assignment_pdf, submission_pdf)
            .instrument(info_span!("run", id = %run_id))
            .await;
        if let Ok(mut last) = self.last_trace.lock() {
            last.clone_from(&run.trace);
        }
        outcome
    }

    /// Fails the run if cancellation was requested.
    fn ensure_running(&self, run: &mut Run) -> Result<(), PipelineError> {
        if !self.cancel.is_cancelled() {
            return Ok(());
        }
        let stage = run.stage();
        warn!("Cancellation observed during {stage}");
        run.advance(PipelineEvent::Cancelled);
        Err(PipelineError::Cancelled { stage })
    }

    /// Parses one PDF, failing the run if it cannot be ingested.
    fn ingest(
        &self,
        run: &mut Run,
        role: DocumentRole,
        pdf: &[u8],
    ) -> Result<IngestedDocument, PipelineError> {
        self.ensure_running(run)?;
        run.advance(PipelineEvent::StageCompleted);

        match document::ingest(pdf) {
            Ok(doc) => {
                info!(
                    "Ingested {role} document: {} page(s), {} block(s), {} visual(s)",
                    doc.page_count,
                    doc.blocks.len(),
                    doc.visual_count()
                );
                Ok(doc)
            }
            Err(source) => {
                error!("Could not ingest the {role} document: {source}");
                run.advance(PipelineEvent::Fatal);
                Err(PipelineError::Ingest {
                    document: role,
                    source,
                })
            }
        }
    }

    /// Runs every stage in order.
    async fn drive(
        &self,
        run: &mut Run,
        run_id: Uuid,
        assignment_pdf: &[u8],
        submission_pdf: &[u8],
    ) -> Result<PipelineResult, PipelineError> {
        let guarded = GuardedService::new(self.service.clone(), &self.config)
            .with_cancellation(self.cancel.clone());
        let service: &dyn ReasoningService = &guarded;
        let limit = self.config.max_concurrency();
        let mut failures = Vec::new();

        let assignment_doc = self.ingest(run, DocumentRole::Assignment, assignment_pdf)?;
        let submission_doc = self.ingest(run, DocumentRole::Submission, submission_pdf)?;

        self.ensure_running(run)?;
        run.advance(PipelineEvent::StageCompleted);
        let assignment_doc = document::resolve_visuals(
            service,
            DocumentRole::Assignment,
            assignment_doc.blocks,
            limit,
            &self.cancel,
        )
        .await;
        failures.extend(assignment_doc.failures);

        self.ensure_running(run)?;
        run.advance(PipelineEvent::StageCompleted);
        let submission_doc = document::resolve_visuals(
            service,
            DocumentRole::Submission,
            submission_doc.blocks,
            limit,
            &self.cancel,
        )
        .await;
        failures.extend(submission_doc.failures);

        self.ensure_running(run)?;
        run.advance(PipelineEvent::StageCompleted);
        let spec = match assignment::structure(service, &assignment_doc.blocks).await {
            Ok(spec) => spec,
            Err(e) => {
                self.ensure_running(run)?;
                error!("Could not structure the assignment: {e}");
                run.advance(PipelineEvent::Fatal);
                return Err(PipelineError::Structure(e));
            }
        };

        self.ensure_running(run)?;
        run.advance(PipelineEvent::StageCompleted);
        let (report, map_failures) = submission::map(service, &submission_doc.blocks, &spec).await;
        failures.extend(map_failures);

        self.ensure_running(run)?;
        run.advance(PipelineEvent::StageCompleted);
        let submission_visuals = VisualIndex::new(&submission_doc.blocks);
        let units: Vec<EvaluationUnit<'_>> = spec
            .tasks
            .iter()
            .zip(&report.task_answers)
            .enumerate()
            .map(|(position, (task, answer))| {
                let (weights, warning) = CriterionWeights::for_task(task);
                if let Some(warning) = warning {
                    warn!("Task {}: {warning}", task.id);
                    failures.push(FailureRecord::warning(
                        Stage::Evaluate,
                        FailureKey::Task {
                            task_id: task.id.clone(),
                        },
                        warning,
                    ));
                }
                let visuals = submission_visuals.referenced(&answer.visual_references);
                (position, task, answer, weights, visuals)
            })
            .collect();
        info!("Evaluating {} task(s), at most {limit} at a time", units.len());

        let outcomes = fanout::bounded_map(units, limit, &self.cancel, |unit| async move {
            let (position, task, answer, weights, visuals) = unit;
            let evaluation = grade::evaluate(service, task, answer, &weights, &visuals).await;
            (position, evaluation)
        })
        .await;
        self.ensure_running(run)?;

        let mut evaluations: Vec<(usize, TaskEvaluation)> = outcomes.into_iter().flatten().collect();
        evaluations.sort_by_key(|(position, _)| *position);
        let evaluations: Vec<TaskEvaluation> =
            evaluations.into_iter().map(|(_, evaluation)| evaluation).collect();

        for evaluation in &evaluations {
            if let Some(reason) = &evaluation.failure {
                failures.push(FailureRecord::error(
                    Stage::Evaluate,
                    FailureKey::Task {
                        task_id: evaluation.task_id.clone(),
                    },
                    reason.clone(),
                ));
            }
        }

        run.advance(PipelineEvent::StageCompleted);
        let overall = grade::aggregate(&evaluations);
        info!(
            "Overall: {:.2}/{:.0} ({:.2}%, {}), {} failure record(s)",
            overall.total_awarded,
            overall.total_max,
            overall.percentage,
            overall.letter_grade,
            failures.len()
        );

        run.advance(PipelineEvent::StageCompleted);
        Ok(PipelineResult {
            run_id,
            assignment: spec,
            submission: report,
            evaluations,
            overall,
            failures,
            state_trace: run.trace.clone(),
        })
    }
}
