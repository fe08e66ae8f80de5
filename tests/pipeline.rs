#[path = "support.rs"]
mod support;

use std::{sync::Arc, time::Duration};

use labcheck::{
    Coordinator, PipelineConfig, PipelineError,
    document::{DocumentRole, resolve::unresolved_placeholder},
    error::{IngestError, ReasoningServiceError, StructureError},
    grade::evaluate::NO_SUBMISSION_FEEDBACK,
    pipeline::{FailedStage, FailureKey, PipelineState, Severity, Stage},
    reasoning::{ExtractPurpose, VisualCategory, VisualDescription},
    submission::AnswerStatus,
};
use serde_json::json;
use support::{
    Call, PageItem, ScriptedService, assignment_payload, assignment_pdf, empty_pdf,
    mapping_payload, pdf, submission_pdf, uniform_scores,
};
use tokio_util::sync::CancellationToken;

fn coordinator(service: &Arc<ScriptedService>, max_concurrency: usize) -> Coordinator {
    let config = PipelineConfig::builder()
        .max_concurrency(max_concurrency)
        .call_timeout(Duration::from_secs(5))
        .max_retries(0)
        .retry_backoff(Duration::from_millis(1))
        .build();
    Coordinator::new(service.clone(), config)
}

fn full_trace() -> Vec<PipelineState> {
    vec![
        PipelineState::Init,
        PipelineState::Ingesting(DocumentRole::Assignment),
        PipelineState::Ingesting(DocumentRole::Submission),
        PipelineState::Resolving(DocumentRole::Assignment),
        PipelineState::Resolving(DocumentRole::Submission),
        PipelineState::Structuring,
        PipelineState::Mapping,
        PipelineState::Evaluating,
        PipelineState::Aggregating,
        PipelineState::Done,
    ]
}

#[tokio::test]
async fn complete_submission_is_graded_from_all_scores() {
    let service = Arc::new(
        ScriptedService::new()
            .assignment(assignment_payload(&["T1", "T2", "T3"]))
            .mapping(mapping_payload(&[
                ("T1", "complete"),
                ("T2", "complete"),
                ("T3", "complete"),
            ]))
            .evaluation("T1", uniform_scores(9.0))
            .evaluation("T2", uniform_scores(8.0))
            .evaluation("T3", uniform_scores(7.0)),
    );
    let coordinator = coordinator(&service, 4);

    let result = coordinator
        .run_full_analysis(&assignment_pdf(), &submission_pdf())
        .await
        .expect("pipeline result");

    let summary = &result.overall.completion_summary;
    assert_eq!((summary.complete, summary.partial, summary.not_attempted), (3, 0, 0));
    assert_eq!(result.overall.total_awarded, 24.0);
    assert_eq!(result.overall.total_max, 30.0);
    assert_eq!(result.overall.percentage, 80.0);
    assert_eq!(result.overall.letter_grade, "B-");

    let ids: Vec<&str> = result.evaluations.iter().map(|e| e.task_id.as_str()).collect();
    assert_eq!(ids, vec!["T1", "T2", "T3"]);
    assert!(result.is_complete());
    assert_eq!(result.state_trace, full_trace());
    assert_eq!(coordinator.last_trace(), full_trace());
    assert!(!result.run_id.is_nil());

    let mut evaluated = service.evaluated_subjects();
    evaluated.sort();
    assert_eq!(evaluated, vec!["T1", "T2", "T3"]);

    let json = serde_json::to_value(&result).expect("serialize result");
    assert_eq!(json["state_trace"][9], json!({"state": "done"}));
    assert_eq!(json["state_trace"][1], json!({"state": "ingesting", "detail": "assignment"}));
}

#[tokio::test]
async fn unanswered_task_scores_zero_without_a_call() {
    let service = Arc::new(
        ScriptedService::new()
            .assignment(assignment_payload(&["T1", "T2", "T3"]))
            .mapping(mapping_payload(&[("T1", "complete"), ("T3", "partial")])),
    );

    let result = coordinator(&service, 4)
        .run_full_analysis(&assignment_pdf(), &submission_pdf())
        .await
        .expect("pipeline result");

    assert_eq!(result.submission.task_answers.len(), result.assignment.tasks.len());
    let t2 = result.submission.answer("T2").expect("synthesized answer");
    assert_eq!(t2.status, AnswerStatus::NotAttempted);
    assert!(t2.synthesized);

    let evaluation = &result.evaluations[1];
    assert_eq!(evaluation.task_id, "T2");
    assert_eq!(evaluation.awarded_score, Some(0.0));
    assert_eq!(evaluation.feedback, NO_SUBMISSION_FEEDBACK);
    assert!(!service.evaluated_subjects().contains(&"T2".to_string()));
    assert_eq!(result.overall.completion_summary.not_attempted, 1);
    assert!(result.is_complete());
}

#[tokio::test]
async fn unresolved_visual_is_recorded_and_structuring_continues() {
    let assignment = pdf(&[vec![
        PageItem::Text(760, "Lab 3: Sorting"),
        PageItem::Image(600),
        PageItem::Text(400, "T1 Implement insertion sort"),
    ]]);
    let service = Arc::new(
        ScriptedService::new()
            .visual_fails("p1-image-1", ReasoningServiceError::Permanent("blurry".into()))
            .assignment(assignment_payload(&["T1"]))
            .mapping(mapping_payload(&[("T1", "complete")])),
    );

    let result = coordinator(&service, 2)
        .run_full_analysis(&assignment, &submission_pdf())
        .await
        .expect("pipeline result");

    assert_eq!(result.state_trace.last(), Some(&PipelineState::Done));
    assert_eq!(result.failures.len(), 1);
    assert_eq!(result.failures_in(Stage::Resolve).count(), 1);
    assert_eq!(result.failures[0].key, FailureKey::Block {
        document: DocumentRole::Assignment,
        page:     1,
        ordinal:  1,
    });

    let structure_calls = service.extract_calls(ExtractPurpose::AssignmentStructure);
    let Some(Call::Extract { context, .. }) = structure_calls.first() else {
        panic!("structurer was not called");
    };
    assert!(context.contains(&unresolved_placeholder(1)));
    assert!(context.contains("T1 Implement insertion sort"));
}

#[tokio::test]
async fn zero_page_assignment_fails_at_ingest() {
    let service = Arc::new(ScriptedService::new().assignment(assignment_payload(&["T1"])));
    let coordinator = coordinator(&service, 4);

    let err = coordinator
        .run_full_analysis(&empty_pdf(), &submission_pdf())
        .await
        .expect_err("fatal ingest");

    assert!(
        matches!(err, PipelineError::Ingest {
            document: DocumentRole::Assignment,
            source:   IngestError::NoPages,
        }),
        "{err}"
    );
    assert!(service.calls().is_empty());
    assert_eq!(coordinator.last_trace(), vec![
        PipelineState::Init,
        PipelineState::Ingesting(DocumentRole::Assignment),
        PipelineState::Failed(FailedStage::Ingest),
    ]);
}

#[tokio::test]
async fn unreadable_submission_fails_at_ingest() {
    let service = Arc::new(ScriptedService::new());
    let coordinator = coordinator(&service, 4);

    let err = coordinator
        .run_full_analysis(&assignment_pdf(), b"%PDF-garbage")
        .await
        .expect_err("fatal ingest");

    assert!(
        matches!(err, PipelineError::Ingest {
            document: DocumentRole::Submission,
            ..
        }),
        "{err}"
    );
    assert!(service.calls().is_empty());
    assert_eq!(
        coordinator.last_trace().last(),
        Some(&PipelineState::Failed(FailedStage::Ingest))
    );
}

#[tokio::test]
async fn structuring_failure_is_fatal() {
    let service = Arc::new(ScriptedService::new().assignment(json!({"tasks": [{"id": "T1"}]})));
    let coordinator = coordinator(&service, 4);

    let err = coordinator
        .run_full_analysis(&assignment_pdf(), &submission_pdf())
        .await
        .expect_err("fatal structure");

    assert!(matches!(err, PipelineError::Structure(StructureError::Schema(_))), "{err}");
    assert!(service.extract_calls(ExtractPurpose::SubmissionMapping).is_empty());
    assert!(service.evaluated_subjects().is_empty());
    assert_eq!(
        coordinator.last_trace().last(),
        Some(&PipelineState::Failed(FailedStage::Structure))
    );
}

#[tokio::test]
async fn failed_evaluation_becomes_a_marker() {
    let service = Arc::new(
        ScriptedService::new()
            .assignment(assignment_payload(&["T1", "T2"]))
            .mapping(mapping_payload(&[("T1", "complete"), ("T2", "complete")]))
            .evaluation("T1", uniform_scores(10.0))
            .evaluation_fails("T2", ReasoningServiceError::Permanent("refused".into())),
    );

    let result = coordinator(&service, 4)
        .run_full_analysis(&assignment_pdf(), &submission_pdf())
        .await
        .expect("pipeline result");

    assert_eq!(result.state_trace, full_trace());
    assert!(result.evaluations[1].is_failure());
    assert_eq!(result.overall.failed, 1);
    assert_eq!(result.overall.percentage, 50.0);

    let failures: Vec<_> = result.failures_in(Stage::Evaluate).collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].severity, Severity::Error);
    assert_eq!(failures[0].key, FailureKey::Task {
        task_id: "T2".into(),
    });
}

#[tokio::test]
async fn rejected_weight_override_is_a_warning() {
    let mut assignment = assignment_payload(&["T1"]);
    assignment["tasks"][0]["evaluation"] = json!({"weights": {"correctness": 2.0}});
    let service = Arc::new(
        ScriptedService::new()
            .assignment(assignment)
            .mapping(mapping_payload(&[("T1", "complete")])),
    );

    let result = coordinator(&service, 4)
        .run_full_analysis(&assignment_pdf(), &submission_pdf())
        .await
        .expect("pipeline result");

    assert_eq!(result.failures.len(), 1);
    assert_eq!(result.failures[0].stage, Stage::Evaluate);
    assert_eq!(result.failures[0].severity, Severity::Warning);
    assert!((result.evaluations[0].weight_sum() - 1.0).abs() < 1e-6);
    assert_eq!(result.evaluations[0].awarded_score, Some(8.0));
}

#[tokio::test]
async fn evaluation_fan_out_is_bounded() {
    let ids = ["T1", "T2", "T3", "T4", "T5"];
    let answers: Vec<(&str, &str)> = ids.iter().map(|id| (*id, "complete")).collect();
    let service = Arc::new(
        ScriptedService::new()
            .assignment(assignment_payload(&ids))
            .mapping(mapping_payload(&answers))
            .delay(Duration::from_millis(20)),
    );

    let result = coordinator(&service, 2)
        .run_full_analysis(&assignment_pdf(), &submission_pdf())
        .await
        .expect("pipeline result");

    assert_eq!(result.evaluations.len(), 5);
    assert_eq!(service.evaluated_subjects().len(), 5);
    assert!(service.peak_in_flight() <= 2, "peak {}", service.peak_in_flight());
}

#[tokio::test]
async fn cancellation_during_evaluation_stops_new_calls() {
    let token = CancellationToken::new();
    let service = Arc::new(
        ScriptedService::new()
            .assignment(assignment_payload(&["T1", "T2", "T3"]))
            .mapping(mapping_payload(&[
                ("T1", "complete"),
                ("T2", "complete"),
                ("T3", "complete"),
            ]))
            .cancel_on(ExtractPurpose::TaskEvaluation, token.clone()),
    );
    let coordinator = coordinator(&service, 1).with_cancellation_token(token);

    let err = coordinator
        .run_full_analysis(&assignment_pdf(), &submission_pdf())
        .await
        .expect_err("cancelled");

    assert!(
        matches!(err, PipelineError::Cancelled {
            stage: Stage::Evaluate
        }),
        "{err}"
    );
    assert_eq!(service.evaluated_subjects(), vec!["T1".to_string()]);
    let trace = coordinator.last_trace();
    assert_eq!(trace[trace.len() - 2], PipelineState::Evaluating);
    assert_eq!(trace.last(), Some(&PipelineState::Failed(FailedStage::Cancelled)));
}

#[tokio::test]
async fn cancelled_before_start_makes_no_calls() {
    let service = Arc::new(ScriptedService::new().assignment(assignment_payload(&["T1"])));
    let coordinator = coordinator(&service, 4);
    coordinator.cancel();

    let err = coordinator
        .run_full_analysis(&assignment_pdf(), &submission_pdf())
        .await
        .expect_err("cancelled");

    assert!(
        matches!(err, PipelineError::Cancelled {
            stage: Stage::Ingest
        }),
        "{err}"
    );
    assert!(service.calls().is_empty());
    assert_eq!(coordinator.last_trace(), vec![
        PipelineState::Init,
        PipelineState::Failed(FailedStage::Cancelled),
    ]);
}

#[tokio::test]
async fn cancellation_stops_structuring_retries() {
    let token = CancellationToken::new();
    let service = Arc::new(
        ScriptedService::new()
            .assignment_fails(ReasoningServiceError::Transient("overloaded".into()))
            .cancel_on(ExtractPurpose::AssignmentStructure, token.clone()),
    );
    let config = PipelineConfig::builder()
        .max_retries(2)
        .retry_backoff(Duration::from_millis(1))
        .build();
    let coordinator = Coordinator::new(service.clone(), config).with_cancellation_token(token);

    let err = coordinator
        .run_full_analysis(&assignment_pdf(), &submission_pdf())
        .await
        .expect_err("cancelled");

    assert!(
        matches!(err, PipelineError::Cancelled {
            stage: Stage::Structure
        }),
        "{err}"
    );
    assert_eq!(service.extract_calls(ExtractPurpose::AssignmentStructure).len(), 1);
    assert_eq!(
        coordinator.last_trace().last(),
        Some(&PipelineState::Failed(FailedStage::Cancelled))
    );
}

#[tokio::test]
async fn evaluation_sees_the_visuals_an_answer_cites() {
    let submission = pdf(&[vec![
        PageItem::Text(760, "Student submission"),
        PageItem::Image(600),
        PageItem::Text(400, "See the class diagram above"),
    ]]);
    let mut mapping = mapping_payload(&[("T1", "complete"), ("T2", "complete")]);
    mapping["task_answers"][0]["visual_references"] = json!(["[VISUAL page 1 #1]"]);
    let service = Arc::new(
        ScriptedService::new()
            .assignment(assignment_payload(&["T1", "T2"]))
            .mapping(mapping)
            .visual("p1-image-1", VisualDescription {
                category: VisualCategory::Uml,
                content:  "class Sorter with method insertion_sort".into(),
                summary:  None,
            }),
    );

    let result = coordinator(&service, 2)
        .run_full_analysis(&assignment_pdf(), &submission)
        .await
        .expect("pipeline result");
    assert!(result.is_complete());

    let contexts: Vec<(String, String)> = service
        .extract_calls(ExtractPurpose::TaskEvaluation)
        .into_iter()
        .filter_map(|call| match call {
            Call::Extract {
                subject: Some(subject),
                context,
                ..
            } => Some((subject, context)),
            _ => None,
        })
        .collect();
    assert_eq!(contexts.len(), 2);
    for (subject, context) in &contexts {
        let cites = context.contains("## Referenced visuals")
            && context.contains("class Sorter with method insertion_sort");
        assert_eq!(cites, subject == "T1", "context for {subject}:\n{context}");
    }
}
