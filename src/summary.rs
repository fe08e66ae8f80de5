#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Panel, Style, Width, object::Rows},
};

use crate::{grade::TaskEvaluation, pipeline::PipelineResult};

/// One row of the grading overview.
#[derive(Tabled)]
struct TaskRow {
    /// Task id.
    #[tabled(rename = "Task")]
    task:     String,
    /// Task title.
    #[tabled(rename = "Title")]
    title:    String,
    /// Answer status.
    #[tabled(rename = "Status")]
    status:   String,
    /// Awarded score or a failure note.
    #[tabled(rename = "Score")]
    score:    String,
    /// Feedback text.
    #[tabled(rename = "Feedback")]
    feedback: String,
}

impl TaskRow {
    /// Builds a row for `evaluation`.
    fn new(evaluation: &TaskEvaluation, title: &str) -> Self {
        let score = match evaluation.awarded_score {
            Some(score) => format!("{score:.2}/10"),
            None => "not evaluated".to_string(),
        };
        Self {
            task: evaluation.task_id.clone(),
            title: title.to_string(),
            status: evaluation.status.to_string(),
            score,
            feedback: evaluation.feedback.clone(),
        }
    }
}

/// Renders the per-task table with the overall grade as footer.
pub fn render_summary(result: &PipelineResult) -> String {
    let rows: Vec<TaskRow> = result
        .evaluations
        .iter()
        .map(|evaluation| {
            let title = result
                .assignment
                .task(&evaluation.task_id)
                .map(|task| task.title.as_str())
                .unwrap_or_default();
            TaskRow::new(evaluation, title)
        })
        .collect();

    let overall = &result.overall;
    let header = result
        .assignment
        .document_metadata
        .title
        .clone()
        .unwrap_or_else(|| "Grading Overview".to_string());
    let summary = &overall.completion_summary;
    let footer = format!(
        "Total: {:.2}/{:.2} ({:.2}%, {}) | complete {}, partial {}, not attempted {}",
        overall.total_awarded,
        overall.total_max,
        overall.percentage,
        overall.letter_grade,
        summary.complete,
        summary.partial,
        summary.not_attempted
    );

    Table::new(&rows)
        .with(Panel::header(header))
        .with(Panel::footer(footer))
        .with(Modify::new(Rows::new(1..)).with(Width::wrap(32).keep_words(true)))
        .with(
            Modify::new(Rows::first())
                .with(Alignment::center())
                .with(Alignment::center_vertical()),
        )
        .with(
            Modify::new(Rows::last())
                .with(Alignment::center())
                .with(Alignment::center_vertical()),
        )
        .with(Style::modern())
        .to_string()
}
