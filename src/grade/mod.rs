#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

/// Evaluation Aggregator
pub mod aggregate;
/// Scoring criteria and per-task weights
pub mod criteria;
/// Task Evaluator
pub mod evaluate;

pub use aggregate::{CompletionSummary, OverallEvaluation, aggregate, letter_grade};
pub use criteria::{Criterion, CriterionWeights};
pub use evaluate::{CriterionScore, TaskEvaluation, evaluate};
