//! # labcheck
//!
//! Grades a student's laboratory submission against an assignment, both
//! supplied as PDFs. Documents are split into ordered content blocks, visual
//! regions are described by a reasoning service, and the assignment's tasks
//! are extracted, matched with the submitted work, scored per criterion and
//! aggregated into an overall grade.

#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

/// Assignment records and the Assignment Structurer
pub mod assignment;
/// Environment-driven configuration
pub mod config;
/// Content blocks, PDF ingestion and visual resolution
pub mod document;
/// Error taxonomy
pub mod error;
/// Criteria, Task Evaluator and Evaluation Aggregator
pub mod grade;
/// Lenient parsing of model output
pub mod payload;
/// Pipeline Coordinator, state machine and result envelope
pub mod pipeline;
/// The reasoning service interface and its implementations
pub mod reasoning;
/// Submission records and the Submission Mapper
pub mod submission;
/// Terminal summary of a pipeline result
pub mod summary;

pub use config::{OpenAiEnv, PipelineConfig};
pub use error::PipelineError;
pub use pipeline::{Coordinator, PipelineResult};
pub use reasoning::{OpenAiService, ReasoningService};
