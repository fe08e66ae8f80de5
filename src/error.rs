#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::time::Duration;

use crate::{document::DocumentRole, pipeline::Stage};

/// Errors raised while turning PDF bytes into content blocks.
#[derive(thiserror::Error, Debug)]
pub enum IngestError {
    /// The bytes could not be parsed as a PDF document.
    #[error("The input is not a parseable PDF: {0}")]
    Unparseable(String),
    /// The document parsed but has no pages.
    #[error("The PDF contains zero pages.")]
    NoPages,
    /// A page could not be read.
    #[error("Page {page} could not be read: {reason}")]
    Page {
        /// 1-based page number.
        page:   u32,
        /// What went wrong.
        reason: String,
    },
}

/// A payload returned by the reasoning service does not fit the expected
/// shape.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum SchemaValidationError {
    /// The model output contained no JSON that could be parsed.
    #[error("No JSON payload could be parsed: {0}")]
    NotJson(String),
    /// The payload (or a nested record) was expected to be a JSON object.
    #[error("Expected a JSON object for `{0}`")]
    NotAnObject(String),
    /// A required field was absent, null, or empty.
    #[error("Required field `{field}` is missing or empty in {record}")]
    MissingField {
        /// Record being validated (e.g. `tasks[2]`).
        record: String,
        /// Field name.
        field:  String,
    },
    /// A field was present but held a value of the wrong type or range.
    #[error("Field `{field}` in {record} is invalid: {reason}")]
    InvalidField {
        /// Record being validated.
        record: String,
        /// Field name.
        field:  String,
        /// Why the value was rejected.
        reason: String,
    },
}

impl SchemaValidationError {
    /// Shorthand for [`SchemaValidationError::MissingField`].
    pub fn missing(record: impl Into<String>, field: impl Into<String>) -> Self {
        Self::MissingField {
            record: record.into(),
            field:  field.into(),
        }
    }

    /// Shorthand for [`SchemaValidationError::InvalidField`].
    pub fn invalid(
        record: impl Into<String>,
        field: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidField {
            record: record.into(),
            field:  field.into(),
            reason: reason.into(),
        }
    }
}

/// Failure signal from the reasoning service.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ReasoningServiceError {
    /// Rate limits, overloaded upstream, network hiccups. Worth retrying.
    #[error("Transient reasoning service failure: {0}")]
    Transient(String),
    /// Invalid input or a response that will not improve on retry.
    #[error("Permanent reasoning service failure: {0}")]
    Permanent(String),
    /// The call did not finish within the per-call timeout.
    #[error("Reasoning service call timed out after {0:?}")]
    Timeout(Duration),
}

impl ReasoningServiceError {
    /// Whether a caller may retry the same request.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Timeout(_))
    }
}

/// Why the Assignment Structurer could not produce an `AssignmentSpec`.
#[derive(thiserror::Error, Debug)]
pub enum StructureError {
    /// The service call failed.
    #[error(transparent)]
    Reasoning(#[from] ReasoningServiceError),
    /// The returned payload could not be coerced into the minimum shape.
    #[error(transparent)]
    Schema(#[from] SchemaValidationError),
}

/// Fatal pipeline errors. Anything not listed here is recorded as a failure
/// marker inside the `PipelineResult` instead.
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    /// One of the input documents could not be ingested.
    #[error("Could not ingest the {document} document: {source}")]
    Ingest {
        /// Which document failed.
        document: DocumentRole,
        /// Underlying ingestion error.
        #[source]
        source:   IngestError,
    },
    /// The assignment could not be structured into tasks.
    #[error("Could not structure the assignment: {0}")]
    Structure(#[from] StructureError),
    /// Cooperative cancellation was requested.
    #[error("Pipeline cancelled during {stage}")]
    Cancelled {
        /// Stage that was running when cancellation was observed.
        stage: Stage,
    },
}
