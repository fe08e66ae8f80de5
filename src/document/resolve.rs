#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{ContentBlock, DocumentRole};
use crate::{
    pipeline::{FailureKey, FailureRecord, Stage, fanout},
    reasoning::{ReasoningService, VisualRequest},
};

/// A block sequence whose visual blocks carry descriptions.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedDocument {
    /// Which input document this is.
    pub role:     DocumentRole,
    /// Same length and order as the ingested blocks.
    pub blocks:   Vec<ContentBlock>,
    /// One warning per visual that could not be resolved.
    pub failures: Vec<FailureRecord>,
}

/// Description used in place of a visual the service could not describe.
pub fn unresolved_placeholder(page: u32) -> String {
    format!("[unresolved visual at page {page}]")
}

/// Describes every visual block through `service`, at most `limit` at a time.
///
/// Each block is resolved on its own: a failure degrades only that block to
/// an "unresolved visual" placeholder and records a warning. The output keeps
/// every block at its original position. Blocks not yet dispatched when
/// `cancel` fires stay undescribed.
pub async fn resolve_visuals(
    service: &dyn ReasoningService,
    role: DocumentRole,
    blocks: Vec<ContentBlock>,
    limit: usize,
    cancel: &CancellationToken,
) -> ResolvedDocument {
    let requests: Vec<(usize, VisualRequest)> = blocks
        .iter()
        .enumerate()
        .filter_map(|(index, block)| {
            let asset = block.asset()?;
            Some((index, VisualRequest {
                reference: asset.reference.clone(),
                kind:      block.kind(),
                page:      block.page(),
                data:      asset.data.clone(),
            }))
        })
        .collect();

    if requests.is_empty() {
        return ResolvedDocument {
            role,
            blocks,
            failures: Vec::new(),
        };
    }
    info!("Resolving {} visual block(s) in the {role} document", requests.len());

    let outcomes = fanout::bounded_map(requests, limit, cancel, |(index, request)| async move {
        let outcome = service.describe_visual(&request).await;
        (index, outcome)
    })
    .await;

    let mut blocks = blocks;
    let mut failures = Vec::new();
    for (index, outcome) in outcomes.into_iter().flatten() {
        let block = &blocks[index];
        let resolved = match outcome {
            Ok(description) => block.with_description(description.render()),
            Err(e) => {
                warn!(
                    "Visual on page {} (#{}) of the {role} document could not be resolved: {e}",
                    block.page(),
                    block.ordinal()
                );
                failures.push(FailureRecord::warning(
                    Stage::Resolve,
                    FailureKey::Block {
                        document: role,
                        page:     block.page(),
                        ordinal:  block.ordinal(),
                    },
                    e.to_string(),
                ));
                block.with_description(unresolved_placeholder(block.page()))
            }
        };
        blocks[index] = resolved;
    }

    ResolvedDocument {
        role,
        blocks,
        failures,
    }
}
