#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::{future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{ExtractRequest, ReasoningService, VisualDescription, VisualRequest};
use crate::{config::PipelineConfig, error::ReasoningServiceError};

/// Wraps a [`ReasoningService`] with a per-call timeout and bounded retries
/// of transient failures.
///
/// A timed-out attempt counts as transient. Permanent failures are returned
/// immediately. Once the cancellation token fires no retry is issued and a
/// pending backoff ends early with the last error.
#[derive(Clone)]
pub struct GuardedService {
    /// Wrapped service.
    inner:         Arc<dyn ReasoningService>,
    /// Upper bound on a single attempt.
    call_timeout:  Duration,
    /// Retries after the first attempt.
    max_retries:   u32,
    /// Delay before the first retry; doubled for each further retry.
    retry_backoff: Duration,
    /// Stops further retries when triggered.
    cancel:        CancellationToken,
}

impl GuardedService {
    /// Guards `inner` with the limits from `config`.
    pub fn new(inner: Arc<dyn ReasoningService>, config: &PipelineConfig) -> Self {
        Self {
            inner,
            call_timeout: config.call_timeout(),
            max_retries: config.max_retries(),
            retry_backoff: config.retry_backoff(),
            cancel: CancellationToken::new(),
        }
    }

    /// Stops retrying once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Runs `call` until it succeeds, fails permanently, or retries run out.
    async fn guarded<T, F, Fut>(&self, label: &str, mut call: F) -> Result<T, ReasoningServiceError>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, ReasoningServiceError>> + Send,
        T: Send,
    {
        let mut attempt = 0;
        let mut backoff = self.retry_backoff;

        loop {
            let outcome = match tokio::time::timeout(self.call_timeout, call()).await {
                Ok(outcome) => outcome,
                Err(_) => Err(ReasoningServiceError::Timeout(self.call_timeout)),
            };

            match outcome {
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    if self.cancel.is_cancelled() {
                        debug!("{label} failed ({e}); cancelled, not retrying");
                        return Err(e);
                    }
                    attempt += 1;
                    warn!(
                        "{label} failed ({e}); retry {attempt}/{} in {backoff:?}",
                        self.max_retries
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = self.cancel.cancelled() => {
                            debug!("{label}: cancelled during backoff");
                            return Err(e);
                        }
                    }
                    backoff = backoff.saturating_mul(2);
                }
                other => return other,
            }
        }
    }
}

#[async_trait]
impl ReasoningService for GuardedService {
    async fn structured_extract(
        &self,
        request: &ExtractRequest,
    ) -> Result<Value, ReasoningServiceError> {
        let label = match &request.subject {
            Some(subject) => format!("{} for {subject}", request.purpose),
            None => request.purpose.to_string(),
        };
        self.guarded(&label, || self.inner.structured_extract(request))
            .await
    }

    async fn describe_visual(
        &self,
        request: &VisualRequest,
    ) -> Result<VisualDescription, ReasoningServiceError> {
        let label = format!("describe_visual {}", request.reference);
        self.guarded(&label, || self.inner.describe_visual(request))
            .await
    }
}
