use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use labcheck::{
    PipelineConfig, ReasoningService,
    document::{BlockKind, VisualData},
    error::ReasoningServiceError,
    reasoning::{
        ExtractPurpose, ExtractRequest, GuardedService, VisualCategory, VisualDescription,
        VisualRequest,
    },
};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

/// Fails the first `failures` attempts with `error`, sleeping `slow` on each
/// failing attempt, then succeeds.
struct Flaky {
    failures: usize,
    error:    ReasoningServiceError,
    slow:     Duration,
    attempts: AtomicUsize,
}

impl Flaky {
    fn new(failures: usize, error: ReasoningServiceError) -> Arc<Self> {
        Arc::new(Self {
            failures,
            error,
            slow: Duration::ZERO,
            attempts: AtomicUsize::new(0),
        })
    }

    fn hanging(failures: usize) -> Arc<Self> {
        Arc::new(Self {
            failures,
            error: ReasoningServiceError::Permanent("unreachable".into()),
            slow: Duration::from_secs(5),
            attempts: AtomicUsize::new(0),
        })
    }

    fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    async fn attempt(&self) -> Result<(), ReasoningServiceError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.failures {
            if !self.slow.is_zero() {
                tokio::time::sleep(self.slow).await;
            }
            return Err(self.error.clone());
        }
        Ok(())
    }
}

#[async_trait]
impl ReasoningService for Flaky {
    async fn structured_extract(
        &self,
        _request: &ExtractRequest,
    ) -> Result<Value, ReasoningServiceError> {
        self.attempt().await?;
        Ok(json!({"ok": true}))
    }

    async fn describe_visual(
        &self,
        _request: &VisualRequest,
    ) -> Result<VisualDescription, ReasoningServiceError> {
        self.attempt().await?;
        Ok(VisualDescription {
            category: VisualCategory::Chart,
            content:  "bars".into(),
            summary:  None,
        })
    }
}

fn config(max_retries: u32, call_timeout: Duration) -> PipelineConfig {
    PipelineConfig::builder()
        .max_retries(max_retries)
        .call_timeout(call_timeout)
        .retry_backoff(Duration::from_millis(1))
        .build()
}

fn request() -> ExtractRequest {
    ExtractRequest {
        purpose:     ExtractPurpose::TaskEvaluation,
        subject:     Some("T1".into()),
        context:     String::new(),
        schema_hint: "{}".into(),
    }
}

#[tokio::test]
async fn transient_failures_are_retried() {
    let inner = Flaky::new(2, ReasoningServiceError::Transient("rate limited".into()));
    let guarded = GuardedService::new(inner.clone(), &config(2, Duration::from_secs(5)));

    let value = guarded.structured_extract(&request()).await.expect("third attempt");
    assert_eq!(value, json!({"ok": true}));
    assert_eq!(inner.attempts(), 3);
}

#[tokio::test]
async fn retries_are_bounded() {
    let inner = Flaky::new(10, ReasoningServiceError::Transient("overloaded".into()));
    let guarded = GuardedService::new(inner.clone(), &config(1, Duration::from_secs(5)));

    let err = guarded.structured_extract(&request()).await.expect_err("exhausted");
    assert!(matches!(err, ReasoningServiceError::Transient(_)), "{err}");
    assert_eq!(inner.attempts(), 2);
}

#[tokio::test]
async fn permanent_failures_are_not_retried() {
    let inner = Flaky::new(1, ReasoningServiceError::Permanent("bad image".into()));
    let guarded = GuardedService::new(inner.clone(), &config(3, Duration::from_secs(5)));

    let visual = VisualRequest {
        reference: "p1-image-0".into(),
        kind:      BlockKind::Image,
        page:      1,
        data:      VisualData::Undecodable("corrupt".into()),
    };
    let err = guarded.describe_visual(&visual).await.expect_err("permanent");
    assert!(matches!(err, ReasoningServiceError::Permanent(_)), "{err}");
    assert_eq!(inner.attempts(), 1);
}

#[tokio::test]
async fn slow_calls_time_out() {
    let inner = Flaky::hanging(10);
    let timeout = Duration::from_millis(20);
    let guarded = GuardedService::new(inner.clone(), &config(0, timeout));

    let err = guarded.structured_extract(&request()).await.expect_err("timeout");
    assert_eq!(err, ReasoningServiceError::Timeout(timeout));
    assert_eq!(inner.attempts(), 1);
}

#[tokio::test]
async fn timeouts_count_as_transient() {
    let inner = Flaky::hanging(1);
    let guarded = GuardedService::new(inner.clone(), &config(1, Duration::from_millis(20)));

    guarded
        .structured_extract(&request())
        .await
        .expect("second attempt is fast");
    assert_eq!(inner.attempts(), 2);
}

#[tokio::test]
async fn cancelled_guard_does_not_retry() {
    let inner = Flaky::new(10, ReasoningServiceError::Transient("overloaded".into()));
    let cancel = CancellationToken::new();
    cancel.cancel();
    let guarded = GuardedService::new(inner.clone(), &config(3, Duration::from_secs(5)))
        .with_cancellation(cancel);

    let err = guarded.structured_extract(&request()).await.expect_err("no retry");
    assert!(matches!(err, ReasoningServiceError::Transient(_)), "{err}");
    assert_eq!(inner.attempts(), 1);
}

#[tokio::test]
async fn cancellation_cuts_the_backoff_short() {
    let inner = Flaky::new(10, ReasoningServiceError::Transient("overloaded".into()));
    let cancel = CancellationToken::new();
    let config = PipelineConfig::builder()
        .max_retries(3)
        .call_timeout(Duration::from_secs(5))
        .retry_backoff(Duration::from_secs(60))
        .build();
    let guarded = GuardedService::new(inner.clone(), &config).with_cancellation(cancel.clone());

    let trigger = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
    });
    let outcome =
        tokio::time::timeout(Duration::from_secs(5), guarded.structured_extract(&request()))
            .await
            .expect("backoff ended on cancellation");
    trigger.await.expect("trigger task");

    assert!(matches!(outcome, Err(ReasoningServiceError::Transient(_))));
    assert_eq!(inner.attempts(), 1);
}
