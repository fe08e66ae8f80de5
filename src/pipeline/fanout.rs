#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::future::Future;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Runs `f` over `items` with at most `limit` calls in flight.
///
/// Results come back in input order. An item whose permit is granted after
/// `cancel` fired is skipped and yields `None`; calls already running are
/// left to finish.
pub async fn bounded_map<I, T, F, Fut>(
    items: Vec<I>,
    limit: usize,
    cancel: &CancellationToken,
    f: F,
) -> Vec<Option<T>>
where
    F: Fn(I) -> Fut,
    Fut: Future<Output = T>,
{
    let semaphore = Semaphore::new(limit.max(1));
    let semaphore = &semaphore;
    let f = &f;

    let units = items.into_iter().map(|item| async move {
        let _permit = semaphore.acquire().await.ok()?;
        if cancel.is_cancelled() {
            return None;
        }
        Some(f(item).await)
    });

    join_all(units).await
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use super::*;

    #[tokio::test]
    async fn never_exceeds_the_limit() {
        let in_flight = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        let cancel = CancellationToken::new();

        let out = bounded_map((0..8).collect(), 3, &cancel, |i: u32| {
            let in_flight = &in_flight;
            let peak = &peak;
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                i * 2
            }
        })
        .await;

        assert_eq!(out, (0..8).map(|i| Some(i * 2)).collect::<Vec<_>>());
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn cancelled_before_start_runs_nothing() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let out = bounded_map(vec![1, 2, 3], 2, &cancel, |i: i32| async move { i }).await;
        assert_eq!(out, vec![None, None, None]);
    }
}
