//! Bounded fan-out of independent async tasks.
//!
//! Work here is I/O-bound: a panel of completion calls, a batch of fetches.
//! [`map_concurrent`] runs them with a concurrency cap while keeping the
//! output aligned with the input, whatever order things finish in.
//!
//! Failure isolation is the caller's half of the contract: `f` must turn its
//! own failures into error-carrying values (an `ok: false` run, a `Result`),
//! so one bad item can never abort its siblings or shrink the output.

use std::future::Future;

use futures::stream::{self, StreamExt};
use thiserror::Error;

/// Errors from the executor itself; per-item failures never surface here.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ExecutorError {
    #[error("concurrency must be at least 1")]
    ZeroConcurrency,
}

/// Map `f` over `items` with at most `concurrency` in flight.
///
/// The result vector always has the same length and index order as the
/// input.
pub async fn map_concurrent<T, R, F, Fut>(
    items: Vec<T>,
    concurrency: usize,
    f: F,
) -> Result<Vec<R>, ExecutorError>
where
    F: Fn(T, usize) -> Fut,
    Fut: Future<Output = R>,
{
    if concurrency == 0 {
        return Err(ExecutorError::ZeroConcurrency);
    }

    let results = stream::iter(items.into_iter().enumerate().map(|(index, item)| f(item, index)))
        .buffered(concurrency)
        .collect::<Vec<R>>()
        .await;

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn output_matches_input_order_despite_varied_latency() {
        let items = vec![40u64, 5, 25, 1, 15];

        let results = map_concurrent(items.clone(), 5, |delay, index| async move {
            tokio::time::sleep(Duration::from_millis(delay)).await;
            (index, delay)
        })
        .await
        .unwrap();

        assert_eq!(results.len(), items.len());
        for (position, (index, delay)) in results.iter().enumerate() {
            assert_eq!(*index, position);
            assert_eq!(*delay, items[position]);
        }
    }

    #[tokio::test]
    async fn one_failing_item_does_not_shrink_the_output() {
        let results = map_concurrent(vec![1, 2, 3, 4], 2, |n, _| async move {
            if n == 3 {
                Err(format!("item {n} failed"))
            } else {
                Ok(n * 10)
            }
        })
        .await
        .unwrap();

        assert_eq!(results.len(), 4);
        assert_eq!(results[0], Ok(10));
        assert_eq!(results[2], Err("item 3 failed".to_string()));
        assert_eq!(results[3], Ok(40));
    }

    #[tokio::test]
    async fn concurrency_cap_is_respected() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let results = map_concurrent(vec![(); 12], 3, |_, index| {
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            async move {
                let current = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(current, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                index
            }
        })
        .await
        .unwrap();

        assert_eq!(results, (0..12).collect::<Vec<_>>());
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn empty_input_yields_empty_output() {
        let results = map_concurrent(Vec::<u8>::new(), 4, |n, _| async move { n }).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn zero_concurrency_is_rejected() {
        let err = map_concurrent(vec![1], 0, |n, _| async move { n }).await.unwrap_err();
        assert_eq!(err, ExecutorError::ZeroConcurrency);
    }
}
