//! Bounded admission window over a lazily produced task stream.

use std::future::Future;

use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use tracing::debug;

/// Default admission window size.
pub const DEFAULT_CONCURRENCY: usize = 16;

/// Runs at most `limit` units of work at once, refilling the window as
/// soon as any one of them finishes.
///
/// Tasks are pulled from the iterator only when a slot is free, so the
/// producer can be lazy or unbounded. Results come back in completion
/// order.
///
/// # Examples
///
/// ```
/// use warden_audit::scheduler::BoundedScheduler;
///
/// let rt = tokio::runtime::Runtime::new().unwrap();
/// let mut out = rt.block_on(async {
///     let scheduler = BoundedScheduler::new(2);
///     scheduler.run(1..=5, |n| async move { n * 10 }).await
/// });
/// out.sort();
/// assert_eq!(out, vec![10, 20, 30, 40, 50]);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct BoundedScheduler {
    limit: usize,
}

impl BoundedScheduler {
    /// Create a scheduler admitting at most `limit` tasks (minimum 1).
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
        }
    }

    /// The admission ceiling.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Drive `work` over every item of `tasks` and collect the outputs.
    ///
    /// `work` must not fail: anything it returns is collected as-is, so
    /// callers fold errors into the output type before handing work over.
    pub async fn run<I, F, Fut>(&self, tasks: I, work: F) -> Vec<Fut::Output>
    where
        I: IntoIterator,
        F: Fn(I::Item) -> Fut,
        Fut: Future,
    {
        let mut in_flight = FuturesUnordered::new();
        let mut results = Vec::new();
        let mut admitted: usize = 0;

        for task in tasks {
            if in_flight.len() >= self.limit {
                // Wait for any one entry, then sweep up whatever else is done.
                if let Some(output) = in_flight.next().await {
                    results.push(output);
                }
                while let Some(Some(output)) = in_flight.next().now_or_never() {
                    results.push(output);
                }
                debug!(
                    in_flight = in_flight.len(),
                    completed = results.len(),
                    "admission window drained"
                );
            }
            in_flight.push(work(task));
            admitted += 1;
        }

        debug!(admitted, in_flight = in_flight.len(), "task source exhausted");
        while let Some(output) = in_flight.next().await {
            results.push(output);
        }
        results
    }
}

impl Default for BoundedScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_CONCURRENCY)
    }
}
