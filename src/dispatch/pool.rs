// Local dispatch worker pool.
// A bounded queue feeds each batch's workers; a shared semaphore caps requests in flight across batches.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, Semaphore, mpsc};
use tracing::{debug, warn};

use crate::config::DispatchConfig;
use crate::error::{Result, StarboardError};

use super::{
    DispatchEvent, DispatchItem, DispatchLimits, DispatchResult, Dispatcher, Progress,
    RateLimiter, RequestExecutor,
};

/// Capacity of the event channel handed to consumers.
const EVENT_BUFFER: usize = 64;

type Job = (usize, DispatchItem);

/// In-process dispatcher backed by a worker pool.
///
/// `concurrency` bounds requests in flight over every running batch, not per batch.
pub struct LocalDispatcher {
    executor: Arc<dyn RequestExecutor>,
    limiter: Arc<RateLimiter>,
    permits: Arc<Semaphore>,
    limits: DispatchLimits,
    workers: usize,
    queue_capacity: usize,
}

impl LocalDispatcher {
    pub fn new(executor: Arc<dyn RequestExecutor>, config: &DispatchConfig) -> Self {
        let workers = config.concurrency.max(1);
        Self {
            executor,
            limiter: Arc::new(RateLimiter::per_second(config.rate_per_second)),
            permits: Arc::new(Semaphore::new(workers)),
            limits: DispatchLimits::from_config(config),
            workers,
            queue_capacity: config.queue_capacity.max(1),
        }
    }

    pub fn limits(&self) -> DispatchLimits {
        self.limits
    }

    /// Start a batch and return its event stream.
    ///
    /// The stream carries one `Progress` per item and ends with exactly one
    /// terminal event. Oversized batches are rejected before anything runs.
    pub fn start(&self, items: Vec<DispatchItem>) -> Result<mpsc::Receiver<DispatchEvent>> {
        self.limits.check_items(&items)?;

        let total = items.len();
        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
        let (job_tx, job_rx) = mpsc::channel::<Job>(self.queue_capacity);
        let (result_tx, result_rx) = mpsc::channel::<(usize, DispatchResult)>(self.queue_capacity);
        let job_rx = Arc::new(Mutex::new(job_rx));

        tokio::spawn(async move {
            for job in items.into_iter().enumerate() {
                if job_tx.send(job).await.is_err() {
                    break;
                }
            }
        });

        for id in 0..self.workers.min(total.max(1)) {
            let job_rx = Arc::clone(&job_rx);
            let result_tx = result_tx.clone();
            let executor = Arc::clone(&self.executor);
            let limiter = Arc::clone(&self.limiter);
            let permits = Arc::clone(&self.permits);
            tokio::spawn(run_worker(id, job_rx, result_tx, executor, limiter, permits));
        }
        drop(result_tx);

        tokio::spawn(collect(
            total,
            self.limits.max_result_bytes,
            result_rx,
            event_tx,
        ));

        Ok(event_rx)
    }
}

async fn run_worker(
    id: usize,
    jobs: Arc<Mutex<mpsc::Receiver<Job>>>,
    results: mpsc::Sender<(usize, DispatchResult)>,
    executor: Arc<dyn RequestExecutor>,
    limiter: Arc<RateLimiter>,
    permits: Arc<Semaphore>,
) {
    loop {
        let job = { jobs.lock().await.recv().await };
        let Some((index, item)) = job else {
            break;
        };

        let Ok(_permit) = permits.acquire().await else {
            break;
        };
        limiter.acquire().await;
        let result = executor.execute(&item).await;
        debug!(worker = id, index, status = result.status, "dispatch item done");

        if results.send((index, result)).await.is_err() {
            // Collector gave up on the batch.
            break;
        }
    }
}

async fn collect(
    total: usize,
    max_result_bytes: usize,
    mut results: mpsc::Receiver<(usize, DispatchResult)>,
    events: mpsc::Sender<DispatchEvent>,
) {
    let mut slots: Vec<Option<DispatchResult>> = vec![None; total];
    let mut succeeded = 0;
    let mut failed = 0;
    let mut result_bytes = 0usize;

    while succeeded + failed < total {
        let Some((index, result)) = results.recv().await else {
            break;
        };

        result_bytes += serde_json::to_vec(&result).map(|b| b.len()).unwrap_or(0);
        if result_bytes > max_result_bytes {
            let error = StarboardError::ResultTooLarge {
                limit: max_result_bytes,
            };
            warn!(error = %error, "dispatch batch aborted");
            let _ = events.send(DispatchEvent::Failed(error.to_string())).await;
            return;
        }

        if result.is_success() {
            succeeded += 1;
        } else {
            failed += 1;
        }
        slots[index] = Some(result);

        let progress = Progress {
            index,
            completed: succeeded + failed,
            succeeded,
            failed,
            total,
        };
        if events.send(DispatchEvent::Progress(progress)).await.is_err() {
            return;
        }
    }

    // A worker that died leaves its slot empty; report it rather than drop it.
    let ordered = slots
        .into_iter()
        .map(|slot| slot.unwrap_or_else(|| DispatchResult::failure(0, "worker exited early")))
        .collect();
    let _ = events.send(DispatchEvent::Final(ordered)).await;
}

#[async_trait]
impl Dispatcher for LocalDispatcher {
    async fn dispatch(&self, items: Vec<DispatchItem>) -> Result<Vec<DispatchResult>> {
        let mut events = self.start(items)?;

        while let Some(event) = events.recv().await {
            match event {
                DispatchEvent::Progress(progress) => {
                    debug!(
                        completed = progress.completed,
                        failed = progress.failed,
                        total = progress.total,
                        "dispatch progress"
                    );
                }
                DispatchEvent::Final(results) => return Ok(results),
                DispatchEvent::Failed(message) => return Err(StarboardError::Other(message)),
            }
        }

        Err(StarboardError::IncompleteStream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Succeeds with the item URL as the result, except for URLs containing "fail".
    /// Later items finish first so completion order differs from input order.
    #[derive(Default)]
    struct FakeExecutor {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl RequestExecutor for FakeExecutor {
        async fn execute(&self, item: &DispatchItem) -> DispatchResult {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            let n: u64 = item.url.rsplit('/').next().and_then(|n| n.parse().ok()).unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(20u64.saturating_sub(n * 2))).await;

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if item.url.contains("fail") {
                DispatchResult::failure(500, "HTTP 500")
            } else {
                DispatchResult::success(200, BTreeMap::new(), json!(item.url))
            }
        }
    }

    fn config(concurrency: usize) -> DispatchConfig {
        DispatchConfig {
            concurrency,
            rate_per_second: 0,
            queue_capacity: 2,
            ..DispatchConfig::default()
        }
    }

    fn items(urls: &[&str]) -> Vec<DispatchItem> {
        urls.iter().map(|u| DispatchItem::get(*u)).collect()
    }

    #[tokio::test]
    async fn test_results_keep_input_order_and_isolate_failures() {
        let dispatcher = LocalDispatcher::new(Arc::new(FakeExecutor::default()), &config(3));
        let input = items(&[
            "https://x.test/1",
            "https://x.test/2",
            "https://x.test/fail/3",
            "https://x.test/4",
            "https://x.test/5",
        ]);

        let results = dispatcher.dispatch(input.clone()).await.unwrap();

        assert_eq!(results.len(), input.len());
        for (i, (item, result)) in input.iter().zip(&results).enumerate() {
            if i == 2 {
                assert_eq!(result.error.as_deref(), Some("HTTP 500"));
                assert!(result.result.is_none());
            } else {
                assert!(result.is_success());
                assert_eq!(result.result, Some(json!(item.url)));
            }
        }
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let dispatcher = LocalDispatcher::new(Arc::new(FakeExecutor::default()), &config(3));
        let results = dispatcher.dispatch(Vec::new()).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_concurrency_ceiling() {
        let executor = Arc::new(FakeExecutor::default());
        let dispatcher = LocalDispatcher::new(executor.clone(), &config(2));
        let urls: Vec<String> = (0..8).map(|i| format!("https://x.test/{i}")).collect();
        let input = urls.iter().map(DispatchItem::get).collect();

        dispatcher.dispatch(input).await.unwrap();

        assert!(executor.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_concurrency_ceiling_spans_batches() {
        let executor = Arc::new(FakeExecutor::default());
        let dispatcher = LocalDispatcher::new(executor.clone(), &config(2));
        let batch = |b: usize| -> Vec<DispatchItem> {
            (0..6)
                .map(|i| DispatchItem::get(format!("https://x.test/{b}/{i}")))
                .collect()
        };

        let (a, b, c) = tokio::join!(
            dispatcher.dispatch(batch(0)),
            dispatcher.dispatch(batch(1)),
            dispatcher.dispatch(batch(2)),
        );

        for results in [a, b, c] {
            assert_eq!(results.unwrap().len(), 6);
        }
        assert!(executor.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_progress_events_then_final() {
        let dispatcher = LocalDispatcher::new(Arc::new(FakeExecutor::default()), &config(2));
        let mut events = dispatcher
            .start(items(&["https://x.test/1", "https://x.test/fail/2", "https://x.test/3"]))
            .unwrap();

        let mut progress = Vec::new();
        let mut last = None;
        while let Some(event) = events.recv().await {
            match event {
                DispatchEvent::Progress(p) => progress.push(p),
                terminal => last = Some(terminal),
            }
        }

        assert_eq!(progress.len(), 3);
        let end = progress.last().unwrap();
        assert_eq!((end.completed, end.succeeded, end.failed, end.total), (3, 2, 1, 3));
        assert!(progress.windows(2).all(|w| w[0].completed < w[1].completed));
        assert!(matches!(last, Some(DispatchEvent::Final(ref r)) if r.len() == 3));
    }

    #[tokio::test]
    async fn test_result_ceiling_fails_whole_batch() {
        let config = DispatchConfig {
            max_result_bytes: 120,
            ..config(2)
        };
        let dispatcher = LocalDispatcher::new(Arc::new(FakeExecutor::default()), &config);
        let urls: Vec<String> = (0..6).map(|i| format!("https://x.test/{i}")).collect();

        let err = dispatcher
            .dispatch(urls.iter().map(DispatchItem::get).collect())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("exceed"));
    }

    #[tokio::test]
    async fn test_oversized_batch_rejected_up_front() {
        let executor = Arc::new(FakeExecutor::default());
        let config = DispatchConfig {
            max_batch_items: 1,
            ..config(2)
        };
        let dispatcher = LocalDispatcher::new(executor.clone(), &config);

        let err = dispatcher
            .dispatch(items(&["https://x.test/1", "https://x.test/2"]))
            .await
            .unwrap_err();
        assert!(matches!(err, StarboardError::BatchTooLarge { .. }));
        assert_eq!(executor.peak.load(Ordering::SeqCst), 0);
    }
}
