//! Outbound dispatch queue
//!
//! Serializes calls to the rate-limited vision provider. Tasks dispatch in
//! FIFO order with a minimum wall-clock spacing between starts, and at most
//! `concurrency` tasks are active at once. The spacing clock is refreshed
//! again when a task settles, so a slow or failing task still holds the next
//! one back by the full spacing window.

use chartscribe_common::{Error, Result};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex, Semaphore};
use tokio::time::Instant;

/// Default maximum simultaneously active tasks (strictly sequential)
pub const DEFAULT_CONCURRENCY: usize = 1;

/// Default minimum spacing between dispatch starts
pub const DEFAULT_MIN_SPACING_MS: u64 = 800;

/// Dispatch queue configuration
///
/// The defaults are the provider's operating envelope; they are fixed at
/// queue construction and not exposed for runtime tuning.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Maximum simultaneously active tasks
    pub concurrency: usize,
    /// Minimum wall-clock time between dispatch starts
    pub min_spacing: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            min_spacing: Duration::from_millis(DEFAULT_MIN_SPACING_MS),
        }
    }
}

/// A queued unit of work: the boxed task plus its enqueue timestamp
struct QueuedTask {
    job: Pin<Box<dyn Future<Output = ()> + Send>>,
    enqueued_at: Instant,
}

/// Completion handle for an enqueued task. Settles exactly once.
pub struct DispatchHandle<T> {
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> DispatchHandle<T> {
    /// Wait for the task to settle.
    ///
    /// Dropping the handle instead does not cancel the task; it runs to
    /// settlement and the result is discarded.
    pub async fn settled(self) -> Result<T> {
        self.rx.await.unwrap_or_else(|_| {
            Err(Error::Internal(
                "dispatch queue shut down before task settled".to_string(),
            ))
        })
    }
}

/// FIFO scheduler enforcing concurrency and spacing limits on outbound calls
///
/// All queue state (the FIFO and the last-dispatch timestamp) is owned by a
/// single scheduler task spawned at construction; enqueueing never starts a
/// second scheduling loop. Instantiate once per process and share by
/// reference.
pub struct DispatchQueue {
    tx: mpsc::UnboundedSender<QueuedTask>,
    pending: Arc<AtomicUsize>,
}

impl DispatchQueue {
    /// Create a queue and spawn its scheduler task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: DispatchConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));

        tokio::spawn(scheduler_loop(rx, config, Arc::clone(&pending)));

        Self { tx, pending }
    }

    /// Append a task to the FIFO.
    ///
    /// Returns a handle that settles exactly once with the task's result.
    /// Every enqueued task is eventually executed; there is no cancellation.
    pub fn enqueue<F, Fut, T>(&self, task: F) -> DispatchHandle<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();

        let job: Pin<Box<dyn Future<Output = ()> + Send>> = Box::pin(async move {
            let result = task().await;
            // The caller may have dropped its handle; the result is discarded then.
            let _ = done_tx.send(result);
        });

        self.pending.fetch_add(1, Ordering::SeqCst);

        if self
            .tx
            .send(QueuedTask {
                job,
                enqueued_at: Instant::now(),
            })
            .is_err()
        {
            // Scheduler gone (runtime shutting down); the dropped oneshot
            // settles the handle with an error.
            self.pending.fetch_sub(1, Ordering::SeqCst);
            tracing::error!("Dispatch queue scheduler is no longer running");
        }

        DispatchHandle { rx: done_rx }
    }

    /// Number of tasks enqueued but not yet dispatched
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }
}

/// The single scheduling loop owning all queue state
async fn scheduler_loop(
    mut rx: mpsc::UnboundedReceiver<QueuedTask>,
    config: DispatchConfig,
    pending: Arc<AtomicUsize>,
) {
    let semaphore = Arc::new(Semaphore::new(config.concurrency.max(1)));
    let last_dispatch: Arc<Mutex<Option<Instant>>> = Arc::new(Mutex::new(None));

    while let Some(task) = rx.recv().await {
        // Block the FIFO head until a concurrency slot frees up
        let permit = Arc::clone(&semaphore)
            .acquire_owned()
            .await
            .expect("dispatch semaphore closed");

        {
            let mut last = last_dispatch.lock().await;
            if let Some(prev) = *last {
                let since = prev.elapsed();
                if since < config.min_spacing {
                    tokio::time::sleep(config.min_spacing - since).await;
                }
            }
            *last = Some(Instant::now());
        }

        pending.fetch_sub(1, Ordering::SeqCst);
        tracing::debug!(
            queue_wait_ms = task.enqueued_at.elapsed().as_millis() as u64,
            "Dispatching queued task"
        );

        let last_dispatch = Arc::clone(&last_dispatch);
        tokio::spawn(async move {
            task.job.await;
            // Refresh at settlement so spacing holds across slow and failing
            // tasks, not just between starts
            *last_dispatch.lock().await = Some(Instant::now());
            drop(permit);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    #[tokio::test(start_paused = true)]
    async fn dispatches_in_fifo_order_with_default_spacing() {
        let queue = DispatchQueue::new(DispatchConfig::default());
        let starts: Arc<Mutex<Vec<(usize, Instant)>>> = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..3 {
            let starts = Arc::clone(&starts);
            handles.push(queue.enqueue(move || async move {
                starts.lock().await.push((i, Instant::now()));
                Ok::<usize, Error>(i)
            }));
        }

        // Settlement order matches enqueue order
        for (i, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.settled().await.unwrap(), i);
        }

        let starts = starts.lock().await;
        assert_eq!(starts.len(), 3);
        for (expected, (index, _)) in starts.iter().enumerate() {
            assert_eq!(*index, expected);
        }

        // Start times monotonically increasing with gaps >= 800ms
        for pair in starts.windows(2) {
            let gap = pair[1].1 - pair[0].1;
            assert!(
                gap >= Duration::from_millis(DEFAULT_MIN_SPACING_MS),
                "dispatch gap {:?} below minimum spacing",
                gap
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failing_task_does_not_block_subsequent_tasks() {
        let queue = DispatchQueue::new(DispatchConfig::default());

        let failing = queue.enqueue(|| async {
            Err::<(), Error>(Error::Internal("provider exploded".to_string()))
        });
        let succeeding = queue.enqueue(|| async { Ok::<u32, Error>(7) });

        assert!(failing.settled().await.is_err());
        assert_eq!(succeeding.settled().await.unwrap(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn spacing_is_preserved_across_failures() {
        let queue = DispatchQueue::new(DispatchConfig::default());
        let starts: Arc<Mutex<Vec<Instant>>> = Arc::new(Mutex::new(Vec::new()));

        let s1 = Arc::clone(&starts);
        let h1 = queue.enqueue(move || async move {
            s1.lock().await.push(Instant::now());
            Err::<(), Error>(Error::Internal("boom".to_string()))
        });
        let s2 = Arc::clone(&starts);
        let h2 = queue.enqueue(move || async move {
            s2.lock().await.push(Instant::now());
            Ok::<(), Error>(())
        });

        let _ = h1.settled().await;
        h2.settled().await.unwrap();

        let starts = starts.lock().await;
        assert!(starts[1] - starts[0] >= Duration::from_millis(DEFAULT_MIN_SPACING_MS));
    }

    #[tokio::test(start_paused = true)]
    async fn spacing_counts_from_settlement_of_slow_tasks() {
        let queue = DispatchQueue::new(DispatchConfig::default());

        let slow_end: Arc<Mutex<Option<Instant>>> = Arc::new(Mutex::new(None));
        let end_ref = Arc::clone(&slow_end);
        let h1 = queue.enqueue(move || async move {
            tokio::time::sleep(Duration::from_millis(1200)).await;
            *end_ref.lock().await = Some(Instant::now());
            Ok::<(), Error>(())
        });

        let next_start: Arc<Mutex<Option<Instant>>> = Arc::new(Mutex::new(None));
        let start_ref = Arc::clone(&next_start);
        let h2 = queue.enqueue(move || async move {
            *start_ref.lock().await = Some(Instant::now());
            Ok::<(), Error>(())
        });

        h1.settled().await.unwrap();
        h2.settled().await.unwrap();

        let end = slow_end.lock().await.expect("slow task never ran");
        let start = next_start.lock().await.expect("second task never ran");
        assert!(
            start - end >= Duration::from_millis(DEFAULT_MIN_SPACING_MS),
            "second task started {:?} after first settled",
            start - end
        );
    }

    #[tokio::test(start_paused = true)]
    async fn pending_reflects_undispatched_tasks() {
        let queue = DispatchQueue::new(DispatchConfig::default());

        let h1 = queue.enqueue(|| async { Ok::<(), Error>(()) });
        let h2 = queue.enqueue(|| async { Ok::<(), Error>(()) });
        assert!(queue.pending() <= 2);

        h1.settled().await.unwrap();
        h2.settled().await.unwrap();
        assert_eq!(queue.pending(), 0);
    }
}
