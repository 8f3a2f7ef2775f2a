//! Bounded download queue served by a fixed worker pool.
//!
//! Callers submit a batch with [`DownloadQueue::fetch_all`] and wait for
//! every item. Workers pull tasks from one shared channel, so at most
//! `workers_count` items are processed at once across all callers. If a
//! caller stops waiting (its future is dropped), tasks it queued that have
//! not started yet are skipped.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bloomstore_core::{BloomResult, ConfigError, DownloadingQueueConfig, StorageError};
use futures_util::FutureExt;
use prometheus::IntGauge;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Work performed for each queued item.
#[async_trait]
pub trait DownloadProcessor<T, R>: Send + Sync + 'static
where
    T: Send + 'static,
    R: Send + 'static,
{
    async fn process(&self, item: T) -> BloomResult<R>;
}

struct DownloadTask<T, R> {
    index: usize,
    item: T,
    results: mpsc::Sender<(usize, BloomResult<R>)>,
}

/// Counts a task on the queue gauge while it is being sent.
///
/// Dropped without [`PendingSend::sent`], for a failed send or a caller
/// cancelled while the queue is full, the count is taken back.
struct PendingSend<'a> {
    gauge: &'a IntGauge,
    sent: bool,
}

impl<'a> PendingSend<'a> {
    fn new(gauge: &'a IntGauge) -> Self {
        gauge.inc();
        Self { gauge, sent: false }
    }

    fn sent(mut self) {
        self.sent = true;
    }
}

impl Drop for PendingSend<'_> {
    fn drop(&mut self) {
        if !self.sent {
            self.gauge.dec();
        }
    }
}

type TaskReceiver<T, R> = Arc<tokio::sync::Mutex<mpsc::Receiver<DownloadTask<T, R>>>>;

pub struct DownloadQueue<T, R> {
    sender: Mutex<Option<mpsc::Sender<DownloadTask<T, R>>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    queue_length: IntGauge,
}

impl<T, R> DownloadQueue<T, R>
where
    T: Send + 'static,
    R: Send + 'static,
{
    /// Spawn the worker pool on the current Tokio runtime.
    pub fn new(
        config: &DownloadingQueueConfig,
        processor: Arc<dyn DownloadProcessor<T, R>>,
        queue_length: IntGauge,
    ) -> BloomResult<Self> {
        config.validate()?;
        let handle = tokio::runtime::Handle::try_current().map_err(|_| ConfigError::NoRuntime {
            component: "download queue".to_string(),
        })?;

        let (sender, receiver) = mpsc::channel(config.max_tasks_enqueued);
        let receiver: TaskReceiver<T, R> = Arc::new(tokio::sync::Mutex::new(receiver));

        let workers = (0..config.workers_count)
            .map(|id| {
                handle.spawn(run_worker(
                    id,
                    receiver.clone(),
                    processor.clone(),
                    queue_length.clone(),
                ))
            })
            .collect();

        debug!(
            workers = config.workers_count,
            capacity = config.max_tasks_enqueued,
            "Download queue started"
        );

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            queue_length,
        })
    }

    fn sender(&self) -> BloomResult<mpsc::Sender<DownloadTask<T, R>>> {
        let guard = self.sender.lock().map_err(|_| StorageError::LockPoisoned)?;
        guard
            .as_ref()
            .cloned()
            .ok_or_else(|| StorageError::QueueStopped.into())
    }

    /// Process every item and return results in input order.
    ///
    /// Fails with the first error any item reports. Blocks while the queue
    /// is at capacity.
    pub async fn fetch_all(&self, items: Vec<T>) -> BloomResult<Vec<R>> {
        let count = items.len();
        if count == 0 {
            return Ok(Vec::new());
        }
        let sender = self.sender()?;

        let (results_tx, mut results_rx) = mpsc::channel(count);
        for (index, item) in items.into_iter().enumerate() {
            let pending = PendingSend::new(&self.queue_length);
            let task = DownloadTask {
                index,
                item,
                results: results_tx.clone(),
            };
            if sender.send(task).await.is_err() {
                return Err(StorageError::QueueStopped.into());
            }
            pending.sent();
        }
        drop(results_tx);

        let mut slots: Vec<Option<R>> = (0..count).map(|_| None).collect();
        let mut received = 0;
        while received < count {
            match results_rx.recv().await {
                Some((index, Ok(value))) => {
                    slots[index] = Some(value);
                    received += 1;
                }
                Some((_, Err(e))) => return Err(e),
                // every worker went away with tasks outstanding
                None => return Err(StorageError::QueueStopped.into()),
            }
        }

        slots
            .into_iter()
            .map(|slot| slot.ok_or_else(|| StorageError::QueueStopped.into()))
            .collect()
    }

    /// Stop accepting work and abort all workers. Idempotent.
    pub fn stop(&self) {
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
        if let Ok(mut workers) = self.workers.lock() {
            for worker in workers.drain(..) {
                worker.abort();
            }
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.sender.lock().map(|s| s.is_none()).unwrap_or(true)
    }
}

impl<T, R> Drop for DownloadQueue<T, R> {
    fn drop(&mut self) {
        if let Ok(workers) = self.workers.get_mut() {
            for worker in workers.drain(..) {
                worker.abort();
            }
        }
    }
}

async fn run_worker<T, R>(
    id: usize,
    receiver: TaskReceiver<T, R>,
    processor: Arc<dyn DownloadProcessor<T, R>>,
    queue_length: IntGauge,
) where
    T: Send + 'static,
    R: Send + 'static,
{
    loop {
        let task = {
            let mut receiver = receiver.lock().await;
            receiver.recv().await
        };
        let Some(task) = task else {
            break;
        };
        queue_length.dec();

        if task.results.is_closed() {
            debug!(worker = id, index = task.index, "Skipping task of cancelled caller");
            continue;
        }

        let result = match AssertUnwindSafe(processor.process(task.item))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(_) => {
                warn!(worker = id, index = task.index, "Download task panicked");
                Err(StorageError::Cancelled {
                    reason: "download task panicked".to_string(),
                }
                .into())
            }
        };
        // the caller may have gone away meanwhile
        let _ = task.results.send((task.index, result)).await;
    }
    debug!(worker = id, "Download worker exiting");
}
