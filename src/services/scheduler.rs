use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::error::{ErrorKind, ItemError};
use crate::models::{BatchStats, ConversionResult, ConversionTask, SkipReason};
use crate::services::aggregator::ResultAggregator;
use crate::services::conversion::ConversionUnit;

/// Emitted once every task of a batch has produced a result.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchProgress {
    pub batch_index: usize,
    pub batch_count: usize,
    pub completed: usize,
    pub total: usize,
    pub stats: BatchStats,
}

type Slots = Arc<Mutex<Vec<Option<ConversionResult>>>>;

/// State shared by the worker tasks of one `run`.
struct RunState {
    unit: Arc<ConversionUnit>,
    aggregator: Arc<ResultAggregator>,
    queue: Mutex<std::vec::IntoIter<(usize, ConversionTask)>>,
    slots: Slots,
    batch_remaining: Vec<AtomicUsize>,
    batch_size: usize,
    completed: AtomicUsize,
    total: usize,
    shutdown: Option<watch::Receiver<bool>>,
    progress: Option<mpsc::UnboundedSender<BatchProgress>>,
}

impl RunState {
    fn shutdown_requested(&self) -> bool {
        self.shutdown.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
    }

    async fn next_task(&self) -> Option<(usize, ConversionTask)> {
        self.queue.lock().await.next()
    }

    async fn finish(&self, slot: usize, result: ConversionResult) {
        self.aggregator.record(&result).await;
        self.slots.lock().await[slot] = Some(result);

        let completed = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
        let batch_index = slot / self.batch_size;
        if self.batch_remaining[batch_index].fetch_sub(1, Ordering::SeqCst) == 1 {
            let stats = self.aggregator.snapshot().await;
            let progress = BatchProgress {
                batch_index,
                batch_count: self.batch_remaining.len(),
                completed,
                total: self.total,
                stats,
            };
            info!(
                "📦 Batch {}/{} done. Progress: {}/{} ({:.1}%) ok={} failed={} skipped={}",
                batch_index + 1,
                progress.batch_count,
                completed,
                self.total,
                completed as f64 / self.total as f64 * 100.0,
                stats.successful,
                stats.failed,
                stats.skipped
            );
            if let Some(tx) = &self.progress {
                let _ = tx.send(progress);
            }
        }
    }

    async fn work(self: Arc<Self>, worker_id: usize) {
        while let Some((slot, task)) = self.next_task().await {
            if self.shutdown_requested() {
                let result = ConversionResult::skipped(&task, SkipReason::Cancelled, 0);
                self.finish(slot, result).await;
                continue;
            }

            let result = self.execute_isolated(worker_id, task).await;
            self.finish(slot, result).await;
        }
    }

    /// Runs one conversion on its own task so a panic is confined to that
    /// task's slot and the worker keeps draining the queue.
    async fn execute_isolated(&self, worker_id: usize, task: ConversionTask) -> ConversionResult {
        let unit = self.unit.clone();
        let owned = task.clone();
        match tokio::spawn(async move { unit.execute(&owned).await }).await {
            Ok(result) => result,
            Err(e) => {
                error!(
                    "Worker {} lost conversion of {}: {}",
                    worker_id, task.source_key, e
                );
                let err = ItemError::new(ErrorKind::Internal, format!("conversion panicked: {}", e));
                ConversionResult::failed(&task, err, 0)
            }
        }
    }

    async fn queue_is_empty(&self) -> bool {
        self.queue.lock().await.len() == 0
    }
}

/// Runs conversion tasks on a bounded pool of workers.
///
/// Workers pull from one shared queue, so at most `max_workers` conversions
/// are in flight at any moment. Batches are progress checkpoints only; a free
/// worker starts on the next batch while stragglers of the previous one are
/// still running.
pub struct BatchScheduler {
    unit: Arc<ConversionUnit>,
    aggregator: Arc<ResultAggregator>,
    shutdown: Option<watch::Receiver<bool>>,
    progress: Option<mpsc::UnboundedSender<BatchProgress>>,
}

impl BatchScheduler {
    pub fn new(unit: Arc<ConversionUnit>, aggregator: Arc<ResultAggregator>) -> Self {
        Self {
            unit,
            aggregator,
            shutdown: None,
            progress: None,
        }
    }

    /// Once the flag flips to `true`, queued tasks are recorded as cancelled
    /// instead of started. In-flight tasks run to completion.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn with_progress(mut self, progress: mpsc::UnboundedSender<BatchProgress>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn aggregator(&self) -> &Arc<ResultAggregator> {
        &self.aggregator
    }

    /// Executes every task and returns one result per task, in input order.
    pub async fn run(
        &self,
        tasks: Vec<ConversionTask>,
        max_workers: usize,
        batch_size: usize,
    ) -> Vec<ConversionResult> {
        let total = tasks.len();
        if total == 0 {
            return Vec::new();
        }

        let batch_size = batch_size.max(1);
        let worker_count = max_workers.max(1).min(total);
        let batch_remaining = tasks
            .chunks(batch_size)
            .map(|chunk| AtomicUsize::new(chunk.len()))
            .collect::<Vec<_>>();

        info!(
            "🚀 Dispatching {} tasks in {} batches of up to {} with {} workers",
            total,
            batch_remaining.len(),
            batch_size,
            worker_count
        );

        // Kept to backfill any slot that never produced a result.
        let originals = tasks.clone();
        let state = Arc::new(RunState {
            unit: self.unit.clone(),
            aggregator: self.aggregator.clone(),
            queue: Mutex::new(tasks.into_iter().enumerate().collect::<Vec<_>>().into_iter()),
            slots: Arc::new(Mutex::new(vec![None; total])),
            batch_remaining,
            batch_size,
            completed: AtomicUsize::new(0),
            total,
            shutdown: self.shutdown.clone(),
            progress: self.progress.clone(),
        });

        let mut workers = JoinSet::new();
        for worker_id in 0..worker_count {
            workers.spawn(state.clone().work(worker_id));
        }

        let mut next_worker_id = worker_count;
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!("Conversion worker terminated abnormally: {}", e);
                if !state.queue_is_empty().await {
                    warn!("Starting replacement worker {}", next_worker_id);
                    workers.spawn(state.clone().work(next_worker_id));
                    next_worker_id += 1;
                }
            }
        }

        // A worker that died outside a conversion may have dropped the slot
        // it was finishing. Record those so the totals still add up.
        let missing: Vec<usize> = state
            .slots
            .lock()
            .await
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_none())
            .map(|(idx, _)| idx)
            .collect();
        for slot in missing {
            warn!("No result recorded for {}", originals[slot].source_key);
            let err = ItemError::new(ErrorKind::Internal, "task produced no result");
            state
                .finish(slot, ConversionResult::failed(&originals[slot], err, 0))
                .await;
        }

        let mut slots = state.slots.lock().await;
        slots.drain(..).flatten().collect()
    }
}
