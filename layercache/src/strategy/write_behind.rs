use super::{CacheStrategy, log_failure, read_through};
use crate::config::WriteBehindConfig;
use crate::core::{CacheError, CacheHandle, CacheKey, CacheValue, Result, Tier};
use crate::metrics::CacheMetrics;
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{Mutex, Notify, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

const NAME: &str = "write-behind";

/// L2 operation waiting in the write-behind queue
enum PendingOp<K: CacheKey> {
    Put {
        key: K,
        value: CacheValue,
        l2: CacheHandle<K>,
    },
    Evict {
        key: K,
        l2: CacheHandle<K>,
    },
}

impl<K: CacheKey> PendingOp<K> {
    fn operation(&self) -> &'static str {
        match self {
            Self::Put { .. } => "put",
            Self::Evict { .. } => "evict",
        }
    }

    fn key(&self) -> &K {
        match self {
            Self::Put { key, .. } | Self::Evict { key, .. } => key,
        }
    }

    async fn apply(&self) -> Result<()> {
        match self {
            Self::Put { key, value, l2 } => l2.put(key, value).await,
            Self::Evict { key, l2 } => l2.evict(key).await,
        }
    }
}

/// State shared between producers and the flusher
struct QueueState {
    depth: AtomicUsize,
    /// Woken once depth reaches the batch size
    wake: Notify,
    batch_size: usize,
}

struct Workers<K: CacheKey> {
    shutdown_tx: oneshot::Sender<()>,
    /// Hands the queue back once it stops so shutdown can drain it
    flusher: JoinHandle<mpsc::UnboundedReceiver<PendingOp<K>>>,
    executor: JoinHandle<()>,
}

/// Write-back strategy.
///
/// `put`/`evict` update L1 immediately and queue the L2 operation. A flusher task drains
/// the queue in batches of at most `batch_size`, either on a fixed interval or as soon as
/// the depth reaches `batch_size`. Batches run on a single executor task in queue order,
/// so operations on one key are applied to L2 in the order they were issued.
/// [`CacheStrategy::shutdown`] stops both tasks and applies whatever is still queued.
/// Writes issued while it runs wait for that final drain and then go straight to L2.
pub struct WriteBehind<K: CacheKey> {
    tx: mpsc::UnboundedSender<PendingOp<K>>,
    state: Arc<QueueState>,
    /// Held for the whole of `shutdown`; `None` once the pipeline is gone
    workers: Mutex<Option<Workers<K>>>,
    closed: AtomicBool,
    metrics: Arc<CacheMetrics>,
}

impl<K: CacheKey> WriteBehind<K> {
    /// Spawn the background pipeline on the current tokio runtime
    pub fn start(config: WriteBehindConfig, metrics: Arc<CacheMetrics>) -> Result<Self> {
        if config.batch_size == 0 || config.flush_interval_ms == 0 {
            return Err(CacheError::Config(
                "write-behind batch_size and flush_interval_ms must be > 0".into(),
            ));
        }
        let runtime = Handle::try_current().map_err(|e| {
            CacheError::Config(format!("write-behind needs a tokio runtime: {e}"))
        })?;

        let (tx, rx) = mpsc::unbounded_channel();
        let (batch_tx, batch_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let state = Arc::new(QueueState {
            depth: AtomicUsize::new(0),
            wake: Notify::new(),
            batch_size: config.batch_size,
        });

        let flusher = runtime.spawn(Self::flusher_loop(
            rx,
            batch_tx,
            Arc::clone(&state),
            config.flush_interval(),
            shutdown_rx,
            Arc::clone(&metrics),
        ));
        let executor = runtime.spawn(Self::executor_loop(batch_rx, Arc::clone(&metrics)));

        info!(
            batch_size = config.batch_size,
            flush_interval_ms = config.flush_interval_ms,
            "Write-behind pipeline started"
        );

        Ok(Self {
            tx,
            state,
            workers: Mutex::new(Some(Workers {
                shutdown_tx,
                flusher,
                executor,
            })),
            closed: AtomicBool::new(false),
            metrics,
        })
    }

    /// Operations queued and not yet handed to the executor
    pub fn pending(&self) -> usize {
        self.state.depth.load(Ordering::Acquire)
    }

    async fn enqueue(&self, op: PendingOp<K>) {
        if self.closed.load(Ordering::Acquire) {
            self.apply_after_close(op).await;
            return;
        }

        // Count before sending so the flusher never sees the op ahead of its count
        let depth = self.state.depth.fetch_add(1, Ordering::AcqRel) + 1;
        if let Err(mpsc::error::SendError(op)) = self.tx.send(op) {
            self.state.depth.fetch_sub(1, Ordering::AcqRel);
            self.apply_after_close(op).await;
            return;
        }

        self.metrics.set_queue_depth(depth);
        if depth >= self.state.batch_size {
            self.state.wake.notify_one();
        }
    }

    /// Apply directly once the final drain is over, so older queued operations on the same
    /// key cannot land after this one
    async fn apply_after_close(&self, op: PendingOp<K>) {
        let _drained = self.workers.lock().await;
        warn!(
            operation = op.operation(),
            "Write-behind is shut down, applying to L2 directly"
        );
        Self::apply_batch(vec![op], &self.metrics).await;
    }

    /// Pull up to `limit` operations off the queue
    fn drain(
        rx: &mut mpsc::UnboundedReceiver<PendingOp<K>>,
        state: &QueueState,
        limit: usize,
    ) -> Vec<PendingOp<K>> {
        let mut batch = Vec::with_capacity(limit.min(1024));
        while batch.len() < limit {
            match rx.try_recv() {
                Ok(op) => batch.push(op),
                Err(_) => break,
            }
        }
        state.depth.fetch_sub(batch.len(), Ordering::AcqRel);
        batch
    }

    async fn flusher_loop(
        mut rx: mpsc::UnboundedReceiver<PendingOp<K>>,
        batch_tx: mpsc::UnboundedSender<Vec<PendingOp<K>>>,
        state: Arc<QueueState>,
        interval: Duration,
        mut shutdown_rx: oneshot::Receiver<()>,
        metrics: Arc<CacheMetrics>,
    ) -> mpsc::UnboundedReceiver<PendingOp<K>> {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => break,

                _ = ticker.tick() => {
                    let batch = Self::drain(&mut rx, &state, state.batch_size);
                    if !batch.is_empty() {
                        debug!(operations = batch.len(), "Timed write-behind flush");
                        if batch_tx.send(batch).is_err() {
                            break;
                        }
                    }
                }

                _ = state.wake.notified() => {
                    while state.depth.load(Ordering::Acquire) >= state.batch_size {
                        let batch = Self::drain(&mut rx, &state, state.batch_size);
                        if batch.is_empty() {
                            break;
                        }
                        debug!(operations = batch.len(), "Size-triggered write-behind flush");
                        if batch_tx.send(batch).is_err() {
                            break;
                        }
                    }
                }
            }
            metrics.set_queue_depth(state.depth.load(Ordering::Acquire));
        }

        rx
    }

    async fn executor_loop(
        mut batches: mpsc::UnboundedReceiver<Vec<PendingOp<K>>>,
        metrics: Arc<CacheMetrics>,
    ) {
        while let Some(batch) = batches.recv().await {
            Self::apply_batch(batch, &metrics).await;
        }
    }

    /// Apply operations in order; one failure does not stop the rest
    async fn apply_batch(batch: Vec<PendingOp<K>>, metrics: &CacheMetrics) {
        let total = batch.len();
        let mut failed = 0usize;

        for op in batch {
            let operation = op.operation();
            match op.apply().await {
                Ok(()) => metrics.record_write_behind(operation, true),
                Err(e) => {
                    failed += 1;
                    metrics.record_write_behind(operation, false);
                    error!(
                        strategy = NAME,
                        tier = %Tier::L2,
                        operation,
                        key = ?op.key(),
                        error = %e,
                        "Write-behind operation failed"
                    );
                }
            }
        }

        if total > 0 {
            debug!(total, failed, "Applied write-behind batch");
        }
    }
}

#[async_trait]
impl<K: CacheKey> CacheStrategy<K> for WriteBehind<K> {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn put(
        &self,
        key: &K,
        value: &CacheValue,
        l1: Option<&CacheHandle<K>>,
        l2: Option<&CacheHandle<K>>,
    ) -> Result<()> {
        if let Some(l1) = l1 {
            log_failure(NAME, Tier::L1, "put", key, l1.put(key, value).await);
        }
        if let Some(l2) = l2 {
            self.enqueue(PendingOp::Put {
                key: key.clone(),
                value: value.clone(),
                l2: Arc::clone(l2),
            })
            .await;
        }
        Ok(())
    }

    async fn get(
        &self,
        key: &K,
        l1: Option<&CacheHandle<K>>,
        l2: Option<&CacheHandle<K>>,
    ) -> Result<Option<CacheValue>> {
        Ok(read_through(NAME, key, l1, l2).await)
    }

    async fn evict(
        &self,
        key: &K,
        l1: Option<&CacheHandle<K>>,
        l2: Option<&CacheHandle<K>>,
    ) -> Result<()> {
        if let Some(l1) = l1 {
            log_failure(NAME, Tier::L1, "evict", key, l1.evict(key).await);
        }
        if let Some(l2) = l2 {
            self.enqueue(PendingOp::Evict {
                key: key.clone(),
                l2: Arc::clone(l2),
            })
            .await;
        }
        Ok(())
    }

    /// Stop the pipeline and apply every operation still queued.
    ///
    /// Concurrent callers return only after the drain has finished.
    async fn shutdown(&self) {
        let mut slot = self.workers.lock().await;
        self.closed.store(true, Ordering::Release);
        let Some(workers) = slot.take() else {
            return;
        };

        let _ = workers.shutdown_tx.send(());
        let rx = match workers.flusher.await {
            Ok(rx) => Some(rx),
            Err(e) => {
                error!(error = %e, "Write-behind flusher task failed, queued operations lost");
                None
            }
        };
        // Flusher dropped its batch sender, so the executor finishes what it already has
        if let Err(e) = workers.executor.await {
            error!(error = %e, "Write-behind executor task failed");
        }

        if let Some(mut rx) = rx {
            rx.close();
            let remaining = Self::drain(&mut rx, &self.state, usize::MAX);
            info!(operations = remaining.len(), "Final write-behind drain");
            Self::apply_batch(remaining, &self.metrics).await;
        }

        self.metrics.set_queue_depth(self.pending());
        info!("Write-behind pipeline stopped");
    }
}

impl<K: CacheKey> Drop for WriteBehind<K> {
    fn drop(&mut self) {
        let pending = self.pending();
        if !self.closed.load(Ordering::Acquire) && pending > 0 {
            warn!(
                pending,
                "Write-behind dropped without shutdown, queued L2 operations are lost"
            );
        }
    }
}
