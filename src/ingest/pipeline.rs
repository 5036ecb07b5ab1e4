//! Staging channel, batching controller, and bounded-parallelism flusher.
//!
//! Ingress handlers stage wire spans onto a bounded channel; a single
//! batcher task assembles them into batches by size or time and hands each
//! batch to a flusher that materializes the two row projections and bulk
//! inserts them. A semaphore gate caps concurrent flushes at the core
//! count, so a slow store backpressures all the way to the RPC handlers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use opentelemetry_proto::tonic::trace::v1 as otlp;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::{JoinHandle, JoinSet};

use crate::attrs::AttrMap;
use crate::span::{self, builder, SpanData, SpanIndex};
use crate::storage::{BulkInserter, Row};

/// One wire span staged for flushing, with its scope-merged resource.
#[derive(Debug, Clone)]
pub struct IngestItem {
    pub project_id: u32,
    pub span: otlp::Span,
    pub resource: Arc<AttrMap>,
}

/// Tuning knobs for the staging channel and the flusher.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Items per flush; also the staging channel capacity.
    pub batch_size: usize,
    /// Longest a non-empty buffer waits before being flushed.
    pub flush_interval: Duration,
    /// Flushes admitted concurrently by the gate.
    pub max_concurrent_flushes: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: scale_with_cpu(2000, 32_000),
            flush_interval: Duration::from_secs(1),
            max_concurrent_flushes: num_cpus::get().max(1),
        }
    }
}

/// Scales a per-core quantity into `[min, max]`.
fn scale_with_cpu(min: usize, max: usize) -> usize {
    (min * num_cpus::get()).clamp(min, max)
}

/// Pipeline counters. Store failures are swallowed by design, so these are
/// the only record of dropped spans.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    pub spans_enqueued: AtomicU64,
    pub batches_flushed: AtomicU64,
    pub flush_ok: AtomicU64,
    pub flush_errors: AtomicU64,
    pub spans_dropped: AtomicU64,
}

impl PipelineMetrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            spans_enqueued: self.spans_enqueued.load(Ordering::Relaxed),
            batches_flushed: self.batches_flushed.load(Ordering::Relaxed),
            flush_ok: self.flush_ok.load(Ordering::Relaxed),
            flush_errors: self.flush_errors.load(Ordering::Relaxed),
            spans_dropped: self.spans_dropped.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub spans_enqueued: u64,
    pub batches_flushed: u64,
    pub flush_ok: u64,
    pub flush_errors: u64,
    pub spans_dropped: u64,
}

/// Returned when staging a span after the pipeline began shutting down.
#[derive(Debug, Error)]
#[error("span pipeline is shut down")]
pub struct PipelineClosed;

/// Cloneable producer half handed to ingress handlers.
#[derive(Debug, Clone)]
pub struct SpanSender {
    tx: mpsc::Sender<IngestItem>,
    metrics: Arc<PipelineMetrics>,
}

impl SpanSender {
    /// Stages one span; waits while the channel is full. This is the
    /// backpressure point for every ingress surface.
    pub async fn send(&self, item: IngestItem) -> Result<(), PipelineClosed> {
        self.tx.send(item).await.map_err(|_| PipelineClosed)?;
        self.metrics.spans_enqueued.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Owner of the batcher task. Call [`SpanPipeline::shutdown`] to drain
/// staged spans and wait for in-flight flushes before exiting.
pub struct SpanPipeline {
    tx: mpsc::Sender<IngestItem>,
    metrics: Arc<PipelineMetrics>,
    shutdown_tx: oneshot::Sender<()>,
    batcher: JoinHandle<()>,
}

impl SpanPipeline {
    pub fn new(config: PipelineConfig, store: Arc<dyn BulkInserter>) -> Self {
        let (tx, rx) = mpsc::channel(config.batch_size);
        let metrics = Arc::new(PipelineMetrics::default());
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let batcher = tokio::spawn(batch_loop(
            config,
            rx,
            shutdown_rx,
            store,
            Arc::clone(&metrics),
        ));

        Self {
            tx,
            metrics,
            shutdown_tx,
            batcher,
        }
    }

    pub fn sender(&self) -> SpanSender {
        SpanSender {
            tx: self.tx.clone(),
            metrics: Arc::clone(&self.metrics),
        }
    }

    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Stops accepting new spans, flushes everything already staged, and
    /// waits for in-flight flushes to complete.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        if let Err(err) = self.batcher.await {
            tracing::error!(error = %err, "batcher task failed");
        }
    }
}

async fn batch_loop(
    config: PipelineConfig,
    mut rx: mpsc::Receiver<IngestItem>,
    mut shutdown_rx: oneshot::Receiver<()>,
    store: Arc<dyn BulkInserter>,
    metrics: Arc<PipelineMetrics>,
) {
    let gate = Arc::new(Semaphore::new(config.max_concurrent_flushes));
    let mut flushes: JoinSet<()> = JoinSet::new();
    let mut buf: Vec<IngestItem> = Vec::with_capacity(config.batch_size);

    let mut ticker = tokio::time::interval(config.flush_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            // Reap finished flushes so the join set stays small.
            Some(_) = flushes.join_next(), if !flushes.is_empty() => {}

            item = rx.recv() => match item {
                Some(item) => {
                    buf.push(item);
                    if buf.len() == config.batch_size {
                        let batch = take_batch(&mut buf, config.batch_size);
                        dispatch(&gate, &mut flushes, &store, &metrics, batch).await;
                    }
                }
                // Every sender is gone; nothing more can arrive.
                None => break,
            },

            _ = ticker.tick() => {
                if !buf.is_empty() {
                    let batch = take_batch(&mut buf, config.batch_size);
                    dispatch(&gate, &mut flushes, &store, &metrics, batch).await;
                }
            }

            _ = &mut shutdown_rx => break,
        }
    }

    // Drain: everything staged before the shutdown signal is still flushed,
    // synchronously, before the in-flight flushes are joined.
    rx.close();
    while let Ok(item) = rx.try_recv() {
        buf.push(item);
        if buf.len() == config.batch_size {
            let batch = take_batch(&mut buf, config.batch_size);
            flush_batch(store.as_ref(), &metrics, batch);
        }
    }
    if !buf.is_empty() {
        flush_batch(store.as_ref(), &metrics, buf);
    }
    while flushes.join_next().await.is_some() {}
}

fn take_batch(buf: &mut Vec<IngestItem>, capacity: usize) -> Vec<IngestItem> {
    std::mem::replace(buf, Vec::with_capacity(capacity))
}

/// Acquires a gate permit in the batcher, then runs the flush as its own
/// task. While the gate is full, staging stalls; that is the backpressure.
async fn dispatch(
    gate: &Arc<Semaphore>,
    flushes: &mut JoinSet<()>,
    store: &Arc<dyn BulkInserter>,
    metrics: &Arc<PipelineMetrics>,
    batch: Vec<IngestItem>,
) {
    if let Ok(permit) = Arc::clone(gate).acquire_owned().await {
        let store = Arc::clone(store);
        let metrics = Arc::clone(metrics);
        flushes.spawn(async move {
            flush_batch(store.as_ref(), &metrics, batch);
            drop(permit);
        });
    }
}

/// Materializes index and payload rows for one batch and performs the two
/// bulk inserts. Each insert error is logged and swallowed; the rows of a
/// failed insert are lost.
fn flush_batch(store: &dyn BulkInserter, metrics: &PipelineMetrics, items: Vec<IngestItem>) {
    let batch_size = items.len();
    let mut index_rows: Vec<Row> = Vec::with_capacity(batch_size);
    let mut data_rows: Vec<Row> = Vec::with_capacity(batch_size);

    for item in &items {
        let built = builder::build_span(item.project_id, &item.span, &item.resource);
        let data = SpanData::from_span(&built);
        let index = SpanIndex::from_span(built);
        data_rows.push(data.to_row());
        index_rows.push(index.to_row());
    }

    metrics.batches_flushed.fetch_add(1, Ordering::Relaxed);

    let mut failed = false;
    for (table, rows) in [
        (span::SPANS_DATA_TABLE, data_rows),
        (span::SPANS_INDEX_TABLE, index_rows),
    ] {
        if let Err(err) = store.insert(table, rows) {
            tracing::error!(error = %err, table, batch_size, "bulk insert failed");
            metrics.flush_errors.fetch_add(1, Ordering::Relaxed);
            metrics.spans_dropped.fetch_add(batch_size as u64, Ordering::Relaxed);
            failed = true;
        }
    }
    if !failed {
        metrics.flush_ok.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemTableStore, StorageError};
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Condvar;
    use std::sync::Mutex as StdMutex;

    fn test_item(project_id: u32) -> IngestItem {
        IngestItem {
            project_id,
            span: otlp::Span {
                trace_id: vec![1; 16],
                span_id: vec![2; 8],
                name: "op".to_string(),
                kind: 3,
                start_time_unix_nano: 1_000,
                end_time_unix_nano: 2_000,
                ..Default::default()
            },
            resource: Arc::new(AttrMap::new()),
        }
    }

    fn config(batch_size: usize, flush_interval: Duration) -> PipelineConfig {
        PipelineConfig {
            batch_size,
            flush_interval,
            max_concurrent_flushes: 2,
        }
    }

    /// Records one `(table, row_count)` entry per insert call.
    #[derive(Default)]
    struct RecordingStore {
        inserts: Mutex<Vec<(String, usize)>>,
    }

    impl RecordingStore {
        fn inserts(&self) -> Vec<(String, usize)> {
            self.inserts.lock().clone()
        }
    }

    impl BulkInserter for RecordingStore {
        fn insert(&self, table: &str, rows: Vec<Row>) -> Result<(), StorageError> {
            self.inserts.lock().push((table.to_string(), rows.len()));
            Ok(())
        }
    }

    async fn wait_for<F: Fn() -> bool>(condition: F) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached within 2s");
    }

    #[tokio::test]
    async fn test_flush_by_size() {
        let store = Arc::new(RecordingStore::default());
        let pipeline = SpanPipeline::new(
            config(4, Duration::from_secs(3600)),
            Arc::clone(&store) as Arc<dyn BulkInserter>,
        );
        let sender = pipeline.sender();

        for _ in 0..4 {
            sender.send(test_item(1)).await.unwrap();
        }

        wait_for(|| store.inserts().len() == 2).await;
        assert_eq!(
            store.inserts(),
            vec![("spans_data".to_string(), 4), ("spans_index".to_string(), 4)]
        );

        pipeline.shutdown().await;
        // Nothing was left to flush at shutdown.
        assert_eq!(store.inserts().len(), 2);
    }

    #[tokio::test]
    async fn test_flush_by_time() {
        let store = Arc::new(RecordingStore::default());
        let pipeline = SpanPipeline::new(
            config(1000, Duration::from_millis(50)),
            Arc::clone(&store) as Arc<dyn BulkInserter>,
        );
        let sender = pipeline.sender();

        for _ in 0..3 {
            sender.send(test_item(1)).await.unwrap();
        }

        wait_for(|| store.inserts().len() >= 2).await;
        assert_eq!(
            store.inserts()[..2],
            [("spans_data".to_string(), 3), ("spans_index".to_string(), 3)]
        );

        pipeline.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_drains_staged_spans() {
        let store = Arc::new(MemTableStore::new());
        let pipeline = SpanPipeline::new(
            config(1000, Duration::from_secs(3600)),
            Arc::clone(&store) as Arc<dyn BulkInserter>,
        );
        let sender = pipeline.sender();

        for _ in 0..5 {
            sender.send(test_item(1)).await.unwrap();
        }
        pipeline.shutdown().await;

        assert_eq!(store.row_count("spans_index"), 5);
        assert_eq!(store.row_count("spans_data"), 5);
        assert!(sender.send(test_item(1)).await.is_err());
    }

    #[tokio::test]
    async fn test_metrics_track_flushes() {
        let store = Arc::new(MemTableStore::new());
        let pipeline = SpanPipeline::new(
            config(2, Duration::from_secs(3600)),
            Arc::clone(&store) as Arc<dyn BulkInserter>,
        );
        let sender = pipeline.sender();
        let metrics = pipeline.metrics();

        for _ in 0..4 {
            sender.send(test_item(1)).await.unwrap();
        }
        pipeline.shutdown().await;

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.spans_enqueued, 4);
        assert_eq!(snapshot.batches_flushed, 2);
        assert_eq!(snapshot.flush_ok, 2);
        assert_eq!(snapshot.flush_errors, 0);
        assert_eq!(snapshot.spans_dropped, 0);
    }

    /// Fails inserts into one table; the other table still gets its rows.
    struct FailingStore {
        fail_table: &'static str,
        inner: MemTableStore,
    }

    impl BulkInserter for FailingStore {
        fn insert(&self, table: &str, rows: Vec<Row>) -> Result<(), StorageError> {
            if table == self.fail_table {
                return Err(StorageError::Insert("connection reset".to_string()));
            }
            self.inner.insert(table, rows)
        }
    }

    #[tokio::test]
    async fn test_insert_errors_are_swallowed() {
        let store = Arc::new(FailingStore {
            fail_table: span::SPANS_INDEX_TABLE,
            inner: MemTableStore::new(),
        });
        let pipeline = SpanPipeline::new(
            config(2, Duration::from_secs(3600)),
            Arc::clone(&store) as Arc<dyn BulkInserter>,
        );
        let sender = pipeline.sender();
        let metrics = pipeline.metrics();

        for _ in 0..2 {
            sender.send(test_item(1)).await.unwrap();
        }
        // The pipeline keeps accepting spans after a failed flush.
        wait_for(|| metrics.snapshot().flush_errors == 1).await;
        sender.send(test_item(1)).await.unwrap();

        pipeline.shutdown().await;

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.flush_errors, 2);
        assert_eq!(snapshot.spans_dropped, 3);
        assert_eq!(snapshot.flush_ok, 0);
        assert_eq!(store.inner.row_count("spans_data"), 3);
        assert_eq!(store.inner.row_count("spans_index"), 0);
    }

    /// Blocks every insert until released; counts calls.
    struct BlockingStore {
        calls: AtomicUsize,
        blocked: StdMutex<bool>,
        released: Condvar,
    }

    impl BlockingStore {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                blocked: StdMutex::new(true),
                released: Condvar::new(),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn release(&self) {
            *self.blocked.lock().unwrap() = false;
            self.released.notify_all();
        }
    }

    impl BulkInserter for BlockingStore {
        fn insert(&self, _table: &str, _rows: Vec<Row>) -> Result<(), StorageError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut blocked = self.blocked.lock().unwrap();
            while *blocked {
                blocked = self.released.wait(blocked).unwrap();
            }
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_gate_limits_concurrent_flushes() {
        let store = Arc::new(BlockingStore::new());
        let pipeline = SpanPipeline::new(
            PipelineConfig {
                batch_size: 2,
                flush_interval: Duration::from_secs(3600),
                max_concurrent_flushes: 1,
            },
            Arc::clone(&store) as Arc<dyn BulkInserter>,
        );
        let sender = pipeline.sender();

        // Two full batches; the second flush must wait for the first permit.
        for _ in 0..4 {
            sender.send(test_item(1)).await.unwrap();
        }

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(store.calls(), 1, "second flush ran before a permit freed");

        store.release();
        pipeline.shutdown().await;
        assert_eq!(store.calls(), 4);
    }
}
