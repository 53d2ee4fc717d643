use std::{
    sync::{
        Arc,
        atomic::{AtomicI64, AtomicU64, Ordering},
    },
    time::Duration,
};

#[derive(Debug, Default)]
struct InnerMetrics {
    collection_scans: AtomicU64,
    change_stream_syncs: AtomicU64,
    syncs_completed: AtomicU64,
    exceptions: AtomicU64,
    batches_indexed: AtomicU64,
    documents_indexed: AtomicU64,
    sync_duration_micros: AtomicU64,
    queue_depth: AtomicI64,
}

/// Counters shared by the dispatcher and the tasks it runs.
#[derive(Debug, Clone)]
pub struct SyncMetrics {
    inner: Arc<InnerMetrics>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncMetricsSnapshot {
    pub collection_scans: u64,
    pub change_stream_syncs: u64,
    pub syncs_completed: u64,
    pub exceptions: u64,
    pub batches_indexed: u64,
    pub documents_indexed: u64,
    pub sync_duration: Duration,
    pub queue_depth: u64,
}

impl SyncMetrics {
    pub fn new() -> Self {
        SyncMetrics {
            inner: Arc::new(InnerMetrics::default()),
        }
    }

    pub fn increment_collection_scans(&self) {
        self.inner.collection_scans.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_change_stream_syncs(&self) {
        self.inner
            .change_stream_syncs
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_exceptions(&self) {
        self.inner.exceptions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_indexed_batch(&self, documents: u64) {
        self.inner.batches_indexed.fetch_add(1, Ordering::Relaxed);
        self.inner
            .documents_indexed
            .fetch_add(documents, Ordering::Relaxed);
    }

    pub fn record_sync(&self, elapsed: Duration) {
        self.inner.syncs_completed.fetch_add(1, Ordering::Relaxed);
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.inner
            .sync_duration_micros
            .fetch_add(micros, Ordering::Relaxed);
    }

    pub fn queue_push(&self) {
        self.inner.queue_depth.fetch_add(1, Ordering::Relaxed);
    }

    pub fn queue_pop(&self) {
        self.inner.queue_depth.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SyncMetricsSnapshot {
        SyncMetricsSnapshot {
            collection_scans: self.inner.collection_scans.load(Ordering::Relaxed),
            change_stream_syncs: self.inner.change_stream_syncs.load(Ordering::Relaxed),
            syncs_completed: self.inner.syncs_completed.load(Ordering::Relaxed),
            exceptions: self.inner.exceptions.load(Ordering::Relaxed),
            batches_indexed: self.inner.batches_indexed.load(Ordering::Relaxed),
            documents_indexed: self.inner.documents_indexed.load(Ordering::Relaxed),
            sync_duration: Duration::from_micros(
                self.inner.sync_duration_micros.load(Ordering::Relaxed),
            ),
            queue_depth: self.inner.queue_depth.load(Ordering::Relaxed).max(0) as u64,
        }
    }
}

impl Default for SyncMetrics {
    fn default() -> Self {
        Self::new()
    }
}
