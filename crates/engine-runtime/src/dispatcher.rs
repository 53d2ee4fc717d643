use crate::error::{DispatchError, TaskFailure};
use engine_config::settings::SyncSettings;
use engine_core::{
    backend::SyncClient, error::SyncError, metrics::SyncMetrics, registry::SynonymRegistry,
};
use engine_processing::{
    change_stream::ResettableChangeStream,
    indexer::SynonymDocumentIndexer,
    task::{ChangeTask, ScanStartCallback, ScanTask, SyncTask},
};
use futures::future::{BoxFuture, FutureExt};
use model::core::{
    identifiers::{MappingId, Namespace},
    mark::HighWaterMark,
};
use parking_lot::Mutex;
use std::{
    collections::{HashMap, HashSet},
    future::Future,
    ops::ControlFlow,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::{Duration, Instant},
};
use tokio::{
    sync::{OwnedSemaphorePermit, Semaphore, mpsc, oneshot},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub type TaskOutcome = Result<HighWaterMark, TaskFailure>;

/// Resolves once the dispatcher has finished with a sync.
///
/// A sync that was cancelled before it started, or dropped at shutdown,
/// resolves with a shutdown failure.
#[derive(Debug)]
pub struct TaskHandle {
    rx: oneshot::Receiver<TaskOutcome>,
}

impl Future for TaskHandle {
    type Output = TaskOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|res| res.unwrap_or_else(|_| Err(SyncError::shutdown().into())))
    }
}

struct QueuedTask {
    task: SyncTask,
    completion: Option<oneshot::Sender<TaskOutcome>>,
}

struct RunningTask {
    cancel: CancellationToken,
    done: CancellationToken,
}

#[derive(Default)]
struct Bookkeeping {
    queued: HashMap<MappingId, QueuedTask>,
    cancelled: HashSet<MappingId>,
    in_progress: HashMap<MappingId, RunningTask>,
    shut_down: bool,
}

/// Point-in-time copy of the dispatcher's bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookkeepingSnapshot {
    pub queued: HashSet<MappingId>,
    pub cancelled: HashSet<MappingId>,
    pub in_progress: HashSet<MappingId>,
    pub shut_down: bool,
}

struct Inner {
    client: Arc<dyn SyncClient>,
    book: Mutex<Bookkeeping>,
    requests: mpsc::UnboundedSender<MappingId>,
    shutdown: CancellationToken,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    metrics: SyncMetrics,
    join_timeout: Duration,
}

/// Runs synonym syncs for many mappings with bounded concurrency.
///
/// Mapping ids wait in a FIFO queue. A single dispatcher task takes a permit,
/// pops the next id and spawns the sync. A mapping has at most one sync
/// queued or running at any time.
#[derive(Clone)]
pub struct SynonymManager {
    inner: Arc<Inner>,
}

impl SynonymManager {
    /// Creates the manager and starts its dispatcher task.
    pub fn start(
        client: Arc<dyn SyncClient>,
        settings: &SyncSettings,
        metrics: SyncMetrics,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let permits = Arc::new(Semaphore::new(settings.max_concurrent_syncs()));

        let inner = Arc::new(Inner {
            client,
            book: Mutex::new(Bookkeeping::default()),
            requests: tx,
            shutdown: CancellationToken::new(),
            dispatcher: Mutex::new(None),
            metrics,
            join_timeout: settings.dispatcher_join_timeout,
        });

        let handle = tokio::spawn(dispatch(inner.clone(), rx, permits));
        *inner.dispatcher.lock() = Some(handle);

        info!(
            max_concurrent_syncs = settings.max_concurrent_syncs(),
            "Synonym sync dispatcher started"
        );
        Self { inner }
    }

    pub fn client(&self) -> Arc<dyn SyncClient> {
        self.inner.client.clone()
    }

    pub fn metrics(&self) -> &SyncMetrics {
        &self.inner.metrics
    }

    /// Queues a full collection scan. `on_start` runs when the dispatcher
    /// picks the scan up, before any document is read.
    pub fn enqueue_scan(
        &self,
        mapping_id: MappingId,
        namespace: Namespace,
        indexer: Arc<SynonymDocumentIndexer>,
        batch_size: Option<u32>,
        on_start: ScanStartCallback,
    ) -> Result<TaskHandle, DispatchError> {
        let handle = self.enqueue(SyncTask::Scan(ScanTask {
            mapping_id,
            namespace,
            indexer,
            batch_size,
            on_start: Some(on_start),
        }))?;
        self.inner.metrics.increment_collection_scans();
        Ok(handle)
    }

    /// Queues one poll of the mapping's change stream.
    pub fn enqueue_change(
        &self,
        mapping_id: MappingId,
        stream: Arc<ResettableChangeStream>,
        registry: Arc<dyn SynonymRegistry>,
    ) -> Result<TaskHandle, DispatchError> {
        let handle = self.enqueue(SyncTask::Change(ChangeTask {
            mapping_id,
            stream,
            registry,
        }))?;
        self.inner.metrics.increment_change_stream_syncs();
        Ok(handle)
    }

    fn enqueue(&self, task: SyncTask) -> Result<TaskHandle, DispatchError> {
        let mut book = self.inner.book.lock();
        if book.shut_down {
            return Err(DispatchError::ShutDown);
        }

        let mapping_id = task.mapping_id().clone();
        if book.cancelled.contains(&mapping_id) {
            return Err(DispatchError::Cancelled(mapping_id));
        }
        if book.queued.contains_key(&mapping_id) || book.in_progress.contains_key(&mapping_id) {
            return Err(DispatchError::AlreadyScheduled(mapping_id));
        }

        let (tx, rx) = oneshot::channel();
        debug!(mapping = %mapping_id, kind = %task.kind(), "Queued synonym sync");
        book.queued.insert(
            mapping_id.clone(),
            QueuedTask {
                task,
                completion: Some(tx),
            },
        );

        if self.inner.requests.send(mapping_id.clone()).is_err() {
            // The dispatcher task is gone, so nothing would ever pop the id.
            book.queued.remove(&mapping_id);
            return Err(DispatchError::ShutDown);
        }
        self.inner.metrics.queue_push();

        Ok(TaskHandle { rx })
    }

    /// Cancels the mapping's queued or running sync.
    ///
    /// A queued sync resolves with a shutdown failure right away and is
    /// dropped when popped. A running sync is signalled and the returned
    /// future waits for it to finish. The future never fails.
    pub fn cancel(&self, mapping_id: &MappingId) -> BoxFuture<'static, ()> {
        let mut book = self.inner.book.lock();

        if let Some(queued) = book.queued.get_mut(mapping_id) {
            if let Some(completion) = queued.completion.take() {
                let _ = completion.send(Err(SyncError::shutdown().into()));
            }
            book.cancelled.insert(mapping_id.clone());
            debug!(mapping = %mapping_id, "Cancelled queued synonym sync");
            return futures::future::ready(()).boxed();
        }

        if let Some(running) = book.in_progress.get(mapping_id) {
            running.cancel.cancel();
            let done = running.done.clone();
            debug!(mapping = %mapping_id, "Cancelling running synonym sync");
            return async move { done.cancelled().await }.boxed();
        }

        futures::future::ready(()).boxed()
    }

    /// Stops accepting work, drops every queued sync and cancels running
    /// ones. The returned future resolves when the dispatcher task exited and
    /// every running sync finished.
    pub fn shutdown(&self) -> BoxFuture<'static, ()> {
        let running = {
            let mut book = self.inner.book.lock();
            info!(
                queued = book.queued.len(),
                in_progress = book.in_progress.len(),
                "Shutting down synonym sync dispatcher"
            );

            book.shut_down = true;
            self.inner.shutdown.cancel();

            for queued in book.queued.values_mut() {
                if let Some(completion) = queued.completion.take() {
                    let _ = completion.send(Err(SyncError::shutdown().into()));
                }
            }

            book.in_progress
                .values()
                .map(|running| {
                    running.cancel.cancel();
                    running.done.clone()
                })
                .collect::<Vec<_>>()
        };

        let dispatcher = self.inner.dispatcher.lock().take();
        let join_timeout = self.inner.join_timeout;

        async move {
            if let Some(handle) = dispatcher {
                match tokio::time::timeout(join_timeout, handle).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => error!(error = %e, "Synonym sync dispatcher task failed"),
                    Err(_) => error!(
                        timeout_ms = join_timeout.as_millis() as u64,
                        "Synonym sync dispatcher did not stop in time"
                    ),
                }
            }

            futures::future::join_all(running.into_iter().map(|done| async move {
                done.cancelled().await;
            }))
            .await;
        }
        .boxed()
    }

    pub fn bookkeeping(&self) -> BookkeepingSnapshot {
        let book = self.inner.book.lock();
        BookkeepingSnapshot {
            queued: book.queued.keys().cloned().collect(),
            cancelled: book.cancelled.iter().cloned().collect(),
            in_progress: book.in_progress.keys().cloned().collect(),
            shut_down: book.shut_down,
        }
    }
}

impl std::fmt::Debug for SynonymManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SynonymManager")
            .field("bookkeeping", &self.bookkeeping())
            .finish()
    }
}

async fn dispatch(
    inner: Arc<Inner>,
    mut requests: mpsc::UnboundedReceiver<MappingId>,
    permits: Arc<Semaphore>,
) {
    loop {
        let next = tokio::select! {
            biased;
            _ = inner.shutdown.cancelled() => break,
            next = next_request(&permits, &mut requests) => next,
        };

        let Some((permit, mapping_id)) = next else {
            break;
        };
        inner.metrics.queue_pop();

        if start_sync(&inner, mapping_id, permit).is_break() {
            break;
        }
    }

    info!("Synonym sync dispatcher stopped");
}

async fn next_request(
    permits: &Arc<Semaphore>,
    requests: &mut mpsc::UnboundedReceiver<MappingId>,
) -> Option<(OwnedSemaphorePermit, MappingId)> {
    let permit = permits.clone().acquire_owned().await.ok()?;
    let mapping_id = requests.recv().await?;
    Some((permit, mapping_id))
}

fn start_sync(
    inner: &Arc<Inner>,
    mapping_id: MappingId,
    permit: OwnedSemaphorePermit,
) -> ControlFlow<()> {
    let mut book = inner.book.lock();
    if book.shut_down {
        return ControlFlow::Break(());
    }

    let Some(queued) = book.queued.remove(&mapping_id) else {
        warn!(mapping = %mapping_id, "Popped synonym mapping that was not queued");
        return ControlFlow::Continue(());
    };

    if book.cancelled.remove(&mapping_id) {
        debug!(mapping = %mapping_id, "Dropping cancelled synonym sync");
        return ControlFlow::Continue(());
    }

    let Some(completion) = queued.completion else {
        warn!(mapping = %mapping_id, "Queued synonym sync has no completion");
        return ControlFlow::Continue(());
    };

    let running = RunningTask {
        cancel: CancellationToken::new(),
        done: CancellationToken::new(),
    };
    let cancel = running.cancel.clone();
    let done = running.done.clone();
    book.in_progress.insert(mapping_id.clone(), running);

    debug!(mapping = %mapping_id, kind = %queued.task.kind(), "Starting synonym sync");
    tokio::spawn(execute(
        inner.clone(),
        mapping_id,
        queued.task,
        completion,
        cancel,
        done,
        permit,
    ));

    ControlFlow::Continue(())
}

async fn execute(
    inner: Arc<Inner>,
    mapping_id: MappingId,
    task: SyncTask,
    completion: oneshot::Sender<TaskOutcome>,
    cancel: CancellationToken,
    done: CancellationToken,
    permit: OwnedSemaphorePermit,
) {
    let started = Instant::now();
    let kind = task.kind();

    // Run on its own task so a panic surfaces as a join error.
    let outcome = match tokio::spawn(task.run(inner.client.clone(), cancel)).await {
        Ok(Ok(mark)) => Ok(mark),
        Ok(Err(e)) => {
            inner.metrics.increment_exceptions();
            debug!(
                mapping = %mapping_id,
                task = %kind,
                error_kind = %e.kind(),
                error = %e,
                "Synonym sync failed"
            );
            Err(TaskFailure::Sync(e))
        }
        Err(e) => {
            inner.metrics.increment_exceptions();
            let message = panic_message(e);
            error!(mapping = %mapping_id, task = %kind, panic = %message, "Synonym sync panicked");
            Err(TaskFailure::Panicked(message))
        }
    };

    {
        let mut book = inner.book.lock();
        book.in_progress.remove(&mapping_id);
        let _ = completion.send(outcome);
    }

    drop(permit);
    inner.metrics.record_sync(started.elapsed());
    done.cancel();
}

fn panic_message(err: tokio::task::JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }

    let payload = err.into_panic();
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
