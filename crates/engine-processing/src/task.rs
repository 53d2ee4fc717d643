use crate::{
    change_stream::ResettableChangeStream, indexer::SynonymDocumentIndexer,
    scanner::SynonymCollectionScanner,
};
use engine_core::{backend::SyncClient, error::SyncError, registry::SynonymRegistry};
use futures::future::BoxFuture;
use model::core::{
    identifiers::{MappingId, Namespace},
    mark::HighWaterMark,
};
use std::{fmt, sync::Arc};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Runs right before a scan starts reading, once the dispatcher has picked
/// the task up.
pub type ScanStartCallback = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    CollectionScan,
    ChangeStream,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::CollectionScan => write!(f, "collection scan"),
            TaskKind::ChangeStream => write!(f, "change stream"),
        }
    }
}

/// A full rebuild of one mapping from its source collection.
pub struct ScanTask {
    pub mapping_id: MappingId,
    pub namespace: Namespace,
    pub indexer: Arc<SynonymDocumentIndexer>,
    pub batch_size: Option<u32>,
    pub on_start: Option<ScanStartCallback>,
}

/// One poll of a mapping's change stream.
pub struct ChangeTask {
    pub mapping_id: MappingId,
    pub stream: Arc<ResettableChangeStream>,
    pub registry: Arc<dyn SynonymRegistry>,
}

/// Unit of work the dispatcher runs for a mapping.
pub enum SyncTask {
    Scan(ScanTask),
    Change(ChangeTask),
}

impl SyncTask {
    pub fn mapping_id(&self) -> &MappingId {
        match self {
            SyncTask::Scan(task) => &task.mapping_id,
            SyncTask::Change(task) => &task.mapping_id,
        }
    }

    pub fn kind(&self) -> TaskKind {
        match self {
            SyncTask::Scan(_) => TaskKind::CollectionScan,
            SyncTask::Change(_) => TaskKind::ChangeStream,
        }
    }

    /// Runs the task to completion and returns the mark the next sync of the
    /// mapping should start from.
    ///
    /// A scan yields its snapshot's operation time. A change poll yields the
    /// post-batch resume token when nothing changed, and an empty mark when
    /// the mapping has to be rebuilt.
    pub async fn run(
        self,
        client: Arc<dyn SyncClient>,
        cancel: CancellationToken,
    ) -> Result<HighWaterMark, SyncError> {
        match self {
            SyncTask::Scan(task) => task.run(client, cancel).await,
            SyncTask::Change(task) => task.run(cancel).await,
        }
    }
}

impl ScanTask {
    async fn run(
        mut self,
        client: Arc<dyn SyncClient>,
        cancel: CancellationToken,
    ) -> Result<HighWaterMark, SyncError> {
        if let Some(on_start) = self.on_start.take() {
            on_start().await;
        }

        let scanner = SynonymCollectionScanner::new(
            client,
            self.indexer.clone(),
            self.namespace.clone(),
            self.batch_size,
            cancel.clone(),
        );
        let operation_time = scanner.scan().await?;

        // A scan cancelled after its last batch must not install the mapping.
        if cancel.is_cancelled() {
            let err = SyncError::shutdown().with_operation_time(Some(operation_time));
            self.indexer.complete_exceptionally(&err);
            return Err(err);
        }

        if let Err(e) = self.indexer.complete() {
            self.indexer
                .complete_exceptionally(&e.clone().with_operation_time(Some(operation_time)));
            return Err(e.with_operation_time(Some(operation_time)));
        }

        Ok(HighWaterMark::OperationTime(operation_time))
    }
}

impl ChangeTask {
    async fn run(self, cancel: CancellationToken) -> Result<HighWaterMark, SyncError> {
        let batch = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SyncError::shutdown()),
            batch = self.stream.next_batch() => batch?,
        };

        if batch.events.is_empty() {
            return Ok(HighWaterMark::ResumeToken(batch.post_batch_resume_token));
        }

        debug!(
            mapping = %self.mapping_id,
            events = batch.events.len(),
            "Synonym source collection changed"
        );
        self.registry.observe_change(self.mapping_id.name());
        Ok(HighWaterMark::Empty)
    }
}

impl fmt::Debug for SyncTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncTask")
            .field("mapping_id", self.mapping_id())
            .field("kind", &self.kind())
            .finish()
    }
}
