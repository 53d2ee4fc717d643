use crate::indexer::SynonymDocumentIndexer;
use engine_core::{
    backend::{FindSpec, ScanCursor, SyncClient},
    error::{BackendError, SyncError},
};
use model::core::{identifiers::Namespace, mark::OperationTime};
use std::{future::Future, sync::Arc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type IndexingHandle = JoinHandle<Result<(), SyncError>>;

/// Reads a synonym source collection end to end and feeds it to an indexer.
///
/// Fetching batch N+1 overlaps with indexing batch N. At most one indexing
/// job is outstanding at a time.
pub struct SynonymCollectionScanner {
    client: Arc<dyn SyncClient>,
    indexer: Arc<SynonymDocumentIndexer>,
    namespace: Namespace,
    batch_size: Option<u32>,
    shutdown: CancellationToken,
}

impl SynonymCollectionScanner {
    pub fn new(
        client: Arc<dyn SyncClient>,
        indexer: Arc<SynonymDocumentIndexer>,
        namespace: Namespace,
        batch_size: Option<u32>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            client,
            indexer,
            namespace,
            batch_size,
            shutdown,
        }
    }

    /// Asks a running scan to stop. The scan fails with a shutdown error at
    /// its next suspension point.
    pub fn signal_shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Scans the collection and returns the cluster time the scan's snapshot
    /// was taken at.
    ///
    /// On failure the indexer is completed exceptionally before the error is
    /// returned. Completing it on success is left to the caller.
    pub async fn scan(&self) -> Result<OperationTime, SyncError> {
        let mut cursor = None;
        let mut pending = None;

        match self.run(&mut cursor, &mut pending).await {
            Ok(operation_time) => {
                if let Some(mut cursor) = cursor {
                    close_quietly(cursor.as_mut(), &self.namespace).await;
                }
                info!(
                    namespace = %self.namespace,
                    operation_time = %operation_time,
                    "Synonym collection scan finished"
                );
                Ok(operation_time)
            }
            Err(error) => {
                if let Some(handle) = pending.take() {
                    handle.abort();
                }

                let operation_time = cursor.as_ref().and_then(|c| c.operation_time());
                if let Some(mut cursor) = cursor {
                    close_quietly(cursor.as_mut(), &self.namespace).await;
                }

                let error = error.with_operation_time(operation_time);
                self.indexer.complete_exceptionally(&error);
                Err(error)
            }
        }
    }

    async fn run(
        &self,
        cursor_slot: &mut Option<Box<dyn ScanCursor>>,
        pending: &mut Option<IndexingHandle>,
    ) -> Result<OperationTime, SyncError> {
        self.until_shutdown(self.client.health_check()).await?;

        let spec = FindSpec::collection_scan(self.namespace.clone(), self.batch_size);
        let opened = self
            .until_shutdown(self.client.open_scan_cursor(spec))
            .await?;
        let cursor = cursor_slot.insert(opened);
        debug!(namespace = %self.namespace, "Opened synonym collection scan");

        while cursor.has_next() {
            if self.shutdown.is_cancelled() {
                return Err(SyncError::shutdown());
            }

            let batch = self.until_shutdown(cursor.next_batch()).await?;
            self.await_indexing(pending).await?;

            if batch.is_empty() {
                continue;
            }

            let indexer = self.indexer.clone();
            *pending = Some(tokio::task::spawn_blocking(move || {
                indexer.index_batch(&batch)
            }));
        }

        self.await_indexing(pending).await?;

        cursor.operation_time().ok_or_else(|| {
            SyncError::transient("collection scan finished without an operation time")
        })
    }

    async fn until_shutdown<T>(
        &self,
        fut: impl Future<Output = Result<T, BackendError>>,
    ) -> Result<T, SyncError> {
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(SyncError::shutdown()),
            res = fut => res.map_err(SyncError::from),
        }
    }

    /// Waits for the outstanding indexing job, if any. A panic inside the job
    /// is resumed on this task.
    async fn await_indexing(&self, pending: &mut Option<IndexingHandle>) -> Result<(), SyncError> {
        let Some(handle) = pending.as_mut() else {
            return Ok(());
        };

        let joined = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return Err(SyncError::shutdown()),
            joined = handle => joined,
        };
        *pending = None;

        match joined {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => Err(SyncError::shutdown()),
        }
    }
}

async fn close_quietly(cursor: &mut dyn ScanCursor, namespace: &Namespace) {
    if let Err(e) = cursor.close().await {
        warn!(namespace = %namespace, error = %e, "Failed to close synonym collection scan");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::tests::{RecordingRegistry, RegistryCall, definition, valid_documents};
    use async_trait::async_trait;
    use engine_core::{
        backend::{ChangeCursor, ChangeStreamSpec, RawDocument},
        error::{SyncErrorKind, codes},
        metrics::SyncMetrics,
    };
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::VecDeque;

    #[derive(Default)]
    struct ScriptState {
        batches: VecDeque<Result<Vec<RawDocument>, BackendError>>,
        operation_time: Option<OperationTime>,
        health: Option<BackendError>,
        closes: usize,
        fetches: usize,
    }

    #[derive(Clone, Default)]
    struct ScriptedClient {
        state: Arc<Mutex<ScriptState>>,
    }

    impl ScriptedClient {
        fn with_batches(batches: Vec<Result<Vec<RawDocument>, BackendError>>) -> Self {
            let client = Self::default();
            {
                let mut state = client.state.lock();
                state.batches = batches.into();
                state.operation_time = Some(OperationTime::new(100, 1));
            }
            client
        }
    }

    struct ScriptedCursor {
        state: Arc<Mutex<ScriptState>>,
    }

    #[async_trait]
    impl ScanCursor for ScriptedCursor {
        fn has_next(&self) -> bool {
            !self.state.lock().batches.is_empty()
        }

        async fn next_batch(&mut self) -> Result<Vec<RawDocument>, BackendError> {
            let mut state = self.state.lock();
            state.fetches += 1;
            state.batches.pop_front().unwrap_or(Ok(vec![]))
        }

        fn operation_time(&self) -> Option<OperationTime> {
            self.state.lock().operation_time
        }

        async fn close(&mut self) -> Result<(), BackendError> {
            self.state.lock().closes += 1;
            Err(BackendError::Network("socket closed".into()))
        }
    }

    #[async_trait]
    impl SyncClient for ScriptedClient {
        async fn health_check(&self) -> Result<(), BackendError> {
            match self.state.lock().health.take() {
                Some(e) => Err(e),
                None => Ok(()),
            }
        }

        async fn open_scan_cursor(
            &self,
            _spec: FindSpec,
        ) -> Result<Box<dyn ScanCursor>, BackendError> {
            Ok(Box::new(ScriptedCursor {
                state: self.state.clone(),
            }))
        }

        async fn open_change_cursor(
            &self,
            _spec: ChangeStreamSpec,
        ) -> Result<Box<dyn ChangeCursor>, BackendError> {
            Err(BackendError::Interrupted)
        }
    }

    fn scanner(
        client: &ScriptedClient,
        registry: &Arc<RecordingRegistry>,
    ) -> SynonymCollectionScanner {
        let indexer = Arc::new(SynonymDocumentIndexer::new(
            registry.clone(),
            definition(),
            SyncMetrics::new(),
        ));
        SynonymCollectionScanner::new(
            Arc::new(client.clone()),
            indexer,
            Namespace::new("db", "syns"),
            Some(2),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn empty_collection_returns_operation_time() {
        let client = ScriptedClient::with_batches(vec![]);
        let registry = Arc::new(RecordingRegistry::default());

        let time = scanner(&client, &registry).scan().await.unwrap();

        assert_eq!(time, OperationTime::new(100, 1));
        assert!(registry.calls().is_empty());
        assert_eq!(client.state.lock().closes, 1);
    }

    #[tokio::test]
    async fn every_batch_is_indexed() {
        let documents = valid_documents();
        let client = ScriptedClient::with_batches(vec![
            Ok(documents[..2].to_vec()),
            Ok(vec![]),
            Ok(documents[2..].to_vec()),
        ]);
        let registry = Arc::new(RecordingRegistry::default());

        scanner(&client, &registry).scan().await.unwrap();

        let added = registry
            .calls()
            .into_iter()
            .filter(|c| matches!(c, RegistryCall::AddDocument(_)))
            .count();
        assert_eq!(added, 3);
        assert_eq!(client.state.lock().fetches, 3);
    }

    #[tokio::test]
    async fn invalid_document_invalidates_mapping() {
        let client = ScriptedClient::with_batches(vec![
            Ok(valid_documents()),
            Ok(vec![json!({"mappingType": "sideways", "synonyms": ["a"]})]),
            Ok(valid_documents()),
        ]);
        let registry = Arc::new(RecordingRegistry::default());

        let err = scanner(&client, &registry).scan().await.unwrap_err();

        assert_eq!(err.kind(), SyncErrorKind::Invalid);
        assert_eq!(err.operation_time(), Some(OperationTime::new(100, 1)));
        assert!(matches!(
            registry.registry_calls().as_slice(),
            [RegistryCall::Invalidate(name, _)] if name == "words"
        ));
        assert_eq!(client.state.lock().closes, 1);
    }

    #[tokio::test]
    async fn backend_failure_is_classified() {
        let client = ScriptedClient::with_batches(vec![
            Ok(valid_documents()),
            Err(BackendError::command(codes::NAMESPACE_NOT_FOUND, "ns not found")),
        ]);
        let registry = Arc::new(RecordingRegistry::default());

        let err = scanner(&client, &registry).scan().await.unwrap_err();

        assert_eq!(err.kind(), SyncErrorKind::Dropped);
        assert_eq!(
            registry.registry_calls(),
            vec![RegistryCall::Clear("words".into())]
        );
    }

    #[tokio::test]
    async fn failed_health_check_skips_scan() {
        let client = ScriptedClient::with_batches(vec![Ok(valid_documents())]);
        client.state.lock().health = Some(BackendError::Unhealthy("shard draining".into()));
        let registry = Arc::new(RecordingRegistry::default());

        let err = scanner(&client, &registry).scan().await.unwrap_err();

        assert_eq!(err.kind(), SyncErrorKind::Transient);
        assert_eq!(client.state.lock().fetches, 0);
        assert!(registry.calls().is_empty());
    }

    #[tokio::test]
    async fn missing_operation_time_is_transient() {
        let client = ScriptedClient::with_batches(vec![Ok(valid_documents())]);
        client.state.lock().operation_time = None;
        let registry = Arc::new(RecordingRegistry::default());

        let err = scanner(&client, &registry).scan().await.unwrap_err();

        assert_eq!(err.kind(), SyncErrorKind::Transient);
        assert!(registry.registry_calls().is_empty());
    }

    #[tokio::test]
    async fn signalled_scan_shuts_down() {
        let client = ScriptedClient::with_batches(vec![Ok(valid_documents())]);
        let registry = Arc::new(RecordingRegistry::default());
        let scanner = scanner(&client, &registry);

        scanner.signal_shutdown();
        let err = scanner.scan().await.unwrap_err();

        assert!(err.is_shutdown());
        assert!(registry.registry_calls().is_empty());
    }
}
