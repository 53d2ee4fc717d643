use async_trait::async_trait;
use engine_config::settings::SyncSettings;
use engine_core::{
    backend::{ChangeBatch, ChangeCursor, ChangeStreamSpec, FindSpec, ScanCursor, SyncClient},
    error::BackendError,
    metrics::SyncMetrics,
    registry::{SynonymRegistry, memory::InMemorySynonymRegistry},
};
use engine_processing::indexer::SynonymDocumentIndexer;
use model::{
    core::{
        identifiers::{GenerationId, MappingId, Namespace},
        mark::{OperationTime, ResumeToken},
    },
    synonym::definition::SynonymMappingDefinition,
};
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};
use tokio::sync::Semaphore;
use uuid::Uuid;

pub(crate) const SCAN_TIME: OperationTime = OperationTime::new(42, 1);

/// Client whose health check blocks until the test lets it through, one
/// permit per check.
pub(crate) struct GatedClient {
    gate: Semaphore,
    health_checks: AtomicUsize,
    panic_on_health_check: AtomicBool,
}

impl GatedClient {
    pub(crate) fn closed() -> Arc<Self> {
        Arc::new(Self {
            gate: Semaphore::new(0),
            health_checks: AtomicUsize::new(0),
            panic_on_health_check: AtomicBool::new(false),
        })
    }

    pub(crate) fn open() -> Arc<Self> {
        let client = Self::closed();
        client.release(Semaphore::MAX_PERMITS);
        client
    }

    pub(crate) fn release(&self, checks: usize) {
        self.gate.add_permits(checks);
    }

    pub(crate) fn health_checks(&self) -> usize {
        self.health_checks.load(Ordering::SeqCst)
    }

    pub(crate) fn panic_on_health_check(&self) {
        self.panic_on_health_check.store(true, Ordering::SeqCst);
    }
}

struct EmptyScan;

#[async_trait]
impl ScanCursor for EmptyScan {
    fn has_next(&self) -> bool {
        false
    }

    async fn next_batch(&mut self) -> Result<Vec<serde_json::Value>, BackendError> {
        Ok(vec![])
    }

    fn operation_time(&self) -> Option<OperationTime> {
        Some(SCAN_TIME)
    }

    async fn close(&mut self) -> Result<(), BackendError> {
        Ok(())
    }
}

struct QuietStream;

#[async_trait]
impl ChangeCursor for QuietStream {
    async fn next_batch(&mut self) -> Result<ChangeBatch, BackendError> {
        Ok(ChangeBatch {
            events: vec![],
            post_batch_resume_token: ResumeToken::new(vec![1u8]),
        })
    }

    async fn close(&mut self) -> Result<(), BackendError> {
        Ok(())
    }
}

#[async_trait]
impl SyncClient for GatedClient {
    async fn health_check(&self) -> Result<(), BackendError> {
        self.health_checks.fetch_add(1, Ordering::SeqCst);
        if self.panic_on_health_check.load(Ordering::SeqCst) {
            panic!("health check exploded");
        }

        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| BackendError::Interrupted)?;
        permit.forget();
        Ok(())
    }

    async fn open_scan_cursor(&self, _spec: FindSpec) -> Result<Box<dyn ScanCursor>, BackendError> {
        Ok(Box::new(EmptyScan))
    }

    async fn open_change_cursor(
        &self,
        _spec: ChangeStreamSpec,
    ) -> Result<Box<dyn ChangeCursor>, BackendError> {
        Ok(Box::new(QuietStream))
    }
}

pub(crate) fn settings(max_concurrent_syncs: usize) -> SyncSettings {
    SyncSettings::builder()
        .max_concurrent_syncs(max_concurrent_syncs)
        .scheduling_delay(Duration::from_secs(10))
        .transient_backoff(Duration::from_secs(30))
        .dispatcher_join_timeout(Duration::from_secs(1))
        .build()
        .unwrap()
}

pub(crate) fn definition(name: &str) -> SynonymMappingDefinition {
    SynonymMappingDefinition::new(name, format!("{name}_source"), "lucene.standard")
}

pub(crate) fn namespace(name: &str) -> Namespace {
    definition(name).namespace("db")
}

pub(crate) fn mapping_id(generation: GenerationId, name: &str) -> MappingId {
    MappingId::new(generation, name)
}

pub(crate) fn generation() -> GenerationId {
    GenerationId::first(Uuid::new_v4())
}

pub(crate) fn registry(names: &[&str]) -> Arc<InMemorySynonymRegistry> {
    let definitions = names.iter().map(|name| definition(name)).collect::<Vec<_>>();
    Arc::new(InMemorySynonymRegistry::new(&definitions, None))
}

pub(crate) fn indexer(
    registry: Arc<dyn SynonymRegistry>,
    name: &str,
    metrics: &SyncMetrics,
) -> Arc<SynonymDocumentIndexer> {
    Arc::new(SynonymDocumentIndexer::new(
        registry,
        definition(name),
        metrics.clone(),
    ))
}

/// Polls `condition` until it holds.
pub(crate) async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
