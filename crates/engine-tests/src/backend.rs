use async_trait::async_trait;
use engine_core::{
    backend::{
        ChangeBatch, ChangeCursor, ChangeStreamSpec, ChangeStreamStart, FindSpec, RawDocument,
        ScanCursor, SyncClient,
    },
    error::BackendError,
};
use model::core::{
    identifiers::Namespace,
    mark::{OperationTime, ResumeToken},
};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};
use tokio::sync::Semaphore;
use tracing::debug;

/// Failure to inject into the next matching backend call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePoint {
    HealthCheck,
    OpenScan,
    ScanBatch,
    OpenChangeStream,
    ChangeBatch,
}

struct LoggedChange {
    time: OperationTime,
    namespace: Namespace,
    event: Value,
}

#[derive(Default)]
struct State {
    clock: u32,
    collections: HashMap<Namespace, Vec<Value>>,
    changes: Vec<LoggedChange>,
    failures: VecDeque<(FailurePoint, BackendError)>,
    scans_opened: usize,
    streams_opened: Vec<ChangeStreamSpec>,
}

impl State {
    fn now(&self) -> OperationTime {
        OperationTime::new(self.clock, 0)
    }

    fn take_failure(&mut self, point: FailurePoint) -> Result<(), BackendError> {
        match self.failures.iter().position(|(p, _)| *p == point) {
            Some(index) => match self.failures.remove(index) {
                Some((_, error)) => Err(error),
                None => Ok(()),
            },
            None => Ok(()),
        }
    }

    fn record(&mut self, namespace: &Namespace, event: Value) {
        self.clock += 1;
        let time = self.now();
        self.changes.push(LoggedChange {
            time,
            namespace: namespace.clone(),
            event,
        });
    }
}

/// In-memory stand-in for the database holding synonym source collections.
///
/// Every write advances a logical cluster clock by one second. A scan reports
/// the clock at the time it was opened, and change streams return the writes
/// strictly after their start position. Missing collections scan as empty.
#[derive(Clone)]
pub struct MemoryBackend {
    state: Arc<Mutex<State>>,
    gate: Arc<Semaphore>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                clock: 1,
                ..State::default()
            })),
            gate: Arc::new(Semaphore::new(Semaphore::MAX_PERMITS)),
        }
    }

    /// A backend whose health checks block until [`MemoryBackend::release`]
    /// lets them through.
    pub fn gated() -> Self {
        Self {
            gate: Arc::new(Semaphore::new(0)),
            ..Self::new()
        }
    }

    pub fn release(&self, health_checks: usize) {
        self.gate.add_permits(health_checks);
    }

    pub fn client(&self) -> Arc<dyn SyncClient> {
        Arc::new(self.clone())
    }

    pub fn cluster_time(&self) -> OperationTime {
        self.state.lock().now()
    }

    pub fn insert(&self, namespace: &Namespace, document: Value) {
        let mut state = self.state.lock();
        state
            .collections
            .entry(namespace.clone())
            .or_default()
            .push(document.clone());
        state.record(
            namespace,
            json!({"operationType": "insert", "fullDocument": document}),
        );
    }

    pub fn insert_many(&self, namespace: &Namespace, documents: impl IntoIterator<Item = Value>) {
        for document in documents {
            self.insert(namespace, document);
        }
    }

    /// Replaces every document of the collection in one write.
    pub fn replace_all(&self, namespace: &Namespace, documents: Vec<Value>) {
        let mut state = self.state.lock();
        state.collections.insert(namespace.clone(), documents);
        state.record(namespace, json!({"operationType": "replace"}));
    }

    /// Drops the collection. The drop shows up on its change streams.
    pub fn drop_collection(&self, namespace: &Namespace) {
        let mut state = self.state.lock();
        state.collections.remove(namespace);
        state.record(namespace, json!({"operationType": "drop"}));
    }

    /// Makes the next call at `point` fail with `error`.
    pub fn fail_next(&self, point: FailurePoint, error: BackendError) {
        self.state.lock().failures.push_back((point, error));
    }

    pub fn scans_opened(&self) -> usize {
        self.state.lock().scans_opened
    }

    pub fn streams_opened(&self) -> Vec<ChangeStreamStart> {
        self.state
            .lock()
            .streams_opened
            .iter()
            .map(|spec| spec.start.clone())
            .collect()
    }
}

pub fn token_for(time: OperationTime) -> ResumeToken {
    let mut bytes = time.seconds().to_be_bytes().to_vec();
    bytes.extend_from_slice(&time.increment().to_be_bytes());
    ResumeToken::new(bytes)
}

fn time_of(token: &ResumeToken) -> Result<OperationTime, BackendError> {
    let bytes = token.as_bytes();
    if bytes.len() != 8 {
        return Err(BackendError::Decode(format!(
            "resume token of {} bytes",
            bytes.len()
        )));
    }

    let mut seconds = [0u8; 4];
    let mut increment = [0u8; 4];
    seconds.copy_from_slice(&bytes[..4]);
    increment.copy_from_slice(&bytes[4..]);
    Ok(OperationTime::new(
        u32::from_be_bytes(seconds),
        u32::from_be_bytes(increment),
    ))
}

#[async_trait]
impl SyncClient for MemoryBackend {
    async fn health_check(&self) -> Result<(), BackendError> {
        self.state.lock().take_failure(FailurePoint::HealthCheck)?;

        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| BackendError::Interrupted)?;
        permit.forget();
        Ok(())
    }

    async fn open_scan_cursor(&self, spec: FindSpec) -> Result<Box<dyn ScanCursor>, BackendError> {
        let mut state = self.state.lock();
        state.take_failure(FailurePoint::OpenScan)?;
        state.scans_opened += 1;

        let documents = state
            .collections
            .get(&spec.namespace)
            .cloned()
            .unwrap_or_default();
        debug!(namespace = %spec.namespace, documents = documents.len(), "Opened memory scan");

        Ok(Box::new(MemoryScan {
            state: self.state.clone(),
            remaining: documents.into(),
            batch_size: spec.batch_size.map_or(usize::MAX, |size| size.max(1) as usize),
            operation_time: state.now(),
        }))
    }

    async fn open_change_cursor(
        &self,
        spec: ChangeStreamSpec,
    ) -> Result<Box<dyn ChangeCursor>, BackendError> {
        let mut state = self.state.lock();
        state.take_failure(FailurePoint::OpenChangeStream)?;

        let after = match &spec.start {
            ChangeStreamStart::AtOperationTime(time) => *time,
            ChangeStreamStart::AfterResumeToken(token) => time_of(token)?,
        };
        state.streams_opened.push(spec.clone());

        Ok(Box::new(MemoryChangeStream {
            state: self.state.clone(),
            namespace: spec.namespace,
            after,
            batch_size: spec.batch_size.map_or(usize::MAX, |size| size.max(1) as usize),
        }))
    }
}

struct MemoryScan {
    state: Arc<Mutex<State>>,
    remaining: VecDeque<Value>,
    batch_size: usize,
    operation_time: OperationTime,
}

#[async_trait]
impl ScanCursor for MemoryScan {
    fn has_next(&self) -> bool {
        !self.remaining.is_empty()
    }

    async fn next_batch(&mut self) -> Result<Vec<RawDocument>, BackendError> {
        self.state.lock().take_failure(FailurePoint::ScanBatch)?;
        let take = self.batch_size.min(self.remaining.len());
        Ok(self.remaining.drain(..take).collect())
    }

    fn operation_time(&self) -> Option<OperationTime> {
        Some(self.operation_time)
    }

    async fn close(&mut self) -> Result<(), BackendError> {
        self.remaining.clear();
        Ok(())
    }
}

struct MemoryChangeStream {
    state: Arc<Mutex<State>>,
    namespace: Namespace,
    after: OperationTime,
    batch_size: usize,
}

#[async_trait]
impl ChangeCursor for MemoryChangeStream {
    async fn next_batch(&mut self) -> Result<ChangeBatch, BackendError> {
        let mut state = self.state.lock();
        state.take_failure(FailurePoint::ChangeBatch)?;

        let events = state
            .changes
            .iter()
            .filter(|change| change.namespace == self.namespace && change.time > self.after)
            .take(self.batch_size)
            .map(|change| (change.time, change.event.clone()))
            .collect::<Vec<_>>();

        // An exhausted stream still advances to the current cluster time.
        self.after = match events.last() {
            Some((time, _)) => *time,
            None => state.now().max(self.after),
        };

        Ok(ChangeBatch {
            events: events.into_iter().map(|(_, event)| event).collect(),
            post_batch_resume_token: token_for(self.after),
        })
    }

    async fn close(&mut self) -> Result<(), BackendError> {
        Ok(())
    }
}
