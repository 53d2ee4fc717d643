use crate::error::BackendError;
use async_trait::async_trait;
use model::core::{
    identifiers::Namespace,
    mark::{HighWaterMark, OperationTime, ResumeToken},
};
use serde_json::Value;

/// A source document or change event as the backend returns it.
pub type RawDocument = Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadConcern {
    Local,
    #[default]
    Majority,
}

/// Parameters of a find-style collection scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindSpec {
    pub namespace: Namespace,
    pub batch_size: Option<u32>,
    pub no_cursor_timeout: bool,
    pub read_concern: ReadConcern,
}

impl FindSpec {
    /// A full scan that must not time out and only sees majority-committed data.
    pub fn collection_scan(namespace: Namespace, batch_size: Option<u32>) -> Self {
        Self {
            namespace,
            batch_size,
            no_cursor_timeout: true,
            read_concern: ReadConcern::Majority,
        }
    }
}

/// Where a change stream starts reading. The two positions are exclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeStreamStart {
    AtOperationTime(OperationTime),
    AfterResumeToken(ResumeToken),
}

impl ChangeStreamStart {
    /// `None` for an empty mark: there is no position to resume from.
    pub fn from_mark(mark: &HighWaterMark) -> Option<Self> {
        match mark {
            HighWaterMark::Empty => None,
            HighWaterMark::OperationTime(time) => Some(Self::AtOperationTime(*time)),
            HighWaterMark::ResumeToken(token) => Some(Self::AfterResumeToken(token.clone())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeStreamSpec {
    pub namespace: Namespace,
    pub start: ChangeStreamStart,
    pub batch_size: Option<u32>,
}

/// One `getMore` worth of change events plus the position after them.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeBatch {
    pub events: Vec<RawDocument>,
    pub post_batch_resume_token: ResumeToken,
}

/// Client for the database holding synonym source collections.
#[async_trait]
pub trait SyncClient: Send + Sync {
    /// Sanity-checks the cluster topology. Sharded clusters can under-report
    /// results while shards are being added or removed.
    async fn health_check(&self) -> Result<(), BackendError>;

    async fn open_scan_cursor(&self, spec: FindSpec) -> Result<Box<dyn ScanCursor>, BackendError>;

    async fn open_change_cursor(
        &self,
        spec: ChangeStreamSpec,
    ) -> Result<Box<dyn ChangeCursor>, BackendError>;
}

#[async_trait]
pub trait ScanCursor: Send {
    fn has_next(&self) -> bool;

    async fn next_batch(&mut self) -> Result<Vec<RawDocument>, BackendError>;

    /// Cluster time the scan's snapshot was taken at, once known.
    fn operation_time(&self) -> Option<OperationTime>;

    async fn close(&mut self) -> Result<(), BackendError>;
}

#[async_trait]
pub trait ChangeCursor: Send {
    async fn next_batch(&mut self) -> Result<ChangeBatch, BackendError>;

    async fn close(&mut self) -> Result<(), BackendError>;
}
