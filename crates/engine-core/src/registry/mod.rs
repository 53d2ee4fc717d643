use crate::error::MappingError;
use model::synonym::{definition::SynonymMappingDefinition, document::SynonymDocument};
use std::{collections::HashMap, fmt, sync::Arc};

pub mod mapping;
pub mod memory;

pub use mapping::{SynonymMapping, TermMappingBuilder};
pub use memory::InMemorySynonymRegistry;

/// Status of a synonym mapping as readers of the registry see it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SynonymStatus {
    SyncEnqueued,
    InitialSync,
    Ready,
    ReadyUpdating,
    Invalid,
    Failed,
}

impl SynonymStatus {
    /// Ready statuses always have a mapping that can be served.
    pub fn is_ready(&self) -> bool {
        matches!(self, SynonymStatus::Ready | SynonymStatus::ReadyUpdating)
    }
}

impl fmt::Display for SynonymStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SynonymStatus::SyncEnqueued => "SYNC_ENQUEUED",
            SynonymStatus::InitialSync => "INITIAL_SYNC",
            SynonymStatus::Ready => "READY",
            SynonymStatus::ReadyUpdating => "READY_UPDATING",
            SynonymStatus::Invalid => "INVALID",
            SynonymStatus::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynonymDetailedStatus {
    pub status: SynonymStatus,
    pub message: Option<String>,
}

/// Accumulates parsed synonym documents into a mapping.
pub trait SynonymMappingBuilder: Send {
    fn add_document(&mut self, document: &SynonymDocument) -> Result<(), MappingError>;

    fn build(self: Box<Self>) -> Result<SynonymMapping, MappingError>;
}

/// Store of built synonym mappings for one index, keyed by mapping name.
///
/// Lifecycle calls are idempotent from the caller's side; illegal status
/// changes are logged and ignored rather than reported.
pub trait SynonymRegistry: Send + Sync {
    fn mapping_builder(
        &self,
        definition: &SynonymMappingDefinition,
    ) -> Box<dyn SynonymMappingBuilder>;

    fn get(&self, name: &str) -> Result<Arc<SynonymMapping>, MappingError>;

    /// Marks that a rebuild has started. Does not touch the served mapping.
    fn begin_update(&self, name: &str);

    /// Marks that the source collection changed since the last build.
    fn observe_change(&self, name: &str);

    /// Installs a freshly built mapping, replacing any previous one.
    fn update(&self, name: &str, mapping: SynonymMapping);

    /// Drops the served mapping because the source collection is unusable.
    fn invalidate(&self, name: &str, reason: &str);

    /// Drops the served mapping because syncing it failed for good.
    fn fail(&self, name: &str, reason: &str);

    /// Serves an empty mapping, e.g. after the source collection was dropped.
    fn clear(&self, definition: &SynonymMappingDefinition);

    fn statuses(&self) -> HashMap<String, SynonymStatus>;

    fn detailed_statuses(&self) -> HashMap<String, SynonymDetailedStatus>;

    fn max_docs_per_mapping(&self) -> Option<usize>;
}
