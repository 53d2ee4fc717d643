use super::{
    SynonymDetailedStatus, SynonymMapping, SynonymMappingBuilder, SynonymRegistry, SynonymStatus,
    TermMappingBuilder,
};
use crate::error::MappingError;
use model::synonym::definition::SynonymMappingDefinition;
use parking_lot::RwLock;
use std::{collections::HashMap, sync::Arc};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
struct Entry {
    mapping: Option<Arc<SynonymMapping>>,
    status: SynonymStatus,
    message: Option<String>,
}

impl Entry {
    fn with_status(&self, status: SynonymStatus) -> Self {
        Self {
            mapping: self.mapping.clone(),
            status,
            message: None,
        }
    }
}

/// Process-local registry holding one entry per declared synonym mapping.
///
/// Every declared mapping starts out `SYNC_ENQUEUED` and keeps a status for
/// the registry's lifetime.
#[derive(Debug)]
pub struct InMemorySynonymRegistry {
    entries: RwLock<HashMap<String, Entry>>,
    max_docs_per_mapping: Option<usize>,
}

impl InMemorySynonymRegistry {
    pub fn new<'a>(
        definitions: impl IntoIterator<Item = &'a SynonymMappingDefinition>,
        max_docs_per_mapping: Option<usize>,
    ) -> Self {
        let entries = definitions
            .into_iter()
            .map(|definition| {
                (
                    definition.name.clone(),
                    Entry {
                        mapping: Some(Arc::new(SynonymMapping::empty(&definition.analyzer))),
                        status: SynonymStatus::SyncEnqueued,
                        message: None,
                    },
                )
            })
            .collect();

        Self {
            entries: RwLock::new(entries),
            max_docs_per_mapping,
        }
    }

    fn transition(
        &self,
        name: &str,
        op: &str,
        next: impl FnOnce(SynonymStatus) -> Option<SynonymStatus>,
    ) {
        let mut entries = self.entries.write();
        let Some(entry) = entries.get(name) else {
            warn!(mapping = name, op, "no registry entry for synonym mapping");
            return;
        };

        match next(entry.status) {
            Some(status) => {
                debug!(
                    mapping = name,
                    op,
                    from = %entry.status,
                    to = %status,
                    "synonym status changed"
                );
                let updated = entry.with_status(status);
                entries.insert(name.to_string(), updated);
            }
            None => {
                warn!(
                    mapping = name,
                    op,
                    status = %entry.status,
                    "ignoring illegal synonym status change"
                );
            }
        }
    }

    fn put(&self, name: &str, entry: Entry) {
        self.entries.write().insert(name.to_string(), entry);
    }
}

impl SynonymRegistry for InMemorySynonymRegistry {
    fn mapping_builder(
        &self,
        definition: &SynonymMappingDefinition,
    ) -> Box<dyn SynonymMappingBuilder> {
        Box::new(TermMappingBuilder::new(&definition.analyzer))
    }

    fn get(&self, name: &str) -> Result<Arc<SynonymMapping>, MappingError> {
        let entries = self.entries.read();
        let entry = entries
            .get(name)
            .ok_or_else(|| MappingError::UnknownMapping(name.to_string()))?;

        if !entry.status.is_ready() {
            return Err(MappingError::NotReady {
                name: name.to_string(),
                status: entry.status,
            });
        }

        entry.mapping.clone().ok_or_else(|| MappingError::NotReady {
            name: name.to_string(),
            status: entry.status,
        })
    }

    fn begin_update(&self, name: &str) {
        self.transition(name, "begin_update", |status| match status {
            SynonymStatus::Invalid | SynonymStatus::SyncEnqueued | SynonymStatus::InitialSync => {
                Some(SynonymStatus::InitialSync)
            }
            SynonymStatus::Ready | SynonymStatus::ReadyUpdating => {
                Some(SynonymStatus::ReadyUpdating)
            }
            SynonymStatus::Failed => None,
        });
    }

    fn observe_change(&self, name: &str) {
        self.transition(name, "observe_change", |status| match status {
            SynonymStatus::Ready => Some(SynonymStatus::ReadyUpdating),
            SynonymStatus::Invalid => Some(SynonymStatus::SyncEnqueued),
            SynonymStatus::Failed
            | SynonymStatus::SyncEnqueued
            | SynonymStatus::InitialSync
            | SynonymStatus::ReadyUpdating => None,
        });
    }

    fn update(&self, name: &str, mapping: SynonymMapping) {
        self.put(
            name,
            Entry {
                mapping: Some(Arc::new(mapping)),
                status: SynonymStatus::Ready,
                message: None,
            },
        );
    }

    fn invalidate(&self, name: &str, reason: &str) {
        self.put(
            name,
            Entry {
                mapping: None,
                status: SynonymStatus::Invalid,
                message: Some(reason.to_string()),
            },
        );
    }

    fn fail(&self, name: &str, reason: &str) {
        self.put(
            name,
            Entry {
                mapping: None,
                status: SynonymStatus::Failed,
                message: Some(reason.to_string()),
            },
        );
    }

    fn clear(&self, definition: &SynonymMappingDefinition) {
        self.update(&definition.name, SynonymMapping::empty(&definition.analyzer));
    }

    fn statuses(&self) -> HashMap<String, SynonymStatus> {
        self.entries
            .read()
            .iter()
            .map(|(name, entry)| (name.clone(), entry.status))
            .collect()
    }

    fn detailed_statuses(&self) -> HashMap<String, SynonymDetailedStatus> {
        self.entries
            .read()
            .iter()
            .map(|(name, entry)| {
                (
                    name.clone(),
                    SynonymDetailedStatus {
                        status: entry.status,
                        message: entry.message.clone(),
                    },
                )
            })
            .collect()
    }

    fn max_docs_per_mapping(&self) -> Option<usize> {
        self.max_docs_per_mapping
    }
}
