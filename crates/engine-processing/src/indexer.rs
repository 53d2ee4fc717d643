use engine_core::{
    backend::RawDocument,
    error::{MappingError, SyncError, SyncErrorKind},
    metrics::SyncMetrics,
    registry::{SynonymMappingBuilder, SynonymRegistry},
};
use model::synonym::{definition::SynonymMappingDefinition, document::SynonymDocument};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

struct IndexerState {
    builder: Option<Box<dyn SynonymMappingBuilder>>,
    document_count: usize,
}

/// Feeds source documents of one collection scan into a mapping builder and
/// publishes the outcome to the registry.
///
/// An indexer is single-use: after `complete` the builder is gone and further
/// batches fail.
pub struct SynonymDocumentIndexer {
    registry: Arc<dyn SynonymRegistry>,
    definition: SynonymMappingDefinition,
    max_documents: Option<usize>,
    state: Mutex<IndexerState>,
    metrics: SyncMetrics,
}

impl SynonymDocumentIndexer {
    pub fn new(
        registry: Arc<dyn SynonymRegistry>,
        definition: SynonymMappingDefinition,
        metrics: SyncMetrics,
    ) -> Self {
        let builder = registry.mapping_builder(&definition);
        let max_documents = registry.max_docs_per_mapping();
        Self {
            registry,
            definition,
            max_documents,
            state: Mutex::new(IndexerState {
                builder: Some(builder),
                document_count: 0,
            }),
            metrics,
        }
    }

    /// Caps the document count at `limit` on top of the registry's own
    /// limit. The tighter of the two applies.
    pub fn with_document_limit(mut self, limit: Option<usize>) -> Self {
        self.max_documents = match (self.max_documents, limit) {
            (Some(current), Some(limit)) => Some(current.min(limit)),
            (current, limit) => current.or(limit),
        };
        self
    }

    pub fn definition(&self) -> &SynonymMappingDefinition {
        &self.definition
    }

    /// Parses and adds a batch of raw documents.
    ///
    /// The document limit is checked against the running total including
    /// this batch before any document of it is added.
    pub fn index_batch(&self, batch: &[RawDocument]) -> Result<(), SyncError> {
        let mut state = self.state.lock();
        state.document_count += batch.len();

        if let Some(max) = self.max_documents
            && state.document_count > max
        {
            return Err(SyncError::field_exceeded(state.document_count, max));
        }

        let builder = state
            .builder
            .as_mut()
            .ok_or_else(|| SyncError::failed("synonym document indexer already completed"))?;

        for raw in batch {
            let document = SynonymDocument::from_value(raw)
                .map_err(|e| MappingError::InvalidDocument(e.to_string()))?;
            builder.add_document(&document)?;
        }

        self.metrics.record_indexed_batch(batch.len() as u64);
        debug!(
            mapping = %self.definition.name,
            batch = batch.len(),
            total = state.document_count,
            "Indexed synonym document batch"
        );
        Ok(())
    }

    /// Builds the mapping and installs it in the registry.
    pub fn complete(&self) -> Result<(), SyncError> {
        let (builder, document_count) = {
            let mut state = self.state.lock();
            (state.builder.take(), state.document_count)
        };

        let builder =
            builder.ok_or_else(|| SyncError::failed("synonym document indexer already completed"))?;
        let mapping = builder.build()?;
        self.registry.update(&self.definition.name, mapping);

        info!(
            mapping = %self.definition.name,
            documents = document_count,
            "Installed synonym mapping"
        );
        Ok(())
    }

    /// Reports a failed sync to the registry. Shutdown and transient failures
    /// leave the served mapping untouched.
    pub fn complete_exceptionally(&self, error: &SyncError) {
        self.state.lock().builder = None;

        match error.kind() {
            SyncErrorKind::FieldExceeded | SyncErrorKind::Invalid => {
                warn!(mapping = %self.definition.name, error = %error, "Invalidating synonym mapping");
                self.registry.invalidate(&self.definition.name, error.message());
            }
            SyncErrorKind::Failed => {
                self.registry.fail(&self.definition.name, error.message());
            }
            SyncErrorKind::Dropped => {
                info!(mapping = %self.definition.name, "Synonym source collection dropped, clearing mapping");
                self.registry.clear(&self.definition);
            }
            SyncErrorKind::Shutdown | SyncErrorKind::Transient => {
                debug!(
                    mapping = %self.definition.name,
                    kind = %error.kind(),
                    "Leaving synonym mapping untouched"
                );
            }
        }
    }
}
