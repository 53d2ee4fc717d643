use crate::backend::MemoryBackend;
use engine_config::settings::SyncSettings;
use engine_core::{
    metrics::SyncMetrics,
    registry::{SynonymRegistry, SynonymStatus, memory::InMemorySynonymRegistry},
};
use engine_runtime::{LifecycleState, MappingManagerHandle, SynonymManager, SynonymMappingManager};
use model::{
    core::identifiers::{GenerationId, Namespace},
    synonym::definition::{
        IndexDefinition, IndexGeneration, IndexKind, SynonymMappingDefinition,
    },
};
use serde_json::{Value, json};
use std::{sync::Arc, time::Duration};
use uuid::Uuid;

/// Database the test index lives in.
pub const DATABASE: &str = "catalog";

/// Analyzer every test mapping uses.
pub const ANALYZER: &str = "lucene.standard";

/// Longest a test waits for a manager to reach a state, in virtual time
/// when the clock is paused.
pub const STATE_TIMEOUT: Duration = Duration::from_secs(600);

pub fn settings() -> SyncSettings {
    SyncSettings::builder()
        .max_concurrent_syncs(1)
        .scheduling_delay(Duration::from_secs(10))
        .transient_backoff(Duration::from_secs(30))
        .dispatcher_join_timeout(Duration::from_secs(5))
        .build()
        .expect("valid test settings")
}

pub fn equivalent(terms: &[&str]) -> Value {
    json!({"mappingType": "equivalent", "synonyms": terms})
}

pub fn explicit(input: &[&str], synonyms: &[&str]) -> Value {
    json!({"mappingType": "explicit", "input": input, "synonyms": synonyms})
}

/// The synonym engine wired against an in-memory backend for one search
/// index whose mappings read from collections named after them.
pub struct Engine {
    pub backend: MemoryBackend,
    pub dispatcher: SynonymManager,
    pub registry: Arc<InMemorySynonymRegistry>,
    pub generation: IndexGeneration,
    pub settings: SyncSettings,
}

impl Engine {
    pub fn new(backend: MemoryBackend, settings: SyncSettings, mappings: &[&str]) -> Self {
        let definitions = mappings
            .iter()
            .map(|name| SynonymMappingDefinition::new(*name, *name, ANALYZER))
            .collect::<Vec<_>>();
        // The document limit reaches the indexers through the settings.
        let registry = Arc::new(InMemorySynonymRegistry::new(&definitions, None));
        let index = IndexDefinition {
            index_id: Uuid::new_v4(),
            name: "products".into(),
            database: DATABASE.into(),
            kind: IndexKind::Search,
            synonyms: definitions,
        };

        let dispatcher = SynonymManager::start(backend.client(), &settings, SyncMetrics::new());
        Self {
            backend,
            dispatcher,
            registry,
            generation: IndexGeneration::new(index.clone(), GenerationId::first(index.index_id)),
            settings,
        }
    }

    pub fn namespace(&self, mapping: &str) -> Namespace {
        Namespace::new(DATABASE, mapping)
    }

    /// Starts one manager per mapping of the index.
    pub async fn start(&self) -> Vec<MappingManagerHandle> {
        SynonymMappingManager::create_for_generation(
            &self.dispatcher,
            self.registry.clone(),
            &self.generation,
            &self.settings,
        )
        .await
        .expect("start mapping managers")
    }

    pub fn status(&self, mapping: &str) -> SynonymStatus {
        self.registry.statuses()[mapping]
    }

    pub fn message(&self, mapping: &str) -> Option<String> {
        self.registry.detailed_statuses()[mapping].message.clone()
    }

    /// Synonyms currently served for `term`, empty when the mapping is not
    /// ready.
    pub fn lookup(&self, mapping: &str, term: &str) -> Vec<String> {
        self.registry
            .get(mapping)
            .map(|served| {
                served
                    .lookup(term)
                    .into_iter()
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub async fn shutdown(&self, handles: &[MappingManagerHandle]) {
        for handle in handles {
            handle.shutdown().await;
        }
        self.dispatcher.shutdown().await;
    }
}

pub async fn wait_for_state(handle: &MappingManagerHandle, state: LifecycleState) {
    tokio::time::timeout(STATE_TIMEOUT, handle.wait_for_state(|s| *s == state))
        .await
        .unwrap_or_else(|_| {
            panic!(
                "{} stuck in {} waiting for {state}",
                handle.mapping_id(),
                handle.state()
            )
        });
}

/// Polls until `condition` holds.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(STATE_TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
