use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};
use uuid::Uuid;

/// One generation of an index definition. A new generation is created each
/// time the definition is replaced; mappings of different generations are
/// tracked independently.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GenerationId {
    pub index_id: Uuid,
    pub generation: u64,
}

impl GenerationId {
    pub fn new(index_id: Uuid, generation: u64) -> Self {
        Self {
            index_id,
            generation,
        }
    }

    pub fn first(index_id: Uuid) -> Self {
        Self::new(index_id, 0)
    }

    pub fn next(&self) -> Self {
        Self::new(self.index_id, self.generation + 1)
    }
}

impl fmt::Display for GenerationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-g{}", self.index_id, self.generation)
    }
}

/// Key of a tracked synonym mapping: its index generation and mapping name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MappingId {
    generation_id: GenerationId,
    name: Arc<str>,
}

impl MappingId {
    pub fn new(generation_id: GenerationId, name: impl Into<String>) -> Self {
        Self {
            generation_id,
            name: Arc::from(name.into()),
        }
    }

    pub fn generation_id(&self) -> GenerationId {
        self.generation_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for MappingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.generation_id, self.name)
    }
}

/// A `database.collection` pair on the source backend.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Namespace {
    database: Arc<str>,
    collection: Arc<str>,
}

impl Namespace {
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            database: Arc::from(database.into()),
            collection: Arc::from(collection.into()),
        }
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.collection)
    }
}
