use crate::core::identifiers::{GenerationId, MappingId, Namespace};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Where a synonym mapping reads its documents from.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SynonymSource {
    pub collection: String,
}

/// A named synonym mapping declared on a search index.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SynonymMappingDefinition {
    pub name: String,
    pub analyzer: String,
    pub source: SynonymSource,
}

impl SynonymMappingDefinition {
    pub fn new(
        name: impl Into<String>,
        source_collection: impl Into<String>,
        analyzer: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            analyzer: analyzer.into(),
            source: SynonymSource {
                collection: source_collection.into(),
            },
        }
    }

    /// Source namespace of this mapping within the index's database.
    pub fn namespace(&self, database: &str) -> Namespace {
        Namespace::new(database, self.source.collection.clone())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IndexKind {
    Search,
    Vector,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexDefinition {
    pub index_id: Uuid,
    pub name: String,
    pub database: String,
    pub kind: IndexKind,
    #[serde(default)]
    pub synonyms: Vec<SynonymMappingDefinition>,
}

impl IndexDefinition {
    /// Synonym mappings this index tracks. Vector indexes never track any.
    pub fn synonym_mappings(&self) -> &[SynonymMappingDefinition] {
        match self.kind {
            IndexKind::Search => &self.synonyms,
            IndexKind::Vector => &[],
        }
    }
}

/// An index definition pinned to one generation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexGeneration {
    pub definition: IndexDefinition,
    pub generation_id: GenerationId,
}

impl IndexGeneration {
    pub fn new(definition: IndexDefinition, generation_id: GenerationId) -> Self {
        Self {
            definition,
            generation_id,
        }
    }

    pub fn mapping_id(&self, mapping: &SynonymMappingDefinition) -> MappingId {
        MappingId::new(self.generation_id, mapping.name.clone())
    }

    pub fn namespace(&self, mapping: &SynonymMappingDefinition) -> Namespace {
        mapping.namespace(&self.definition.database)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_camel_case_definition() {
        let value = json!({
            "indexId": "6f1c6d1e-9d4b-4f55-8a43-0d7f8a3b5e21",
            "name": "default",
            "database": "shop",
            "kind": "search",
            "synonyms": [
                { "name": "words", "analyzer": "lucene.standard", "source": { "collection": "syns" } }
            ]
        });
        let definition: IndexDefinition = serde_json::from_value(value).unwrap();

        assert_eq!(definition.synonym_mappings().len(), 1);
        let mapping = &definition.synonym_mappings()[0];
        assert_eq!(mapping.namespace(&definition.database).to_string(), "shop.syns");
    }

    #[test]
    fn vector_indexes_have_no_mappings() {
        let definition = IndexDefinition {
            index_id: Uuid::new_v4(),
            name: "vectors".into(),
            database: "shop".into(),
            kind: IndexKind::Vector,
            synonyms: vec![SynonymMappingDefinition::new("words", "syns", "lucene.standard")],
        };
        assert!(definition.synonym_mappings().is_empty());
    }
}
