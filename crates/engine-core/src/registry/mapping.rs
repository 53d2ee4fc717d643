use super::SynonymMappingBuilder;
use crate::error::MappingError;
use model::synonym::document::{MappingType, SynonymDocument};
use std::collections::{BTreeSet, HashMap};

/// A built set of synonym rules.
///
/// Terms are stored in analyzed form. `lookup` returns every term a query
/// term expands to, including itself when it belongs to an equivalence group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynonymMapping {
    analyzer: String,
    rules: HashMap<String, BTreeSet<String>>,
    documents: usize,
}

impl SynonymMapping {
    pub fn empty(analyzer: impl Into<String>) -> Self {
        Self {
            analyzer: analyzer.into(),
            rules: HashMap::new(),
            documents: 0,
        }
    }

    pub fn analyzer(&self) -> &str {
        &self.analyzer
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Number of source documents this mapping was built from.
    pub fn document_count(&self) -> usize {
        self.documents
    }

    pub fn lookup(&self, term: &str) -> Vec<&str> {
        self.rules
            .get(&analyze(term))
            .map(|targets| targets.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }
}

/// Stand-in for the index analyzer: trims, lowercases and collapses inner
/// whitespace.
pub fn analyze(term: &str) -> String {
    term.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Builds a [`SynonymMapping`] from parsed documents.
#[derive(Debug)]
pub struct TermMappingBuilder {
    mapping: SynonymMapping,
}

impl TermMappingBuilder {
    pub fn new(analyzer: impl Into<String>) -> Self {
        Self {
            mapping: SynonymMapping::empty(analyzer),
        }
    }

    fn analyze_all(terms: &[String]) -> Result<Vec<String>, MappingError> {
        terms
            .iter()
            .map(|term| {
                let analyzed = analyze(term);
                if analyzed.is_empty() {
                    Err(MappingError::InvalidDocument(
                        "analyzed synonym string to empty".to_string(),
                    ))
                } else {
                    Ok(analyzed)
                }
            })
            .collect()
    }
}

impl SynonymMappingBuilder for TermMappingBuilder {
    fn add_document(&mut self, document: &SynonymDocument) -> Result<(), MappingError> {
        let synonyms = Self::analyze_all(document.synonyms())?;

        match document.mapping_type() {
            MappingType::Equivalent => {
                for term in &synonyms {
                    self.mapping
                        .rules
                        .entry(term.clone())
                        .or_default()
                        .extend(synonyms.iter().cloned());
                }
            }
            MappingType::Explicit => {
                let input = Self::analyze_all(document.input().unwrap_or_default())?;
                for term in input {
                    self.mapping
                        .rules
                        .entry(term)
                        .or_default()
                        .extend(synonyms.iter().cloned());
                }
            }
        }

        self.mapping.documents += 1;
        Ok(())
    }

    fn build(self: Box<Self>) -> Result<SynonymMapping, MappingError> {
        Ok(self.mapping)
    }
}
