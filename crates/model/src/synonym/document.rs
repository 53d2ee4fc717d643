use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MappingType {
    /// Every term in `synonyms` is interchangeable with every other.
    Equivalent,
    /// Each term in `input` expands to the terms in `synonyms`.
    Explicit,
}

impl fmt::Display for MappingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MappingType::Equivalent => f.write_str("equivalent"),
            MappingType::Explicit => f.write_str("explicit"),
        }
    }
}

/// Why a source document could not be read as a synonym document.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DocumentError {
    #[error("synonym document must be an object")]
    NotAnObject,

    #[error("\"{0}\" is required")]
    MissingField(&'static str),

    #[error("\"{field}\" must be {expected}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },

    #[error("\"{0}\" must not be empty")]
    EmptyList(&'static str),

    #[error("\"{0}\" must not contain blank strings")]
    BlankEntry(&'static str),

    #[error("\"mappingType\" must be one of [equivalent, explicit], found {0:?}")]
    UnknownMappingType(String),
}

/// Error from [`SynonymDocument::from_value`], carrying the document's `_id`
/// when it could be read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidSynonymDocument {
    pub doc_id: Option<String>,
    pub reason: DocumentError,
}

impl fmt::Display for InvalidSynonymDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.doc_id {
            Some(id) => write!(f, "{} (document _id: {id})", self.reason),
            None => write!(f, "{}", self.reason),
        }
    }
}

impl std::error::Error for InvalidSynonymDocument {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.reason)
    }
}

/// A validated entry of a synonym source collection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SynonymDocument {
    mapping_type: MappingType,
    synonyms: Vec<String>,
    input: Option<Vec<String>>,
    doc_id: Option<String>,
}

impl SynonymDocument {
    pub fn equivalent(synonyms: Vec<String>) -> Self {
        Self {
            mapping_type: MappingType::Equivalent,
            synonyms,
            input: None,
            doc_id: None,
        }
    }

    pub fn explicit(input: Vec<String>, synonyms: Vec<String>) -> Self {
        Self {
            mapping_type: MappingType::Explicit,
            synonyms,
            input: Some(input),
            doc_id: None,
        }
    }

    pub fn with_doc_id(mut self, doc_id: impl Into<String>) -> Self {
        self.doc_id = Some(doc_id.into());
        self
    }

    /// Validates a raw source document.
    ///
    /// Unknown fields are ignored, and so is `input` on equivalent documents.
    /// `_id` is read on a best-effort basis and never fails validation.
    pub fn from_value(value: &Value) -> Result<Self, InvalidSynonymDocument> {
        let doc_id = value.get("_id").and_then(id_string);
        match Self::parse(value) {
            Ok(document) => Ok(Self { doc_id, ..document }),
            Err(reason) => Err(InvalidSynonymDocument { doc_id, reason }),
        }
    }

    fn parse(value: &Value) -> Result<Self, DocumentError> {
        let object = value.as_object().ok_or(DocumentError::NotAnObject)?;

        let mapping_type = match object.get("mappingType") {
            None => return Err(DocumentError::MissingField("mappingType")),
            Some(Value::String(raw)) => match raw.as_str() {
                "equivalent" => MappingType::Equivalent,
                "explicit" => MappingType::Explicit,
                other => return Err(DocumentError::UnknownMappingType(other.to_string())),
            },
            Some(_) => {
                return Err(DocumentError::WrongType {
                    field: "mappingType",
                    expected: "a string",
                });
            }
        };

        let synonyms = string_list(object, "synonyms")?;
        let input = match mapping_type {
            MappingType::Equivalent => None,
            MappingType::Explicit => Some(string_list(object, "input")?),
        };

        Ok(Self {
            mapping_type,
            synonyms,
            input,
            doc_id: None,
        })
    }

    pub fn to_value(&self) -> Value {
        let mut object = Map::new();
        if let Some(id) = &self.doc_id {
            object.insert("_id".into(), json!(id));
        }
        object.insert("mappingType".into(), json!(self.mapping_type));
        object.insert("synonyms".into(), json!(self.synonyms));
        if let Some(input) = &self.input {
            object.insert("input".into(), json!(input));
        }
        Value::Object(object)
    }

    pub fn mapping_type(&self) -> MappingType {
        self.mapping_type
    }

    pub fn synonyms(&self) -> &[String] {
        &self.synonyms
    }

    pub fn input(&self) -> Option<&[String]> {
        self.input.as_deref()
    }

    pub fn doc_id(&self) -> Option<&str> {
        self.doc_id.as_deref()
    }
}

fn string_list(object: &Map<String, Value>, field: &'static str) -> Result<Vec<String>, DocumentError> {
    let items = match object.get(field) {
        None => return Err(DocumentError::MissingField(field)),
        Some(Value::Array(items)) => items,
        Some(_) => {
            return Err(DocumentError::WrongType {
                field,
                expected: "a list of strings",
            });
        }
    };

    if items.is_empty() {
        return Err(DocumentError::EmptyList(field));
    }

    items
        .iter()
        .map(|item| match item {
            Value::String(s) if s.trim().is_empty() => Err(DocumentError::BlankEntry(field)),
            Value::String(s) => Ok(s.clone()),
            _ => Err(DocumentError::WrongType {
                field,
                expected: "a list of strings",
            }),
        })
        .collect()
}

/// Readable form of an `_id` value, for error messages.
///
/// Object ids and uuids arrive in extended-JSON form (`{"$oid": ..}`,
/// `{"$uuid": ..}`). Anything else yields `None`.
pub fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(n.to_string()),
        Value::Number(n) => n.as_f64().map(|f| format!("{f:?}")),
        Value::Object(object) if object.len() == 1 => {
            if let Some(Value::String(oid)) = object.get("$oid") {
                return Some(oid.to_ascii_lowercase());
            }
            if let Some(Value::String(raw)) = object.get("$uuid") {
                return Uuid::parse_str(raw).ok().map(|uuid| uuid.to_string());
            }
            None
        }
        _ => None,
    }
}
