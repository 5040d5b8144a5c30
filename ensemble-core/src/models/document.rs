//! Template document tree

use crate::error::{EnsembleError, Result};
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

/// Nested workflow document: string leaves, sequences, mappings and plain scalars
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub enum Document {
    String(String),
    Sequence(Vec<Document>),
    Mapping(IndexMap<String, Document>),
    Scalar(Scalar),
}

/// Non-string leaf values
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Number(Number),
}

impl Document {
    /// Build a document from any serializable value
    pub fn from_serializable<T: Serialize>(value: &T) -> Result<Self> {
        serde_json::to_value(value)
            .map(Document::from)
            .map_err(|e| EnsembleError::MalformedTemplate(e.to_string()))
    }

    /// Convert the document back into a typed value
    pub fn into_typed<T: DeserializeOwned>(self) -> Result<T> {
        serde_json::from_value(Value::from(self))
            .map_err(|e| EnsembleError::MalformedTemplate(e.to_string()))
    }

    /// Look up a key on a mapping node
    pub fn get(&self, key: &str) -> Option<&Document> {
        match self {
            Document::Mapping(map) => map.get(key),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Document::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<Value> for Document {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Document::Scalar(Scalar::Null),
            Value::Bool(b) => Document::Scalar(Scalar::Bool(b)),
            Value::Number(n) => Document::Scalar(Scalar::Number(n)),
            Value::String(s) => Document::String(s),
            Value::Array(items) => {
                Document::Sequence(items.into_iter().map(Document::from).collect())
            }
            Value::Object(map) => Document::Mapping(
                map.into_iter()
                    .map(|(k, v)| (k, Document::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<Document> for Value {
    fn from(document: Document) -> Self {
        match document {
            Document::Scalar(Scalar::Null) => Value::Null,
            Document::Scalar(Scalar::Bool(b)) => Value::Bool(b),
            Document::Scalar(Scalar::Number(n)) => Value::Number(n),
            Document::String(s) => Value::String(s),
            Document::Sequence(items) => Value::Array(items.into_iter().map(Value::from).collect()),
            Document::Mapping(map) => {
                Value::Object(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<&str> for Document {
    fn from(s: &str) -> Self {
        Document::String(s.to_string())
    }
}
