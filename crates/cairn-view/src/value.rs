use cairn_store::Document;
use cairn_types::{DocumentId, Version};
use cairn_volume::Position;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A value as stored in an index entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexValue {
    /// Pointer to a stored document version.
    Document { id: DocumentId, version: Version },
    /// Position of a value container in the view's value log.
    Pointer(Position),
    /// JSON text held in the entry itself.
    Inline(String),
}

/// A value emitted by a map function or returned by a find.
#[derive(Clone, Debug, PartialEq)]
pub enum ViewValue {
    Document(Document),
    Value(Value),
}

impl ViewValue {
    pub fn as_document(&self) -> Option<&Document> {
        match self {
            Self::Document(document) => Some(document),
            Self::Value(_) => None,
        }
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Value(value) => Some(value),
            Self::Document(_) => None,
        }
    }
}

impl From<Document> for ViewValue {
    fn from(document: Document) -> Self {
        Self::Document(document)
    }
}

impl From<Value> for ViewValue {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}
