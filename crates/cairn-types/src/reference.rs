use std::fmt;

use serde_json::Value;

use crate::error::TypeError;
use crate::identifier::DocumentId;
use crate::version::Version;

const PREFIX: &str = "@#";

/// A slot value that points at another document.
///
/// References are stored in slots as strings: `@#<uuid>` names the document
/// as a whole, `@#<uuid>.<version>` pins one snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Reference {
    pub id: DocumentId,
    pub version: Option<Version>,
}

impl Reference {
    pub fn new(id: DocumentId) -> Self {
        Self { id, version: None }
    }

    pub fn pinned(id: DocumentId, version: Version) -> Self {
        Self {
            id,
            version: Some(version),
        }
    }

    /// Parse the string form. Returns an error if `s` is not a reference.
    pub fn parse(s: &str) -> Result<Self, TypeError> {
        let body = s
            .strip_prefix(PREFIX)
            .ok_or_else(|| TypeError::InvalidReference(s.to_string()))?;
        let (id, version) = match body.split_once('.') {
            Some((id, version)) => (id, Some(Version::from_hex(version)?)),
            None => (body, None),
        };
        Ok(Self {
            id: DocumentId::parse(id)?,
            version,
        })
    }

    /// Interpret a slot value as a reference, if it is one.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) if s.starts_with(PREFIX) => Self::parse(s).ok(),
            _ => None,
        }
    }

    /// The slot value form of this reference.
    pub fn to_value(&self) -> Value {
        Value::String(self.to_string())
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(v) => write!(f, "{PREFIX}{}.{}", self.id, v.to_hex()),
            None => write!(f, "{PREFIX}{}", self.id),
        }
    }
}
