use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ViewError, ViewResult};

/// Which document versions a view indexes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Only the latest version of each document. Entries emitted for an
    /// earlier version are removed when a new version is indexed.
    #[default]
    Heads,
    /// Every version. Entries accumulate.
    Versions,
}

/// What to do when an emitted key is already present.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateKey {
    /// Add the new value after the existing ones.
    #[default]
    Append,
    /// Add the new value before the existing ones.
    Prepend,
    /// Keep only the existing values.
    Skip,
    /// Keep only the new value.
    Overwrite,
}

/// Resolved view options.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewOptions {
    pub strategy: Strategy,
    pub on_duplicate_key: DuplicateKey,
    /// Store plain values in the index itself instead of behind a pointer.
    pub inline: bool,
    /// Upper bound on encoded key size, in bytes.
    pub fixed_size_key: Option<usize>,
    /// Upper bound on inline value size, in bytes.
    pub fixed_size_value: Option<usize>,
}

/// A view as declared by its caller.
///
/// Unset fields take the defaults of [`ViewOptions`] when the view is
/// initialized.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewDefinition {
    pub name: Option<String>,
    pub strategy: Option<Strategy>,
    pub on_duplicate_key: Option<DuplicateKey>,
    pub inline: Option<bool>,
    pub fixed_size_key: Option<usize>,
    pub fixed_size_value: Option<usize>,
}

impl ViewDefinition {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn on_duplicate_key(mut self, policy: DuplicateKey) -> Self {
        self.on_duplicate_key = Some(policy);
        self
    }

    pub fn inline(mut self, inline: bool) -> Self {
        self.inline = Some(inline);
        self
    }

    pub fn fixed_size_key(mut self, size: usize) -> Self {
        self.fixed_size_key = Some(size);
        self
    }

    pub fn fixed_size_value(mut self, size: usize) -> Self {
        self.fixed_size_value = Some(size);
        self
    }

    /// Validate the name and merge the declared options over the defaults.
    pub fn resolve(self) -> ViewResult<(String, ViewOptions)> {
        let name = match self.name {
            Some(name) if !name.trim().is_empty() => name,
            _ => {
                return Err(ViewError::InvalidArgument(
                    "view name must be specified".into(),
                ))
            }
        };
        let defaults = ViewOptions::default();
        let options = ViewOptions {
            strategy: self.strategy.unwrap_or(defaults.strategy),
            on_duplicate_key: self.on_duplicate_key.unwrap_or(defaults.on_duplicate_key),
            inline: self.inline.unwrap_or(defaults.inline),
            fixed_size_key: self.fixed_size_key.or(defaults.fixed_size_key),
            fixed_size_value: self.fixed_size_value.or(defaults.fixed_size_value),
        };
        Ok((name, options))
    }
}

/// Options for [`View::find`](crate::View::find).
///
/// Defaults: no bounds, no limit, offset 0, forward, values only.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FindOptions {
    /// First key to visit (inclusive).
    pub start_key: Option<Value>,
    /// Last key to visit (inclusive); keys extending it also match.
    pub end_key: Option<Value>,
    /// Shorthand for `start_key == end_key == key`.
    pub key: Option<Value>,
    pub limit: Option<usize>,
    pub offset: usize,
    /// Visit the range from its end.
    pub reverse: bool,
    /// Return keys alongside values.
    pub with_keys: bool,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key(mut self, key: Value) -> Self {
        self.key = Some(key);
        self
    }

    pub fn start_key(mut self, key: Value) -> Self {
        self.start_key = Some(key);
        self
    }

    pub fn end_key(mut self, key: Value) -> Self {
        self.end_key = Some(key);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn reverse(mut self, reverse: bool) -> Self {
        self.reverse = reverse;
        self
    }

    pub fn with_keys(mut self, with_keys: bool) -> Self {
        self.with_keys = with_keys;
        self
    }
}
