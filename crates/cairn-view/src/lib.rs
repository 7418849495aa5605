//! # cairn-view
//!
//! Sorted secondary indexes derived from documents.
//!
//! A [`View`] runs a [`Mapper`] over each saved document and records the
//! emitted `(key, value)` pairs in an [`Index`]. Keys are JSON values
//! encoded by [`KeyCodec`] so that byte order is key order; values are
//! either pointers to document versions or JSON containers.
//!
//! # Key Types
//!
//! - [`View`] with its [`ViewDefinition`] and resolved [`ViewOptions`]
//! - [`Strategy`]: index only heads, or every version
//! - [`DuplicateKey`]: append, prepend, skip or overwrite on a repeated key
//! - [`FindOptions`] / [`ViewRow`]: range queries
//! - [`Index`] over an [`IndexBacking`] (memory or volumes)
//!
//! # Design Rules
//!
//! 1. Each view update is one checksummed index-log record
//! 2. Opening an index replays its log; nothing else is persisted
//! 3. Corrupt records are reported, never skipped

pub mod builtin;
pub mod error;
pub mod index;
pub mod key;
pub mod options;
pub mod value;
pub mod view;

pub use builtin::{all_slots, map_all_slots, ALL_SLOTS_VIEW};
pub use error::{ViewError, ViewResult};
pub use index::{Index, IndexBacking, IndexEntry, Source};
pub use key::KeyCodec;
pub use options::{DuplicateKey, FindOptions, Strategy, ViewDefinition, ViewOptions};
pub use value::{IndexValue, ViewValue};
pub use view::{Mapper, View, ViewRow};
