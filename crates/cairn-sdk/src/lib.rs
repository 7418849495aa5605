//! High-level API for cairn.
//!
//! [`Database`] is the entry point for applications embedding cairn. It is
//! an explicit context object: the store, the view registry and the
//! configuration travel together and are passed where needed.
//!
//! ```no_run
//! use cairn_sdk::{Database, DatabaseConfig, Document, FindOptions};
//! use serde_json::json;
//!
//! # fn main() -> cairn_sdk::SdkResult<()> {
//! let db = Database::open(DatabaseConfig::file("/tmp/cairn"))?;
//! let mut doc = Document::from_slots([("name", json!("ann"))]);
//! db.save(&mut doc)?;
//! let _rows = db.find_slots(&FindOptions::new().key(json!(["name", "ann"])))?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod database;
pub mod error;

pub use config::{DatabaseConfig, IndexType, StorageType, StoreType};
pub use database::Database;
pub use error::{SdkError, SdkResult};

// Re-export key types
pub use cairn_store::{is_reserved, Document, Store, StoreError};
pub use cairn_types::{DocumentId, Reference, Version};
pub use cairn_view::{
    DuplicateKey, FindOptions, Mapper, Strategy, View, ViewDefinition, ViewError, ViewRow,
    ViewValue, ALL_SLOTS_VIEW,
};
