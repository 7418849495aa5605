//! Versioned documents and chunked document storage for cairn.
//!
//! A [`Document`] is an ordered map of named slots. Every mutation
//! recomputes the document's version, a content hash of its canonical
//! serialization, and every save links the new version to the one stored
//! before it. Persisted `(identifier, version)` pairs never change.
//!
//! # Storage
//!
//! All stores implement the [`Store`] trait. The provided implementation,
//! [`SkiplistStore`], partitions the identifier space across ordered
//! [`Chunk`]s, each backed by one append-only record log:
//!
//! - [`MemoryChunkStorage`] -- chunks over in-memory logs
//! - [`FileChunkStorage`] -- chunks over volume files plus per-chunk metadata
//!
//! # Design Rules
//!
//! 1. A document cannot be saved without a version.
//! 2. A save routes to the last chunk whose boundary is at or below the
//!    document identifier; the first chunk absorbs everything below it.
//! 3. A chunk holding more than `chunk_capacity` identifiers splits at its
//!    median identifier; the upper half moves to a new chunk.
//! 4. Version chains are walked head to genesis and must be acyclic.

pub mod chunk;
pub mod config;
pub mod document;
pub mod error;
pub mod skiplist;
pub mod slot;
pub mod storage;
pub mod traits;

pub use chunk::{Chunk, ChunkBounds, InsertOutcome};
pub use config::StoreConfig;
pub use document::Document;
pub use error::{StoreError, StoreResult};
pub use skiplist::{route, SkiplistStore};
pub use slot::{is_reserved, PREVIOUS_VERSION_SLOT, VERSION_SLOT};
pub use storage::{ChunkStorage, FileChunkStorage, MemoryChunkStorage};
pub use traits::Store;
