//! Chunk storage backends.
//!
//! A [`ChunkStorage`] owns the set of chunks a store routes across. It
//! allocates new chunks with fresh logs, registers them, and persists
//! whatever metadata is needed to find them again.

mod file;
mod memory;

use std::sync::Arc;

use cairn_types::DocumentId;

use crate::chunk::Chunk;
use crate::error::StoreResult;

pub use file::FileChunkStorage;
pub use memory::MemoryChunkStorage;

/// Registry of chunks.
pub trait ChunkStorage: Send + Sync {
    /// Every registered chunk, ordered by bounds.
    fn chunks(&self) -> StoreResult<Vec<Arc<Chunk>>>;

    /// Allocate an empty chunk with the next ordinal and a fresh log.
    ///
    /// The chunk is not registered until it is passed to [`save`].
    ///
    /// [`save`]: ChunkStorage::save
    fn create(&self, boundary: DocumentId) -> StoreResult<Chunk>;

    /// Register `chunk` and persist its metadata. Saving a chunk that is
    /// already registered does nothing.
    fn save(&self, chunk: Arc<Chunk>) -> StoreResult<()>;

    /// Release cached state; the next access reloads it.
    fn flush(&self) -> StoreResult<()>;

    /// Delete every chunk and its log.
    fn clear(&self) -> StoreResult<()>;
}

fn register(chunks: &mut Vec<Arc<Chunk>>, chunk: Arc<Chunk>) -> bool {
    if chunks.iter().any(|c| c.uuid() == chunk.uuid()) {
        return false;
    }
    chunks.push(chunk);
    chunks.sort_by_key(|c| c.bounds());
    true
}
