use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use cairn_types::DocumentId;
use cairn_volume::MemoryLog;

use super::{register, ChunkStorage};
use crate::chunk::{Chunk, ChunkBounds};
use crate::error::StoreResult;

/// Chunk storage over in-memory logs.
///
/// Intended for tests and ephemeral databases. Nothing survives the
/// process.
pub struct MemoryChunkStorage {
    chunks: RwLock<Vec<Arc<Chunk>>>,
    next_ordinal: AtomicU64,
}

impl MemoryChunkStorage {
    pub fn new() -> Self {
        Self {
            chunks: RwLock::new(Vec::new()),
            next_ordinal: AtomicU64::new(0),
        }
    }
}

impl Default for MemoryChunkStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkStorage for MemoryChunkStorage {
    fn chunks(&self) -> StoreResult<Vec<Arc<Chunk>>> {
        Ok(self.chunks.read().expect("lock poisoned").clone())
    }

    fn create(&self, boundary: DocumentId) -> StoreResult<Chunk> {
        let ordinal = self.next_ordinal.fetch_add(1, Ordering::Relaxed);
        Ok(Chunk::new(
            DocumentId::random(),
            ChunkBounds { boundary, ordinal },
            Box::new(MemoryLog::new()),
        ))
    }

    fn save(&self, chunk: Arc<Chunk>) -> StoreResult<()> {
        register(&mut self.chunks.write().expect("lock poisoned"), chunk);
        Ok(())
    }

    fn flush(&self) -> StoreResult<()> {
        Ok(())
    }

    fn clear(&self) -> StoreResult<()> {
        let chunks = std::mem::take(&mut *self.chunks.write().expect("lock poisoned"));
        for chunk in chunks {
            chunk.destroy()?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for MemoryChunkStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryChunkStorage")
            .field("chunks", &self.chunks.read().expect("lock poisoned").len())
            .finish()
    }
}
