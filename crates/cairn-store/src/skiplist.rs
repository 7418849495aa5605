use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use cairn_types::{DocumentId, Version};
use tracing::debug;

use crate::chunk::{Chunk, ChunkBounds, InsertOutcome};
use crate::config::StoreConfig;
use crate::document::Document;
use crate::error::{StoreError, StoreResult};
use crate::storage::ChunkStorage;
use crate::traits::Store;

/// Pick the chunk responsible for `id`.
///
/// The responsible chunk is the one with the greatest boundary at or below
/// `id`; among chunks sharing that boundary the lowest ordinal wins. When
/// `id` sorts below every boundary the first chunk (lowest bounds) absorbs
/// it. Returns an index into `bounds`, or `None` if `bounds` is empty.
/// `bounds` need not be sorted.
pub fn route(bounds: &[ChunkBounds], id: &DocumentId) -> Option<usize> {
    bounds
        .iter()
        .enumerate()
        .filter(|(_, b)| b.boundary <= *id)
        .max_by(|(_, a), (_, b)| {
            a.boundary
                .cmp(&b.boundary)
                .then_with(|| b.ordinal.cmp(&a.ordinal))
        })
        .or_else(|| bounds.iter().enumerate().min_by_key(|(_, b)| **b))
        .map(|(i, _)| i)
}

fn routed<'a>(chunks: &'a [Arc<Chunk>], id: &DocumentId) -> Option<&'a Arc<Chunk>> {
    let bounds: Vec<ChunkBounds> = chunks.iter().map(|c| c.bounds()).collect();
    route(&bounds, id).map(|i| &chunks[i])
}

/// Document store partitioned across ordered chunks.
///
/// Reads scan chunks in bounds order and return the first hit. A save
/// holds the layout lock for reading and the routed chunk's writer lock, so
/// saves into different chunks run side by side. Creating the first chunk
/// or registering a split takes the layout lock for writing. Readers never
/// take it.
pub struct SkiplistStore {
    storage: Box<dyn ChunkStorage>,
    config: StoreConfig,
    layout: RwLock<()>,
}

impl SkiplistStore {
    pub fn new(storage: impl ChunkStorage + 'static, config: StoreConfig) -> Self {
        Self {
            storage: Box::new(storage),
            config,
            layout: RwLock::new(()),
        }
    }

    pub fn storage(&self) -> &dyn ChunkStorage {
        self.storage.as_ref()
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Number of registered chunks.
    pub fn chunk_count(&self) -> StoreResult<usize> {
        Ok(self.storage.chunks()?.len())
    }

    /// Flush chunk storage. Waits for any in-flight save.
    pub fn flush(&self) -> StoreResult<()> {
        let _layout = self.layout.write().expect("lock poisoned");
        self.storage.flush()
    }

    /// Delete every stored document.
    pub fn clear(&self) -> StoreResult<()> {
        let _layout = self.layout.write().expect("lock poisoned");
        self.storage.clear()
    }

    fn holder(&self, id: &DocumentId) -> StoreResult<Option<Arc<Chunk>>> {
        Ok(self
            .storage
            .chunks()?
            .into_iter()
            .find(|chunk| chunk.contains(id)))
    }

    // Caller holds the layout lock for writing.
    fn routed_or_first(&self, id: &DocumentId) -> StoreResult<Arc<Chunk>> {
        if let Some(chunk) = routed(&self.storage.chunks()?, id) {
            return Ok(chunk.clone());
        }
        let first = Arc::new(self.storage.create(DocumentId::nil())?);
        self.storage.save(first.clone())?;
        Ok(first)
    }
}

impl Store for SkiplistStore {
    fn find(&self, id: &DocumentId, version: Option<&Version>) -> StoreResult<Option<Document>> {
        for chunk in self.storage.chunks()? {
            if let Some(document) = chunk.find(id, version)? {
                return Ok(Some(document));
            }
        }
        Ok(None)
    }

    fn exists(&self, id: &DocumentId) -> StoreResult<bool> {
        Ok(self.holder(id)?.is_some())
    }

    fn last_version(&self, id: &DocumentId) -> StoreResult<Option<Version>> {
        Ok(self.holder(id)?.and_then(|chunk| chunk.last_version(id)))
    }

    fn save(&self, mut document: Document) -> StoreResult<Document> {
        let id = document.id();
        if document.version().is_none() {
            return Err(StoreError::UnversionedDocument(id));
        }
        let capacity = self.config.effective_capacity();

        {
            let _layout = self.layout.read().expect("lock poisoned");
            let chunks = self.storage.chunks()?;
            if let Some(chunk) = routed(&chunks, &id) {
                if !matches!(chunk.try_insert(&mut document, capacity)?, InsertOutcome::Full) {
                    return Ok(document);
                }
            }
        }

        let _layout = self.layout.write().expect("lock poisoned");
        let chunk = self.routed_or_first(&id)?;
        if let InsertOutcome::Split(new) =
            chunk.insert(&mut document, capacity, |boundary| self.storage.create(boundary))?
        {
            let new = Arc::new(new);
            self.storage.save(new.clone())?;
            let released = chunk.release_from(&new.boundary());
            debug!(
                chunk = %chunk.uuid().short_id(),
                new_chunk = %new.uuid().short_id(),
                released,
                "split registered"
            );
        }

        Ok(document)
    }

    fn heads(&self) -> StoreResult<Vec<Document>> {
        let mut seen = HashSet::new();
        let mut heads = Vec::new();
        for chunk in self.storage.chunks()? {
            for document in chunk.heads()? {
                if seen.insert(document.id()) {
                    heads.push(document);
                }
            }
        }
        Ok(heads)
    }

    fn versions(&self, id: &DocumentId) -> StoreResult<Vec<Version>> {
        Ok(self
            .holder(id)?
            .map(|chunk| chunk.versions(id))
            .unwrap_or_default())
    }
}

impl std::fmt::Debug for SkiplistStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SkiplistStore")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
