use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use cairn_types::DocumentId;
use cairn_volume::{Volume, VolumeConfig};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{register, ChunkStorage};
use crate::chunk::{Chunk, ChunkBounds};
use crate::error::{StoreError, StoreResult};
use crate::skiplist::route;

const CHUNKS_DIR: &str = "chunks";
const VOLUMES_DIR: &str = "volumes";
const META_EXTENSION: &str = "json";
const PARTIAL_EXTENSION: &str = "json.tmp";

/// Persisted description of one chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
struct ChunkMeta {
    uuid: DocumentId,
    boundary: DocumentId,
    ordinal: u64,
}

impl ChunkMeta {
    fn of(chunk: &Chunk) -> Self {
        Self {
            uuid: chunk.uuid(),
            boundary: chunk.boundary(),
            ordinal: chunk.ordinal(),
        }
    }

    fn bounds(&self) -> ChunkBounds {
        ChunkBounds {
            boundary: self.boundary,
            ordinal: self.ordinal,
        }
    }
}

/// Chunk storage over volume files.
///
/// Layout below the root directory:
///
/// ```text
/// chunks/<uuid>.json          chunk metadata (boundary, ordinal)
/// volumes/aa/bb/<uuid>.cv     the chunk's volume
/// ```
///
/// Chunks are loaded lazily on first access and cached until [`flush`] or
/// [`clear`]. Loading rebuilds each chunk's index from its volume, keeping
/// only the identifiers the chunk owns among its siblings.
///
/// [`flush`]: ChunkStorage::flush
/// [`clear`]: ChunkStorage::clear
pub struct FileChunkStorage {
    root: PathBuf,
    config: VolumeConfig,
    cache: RwLock<Option<Vec<Arc<Chunk>>>>,
    next_ordinal: AtomicU64,
}

impl FileChunkStorage {
    /// Open (or create) chunk storage rooted at `root`.
    pub fn open(root: impl Into<PathBuf>, config: VolumeConfig) -> StoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(root.join(CHUNKS_DIR))?;
        fs::create_dir_all(root.join(VOLUMES_DIR))?;

        let next_ordinal = read_metas(&root.join(CHUNKS_DIR))?
            .iter()
            .map(|meta| meta.ordinal + 1)
            .max()
            .unwrap_or(0);

        Ok(Self {
            root,
            config,
            cache: RwLock::new(None),
            next_ordinal: AtomicU64::new(next_ordinal),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns `true` while chunks are held in memory.
    pub fn is_cached(&self) -> bool {
        self.cache.read().expect("lock poisoned").is_some()
    }

    fn chunks_dir(&self) -> PathBuf {
        self.root.join(CHUNKS_DIR)
    }

    fn volumes_dir(&self) -> PathBuf {
        self.root.join(VOLUMES_DIR)
    }

    fn meta_path(&self, uuid: &DocumentId) -> PathBuf {
        self.chunks_dir()
            .join(uuid.to_hex())
            .with_extension(META_EXTENSION)
    }

    /// Write a chunk's metadata once, when it is registered.
    ///
    /// The file is written under a temporary name, synced and renamed into
    /// place, so a crash leaves either no metadata or a complete file.
    fn write_meta(&self, chunk: &Chunk) -> StoreResult<()> {
        let json = serde_json::to_vec_pretty(&ChunkMeta::of(chunk))
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let path = self.meta_path(&chunk.uuid());
        let partial = path.with_extension(PARTIAL_EXTENSION);
        {
            let mut file = fs::File::create(&partial)?;
            file.write_all(&json)?;
            file.sync_all()?;
        }
        fs::rename(&partial, &path)?;
        Ok(())
    }

    fn load(&self) -> StoreResult<Vec<Arc<Chunk>>> {
        let mut metas = read_metas(&self.chunks_dir())?;
        metas.sort_by_key(ChunkMeta::bounds);
        let bounds: Vec<ChunkBounds> = metas.iter().map(ChunkMeta::bounds).collect();

        let mut chunks = Vec::with_capacity(metas.len());
        for (i, meta) in metas.iter().enumerate() {
            let volume = Volume::open_in_dir(&self.volumes_dir(), &meta.uuid, self.config)?;
            let chunk = Chunk::load(meta.uuid, meta.bounds(), Box::new(volume), |id| {
                route(&bounds, id) == Some(i)
            })?;
            chunks.push(Arc::new(chunk));
        }

        info!(
            root = %self.root.display(),
            chunks = chunks.len(),
            "chunk storage loaded"
        );
        Ok(chunks)
    }

    fn with_cache<R>(
        &self,
        f: impl FnOnce(&mut Vec<Arc<Chunk>>) -> StoreResult<R>,
    ) -> StoreResult<R> {
        let mut cache = self.cache.write().expect("lock poisoned");
        if cache.is_none() {
            *cache = Some(self.load()?);
        }
        f(cache.get_or_insert_with(Vec::new))
    }
}

impl ChunkStorage for FileChunkStorage {
    fn chunks(&self) -> StoreResult<Vec<Arc<Chunk>>> {
        if let Some(chunks) = self.cache.read().expect("lock poisoned").as_ref() {
            return Ok(chunks.clone());
        }
        self.with_cache(|chunks| Ok(chunks.clone()))
    }

    fn create(&self, boundary: DocumentId) -> StoreResult<Chunk> {
        let uuid = DocumentId::random();
        let ordinal = self.next_ordinal.fetch_add(1, Ordering::Relaxed);
        let volume = Volume::open_in_dir(&self.volumes_dir(), &uuid, self.config)?;
        debug!(chunk = %uuid.short_id(), ordinal, "chunk created");
        Ok(Chunk::new(uuid, ChunkBounds { boundary, ordinal }, Box::new(volume)))
    }

    fn save(&self, chunk: Arc<Chunk>) -> StoreResult<()> {
        self.with_cache(|chunks| {
            if chunks.iter().any(|c| c.uuid() == chunk.uuid()) {
                return Ok(());
            }
            self.write_meta(&chunk)?;
            debug!(
                chunk = %chunk.uuid().short_id(),
                boundary = %chunk.boundary().short_id(),
                "chunk registered"
            );
            register(chunks, chunk);
            Ok(())
        })
    }

    fn flush(&self) -> StoreResult<()> {
        let cached = self.cache.write().expect("lock poisoned").take();
        if let Some(chunks) = cached {
            debug!(chunks = chunks.len(), "chunk storage flushed");
        }
        Ok(())
    }

    fn clear(&self) -> StoreResult<()> {
        let mut cache = self.cache.write().expect("lock poisoned");
        if let Some(chunks) = cache.take() {
            for chunk in chunks {
                chunk.destroy()?;
            }
        }
        for dir in [self.chunks_dir(), self.volumes_dir()] {
            match fs::remove_dir_all(&dir) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            fs::create_dir_all(&dir)?;
        }
        *cache = Some(Vec::new());
        info!(root = %self.root.display(), "chunk storage cleared");
        Ok(())
    }
}

impl std::fmt::Debug for FileChunkStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileChunkStorage")
            .field("root", &self.root)
            .field("cached", &self.is_cached())
            .finish()
    }
}

fn read_metas(dir: &Path) -> StoreResult<Vec<ChunkMeta>> {
    let mut metas = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some(META_EXTENSION) {
            continue;
        }
        let bytes = fs::read(&path)?;
        let meta: ChunkMeta = serde_json::from_slice(&bytes)
            .map_err(|e| StoreError::Serialization(format!("{}: {e}", path.display())))?;
        metas.push(meta);
    }
    Ok(metas)
}
