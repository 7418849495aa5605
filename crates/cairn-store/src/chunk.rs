use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, RwLock};

use cairn_types::{DocumentId, Version};
use cairn_volume::{Position, RecordLog};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::document::Document;
use crate::error::{StoreError, StoreResult};
use crate::slot::PREVIOUS_VERSION_SLOT;

/// Where a chunk sits among its siblings.
///
/// Chunks are ordered by boundary, then by ordinal (creation order), which
/// is the order the store scans them in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkBounds {
    /// Lowest identifier the chunk is responsible for.
    pub boundary: DocumentId,
    /// Creation sequence number within the storage.
    pub ordinal: u64,
}

/// Result of inserting a document into a chunk.
#[derive(Debug)]
pub enum InsertOutcome {
    /// The document was stored (or was already present) and the chunk is
    /// within capacity.
    Updated,
    /// A new identifier would take the chunk past capacity. Nothing was
    /// written; only [`Chunk::try_insert`] returns this.
    Full,
    /// The chunk outgrew its capacity. The returned chunk holds copies of
    /// every identifier at or above its boundary; the caller registers it
    /// and then calls [`Chunk::release_from`] on the original.
    Split(Chunk),
}

/// What the locked append step did.
enum Appended {
    Stored(usize),
    Present,
    Full,
}

type History = Vec<(Version, Position)>;

/// A contiguous slice of the identifier space backed by one record log.
///
/// Records are documents in transmittal form. The in-memory index maps each
/// identifier to its versions in write order together with their log
/// positions.
pub struct Chunk {
    uuid: DocumentId,
    bounds: ChunkBounds,
    log: Box<dyn RecordLog>,
    index: RwLock<BTreeMap<DocumentId, History>>,
    writer: Mutex<()>,
}

impl Chunk {
    /// Create an empty chunk over `log`.
    ///
    /// `uuid` names the chunk and its volume; it is unrelated to the
    /// documents the chunk holds.
    pub fn new(uuid: DocumentId, bounds: ChunkBounds, log: Box<dyn RecordLog>) -> Self {
        Self {
            uuid,
            bounds,
            log,
            index: RwLock::new(BTreeMap::new()),
            writer: Mutex::new(()),
        }
    }

    /// Rebuild a chunk from the records already in `log`.
    ///
    /// Only identifiers for which `owns` returns `true` are indexed; copies
    /// left behind by an earlier split are skipped.
    pub fn load(
        uuid: DocumentId,
        bounds: ChunkBounds,
        log: Box<dyn RecordLog>,
        owns: impl Fn(&DocumentId) -> bool,
    ) -> StoreResult<Self> {
        let chunk = Self::new(uuid, bounds, log);
        let mut skipped = 0usize;
        {
            let mut index = chunk.index.write().expect("lock poisoned");
            for (position, bytes) in chunk.log.records()? {
                let document = Document::from_transmittal(&bytes)?;
                let id = document.id();
                if !owns(&id) {
                    skipped += 1;
                    continue;
                }
                let version = document
                    .version()
                    .ok_or(StoreError::UnversionedDocument(id))?;
                let history = index.entry(id).or_default();
                if !history.iter().any(|(v, _)| *v == version) {
                    history.push((version, position));
                }
            }
        }
        debug!(
            chunk = %uuid.short_id(),
            ids = chunk.len(),
            skipped,
            "chunk loaded"
        );
        Ok(chunk)
    }

    pub fn uuid(&self) -> DocumentId {
        self.uuid
    }

    pub fn bounds(&self) -> ChunkBounds {
        self.bounds
    }

    pub fn boundary(&self) -> DocumentId {
        self.bounds.boundary
    }

    pub fn ordinal(&self) -> u64 {
        self.bounds.ordinal
    }

    /// Number of distinct identifiers in the chunk.
    pub fn len(&self) -> usize {
        self.index.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: &DocumentId) -> bool {
        self.index.read().expect("lock poisoned").contains_key(id)
    }

    /// Identifiers held by the chunk, sorted.
    pub fn ids(&self) -> Vec<DocumentId> {
        self.index
            .read()
            .expect("lock poisoned")
            .keys()
            .copied()
            .collect()
    }

    pub fn last_version(&self, id: &DocumentId) -> Option<Version> {
        let index = self.index.read().expect("lock poisoned");
        index.get(id)?.last().map(|(version, _)| *version)
    }

    /// Versions of `id` in write order.
    pub fn versions(&self, id: &DocumentId) -> Vec<Version> {
        let index = self.index.read().expect("lock poisoned");
        index
            .get(id)
            .map(|history| history.iter().map(|(version, _)| *version).collect())
            .unwrap_or_default()
    }

    /// Read `id` at `version`, or at its latest version.
    pub fn find(&self, id: &DocumentId, version: Option<&Version>) -> StoreResult<Option<Document>> {
        let position = {
            let index = self.index.read().expect("lock poisoned");
            let Some(history) = index.get(id) else {
                return Ok(None);
            };
            let entry = match version {
                Some(wanted) => history.iter().find(|(v, _)| v == wanted),
                None => history.last(),
            };
            match entry {
                Some((_, position)) => *position,
                None => return Ok(None),
            }
        };
        self.read_document(id, position).map(Some)
    }

    /// Latest version of every identifier in the chunk.
    pub fn heads(&self) -> StoreResult<Vec<Document>> {
        let latest: Vec<(DocumentId, Position)> = {
            let index = self.index.read().expect("lock poisoned");
            index
                .iter()
                .filter_map(|(id, history)| history.last().map(|(_, p)| (*id, *p)))
                .collect()
        };
        latest
            .iter()
            .map(|(id, position)| self.read_document(id, *position))
            .collect()
    }

    /// Append a document and index it, splitting if the chunk overflows.
    ///
    /// The document is linked to the identifier's current head while the
    /// chunk's writer lock is held: if its previous version is not that
    /// head, the previous-version slot is rewritten (which changes the
    /// version). Inserting a version that is already stored is a no-op.
    /// When the chunk then holds more than `capacity` identifiers it splits
    /// at the median identifier: `allocate` is called with the new boundary
    /// and the upper half's histories are copied into the chunk it returns.
    pub fn insert(
        &self,
        document: &mut Document,
        capacity: usize,
        allocate: impl FnOnce(DocumentId) -> StoreResult<Chunk>,
    ) -> StoreResult<InsertOutcome> {
        let _writer = self.writer.lock().expect("lock poisoned");
        match self.append(document, None)? {
            Appended::Stored(len) if len > capacity.max(1) => {
                self.split(allocate).map(InsertOutcome::Split)
            }
            _ => Ok(InsertOutcome::Updated),
        }
    }

    /// Like [`insert`](Chunk::insert), but never splits.
    ///
    /// Returns [`InsertOutcome::Full`] without writing anything when the
    /// document's identifier is new and the chunk already holds `capacity`
    /// identifiers.
    pub fn try_insert(&self, document: &mut Document, capacity: usize) -> StoreResult<InsertOutcome> {
        let _writer = self.writer.lock().expect("lock poisoned");
        match self.append(document, Some(capacity.max(1)))? {
            Appended::Full => Ok(InsertOutcome::Full),
            Appended::Stored(_) | Appended::Present => Ok(InsertOutcome::Updated),
        }
    }

    /// Drop every identifier at or above `boundary` from the index.
    ///
    /// The records stay in the log. Returns the number of identifiers
    /// released.
    pub fn release_from(&self, boundary: &DocumentId) -> usize {
        let _writer = self.writer.lock().expect("lock poisoned");
        let mut index = self.index.write().expect("lock poisoned");
        index.split_off(boundary).len()
    }

    /// Delete the chunk's log. The chunk is unusable afterwards.
    pub fn destroy(&self) -> StoreResult<()> {
        let _writer = self.writer.lock().expect("lock poisoned");
        self.index.write().expect("lock poisoned").clear();
        self.log.delete()?;
        Ok(())
    }

    // Caller holds the writer lock.
    fn append(&self, document: &mut Document, room: Option<usize>) -> StoreResult<Appended> {
        let id = document.id();
        let version = document
            .version()
            .ok_or(StoreError::UnversionedDocument(id))?;

        let (history, len) = {
            let index = self.index.read().expect("lock poisoned");
            (index.get(&id).cloned(), index.len())
        };
        let stored = |v: &Version| history.iter().flatten().any(|(known, _)| known == v);
        if stored(&version) {
            return Ok(Appended::Present);
        }
        if room.is_some_and(|room| history.is_none() && len >= room) {
            return Ok(Appended::Full);
        }

        let head = history.as_ref().and_then(|h| h.last()).map(|(v, _)| *v);
        if let Some(head) = head {
            if document.previous_version() != Some(head) {
                document.set(PREVIOUS_VERSION_SLOT, head.to_hex());
                debug!(
                    id = %id.short_id(),
                    head = %head.short_hex(),
                    "previous version relinked"
                );
            }
        }
        let version = document
            .version()
            .ok_or(StoreError::UnversionedDocument(id))?;
        if stored(&version) {
            return Ok(Appended::Present);
        }

        let position = self.log.append(document.to_json(true).as_bytes())?;
        let len = {
            let mut index = self.index.write().expect("lock poisoned");
            index.entry(id).or_default().push((version, position));
            index.len()
        };

        debug!(
            chunk = %self.uuid.short_id(),
            id = %id.short_id(),
            version = %version.short_hex(),
            position,
            "document appended"
        );
        Ok(Appended::Stored(len))
    }

    // Caller holds the writer lock.
    fn split(&self, allocate: impl FnOnce(DocumentId) -> StoreResult<Chunk>) -> StoreResult<Chunk> {
        let moved: Vec<(DocumentId, History)> = {
            let index = self.index.read().expect("lock poisoned");
            let median = index.len() / 2;
            index
                .iter()
                .skip(median)
                .map(|(id, history)| (*id, history.clone()))
                .collect()
        };
        let boundary = match moved.first() {
            Some((id, _)) => *id,
            None => {
                return Err(StoreError::CorruptChunk {
                    chunk: self.uuid,
                    reason: "split of an empty chunk".into(),
                })
            }
        };

        let new = allocate(boundary)?;
        let mut copied = BTreeMap::new();
        for (id, history) in &moved {
            let mut new_history = Vec::with_capacity(history.len());
            for (version, position) in history {
                let bytes = self.log.read(*position)?;
                new_history.push((*version, new.log.append(&bytes)?));
            }
            copied.insert(*id, new_history);
        }
        *new.index.write().expect("lock poisoned") = copied;

        debug!(
            chunk = %self.uuid.short_id(),
            new_chunk = %new.uuid.short_id(),
            boundary = %boundary.short_id(),
            moved = moved.len(),
            "chunk split"
        );
        Ok(new)
    }

    fn read_document(&self, id: &DocumentId, position: Position) -> StoreResult<Document> {
        let bytes = self.log.read(position)?;
        let document = Document::from_transmittal(&bytes)?;
        if document.id() != *id {
            return Err(StoreError::CorruptChunk {
                chunk: self.uuid,
                reason: format!(
                    "record at {position} holds {}, indexed as {id}",
                    document.id()
                ),
            });
        }
        Ok(document)
    }
}

impl fmt::Debug for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chunk")
            .field("uuid", &self.uuid)
            .field("bounds", &self.bounds)
            .field("ids", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use cairn_volume::MemoryLog;
    use serde_json::json;

    use super::*;

    fn id(n: u8) -> DocumentId {
        DocumentId::from_bytes([n; 16])
    }

    fn chunk(boundary: DocumentId, ordinal: u64) -> Chunk {
        Chunk::new(
            DocumentId::random(),
            ChunkBounds { boundary, ordinal },
            Box::new(MemoryLog::new()),
        )
    }

    fn doc(n: u8, value: i64) -> Document {
        let mut doc = Document::with_id(id(n));
        doc.set("value", value);
        doc
    }

    fn no_split(_: DocumentId) -> StoreResult<Chunk> {
        panic!("unexpected split")
    }

    #[test]
    fn insert_and_find() {
        let c = chunk(DocumentId::nil(), 0);
        let first = doc(1, 10);
        let mut second = first.clone();
        second.set("value", 11);

        c.insert(&mut first.clone(), 8, no_split).unwrap();
        c.insert(&mut second, 8, no_split).unwrap();
        assert_eq!(second.previous_version(), first.version());

        assert_eq!(c.len(), 1);
        assert_eq!(c.find(&id(1), None).unwrap(), Some(second.clone()));
        assert_eq!(
            c.find(&id(1), first.version().as_ref()).unwrap(),
            Some(first.clone())
        );
        assert_eq!(c.last_version(&id(1)), second.version());
        assert_eq!(
            c.versions(&id(1)),
            vec![first.version().unwrap(), second.version().unwrap()]
        );
    }

    #[test]
    fn find_misses() {
        let c = chunk(DocumentId::nil(), 0);
        c.insert(&mut doc(1, 1), 8, no_split).unwrap();
        assert!(c.find(&id(2), None).unwrap().is_none());
        let other = Version::from_hash([0; 32]);
        assert!(c.find(&id(1), Some(&other)).unwrap().is_none());
        assert!(c.last_version(&id(2)).is_none());
        assert!(c.versions(&id(2)).is_empty());
    }

    #[test]
    fn duplicate_version_is_noop() {
        let c = chunk(DocumentId::nil(), 0);
        let d = doc(1, 1);
        c.insert(&mut d.clone(), 8, no_split).unwrap();
        let mut again = d.clone();
        c.insert(&mut again, 8, no_split).unwrap();
        assert_eq!(again, d);
        assert_eq!(c.versions(&id(1)).len(), 1);
        assert_eq!(c.log.records().unwrap().len(), 1);
    }

    #[test]
    fn unversioned_insert_fails() {
        let c = chunk(DocumentId::nil(), 0);
        let mut d = Document::with_id(id(1));
        assert!(matches!(
            c.insert(&mut d, 8, no_split),
            Err(StoreError::UnversionedDocument(_))
        ));
    }

    #[test]
    fn stale_previous_version_is_relinked_to_head() {
        let c = chunk(DocumentId::nil(), 0);
        let genesis = doc(1, 0);
        c.insert(&mut genesis.clone(), 8, no_split).unwrap();

        let mut left = genesis.clone();
        left.set("value", 1);
        left.set(PREVIOUS_VERSION_SLOT, genesis.version().unwrap().to_hex());
        let mut right = left.clone();
        right.set("value", 2);

        c.insert(&mut left, 8, no_split).unwrap();
        c.insert(&mut right, 8, no_split).unwrap();

        assert_eq!(right.previous_version(), left.version());
        assert_eq!(c.last_version(&id(1)), right.version());
        assert_eq!(c.versions(&id(1)).len(), 3);
    }

    #[test]
    fn try_insert_reports_full_without_writing() {
        let c = chunk(DocumentId::nil(), 0);
        c.try_insert(&mut doc(1, 0), 1).unwrap();
        assert!(matches!(
            c.try_insert(&mut doc(2, 0), 1).unwrap(),
            InsertOutcome::Full
        ));
        assert_eq!(c.ids(), vec![id(1)]);
        assert_eq!(c.log.records().unwrap().len(), 1);

        let mut revised = doc(1, 0);
        revised.set("value", 3);
        assert!(matches!(
            c.try_insert(&mut revised, 1).unwrap(),
            InsertOutcome::Updated
        ));
        assert_eq!(c.versions(&id(1)).len(), 2);
    }

    #[test]
    fn split_moves_upper_half() {
        let c = chunk(DocumentId::nil(), 0);
        for n in 1..=4 {
            assert!(matches!(
                c.insert(&mut doc(n, 0), 4, no_split).unwrap(),
                InsertOutcome::Updated
            ));
        }
        let mut revised = doc(4, 0);
        revised.set("value", 1);
        c.insert(&mut revised, 4, no_split).unwrap();

        let outcome = c
            .insert(&mut doc(5, 0), 4, |boundary| Ok(chunk(boundary, 1)))
            .unwrap();
        let InsertOutcome::Split(new) = outcome else {
            panic!("expected split");
        };

        assert_eq!(new.boundary(), id(3));
        assert_eq!(new.ids(), vec![id(3), id(4), id(5)]);
        assert_eq!(new.versions(&id(4)).len(), 2);
        assert_eq!(new.find(&id(4), None).unwrap(), Some(revised));

        assert_eq!(c.release_from(&new.boundary()), 3);
        assert_eq!(c.ids(), vec![id(1), id(2)]);
    }

    #[test]
    fn failed_allocation_keeps_index() {
        let c = chunk(DocumentId::nil(), 0);
        c.insert(&mut doc(1, 0), 1, no_split).unwrap();
        let err = c
            .insert(&mut doc(2, 0), 1, |_| Err(StoreError::Serialization("full".into())))
            .unwrap_err();
        assert!(matches!(err, StoreError::Serialization(_)));
        assert_eq!(c.len(), 2);
    }

    #[test]
    fn load_rebuilds_owned_identifiers() {
        let log = MemoryLog::new();
        for n in [1u8, 5, 9] {
            log.append(doc(n, 0).to_json(true).as_bytes()).unwrap();
        }
        log.append(doc(5, 1).to_json(true).as_bytes()).unwrap();

        let bounds = ChunkBounds {
            boundary: id(5),
            ordinal: 3,
        };
        let c = Chunk::load(DocumentId::random(), bounds, Box::new(log), |i| *i >= id(5)).unwrap();
        assert_eq!(c.ids(), vec![id(5), id(9)]);
        assert_eq!(c.versions(&id(5)).len(), 2);
        assert_eq!(c.find(&id(5), None).unwrap().unwrap().get("value"), Some(&json!(1)));
    }

    #[test]
    fn load_rejects_tampered_record() {
        let log = MemoryLog::new();
        let wire = doc(1, 7).to_json(true).replace("\"value\":7", "\"value\":8");
        log.append(wire.as_bytes()).unwrap();
        let result = Chunk::load(
            DocumentId::random(),
            ChunkBounds {
                boundary: DocumentId::nil(),
                ordinal: 0,
            },
            Box::new(log),
            |_| true,
        );
        assert!(matches!(result, Err(StoreError::VersionMismatch { .. })));
    }

    #[test]
    fn heads_return_latest_versions() {
        let c = chunk(DocumentId::nil(), 0);
        c.insert(&mut doc(1, 0), 8, no_split).unwrap();
        c.insert(&mut doc(2, 0), 8, no_split).unwrap();
        let mut later = doc(1, 0);
        later.set("value", 5);
        c.insert(&mut later, 8, no_split).unwrap();

        let heads = c.heads().unwrap();
        assert_eq!(heads.len(), 2);
        assert_eq!(heads[0], later);
    }

    #[test]
    fn destroyed_chunk_is_closed() {
        let c = chunk(DocumentId::nil(), 0);
        c.insert(&mut doc(1, 0), 8, no_split).unwrap();
        c.destroy().unwrap();
        assert!(c.is_empty());
        assert!(matches!(
            c.insert(&mut doc(2, 0), 8, no_split),
            Err(StoreError::Volume(cairn_volume::VolumeError::Closed))
        ));
    }

    #[test]
    fn bounds_order_by_boundary_then_ordinal() {
        let a = ChunkBounds { boundary: id(1), ordinal: 9 };
        let b = ChunkBounds { boundary: id(2), ordinal: 0 };
        let c = ChunkBounds { boundary: id(2), ordinal: 1 };
        assert!(a < b && b < c);
    }
}
