//! Persisted sorted index behind a view.
//!
//! An index is two record logs:
//!
//! ```text
//! index log   [4 bytes: CRC32 of body (LE)][bincode IndexUpdate]   one per view update
//! value log   [JSON text]                                          one per distinct plain value
//! ```
//!
//! The in-memory entry map is rebuilt on open by replaying the index log.
//! Each update, including every entry it inserts and whether it replaces
//! the identifier's earlier entries, is a single record, so a crash leaves
//! either all of an update or none of it.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use cairn_crypto::ContentHasher;
use cairn_types::{DocumentId, Version};
use cairn_volume::{MemoryLog, Position, RecordLog, Volume, VolumeConfig};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{ViewError, ViewResult};
use crate::options::DuplicateKey;
use crate::value::IndexValue;

const INDEX_FILE: &str = "index.cv";
const VALUES_FILE: &str = "values.cv";
const CRC_SIZE: usize = 4;

/// Where an index keeps its logs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IndexBacking {
    /// In-memory logs; nothing survives the process.
    Memory,
    /// Volumes under `dir/<view name>/`.
    File { dir: PathBuf, volume: VolumeConfig },
}

impl IndexBacking {
    /// File backing with default volume settings.
    pub fn file(dir: impl Into<PathBuf>) -> Self {
        Self::File {
            dir: dir.into(),
            volume: VolumeConfig::default(),
        }
    }

    fn view_dir(&self, name: &str) -> Option<PathBuf> {
        match self {
            Self::Memory => None,
            Self::File { dir, .. } => Some(dir.join(name)),
        }
    }

    fn open_logs(&self, name: &str) -> ViewResult<(Box<dyn RecordLog>, Box<dyn RecordLog>)> {
        match self {
            Self::Memory => Ok((Box::new(MemoryLog::new()), Box::new(MemoryLog::new()))),
            Self::File { dir, volume } => {
                check_file_name(name)?;
                let base = dir.join(name);
                let log = Volume::open_or_create(&base.join(INDEX_FILE), *volume)?;
                let values = Volume::open_or_create(&base.join(VALUES_FILE), *volume)?;
                Ok((Box::new(log), Box::new(values)))
            }
        }
    }
}

fn check_file_name(name: &str) -> ViewResult<()> {
    let plain = Path::new(name).file_name().and_then(|n| n.to_str()) == Some(name);
    if !plain || name.starts_with('.') {
        return Err(ViewError::InvalidArgument(format!(
            "view name {name:?} cannot be used as a directory name"
        )));
    }
    Ok(())
}

/// The document version an entry was emitted for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Source {
    pub id: DocumentId,
    pub version: Version,
}

/// One value under an index key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexEntry {
    pub value: IndexValue,
    pub source: Source,
}

/// One view update as recorded in the index log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
struct IndexUpdate {
    source: Source,
    replace: bool,
    entries: Vec<(String, IndexValue)>,
}

fn encode_record(update: &IndexUpdate) -> ViewResult<Vec<u8>> {
    let body = bincode::serialize(update).map_err(|e| ViewError::Serialization(e.to_string()))?;
    let mut record = Vec::with_capacity(CRC_SIZE + body.len());
    record.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());
    record.extend_from_slice(&body);
    Ok(record)
}

fn decode_record(position: Position, record: &[u8]) -> ViewResult<IndexUpdate> {
    let corrupt = |reason: String| ViewError::CorruptIndex { position, reason };
    if record.len() < CRC_SIZE {
        return Err(corrupt(format!("record of {} bytes", record.len())));
    }
    let (crc, body) = record.split_at(CRC_SIZE);
    let expected = u32::from_le_bytes([crc[0], crc[1], crc[2], crc[3]]);
    let actual = crc32fast::hash(body);
    if expected != actual {
        return Err(corrupt(format!(
            "checksum mismatch: expected {expected:#010x}, got {actual:#010x}"
        )));
    }
    bincode::deserialize(body).map_err(|e| corrupt(e.to_string()))
}

struct IndexState {
    log: Box<dyn RecordLog>,
    values: Box<dyn RecordLog>,
    entries: BTreeMap<String, Vec<IndexEntry>>,
    keys_by_id: HashMap<DocumentId, BTreeSet<String>>,
    indexed: HashSet<Source>,
    containers: HashMap<Version, Position>,
    deleted: bool,
}

impl IndexState {
    fn new(log: Box<dyn RecordLog>, values: Box<dyn RecordLog>) -> Self {
        Self {
            log,
            values,
            entries: BTreeMap::new(),
            keys_by_id: HashMap::new(),
            indexed: HashSet::new(),
            containers: HashMap::new(),
            deleted: false,
        }
    }

    fn apply(&mut self, update: IndexUpdate, policy: DuplicateKey) {
        let IndexUpdate {
            source,
            replace,
            entries,
        } = update;

        if replace {
            self.remove_id(&source.id);
        }

        for (key, value) in entries {
            let list = self.entries.entry(key.clone()).or_default();
            let entry = IndexEntry { value, source };
            match policy {
                DuplicateKey::Append => list.push(entry),
                DuplicateKey::Prepend => list.insert(0, entry),
                DuplicateKey::Overwrite => *list = vec![entry],
                DuplicateKey::Skip if list.is_empty() => list.push(entry),
                DuplicateKey::Skip => continue,
            }
            self.keys_by_id.entry(source.id).or_default().insert(key);
        }

        self.indexed.insert(source);
    }

    fn remove_id(&mut self, id: &DocumentId) {
        let Some(keys) = self.keys_by_id.remove(id) else {
            return;
        };
        for key in keys {
            if let Some(list) = self.entries.get_mut(&key) {
                list.retain(|entry| entry.source.id != *id);
                if list.is_empty() {
                    self.entries.remove(&key);
                }
            }
        }
    }
}

/// Sorted multimap from encoded keys to index entries.
pub struct Index {
    name: String,
    backing: IndexBacking,
    policy: DuplicateKey,
    state: RwLock<IndexState>,
}

impl Index {
    /// Open the index named `name`, replaying any existing log.
    pub fn open(name: &str, backing: IndexBacking, policy: DuplicateKey) -> ViewResult<Self> {
        let (log, values) = backing.open_logs(name)?;
        let mut state = IndexState::new(log, values);

        for (position, bytes) in state.values.records()? {
            state
                .containers
                .insert(ContentHasher::CONTAINER.hash(&bytes), position);
        }
        let records = state.log.records()?;
        let replayed = records.len();
        for (position, bytes) in records {
            let update = decode_record(position, &bytes)?;
            state.apply(update, policy);
        }

        debug!(view = name, replayed, keys = state.entries.len(), "index opened");
        Ok(Self {
            name: name.to_string(),
            backing,
            policy,
            state: RwLock::new(state),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Total number of entries across all keys.
    pub fn len(&self) -> usize {
        let state = self.state.read().expect("lock poisoned");
        state.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().expect("lock poisoned").entries.is_empty()
    }

    /// Returns `true` once an update for `source` has been recorded.
    pub fn is_indexed(&self, source: &Source) -> bool {
        self.state
            .read()
            .expect("lock poisoned")
            .indexed
            .contains(source)
    }

    /// Returns `true` if the index's storage is present.
    ///
    /// A memory index exists from open until [`delete`](Self::delete); a
    /// file index additionally needs its index volume on disk.
    pub fn exists(&self) -> bool {
        if self.state.read().expect("lock poisoned").deleted {
            return false;
        }
        match self.backing.view_dir(&self.name) {
            Some(dir) => dir.join(INDEX_FILE).is_file(),
            None => true,
        }
    }

    /// Record one update and apply it.
    ///
    /// With `replace` set, every entry previously emitted for `source.id`
    /// is removed before the new entries are inserted. Returns `false`
    /// without writing if `source` is already indexed.
    pub fn update(
        &self,
        source: Source,
        replace: bool,
        entries: Vec<(String, IndexValue)>,
    ) -> ViewResult<bool> {
        self.update_if(source, replace, entries, |_| Ok(true))
    }

    /// Like [`update`](Self::update), but only when `admit` accepts the
    /// source. `admit` runs under the index's write lock, after the
    /// already-indexed check.
    pub fn update_if(
        &self,
        source: Source,
        replace: bool,
        entries: Vec<(String, IndexValue)>,
        admit: impl FnOnce(&Source) -> ViewResult<bool>,
    ) -> ViewResult<bool> {
        let update = IndexUpdate {
            source,
            replace,
            entries,
        };
        let record = encode_record(&update)?;

        let mut state = self.state.write().expect("lock poisoned");
        if state.indexed.contains(&source) || !admit(&source)? {
            return Ok(false);
        }
        let position = state.log.append(&record)?;
        let count = update.entries.len();
        state.apply(update, self.policy);

        debug!(
            view = %self.name,
            id = %source.id.short_id(),
            version = %source.version.short_hex(),
            entries = count,
            replace,
            position,
            "index updated"
        );
        Ok(true)
    }

    /// Write `value` to the value log, reusing an identical container.
    pub fn store_value(&self, value: &Value) -> ViewResult<Position> {
        let json = value.to_string();
        let hash = ContentHasher::CONTAINER.hash(json.as_bytes());

        let mut state = self.state.write().expect("lock poisoned");
        if let Some(position) = state.containers.get(&hash) {
            return Ok(*position);
        }
        let position = state.values.append(json.as_bytes())?;
        state.containers.insert(hash, position);
        Ok(position)
    }

    /// Read the value container at `position`.
    pub fn load_value(&self, position: Position) -> ViewResult<Value> {
        let bytes = self
            .state
            .read()
            .expect("lock poisoned")
            .values
            .read(position)?;
        serde_json::from_slice(&bytes).map_err(|e| ViewError::Serialization(e.to_string()))
    }

    /// Entries whose key is at or after `start` and at or before `end` (or
    /// has `end` as a prefix).
    ///
    /// Entries come in key order, or the reverse with `reverse` set. The
    /// first `offset` entries are skipped and at most `limit` are returned;
    /// nothing past the window is visited.
    pub fn scan(
        &self,
        start: Option<&str>,
        end: Option<&str>,
        reverse: bool,
        offset: usize,
        limit: Option<usize>,
    ) -> Vec<(String, IndexEntry)> {
        let upper = end.and_then(prefix_successor);
        if let (Some(start), Some(upper)) = (start, upper.as_deref()) {
            if start >= upper {
                return Vec::new();
            }
        }
        let lower = start.map_or(Bound::Unbounded, Bound::Included);
        let upper = upper.as_deref().map_or(Bound::Unbounded, Bound::Excluded);

        let state = self.state.read().expect("lock poisoned");
        let range = state.entries.range::<str, _>((lower, upper));
        let entries: Box<dyn Iterator<Item = (&String, &IndexEntry)> + '_> = if reverse {
            Box::new(range.rev().flat_map(|(key, list)| list.iter().rev().map(move |e| (key, e))))
        } else {
            Box::new(range.flat_map(|(key, list)| list.iter().map(move |e| (key, e))))
        };
        entries
            .skip(offset)
            .take(limit.unwrap_or(usize::MAX))
            .map(|(key, entry)| (key.clone(), entry.clone()))
            .collect()
    }

    /// Drop every entry and start over with empty logs.
    pub fn clear(&self) -> ViewResult<()> {
        let mut state = self.state.write().expect("lock poisoned");
        state.log.delete()?;
        state.values.delete()?;
        let (log, values) = self.backing.open_logs(&self.name)?;
        *state = IndexState::new(log, values);
        info!(view = %self.name, "index cleared");
        Ok(())
    }

    /// Remove the index's storage. Until [`clear`](Self::clear) recreates
    /// it, updates fail and [`exists`](Self::exists) is `false`.
    pub fn delete(&self) -> ViewResult<()> {
        let mut state = self.state.write().expect("lock poisoned");
        state.log.delete()?;
        state.values.delete()?;
        state.entries.clear();
        state.keys_by_id.clear();
        state.indexed.clear();
        state.containers.clear();
        state.deleted = true;
        info!(view = %self.name, "index deleted");
        Ok(())
    }
}

impl std::fmt::Debug for Index {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Index")
            .field("name", &self.name)
            .field("policy", &self.policy)
            .field("entries", &self.len())
            .finish()
    }
}

/// Smallest string greater than every string that starts with `prefix`,
/// or `None` if there is none.
fn prefix_successor(prefix: &str) -> Option<String> {
    let mut chars: Vec<char> = prefix.chars().collect();
    while let Some(last) = chars.pop() {
        let next = (u32::from(last) + 1..=u32::from(char::MAX)).find_map(char::from_u32);
        if let Some(next) = next {
            chars.push(next);
            return Some(chars.into_iter().collect());
        }
    }
    None
}
