use std::fs;
use std::path::{Path, PathBuf};

use cairn_store::StoreConfig;
use cairn_volume::{SyncMode, VolumeConfig};
use serde::{Deserialize, Serialize};

use crate::error::{SdkError, SdkResult};

/// Where chunks live.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageType {
    Memory,
    File,
}

impl StorageType {
    pub fn resolve(name: &str) -> SdkResult<Self> {
        match name {
            "memory" => Ok(Self::Memory),
            "file" => Ok(Self::File),
            other => Err(SdkError::UnknownStorageType(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::File => "file",
        }
    }
}

/// How documents are spread over chunks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreType {
    Skiplist,
}

impl StoreType {
    pub fn resolve(name: &str) -> SdkResult<Self> {
        match name {
            "skiplist" => Ok(Self::Skiplist),
            other => Err(SdkError::UnknownStoreType(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Skiplist => "skiplist",
        }
    }
}

/// Where view indexes live.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexType {
    Memory,
    File,
}

impl IndexType {
    pub fn resolve(name: &str) -> SdkResult<Self> {
        match name {
            "memory" => Ok(Self::Memory),
            "file" => Ok(Self::File),
            other => Err(SdkError::UnknownIndexType(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::File => "file",
        }
    }
}

/// Database configuration, usually read from a `cairn.toml`.
///
/// Type names are kept as strings and resolved when the database opens, so
/// a config naming an unknown type still parses and fails with the matching
/// `Unknown*Type` error.
///
/// ```toml
/// root = "/var/lib/cairn"
/// storage = "file"
/// store = "skiplist"
/// index = "file"
/// chunk_capacity = 1024
/// volume_size = 65536
/// sync_every_write = false
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Directory holding `store/` and `views/`. Unused by memory backends.
    pub root: PathBuf,
    pub storage: String,
    pub store: String,
    pub index: String,
    /// Distinct identifiers a chunk holds before it splits.
    pub chunk_capacity: usize,
    /// Bytes each new volume is pre-allocated to.
    pub volume_size: u64,
    pub sync_every_write: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        let store = StoreConfig::default();
        Self {
            root: PathBuf::from("."),
            storage: StorageType::Memory.as_str().into(),
            store: StoreType::Skiplist.as_str().into(),
            index: IndexType::Memory.as_str().into(),
            chunk_capacity: store.chunk_capacity,
            volume_size: store.volume.size,
            sync_every_write: false,
        }
    }
}

impl DatabaseConfig {
    /// Everything in memory.
    pub fn memory() -> Self {
        Self::default()
    }

    /// Store and views on disk under `root`.
    pub fn file(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            storage: StorageType::File.as_str().into(),
            index: IndexType::File.as_str().into(),
            ..Self::default()
        }
    }

    pub fn from_toml_str(s: &str) -> SdkResult<Self> {
        toml::from_str(s).map_err(|e| SdkError::Config(e.to_string()))
    }

    pub fn to_toml_string(&self) -> SdkResult<String> {
        toml::to_string_pretty(self).map_err(|e| SdkError::Config(e.to_string()))
    }

    /// Read a TOML config file.
    pub fn load(path: &Path) -> SdkResult<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn storage_type(&self) -> SdkResult<StorageType> {
        StorageType::resolve(&self.storage)
    }

    pub fn store_type(&self) -> SdkResult<StoreType> {
        StoreType::resolve(&self.store)
    }

    pub fn index_type(&self) -> SdkResult<IndexType> {
        IndexType::resolve(&self.index)
    }

    pub fn volume_config(&self) -> VolumeConfig {
        VolumeConfig {
            size: self.volume_size,
            sync_mode: match self.sync_every_write {
                true => SyncMode::EveryWrite,
                false => SyncMode::OsDefault,
            },
        }
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            chunk_capacity: self.chunk_capacity,
            volume: self.volume_config(),
        }
    }
}
