use cairn_volume::VolumeConfig;
use serde::{Deserialize, Serialize};

/// Skiplist store configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Distinct identifiers a chunk holds before it splits.
    pub chunk_capacity: usize,
    /// Settings for every volume the store creates.
    pub volume: VolumeConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            chunk_capacity: 1024,
            volume: VolumeConfig::default(),
        }
    }
}

impl StoreConfig {
    /// Config with a specific chunk capacity.
    pub fn with_chunk_capacity(chunk_capacity: usize) -> Self {
        Self {
            chunk_capacity,
            ..Self::default()
        }
    }

    /// Capacity actually enforced. A chunk always holds at least one
    /// identifier.
    pub fn effective_capacity(&self) -> usize {
        self.chunk_capacity.max(1)
    }
}
