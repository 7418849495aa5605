use serde::{Deserialize, Serialize};

/// Flush/sync strategy for volume appends.
///
/// Every append is flushed to the operating system before its position is
/// returned; `EveryWrite` additionally forces the data to stable storage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// `fdatasync` after every write (safest, highest latency).
    EveryWrite,
    /// Rely on OS page-cache buffering.
    #[default]
    OsDefault,
}

/// Configuration for opening or creating a volume.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeConfig {
    /// Size in bytes the file is pre-allocated to on creation.
    pub size: u64,
    /// Sync strategy for appends.
    pub sync_mode: SyncMode,
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            size: 64 * 1024, // 64 KiB
            sync_mode: SyncMode::default(),
        }
    }
}

impl VolumeConfig {
    /// Config with a specific pre-allocation size.
    pub fn with_size(size: u64) -> Self {
        Self {
            size,
            ..Self::default()
        }
    }
}
