//! Append-only record volumes for cairn.
//!
//! A volume is a single pre-allocated file holding a sequence of
//! length-prefixed records. It is the only component in cairn that performs
//! raw file I/O.
//!
//! # On-disk format
//!
//! ```text
//! [4 bytes: tail offset (big-endian u32)]
//! [4 bytes: record length (big-endian u32)][N bytes: payload]
//! [4 bytes: record length (big-endian u32)][N bytes: payload]
//! ...
//! [zero fill up to the pre-allocated size]
//! ```
//!
//! The position returned by a write is the byte offset of the record's
//! length prefix. Records are never rewritten, so a position stays a valid
//! pointer for as long as the volume exists.
//!
//! # Key Types
//!
//! - [`Volume`] -- file-backed record log
//! - [`MemoryLog`] -- the same framing held in memory
//! - [`RecordLog`] -- the capability both implement

pub mod config;
pub mod error;
pub mod log;
pub mod path;
pub mod volume;

pub use config::{SyncMode, VolumeConfig};
pub use error::{VolumeError, VolumeResult};
pub use log::{MemoryLog, RecordLog};
pub use path::{hierarchify, volume_path, VOLUME_EXTENSION};
pub use volume::{Position, Volume, HEADER_SIZE};
