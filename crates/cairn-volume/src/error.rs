use std::io;

use crate::volume::Position;

/// Errors produced by volume operations.
#[derive(Debug, thiserror::Error)]
pub enum VolumeError {
    /// The volume was closed or deleted. The instance must be discarded and
    /// the path reopened.
    #[error("volume is closed: throw this instance away and open the volume again")]
    Closed,

    /// I/O error from the underlying file.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// A read addressed bytes outside the written region.
    #[error("position {position} is outside the written region (tail {tail})")]
    OutOfRange { position: Position, tail: Position },

    /// The file ended before a complete record could be read.
    #[error("truncated record at position {position}")]
    Truncated { position: Position },

    /// Appending would move the tail past the 32-bit header range.
    #[error("record of {len} bytes does not fit after tail {tail}")]
    TailOverflow { tail: Position, len: usize },

    /// The header holds a tail smaller than the header itself.
    #[error("corrupt volume header: tail {tail}")]
    CorruptHeader { tail: Position },
}

/// Result alias for volume operations.
pub type VolumeResult<T> = Result<T, VolumeError>;
