use cairn_store::StoreError;
use cairn_volume::{Position, VolumeError};

/// Errors from view operations.
#[derive(Debug, thiserror::Error)]
pub enum ViewError {
    /// The view definition is malformed (for example, no name).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The view cannot map documents.
    #[error("invalid view {0}: no map function defined")]
    InvalidView(String),

    /// Contradictory or out-of-order find options.
    #[error("invalid find options: {0}")]
    InvalidFindOptions(String),

    /// An encoded key could not be decoded.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// An encoded key exceeds the view's fixed key size.
    #[error("encoded key is {size} bytes, view allows {limit}")]
    KeyTooLarge { size: usize, limit: usize },

    /// An inline value exceeds the view's fixed value size.
    #[error("inline value is {size} bytes, view allows {limit}")]
    ValueTooLarge { size: usize, limit: usize },

    /// An index log record failed its checksum or could not be decoded.
    #[error("corrupt index record at {position}: {reason}")]
    CorruptIndex { position: Position, reason: String },

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Volume(#[from] VolumeError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result alias for view operations.
pub type ViewResult<T> = Result<T, ViewError>;
