use cairn_crypto::ChainError;
use cairn_types::{DocumentId, TypeError, Version};
use cairn_volume::VolumeError;

/// Errors from document and store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A document without a version was handed to a save.
    #[error("document {0} has no version")]
    UnversionedDocument(DocumentId),

    /// The embedded version disagrees with the recomputed content hash.
    #[error("version mismatch for {id}: expected {expected}, computed {computed}")]
    VersionMismatch {
        id: DocumentId,
        expected: String,
        computed: String,
    },

    /// Walking the version chain revisited a version.
    #[error("cyclic version chain for {id} at {version}")]
    CyclicVersionChain { id: DocumentId, version: Version },

    /// A version named by the chain is not in the store.
    #[error("version {version} of {id} not found")]
    VersionNotFound { id: DocumentId, version: Version },

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A chunk's log or metadata holds data that cannot be interpreted.
    #[error("corrupt chunk {chunk}: {reason}")]
    CorruptChunk { chunk: DocumentId, reason: String },

    /// I/O error outside a volume (chunk metadata).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Volume(#[from] VolumeError),

    #[error(transparent)]
    Type(#[from] TypeError),

    /// History verification failed.
    #[error("version chain invalid: {0}")]
    Chain(#[from] ChainError),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
