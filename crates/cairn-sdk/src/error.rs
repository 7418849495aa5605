use thiserror::Error;

#[derive(Debug, Error)]
pub enum SdkError {
    #[error("unknown storage type: {0} (expected memory or file)")]
    UnknownStorageType(String),

    #[error("unknown store type: {0} (expected skiplist)")]
    UnknownStoreType(String),

    #[error("unknown index type: {0} (expected memory or file)")]
    UnknownIndexType(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("document not found: {0}")]
    DocumentNotFound(String),

    #[error("view not found: {0}")]
    ViewNotFound(String),

    #[error("view already registered: {0}")]
    ViewExists(String),

    #[error("store error: {0}")]
    Store(#[from] cairn_store::StoreError),

    #[error("view error: {0}")]
    View(#[from] cairn_view::ViewError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type SdkResult<T> = Result<T, SdkError>;
