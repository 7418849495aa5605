use cairn_types::{DocumentId, Version};

use crate::document::Document;
use crate::error::StoreResult;

/// Versioned document store.
///
/// All implementations must satisfy these invariants:
/// - A persisted `(identifier, version)` pair is immutable. Saving a pair
///   that already exists is a no-op.
/// - `last_version` names the most recently saved version of an identifier.
/// - A new version's previous version is the head it replaced, even when
///   saves of the same identifier race.
/// - `save` rejects documents without a version.
/// - All I/O errors are propagated, never silently ignored.
pub trait Store: Send + Sync {
    /// Find a document by identifier, at `version` or at its latest version.
    ///
    /// Returns `Ok(None)` if no such document or version exists.
    fn find(&self, id: &DocumentId, version: Option<&Version>) -> StoreResult<Option<Document>>;

    /// Check whether any version of `id` is stored.
    fn exists(&self, id: &DocumentId) -> StoreResult<bool> {
        Ok(self.last_version(id)?.is_some())
    }

    /// The most recently saved version of `id`.
    fn last_version(&self, id: &DocumentId) -> StoreResult<Option<Version>>;

    /// Persist a versioned document and return it as stored.
    ///
    /// The stored snapshot may differ from `document` in its previous
    /// version slot, and so in its version.
    fn save(&self, document: Document) -> StoreResult<Document>;

    /// The latest version of every stored document.
    fn heads(&self) -> StoreResult<Vec<Document>>;

    /// Every stored version of `id`, oldest first.
    fn versions(&self, id: &DocumentId) -> StoreResult<Vec<Version>>;
}
