//! Reserved slot names.
//!
//! Reserved slots live alongside user slots in the same map and travel with
//! the document through every serialization.

/// Slot holding the document's version as a hex string. Excluded from the
/// content hash.
pub const VERSION_SLOT: &str = "__version__";

/// Slot holding the version this document supersedes. Part of the content
/// hash, so a version commits to its whole ancestry.
pub const PREVIOUS_VERSION_SLOT: &str = "__previous_version__";

/// Returns `true` for slot names managed by the store.
pub fn is_reserved(name: &str) -> bool {
    name == VERSION_SLOT || name == PREVIOUS_VERSION_SLOT
}
