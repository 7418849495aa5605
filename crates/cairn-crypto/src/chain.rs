use std::collections::HashSet;

use cairn_types::Version;

/// Trait for snapshots that participate in a backward-linked version chain.
pub trait HasVersionLink {
    /// The snapshot's recorded version.
    fn version(&self) -> Option<Version>;
    /// The version this snapshot supersedes (None for genesis).
    fn previous_version(&self) -> Option<Version>;
    /// The version recomputed from the snapshot's current content.
    fn computed_version(&self) -> Option<Version>;
}

/// Version chain integrity verifier.
///
/// Verifies that a sequence ordered head-first forms a valid chain: each
/// snapshot's previous version is the next snapshot's version, no version
/// repeats, the last snapshot is a genesis, and every recorded version
/// matches its recomputed content hash.
pub struct VersionChainVerifier;

impl VersionChainVerifier {
    /// Verify a head-first chain of snapshots.
    pub fn verify_chain(chain: &[impl HasVersionLink]) -> Result<(), ChainError> {
        let mut seen = HashSet::with_capacity(chain.len());

        for (index, snapshot) in chain.iter().enumerate() {
            let version = snapshot
                .version()
                .ok_or(ChainError::Unversioned { index })?;

            if snapshot.computed_version() != Some(version) {
                return Err(ChainError::HashMismatch { index });
            }

            if !seen.insert(version) {
                return Err(ChainError::CycleDetected { index });
            }

            match (snapshot.previous_version(), chain.get(index + 1)) {
                (Some(prev), Some(next)) if Some(prev) == next.version() => {}
                (Some(_), Some(_)) => return Err(ChainError::BrokenLink { index }),
                (None, Some(_)) => return Err(ChainError::MissingPrevious { index }),
                (Some(_), None) => return Err(ChainError::GenesisHasPrevious),
                (None, None) => {}
            }
        }

        Ok(())
    }
}

/// Errors from chain verification.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ChainError {
    #[error("genesis snapshot has a previous version (should be None)")]
    GenesisHasPrevious,

    #[error("snapshot at index {index} has no version")]
    Unversioned { index: usize },

    #[error("broken link at index {index}: previous version does not match the next snapshot")]
    BrokenLink { index: usize },

    #[error("missing previous version at index {index}")]
    MissingPrevious { index: usize },

    #[error("version repeated at index {index}: chain is cyclic")]
    CycleDetected { index: usize },

    #[error("hash mismatch at index {index}: computed version differs from stored")]
    HashMismatch { index: usize },
}
