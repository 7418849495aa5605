//! Hashing primitives for cairn.
//!
//! Provides domain-separated BLAKE3 content hashing (the source of every
//! document [`Version`](cairn_types::Version)) and verification of backward
//! linked version chains.
//!
//! All crypto operations wrap established libraries; there is no custom cryptography.

pub mod chain;
pub mod hasher;

pub use chain::{ChainError, HasVersionLink, VersionChainVerifier};
pub use hasher::ContentHasher;
