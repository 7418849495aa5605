//! Foundation types for cairn.
//!
//! This crate provides the identity and versioning primitives every other
//! cairn crate builds on.
//!
//! # Key Types
//!
//! - [`DocumentId`]: 128-bit identifier, stable across a document's version chain
//! - [`Version`]: 32-byte content hash naming one immutable document snapshot
//! - [`Reference`]: slot value pointing at another document (optionally a version)

pub mod error;
pub mod identifier;
pub mod reference;
pub mod version;

pub use error::TypeError;
pub use identifier::DocumentId;
pub use reference::Reference;
pub use version::Version;
