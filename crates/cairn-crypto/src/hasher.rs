use cairn_types::Version;

/// Domain-separated BLAKE3 content hasher.
///
/// Each hasher carries a domain tag (e.g. `"cairn-document-v1"`) prepended to
/// every hash computation, so a document and a view value container with
/// identical bytes never share a hash.
pub struct ContentHasher {
    domain: &'static str,
}

impl ContentHasher {
    /// Hasher for canonical document slot serializations.
    pub const DOCUMENT: Self = Self {
        domain: "cairn-document-v1",
    };
    /// Hasher for view value containers.
    pub const CONTAINER: Self = Self {
        domain: "cairn-container-v1",
    };

    /// Hash raw bytes with domain separation.
    pub fn hash(&self, data: &[u8]) -> Version {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.domain.as_bytes());
        hasher.update(b":");
        hasher.update(data);
        Version::from_hash(*hasher.finalize().as_bytes())
    }
}
