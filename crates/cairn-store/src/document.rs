use std::collections::{BTreeMap, HashSet};
use std::fmt;

use cairn_crypto::{ContentHasher, HasVersionLink, VersionChainVerifier};
use cairn_types::{DocumentId, Reference, Version};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::slot::{PREVIOUS_VERSION_SLOT, VERSION_SLOT};
use crate::traits::Store;

/// One snapshot of a versioned document.
///
/// A document is plain data: an identifier and a sorted slot map. The
/// version is kept in the reserved `__version__` slot and recomputed on
/// every mutation except a raw write to that slot. The document does not
/// hold a store; operations that need one take it as an argument.
#[derive(Clone, PartialEq)]
pub struct Document {
    id: DocumentId,
    slots: BTreeMap<String, Value>,
}

impl Document {
    /// Create an empty document with a fresh random identifier.
    ///
    /// An empty document has no version until its first slot is set.
    pub fn new() -> Self {
        Self::with_id(DocumentId::random())
    }

    /// Create an empty document with a given identifier.
    pub fn with_id(id: DocumentId) -> Self {
        Self {
            id,
            slots: BTreeMap::new(),
        }
    }

    /// Create a document with a fresh identifier from initial slots.
    ///
    /// A `__version__` entry among `slots` is ignored; the version is
    /// computed from the remaining slots.
    pub fn from_slots<I, K>(slots: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let mut document = Self::new();
        for (name, value) in slots {
            let name = name.into();
            if name != VERSION_SLOT {
                document.slots.insert(name, value);
            }
        }
        if !document.slots.is_empty() {
            document.refresh_version();
        }
        document
    }

    pub fn id(&self) -> DocumentId {
        self.id
    }

    /// Value of a slot.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.slots.get(name)
    }

    /// Slot value interpreted as a document reference.
    pub fn get_reference(&self, name: &str) -> Option<Reference> {
        self.get(name).and_then(Reference::from_value)
    }

    /// Set a slot and recompute the version.
    ///
    /// Writing the version slot itself stores the value verbatim.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let refresh = name != VERSION_SLOT;
        self.slots.insert(name, value.into());
        if refresh {
            self.refresh_version();
        }
    }

    /// Remove a slot and recompute the version.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        let removed = self.slots.remove(name);
        if removed.is_some() && name != VERSION_SLOT {
            self.refresh_version();
        }
        removed
    }

    /// Slot names in sorted order, reserved slots included.
    pub fn slot_names(&self) -> impl Iterator<Item = &str> {
        self.slots.keys().map(String::as_str)
    }

    pub fn slots(&self) -> &BTreeMap<String, Value> {
        &self.slots
    }

    /// The recorded version, if any.
    pub fn version(&self) -> Option<Version> {
        self.version_slot(VERSION_SLOT)
    }

    /// The version this snapshot supersedes (`None` for genesis).
    pub fn previous_version(&self) -> Option<Version> {
        self.version_slot(PREVIOUS_VERSION_SLOT)
    }

    /// Content hash of the canonical slot serialization, version slot
    /// excluded.
    pub fn computed_version(&self) -> Version {
        ContentHasher::DOCUMENT.hash(self.canonical_json().as_bytes())
    }

    /// Reference to this document, pinned to the current version if there
    /// is one.
    pub fn reference(&self) -> Reference {
        match self.version() {
            Some(version) => Reference::pinned(self.id, version),
            None => Reference::new(self.id),
        }
    }

    // -----------------------------------------------------------------------
    // Store operations
    // -----------------------------------------------------------------------

    /// Returns `true` if no version of this document is stored.
    pub fn is_new(&self, store: &dyn Store) -> StoreResult<bool> {
        Ok(!store.exists(&self.id)?)
    }

    /// Persist this document.
    ///
    /// When the store already holds a version of this identifier, that
    /// version becomes this document's previous version (which changes this
    /// document's version) before the store is asked to save it. The store
    /// relinks the document if another save moved the head in between;
    /// either way `self` ends up equal to the stored snapshot.
    pub fn save(&mut self, store: &dyn Store) -> StoreResult<Document> {
        if self.version().is_none() {
            return Err(StoreError::UnversionedDocument(self.id));
        }
        if let Some(last) = store.last_version(&self.id)? {
            self.set(PREVIOUS_VERSION_SLOT, last.to_hex());
        }
        let saved = store.save(self.clone())?;
        *self = saved.clone();
        debug!(
            id = %self.id.short_id(),
            version = ?saved.version(),
            previous = ?saved.previous_version(),
            "document saved"
        );
        Ok(saved)
    }

    /// Versions preceding this one, newest first.
    pub fn previous_versions(&self, store: &dyn Store) -> StoreResult<Vec<Version>> {
        Ok(self
            .ancestors(store)?
            .iter()
            .filter_map(Document::version)
            .collect())
    }

    /// This version followed by every previous version, head to genesis.
    pub fn all_versions(&self, store: &dyn Store) -> StoreResult<Vec<Version>> {
        let head = self
            .version()
            .ok_or(StoreError::UnversionedDocument(self.id))?;
        let mut versions = vec![head];
        versions.extend(self.previous_versions(store)?);
        Ok(versions)
    }

    /// This snapshot followed by every stored predecessor, head to genesis.
    pub fn history(&self, store: &dyn Store) -> StoreResult<Vec<Document>> {
        let mut history = vec![self.clone()];
        history.extend(self.ancestors(store)?);
        Ok(history)
    }

    /// Verify every link and content hash in this document's history.
    ///
    /// Returns the length of the verified chain.
    pub fn verify_history(&self, store: &dyn Store) -> StoreResult<usize> {
        let history = self.history(store)?;
        VersionChainVerifier::verify_chain(&history)?;
        Ok(history.len())
    }

    fn ancestors(&self, store: &dyn Store) -> StoreResult<Vec<Document>> {
        let mut seen: HashSet<Version> = self.version().into_iter().collect();
        let mut ancestors = Vec::new();
        let mut next = self.previous_version();

        while let Some(version) = next {
            if !seen.insert(version) {
                return Err(StoreError::CyclicVersionChain {
                    id: self.id,
                    version,
                });
            }
            let document = store
                .find(&self.id, Some(&version))?
                .ok_or(StoreError::VersionNotFound {
                    id: self.id,
                    version,
                })?;
            next = document.previous_version();
            ancestors.push(document);
        }

        Ok(ancestors)
    }

    // -----------------------------------------------------------------------
    // Serialization
    // -----------------------------------------------------------------------

    /// Canonical JSON: the sorted slot map, or `[identifier, slots]` in
    /// transmittal form.
    pub fn to_json(&self, transmittal: bool) -> String {
        let slots = Value::Object(self.slot_map(true));
        if transmittal {
            Value::Array(vec![Value::String(self.id.to_string()), slots]).to_string()
        } else {
            slots.to_string()
        }
    }

    /// Rebuild a document from its slot map serialization.
    ///
    /// Fails with [`StoreError::VersionMismatch`] if the embedded version is
    /// not the hash of the content.
    pub fn from_serialized(id: DocumentId, bytes: &[u8]) -> StoreResult<Self> {
        let slots: BTreeMap<String, Value> = serde_json::from_slice(bytes)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Self::from_parts(id, slots)
    }

    /// Rebuild a document from its transmittal form `[identifier, slots]`.
    pub fn from_transmittal(bytes: &[u8]) -> StoreResult<Self> {
        let (id, slots): (String, BTreeMap<String, Value>) = serde_json::from_slice(bytes)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Self::from_parts(DocumentId::parse(&id)?, slots)
    }

    fn from_parts(id: DocumentId, slots: BTreeMap<String, Value>) -> StoreResult<Self> {
        let document = Self { id, slots };
        let computed = document.computed_version().to_hex();
        let expected = document.slots.get(VERSION_SLOT);
        if expected.and_then(Value::as_str) == Some(computed.as_str()) {
            return Ok(document);
        }
        Err(StoreError::VersionMismatch {
            id,
            expected: expected.map_or_else(|| "none".to_string(), Value::to_string),
            computed,
        })
    }

    fn slot_map(&self, with_version: bool) -> Map<String, Value> {
        self.slots
            .iter()
            .filter(|(name, _)| with_version || name.as_str() != VERSION_SLOT)
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }

    fn canonical_json(&self) -> String {
        Value::Object(self.slot_map(false)).to_string()
    }

    fn refresh_version(&mut self) {
        let version = self.computed_version();
        self.slots
            .insert(VERSION_SLOT.to_string(), Value::String(version.to_hex()));
    }

    fn version_slot(&self, name: &str) -> Option<Version> {
        self.slots
            .get(name)?
            .as_str()
            .and_then(|hex| Version::from_hex(hex).ok())
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl HasVersionLink for Document {
    fn version(&self) -> Option<Version> {
        Document::version(self)
    }

    fn previous_version(&self) -> Option<Version> {
        Document::previous_version(self)
    }

    fn computed_version(&self) -> Option<Version> {
        Some(Document::computed_version(self))
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("id", &self.id)
            .field("version", &self.version())
            .field("slots", &self.slots.len())
            .finish()
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_json(false))
    }
}
