use cairn_store::{Document, Store, StoreError};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{ViewError, ViewResult};
use crate::index::{Index, IndexBacking, Source};
use crate::key::KeyCodec;
use crate::options::{FindOptions, Strategy, ViewDefinition, ViewOptions};
use crate::value::{IndexValue, ViewValue};

/// Map function of a view: the `(key, value)` pairs to index for a document.
pub trait Mapper: Send + Sync {
    fn map(&self, document: &Document) -> Vec<(Value, ViewValue)>;
}

impl<F> Mapper for F
where
    F: Fn(&Document) -> Vec<(Value, ViewValue)> + Send + Sync,
{
    fn map(&self, document: &Document) -> Vec<(Value, ViewValue)> {
        self(document)
    }
}

/// One result of [`View::find`].
#[derive(Clone, Debug, PartialEq)]
pub struct ViewRow {
    /// Present when the find asked for keys.
    pub key: Option<Value>,
    pub value: ViewValue,
}

/// A named, sorted secondary index derived from documents.
pub struct View {
    name: String,
    options: ViewOptions,
    mapper: Option<Box<dyn Mapper>>,
    index: Index,
}

impl View {
    /// Initialize a view from its definition.
    pub fn initialize(definition: ViewDefinition, backing: IndexBacking) -> ViewResult<Self> {
        Self::initialize_with(definition, backing, |_| {})
    }

    /// Initialize a view, running `setup` once the options are resolved.
    ///
    /// `setup` runs exactly once, before the view is returned. It is the
    /// place to attach a mapper.
    pub fn initialize_with(
        definition: ViewDefinition,
        backing: IndexBacking,
        setup: impl FnOnce(&mut View),
    ) -> ViewResult<Self> {
        let (name, options) = definition.resolve()?;
        let index = Index::open(&name, backing, options.on_duplicate_key)?;
        let mut view = Self {
            name,
            options,
            mapper: None,
            index,
        };
        setup(&mut view);

        info!(
            view = %view.name,
            strategy = ?view.options.strategy,
            on_duplicate_key = ?view.options.on_duplicate_key,
            entries = view.index.len(),
            "view initialized"
        );
        Ok(view)
    }

    pub fn with_mapper(mut self, mapper: impl Mapper + 'static) -> Self {
        self.set_mapper(mapper);
        self
    }

    pub fn set_mapper(&mut self, mapper: impl Mapper + 'static) {
        self.mapper = Some(Box::new(mapper));
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &ViewOptions {
        &self.options
    }

    pub fn index(&self) -> &Index {
        &self.index
    }

    /// Run the map function over `document`.
    pub fn map(&self, document: &Document) -> ViewResult<Vec<(Value, ViewValue)>> {
        let mapper = self
            .mapper
            .as_ref()
            .ok_or_else(|| ViewError::InvalidView(self.name.clone()))?;
        Ok(mapper.map(document))
    }

    pub fn encode_key(&self, key: &Value) -> ViewResult<String> {
        let encoded = KeyCodec::encode(key);
        check_size(encoded.len(), self.options.fixed_size_key, |size, limit| {
            ViewError::KeyTooLarge { size, limit }
        })?;
        Ok(encoded)
    }

    pub fn decode_key(&self, encoded: &str) -> ViewResult<Value> {
        KeyCodec::decode(encoded)
    }

    /// Convert an emitted value into its index form, writing plain values
    /// to the value log unless the view stores them inline.
    pub fn encode_value(&self, value: &ViewValue) -> ViewResult<IndexValue> {
        match value {
            ViewValue::Document(document) => {
                let version = document
                    .version()
                    .ok_or(StoreError::UnversionedDocument(document.id()))?;
                Ok(IndexValue::Document {
                    id: document.id(),
                    version,
                })
            }
            ViewValue::Value(value) if self.options.inline => {
                let json = value.to_string();
                check_size(json.len(), self.options.fixed_size_value, |size, limit| {
                    ViewError::ValueTooLarge { size, limit }
                })?;
                Ok(IndexValue::Inline(json))
            }
            ViewValue::Value(value) => Ok(IndexValue::Pointer(self.index.store_value(value)?)),
        }
    }

    /// Resolve an index value, loading documents from `store`.
    pub fn decode_value(&self, value: &IndexValue, store: &dyn Store) -> ViewResult<ViewValue> {
        match value {
            IndexValue::Document { id, version } => store
                .find(id, Some(version))?
                .map(ViewValue::Document)
                .ok_or_else(|| {
                    StoreError::VersionNotFound {
                        id: *id,
                        version: *version,
                    }
                    .into()
                }),
            IndexValue::Pointer(position) => Ok(ViewValue::Value(self.index.load_value(*position)?)),
            IndexValue::Inline(json) => serde_json::from_str(json)
                .map(ViewValue::Value)
                .map_err(|e| ViewError::Serialization(e.to_string())),
        }
    }

    /// Index `document`. Indexing a version twice is a no-op.
    pub fn update(&self, document: &Document) -> ViewResult<()> {
        self.record(document, |_| Ok(true)).map(|_| ())
    }

    /// Index `document` as saved in `store`.
    ///
    /// Under [`Strategy::Heads`] the version is skipped unless it is still
    /// the store's head when the index is locked, so racing saves of one
    /// identifier never leave an older version indexed as current. Returns
    /// `true` if an update was recorded.
    pub fn update_from(&self, document: &Document, store: &dyn Store) -> ViewResult<bool> {
        match self.options.strategy {
            Strategy::Heads => self.record(document, |source| {
                Ok(store.last_version(&source.id)? == Some(source.version))
            }),
            Strategy::Versions => self.record(document, |_| Ok(true)),
        }
    }

    fn record(
        &self,
        document: &Document,
        admit: impl FnOnce(&Source) -> ViewResult<bool>,
    ) -> ViewResult<bool> {
        let source = Source {
            id: document.id(),
            version: document
                .version()
                .ok_or(StoreError::UnversionedDocument(document.id()))?,
        };
        if self.index.is_indexed(&source) {
            return Ok(false);
        }

        let entries = self
            .map(document)?
            .iter()
            .map(|(key, value)| -> ViewResult<(String, IndexValue)> {
                Ok((self.encode_key(key)?, self.encode_value(value)?))
            })
            .collect::<ViewResult<Vec<_>>>()?;

        let replace = match self.options.strategy {
            Strategy::Heads => true,
            Strategy::Versions => false,
        };
        self.index.update_if(source, replace, entries, admit)
    }

    /// Rows whose keys fall in the requested range.
    pub fn find(&self, options: &FindOptions, store: &dyn Store) -> ViewResult<Vec<ViewRow>> {
        let (start, end) = find_bounds(options)?;
        let entries = self.index.scan(
            start.as_deref(),
            end.as_deref(),
            options.reverse,
            options.offset,
            options.limit,
        );

        let mut rows = Vec::new();
        for (key, entry) in entries {
            let key = match options.with_keys {
                true => Some(self.decode_key(&key)?),
                false => None,
            };
            rows.push(ViewRow {
                key,
                value: self.decode_value(&entry.value, store)?,
            });
        }

        debug!(view = %self.name, rows = rows.len(), "view find");
        Ok(rows)
    }

    /// Index every stored version this view has not seen yet.
    ///
    /// Under [`Strategy::Heads`] only each document's head is considered;
    /// under [`Strategy::Versions`] every missing version is indexed, oldest
    /// first. Returns the number of versions indexed.
    pub fn catch_up(&self, store: &dyn Store) -> ViewResult<usize> {
        let mut replayed = 0;
        for head in store.heads()? {
            let pending = match self.options.strategy {
                Strategy::Heads => vec![head],
                Strategy::Versions => {
                    let id = head.id();
                    let mut pending = Vec::new();
                    for version in store.versions(&id)? {
                        let source = Source { id, version };
                        if self.index.is_indexed(&source) {
                            continue;
                        }
                        let document = store
                            .find(&id, Some(&version))?
                            .ok_or(StoreError::VersionNotFound { id, version })?;
                        pending.push(document);
                    }
                    pending
                }
            };

            for document in pending {
                if self.update_from(&document, store)? {
                    replayed += 1;
                }
            }
        }

        if replayed > 0 {
            warn!(view = %self.name, replayed, "view caught up with unindexed versions");
        }
        Ok(replayed)
    }

    pub fn is_indexed(&self, document: &Document) -> bool {
        document.version().is_some_and(|version| {
            self.index.is_indexed(&Source {
                id: document.id(),
                version,
            })
        })
    }

    pub fn exists(&self) -> bool {
        self.index.exists()
    }

    /// Reset the view to a freshly created, empty one.
    pub fn clear(&self) -> ViewResult<()> {
        self.index.clear()
    }

    /// Remove the view's storage.
    pub fn delete(&self) -> ViewResult<()> {
        self.index.delete()
    }
}

impl std::fmt::Debug for View {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("View")
            .field("name", &self.name)
            .field("options", &self.options)
            .field("has_mapper", &self.mapper.is_some())
            .field("entries", &self.index.len())
            .finish()
    }
}

fn check_size(
    size: usize,
    limit: Option<usize>,
    error: impl FnOnce(usize, usize) -> ViewError,
) -> ViewResult<()> {
    match limit {
        Some(limit) if size > limit => Err(error(size, limit)),
        _ => Ok(()),
    }
}

fn find_bounds(options: &FindOptions) -> ViewResult<(Option<String>, Option<String>)> {
    if let Some(key) = &options.key {
        if options.start_key.is_some() || options.end_key.is_some() {
            return Err(ViewError::InvalidFindOptions(
                "key cannot be combined with start_key or end_key".into(),
            ));
        }
        let prefix = KeyCodec::encode_prefix(key);
        return Ok((Some(prefix.clone()), Some(prefix)));
    }

    let start = options.start_key.as_ref().map(KeyCodec::encode_prefix);
    let end = options.end_key.as_ref().map(KeyCodec::encode_prefix);
    if let (Some(start), Some(end)) = (&start, &end) {
        if start > end && !start.starts_with(end.as_str()) {
            return Err(ViewError::InvalidFindOptions(
                "start_key sorts after end_key".into(),
            ));
        }
    }
    Ok((start, end))
}

#[cfg(test)]
mod tests {
    use cairn_store::{MemoryChunkStorage, SkiplistStore, StoreConfig};
    use serde_json::json;

    use super::*;
    use crate::options::DuplicateKey;

    fn store() -> SkiplistStore {
        SkiplistStore::new(MemoryChunkStorage::new(), StoreConfig::default())
    }

    fn number_mapper(doc: &Document) -> Vec<(Value, ViewValue)> {
        match doc.get("n") {
            Some(n) => vec![(n.clone(), ViewValue::Document(doc.clone()))],
            None => Vec::new(),
        }
    }

    fn view(definition: ViewDefinition) -> View {
        View::initialize(definition, IndexBacking::Memory)
            .unwrap()
            .with_mapper(number_mapper)
    }

    fn save(store: &dyn Store, view: &View, doc: &mut Document) -> Document {
        let saved = doc.save(store).unwrap();
        view.update(&saved).unwrap();
        saved
    }

    fn numbers(rows: &[ViewRow]) -> Vec<Value> {
        rows.iter()
            .map(|row| row.value.as_document().unwrap().get("n").unwrap().clone())
            .collect()
    }

    // ------------------------------------------------------------------
    // Initialization
    // ------------------------------------------------------------------

    #[test]
    fn missing_name_is_invalid_argument() {
        for definition in [ViewDefinition::default(), ViewDefinition::named("  ")] {
            assert!(matches!(
                View::initialize(definition, IndexBacking::Memory),
                Err(ViewError::InvalidArgument(_))
            ));
        }
    }

    #[test]
    fn setup_runs_once_after_defaults() {
        let mut calls = 0;
        let view = View::initialize_with(
            ViewDefinition::named("v").inline(true),
            IndexBacking::Memory,
            |view| {
                calls += 1;
                assert_eq!(view.options().strategy, Strategy::Heads);
                assert_eq!(view.options().on_duplicate_key, DuplicateKey::Append);
                assert!(view.options().inline);
                view.set_mapper(number_mapper);
            },
        )
        .unwrap();
        assert_eq!(calls, 1);
        assert!(view.map(&Document::from_slots([("n", json!(1))])).is_ok());
    }

    #[test]
    fn map_without_mapper_is_invalid_view() {
        let view = View::initialize(ViewDefinition::named("bare"), IndexBacking::Memory).unwrap();
        let doc = Document::from_slots([("n", json!(1))]);
        assert!(matches!(view.map(&doc), Err(ViewError::InvalidView(name)) if name == "bare"));
        assert!(matches!(view.update(&doc), Err(ViewError::InvalidView(_))));
    }

    // ------------------------------------------------------------------
    // Strategies
    // ------------------------------------------------------------------

    #[test]
    fn heads_view_keeps_only_latest_entries() {
        let store = store();
        let view = view(ViewDefinition::named("heads"));
        let mut doc = Document::from_slots([("n", json!(1))]);
        save(&store, &view, &mut doc);
        doc.set("n", 2);
        save(&store, &view, &mut doc);

        let all = view.find(&FindOptions::new(), &store).unwrap();
        assert_eq!(numbers(&all), vec![json!(2)]);
        let stale = view.find(&FindOptions::new().key(json!(1)), &store).unwrap();
        assert!(stale.is_empty());
    }

    #[test]
    fn versions_view_keeps_every_version() {
        let store = store();
        let view = view(ViewDefinition::named("versions").strategy(Strategy::Versions));
        let mut doc = Document::from_slots([("n", json!(1))]);
        save(&store, &view, &mut doc);
        doc.set("n", 2);
        save(&store, &view, &mut doc);

        let all = view.find(&FindOptions::new(), &store).unwrap();
        assert_eq!(numbers(&all), vec![json!(1), json!(2)]);
    }

    #[test]
    fn heads_view_skips_a_superseded_version() {
        let store = store();
        let view = view(ViewDefinition::named("heads"));
        let mut doc = Document::from_slots([("n", json!(1))]);
        let older = doc.save(&store).unwrap();
        doc.set("n", 2);
        let newer = doc.save(&store).unwrap();

        assert!(view.update_from(&newer, &store).unwrap());
        assert!(!view.update_from(&older, &store).unwrap());
        assert!(!view.is_indexed(&older));

        let all = view.find(&FindOptions::new(), &store).unwrap();
        assert_eq!(numbers(&all), vec![json!(2)]);
    }

    #[test]
    fn versions_view_admits_every_version_from_store() {
        let store = store();
        let view = view(ViewDefinition::named("versions").strategy(Strategy::Versions));
        let mut doc = Document::from_slots([("n", json!(1))]);
        let older = doc.save(&store).unwrap();
        doc.set("n", 2);
        let newer = doc.save(&store).unwrap();

        assert!(view.update_from(&newer, &store).unwrap());
        assert!(view.update_from(&older, &store).unwrap());
        assert_eq!(view.index().len(), 2);
    }

    #[test]
    fn update_is_idempotent() {
        let store = store();
        let view = view(ViewDefinition::named("v").strategy(Strategy::Versions));
        let saved = Document::from_slots([("n", json!(7))]).save(&store).unwrap();
        view.update(&saved).unwrap();
        view.update(&saved).unwrap();
        assert_eq!(view.index().len(), 1);
        assert!(view.is_indexed(&saved));
    }

    // ------------------------------------------------------------------
    // Find
    // ------------------------------------------------------------------

    fn numbered(store: &dyn Store, view: &View) {
        for n in [5, 1, 4, 2, 3] {
            save(store, view, &mut Document::from_slots([("n", json!(n))]));
        }
    }

    #[test]
    fn range_forward_and_reverse() {
        let store = store();
        let view = view(ViewDefinition::named("v"));
        numbered(&store, &view);

        let range = FindOptions::new().start_key(json!(2)).end_key(json!(4));
        let forward = view.find(&range, &store).unwrap();
        assert_eq!(numbers(&forward), vec![json!(2), json!(3), json!(4)]);

        let reverse = view.find(&range.clone().reverse(true), &store).unwrap();
        assert_eq!(numbers(&reverse), vec![json!(4), json!(3), json!(2)]);
    }

    #[test]
    fn offset_and_limit_apply_after_direction() {
        let store = store();
        let view = view(ViewDefinition::named("v"));
        numbered(&store, &view);

        let rows = view
            .find(&FindOptions::new().reverse(true).offset(1).limit(2), &store)
            .unwrap();
        assert_eq!(numbers(&rows), vec![json!(4), json!(3)]);

        let rows = view.find(&FindOptions::new().offset(10), &store).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn with_keys_returns_decoded_keys() {
        let store = store();
        let view = view(ViewDefinition::named("v"));
        numbered(&store, &view);

        let rows = view
            .find(&FindOptions::new().key(json!(3)).with_keys(true), &store)
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].key, Some(json!(3)));

        let rows = view.find(&FindOptions::new().key(json!(3)), &store).unwrap();
        assert_eq!(rows[0].key, None);
    }

    #[test]
    fn array_key_is_a_prefix() {
        let store = store();
        let view = View::initialize(ViewDefinition::named("pairs"), IndexBacking::Memory)
            .unwrap()
            .with_mapper(|doc: &Document| {
                vec![(
                    json!([doc.get("group").cloned(), doc.get("n").cloned()]),
                    ViewValue::Document(doc.clone()),
                )]
            });
        for (group, n) in [("a", 1), ("b", 2), ("a", 3), ("ab", 4)] {
            save(
                &store,
                &view,
                &mut Document::from_slots([("group", json!(group)), ("n", json!(n))]),
            );
        }

        let rows = view.find(&FindOptions::new().key(json!(["a"])), &store).unwrap();
        assert_eq!(numbers(&rows), vec![json!(1), json!(3)]);
    }

    #[test]
    fn contradictory_find_options_rejected() {
        let store = store();
        let view = view(ViewDefinition::named("v"));
        let bad = [
            FindOptions::new().key(json!(1)).start_key(json!(0)),
            FindOptions::new().key(json!(1)).end_key(json!(2)),
            FindOptions::new().start_key(json!(4)).end_key(json!(2)),
        ];
        for options in bad {
            assert!(matches!(
                view.find(&options, &store),
                Err(ViewError::InvalidFindOptions(_))
            ));
        }
    }

    // ------------------------------------------------------------------
    // Values
    // ------------------------------------------------------------------

    fn value_view(inline: bool) -> View {
        View::initialize(
            ViewDefinition::named("values").inline(inline).fixed_size_value(32),
            IndexBacking::Memory,
        )
        .unwrap()
        .with_mapper(|doc: &Document| {
            doc.get("payload")
                .map(|p| vec![(json!(doc.id().to_string()), ViewValue::Value(p.clone()))])
                .unwrap_or_default()
        })
    }

    #[test]
    fn plain_values_round_trip() {
        for inline in [false, true] {
            let store = store();
            let view = value_view(inline);
            let doc = Document::from_slots([("payload", json!({"x": [1, 2]}))]);
            save(&store, &view, &mut doc.clone());

            let rows = view.find(&FindOptions::new(), &store).unwrap();
            assert_eq!(rows[0].value, ViewValue::Value(json!({"x": [1, 2]})));
        }
    }

    #[test]
    fn value_encoding_depends_on_inline() {
        let pointer = value_view(false).encode_value(&ViewValue::from(json!("v"))).unwrap();
        assert!(matches!(pointer, IndexValue::Pointer(_)));
        let inline = value_view(true).encode_value(&ViewValue::from(json!("v"))).unwrap();
        assert_eq!(inline, IndexValue::Inline("\"v\"".into()));
    }

    #[test]
    fn fixed_sizes_are_enforced() {
        let view = value_view(true);
        let long = json!("x".repeat(64));
        assert!(matches!(
            view.encode_value(&ViewValue::from(long)),
            Err(ViewError::ValueTooLarge { limit: 32, .. })
        ));

        let view = View::initialize(
            ViewDefinition::named("k").fixed_size_key(4),
            IndexBacking::Memory,
        )
        .unwrap();
        assert!(view.encode_key(&json!(true)).is_ok());
        assert!(matches!(
            view.encode_key(&json!("longer")),
            Err(ViewError::KeyTooLarge { limit: 4, .. })
        ));
    }

    // ------------------------------------------------------------------
    // Lifecycle and recovery
    // ------------------------------------------------------------------

    #[test]
    fn clear_and_delete() {
        let store = store();
        let view = view(ViewDefinition::named("v"));
        numbered(&store, &view);
        assert!(view.exists());

        view.clear().unwrap();
        assert!(view.exists());
        assert!(view.find(&FindOptions::new(), &store).unwrap().is_empty());

        view.delete().unwrap();
        assert!(!view.exists());
    }

    #[test]
    fn catch_up_indexes_missed_heads() {
        let store = store();
        let view = view(ViewDefinition::named("v"));
        let mut doc = Document::from_slots([("n", json!(1))]);
        doc.save(&store).unwrap();
        doc.set("n", 2);
        doc.save(&store).unwrap();
        Document::from_slots([("n", json!(3))]).save(&store).unwrap();

        assert_eq!(view.catch_up(&store).unwrap(), 2);
        assert_eq!(view.catch_up(&store).unwrap(), 0);
        let rows = view.find(&FindOptions::new(), &store).unwrap();
        assert_eq!(numbers(&rows), vec![json!(2), json!(3)]);
    }

    #[test]
    fn catch_up_indexes_missed_versions_oldest_first() {
        let store = store();
        let view = view(ViewDefinition::named("v").strategy(Strategy::Versions));
        let mut doc = Document::from_slots([("n", json!(1))]);
        save(&store, &view, &mut doc);
        doc.set("n", 2);
        doc.save(&store).unwrap();
        doc.set("n", 3);
        doc.save(&store).unwrap();

        assert_eq!(view.catch_up(&store).unwrap(), 2);
        let rows = view.find(&FindOptions::new(), &store).unwrap();
        assert_eq!(numbers(&rows), vec![json!(1), json!(2), json!(3)]);
    }

    #[test]
    fn file_backed_view_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let store = store();
        let open = || {
            View::initialize(ViewDefinition::named("v"), IndexBacking::file(dir.path()))
                .unwrap()
                .with_mapper(number_mapper)
        };
        {
            let view = open();
            numbered(&store, &view);
        }

        let view = open();
        assert_eq!(view.catch_up(&store).unwrap(), 0);
        let rows = view.find(&FindOptions::new().start_key(json!(4)), &store).unwrap();
        assert_eq!(numbers(&rows), vec![json!(4), json!(5)]);
    }
}
