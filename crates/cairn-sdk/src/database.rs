use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use cairn_store::{
    Document, FileChunkStorage, MemoryChunkStorage, SkiplistStore, Store,
};
use cairn_types::{DocumentId, Version};
use cairn_view::{
    all_slots, FindOptions, IndexBacking, Mapper, View, ViewDefinition, ViewRow, ALL_SLOTS_VIEW,
};
use tracing::{debug, info};

use crate::config::{DatabaseConfig, IndexType, StorageType, StoreType};
use crate::error::{SdkError, SdkResult};

const STORE_DIR: &str = "store";
const VIEWS_DIR: &str = "views";

/// An open database: one store plus the views derived from it.
///
/// Every save goes through [`Database::save`], which updates each
/// registered view before returning. Views registered later, or opened
/// over a store that gained documents they never saw, catch up on
/// registration.
pub struct Database {
    config: DatabaseConfig,
    store: SkiplistStore,
    backing: IndexBacking,
    views: RwLock<BTreeMap<String, Arc<View>>>,
}

impl Database {
    /// Open a database as described by `config`.
    ///
    /// The built-in all-slots view is always registered.
    pub fn open(config: DatabaseConfig) -> SdkResult<Self> {
        let storage_type = config.storage_type()?;
        let store_type = config.store_type()?;
        let index_type = config.index_type()?;

        let store = match store_type {
            StoreType::Skiplist => match storage_type {
                StorageType::Memory => {
                    SkiplistStore::new(MemoryChunkStorage::new(), config.store_config())
                }
                StorageType::File => SkiplistStore::new(
                    FileChunkStorage::open(config.root.join(STORE_DIR), config.volume_config())?,
                    config.store_config(),
                ),
            },
        };
        let backing = match index_type {
            IndexType::Memory => IndexBacking::Memory,
            IndexType::File => IndexBacking::File {
                dir: config.root.join(VIEWS_DIR),
                volume: config.volume_config(),
            },
        };

        let db = Self {
            config,
            store,
            backing,
            views: RwLock::new(BTreeMap::new()),
        };
        db.insert_view(all_slots(db.backing.clone())?)?;

        info!(
            root = %db.config.root.display(),
            storage = storage_type.as_str(),
            store = store_type.as_str(),
            index = index_type.as_str(),
            "database opened"
        );
        Ok(db)
    }

    /// An in-memory database with default settings.
    pub fn memory() -> SdkResult<Self> {
        Self::open(DatabaseConfig::memory())
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// The underlying store. Saving through it directly bypasses views.
    pub fn store(&self) -> &dyn Store {
        &self.store
    }

    // ---- Documents ----

    /// Save `document` and update every view.
    ///
    /// A heads view indexes the saved version only while it is still the
    /// store's head, so concurrent saves of one identifier leave the
    /// newest version indexed whatever order their view updates run in.
    pub fn save(&self, document: &mut Document) -> SdkResult<Document> {
        let saved = document.save(&self.store)?;
        let views = self.views.read().expect("lock poisoned");
        for view in views.values() {
            view.update_from(&saved, &self.store)?;
        }
        debug!(
            id = %saved.id().short_id(),
            views = views.len(),
            "document saved"
        );
        Ok(saved)
    }

    /// Fetch a document, at `version` or at its head.
    pub fn get(&self, id: &DocumentId, version: Option<&Version>) -> SdkResult<Option<Document>> {
        Ok(self.store.find(id, version)?)
    }

    /// Like [`get`](Self::get), but a missing document is an error.
    pub fn fetch(&self, id: &DocumentId, version: Option<&Version>) -> SdkResult<Document> {
        self.get(id, version)?.ok_or_else(|| match version {
            Some(version) => SdkError::DocumentNotFound(format!("{id}.{}", version.to_hex())),
            None => SdkError::DocumentNotFound(id.to_string()),
        })
    }

    /// Every version of `id`, head first.
    pub fn history(&self, id: &DocumentId) -> SdkResult<Vec<Document>> {
        Ok(self.fetch(id, None)?.history(&self.store)?)
    }

    /// Check the version chain of `id`. Returns its length.
    pub fn verify(&self, id: &DocumentId) -> SdkResult<usize> {
        Ok(self.fetch(id, None)?.verify_history(&self.store)?)
    }

    /// The latest version of every document.
    pub fn heads(&self) -> SdkResult<Vec<Document>> {
        Ok(self.store.heads()?)
    }

    // ---- Views ----

    /// Register a view and index whatever the store already holds.
    pub fn register_view(
        &self,
        definition: ViewDefinition,
        mapper: impl Mapper + 'static,
    ) -> SdkResult<Arc<View>> {
        let view = View::initialize(definition, self.backing.clone())?.with_mapper(mapper);
        self.insert_view(view)
    }

    fn insert_view(&self, view: View) -> SdkResult<Arc<View>> {
        let mut views = self.views.write().expect("lock poisoned");
        if views.contains_key(view.name()) {
            return Err(SdkError::ViewExists(view.name().to_string()));
        }
        let replayed = view.catch_up(&self.store)?;
        let view = Arc::new(view);
        views.insert(view.name().to_string(), view.clone());
        info!(view = view.name(), replayed, "view registered");
        Ok(view)
    }

    pub fn view(&self, name: &str) -> Option<Arc<View>> {
        self.views.read().expect("lock poisoned").get(name).cloned()
    }

    pub fn view_names(&self) -> Vec<String> {
        self.views
            .read()
            .expect("lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// Query a registered view.
    pub fn find_view(&self, name: &str, options: &FindOptions) -> SdkResult<Vec<ViewRow>> {
        let view = self
            .view(name)
            .ok_or_else(|| SdkError::ViewNotFound(name.to_string()))?;
        Ok(view.find(options, &self.store)?)
    }

    /// Query the built-in all-slots view.
    pub fn find_slots(&self, options: &FindOptions) -> SdkResult<Vec<ViewRow>> {
        self.find_view(ALL_SLOTS_VIEW, options)
    }

    /// Unregister a view and delete its index.
    pub fn drop_view(&self, name: &str) -> SdkResult<()> {
        let view = self
            .views
            .write()
            .expect("lock poisoned")
            .remove(name)
            .ok_or_else(|| SdkError::ViewNotFound(name.to_string()))?;
        view.delete()?;
        info!(view = name, "view dropped");
        Ok(())
    }

    // ---- Maintenance ----

    /// Release cached chunks; they are reloaded on next access.
    pub fn flush(&self) -> SdkResult<()> {
        Ok(self.store.flush()?)
    }

    /// Delete every document and empty every view.
    pub fn clear(&self) -> SdkResult<()> {
        let views = self.views.read().expect("lock poisoned");
        self.store.clear()?;
        for view in views.values() {
            view.clear()?;
        }
        info!(views = views.len(), "database cleared");
        Ok(())
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("root", &self.config.root)
            .field("storage", &self.config.storage)
            .field("index", &self.config.index)
            .field("views", &self.view_names())
            .finish()
    }
}
