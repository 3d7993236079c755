//! Database facade: store bootstrap, recovery and the collection catalog.

use crate::collection::Collection;
use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::journal::{self, RecoveryReport};
use crate::keys;
use crate::security;
use parking_lot::{Mutex, RwLock};
use quilldb_storage::{
    EncryptedStore, FileStore, FileStoreOptions, InMemoryStore, KeyValueStore,
};
use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The main database handle.
///
/// A database owns one key-value store and hands out [`Collection`]s backed
/// by it. Opening runs journal recovery, so every commit acknowledged before
/// a crash is visible afterwards.
///
/// # Opening a Database
///
/// ```rust
/// use quilldb_core::{Config, Database, Document};
///
/// let dir = tempfile::tempdir().unwrap();
/// let config = Config::new()
///     .store_path(dir.path().join("app.qdb"))
///     .credentials("user", "pass");
///
/// let db = Database::open(config.clone()).unwrap();
/// db.collection("test")
///     .unwrap()
///     .insert([Document::new().with("firstName", "fn1")])
///     .unwrap();
/// db.close().unwrap();
///
/// let db = Database::open(config).unwrap();
/// assert_eq!(db.collection("test").unwrap().size().unwrap(), 1);
/// ```
///
/// # Closing
///
/// [`close`](Self::close) rolls back every transaction that is still open,
/// logging a warning for each, waits for in-flight commits, then flushes and
/// releases the store. Dropping the database closes it.
pub struct Database {
    config: Config,
    store: Arc<dyn KeyValueStore>,
    collections: Mutex<HashMap<String, Collection>>,
    next_txid: Arc<AtomicU64>,
    recovery: RecoveryReport,
    is_open: RwLock<bool>,
}

impl Database {
    /// Opens a database.
    ///
    /// Without a store path the database lives in memory and is discarded on
    /// close. With credentials, values are encrypted at rest.
    ///
    /// # Errors
    ///
    /// - `StoreOpen` if the store file cannot be opened or is locked
    /// - `Authentication` if credentials are wrong, missing for a protected
    ///   store, or given for an unprotected store that already holds data
    /// - `InvalidOperation` if the field separator is empty
    pub fn open(config: Config) -> CoreResult<Self> {
        validate(&config)?;

        let raw: Arc<dyn KeyValueStore> = match &config.store_path {
            None => Arc::new(InMemoryStore::new()),
            Some(path) => {
                let options = FileStoreOptions {
                    create_if_missing: config.create_if_missing,
                    sync_on_write: config.sync_on_commit,
                };
                let store = FileStore::open_with(path, options).map_err(|e| {
                    CoreError::store_open(format!("{}: {e}", path.display()))
                })?;
                Arc::new(store)
            }
        };

        Self::open_with_store(config, raw)
    }

    /// Opens a database over a caller-supplied store.
    ///
    /// `config.store_path` is only recorded; the store is used as given.
    /// Credentials, recovery and the field separator behave as in
    /// [`open`](Self::open).
    ///
    /// # Errors
    ///
    /// See [`open`](Self::open).
    pub fn open_with_store(config: Config, raw: Arc<dyn KeyValueStore>) -> CoreResult<Self> {
        validate(&config)?;

        let store = match Self::attach(&raw, &config) {
            Ok(store) => store,
            Err(e) => {
                if let Err(close) = raw.close() {
                    warn!(error = %close, "failed to release store after failed open");
                }
                return Err(e);
            }
        };

        info!(
            path = ?config.store_path,
            encrypted = store.is_encrypted(),
            "database opened"
        );

        let recovery = journal::recover(store.as_ref())?;

        Ok(Self {
            config,
            store,
            collections: Mutex::new(HashMap::new()),
            next_txid: Arc::new(AtomicU64::new(1)),
            recovery,
            is_open: RwLock::new(true),
        })
    }

    /// Opens an unencrypted in-memory database with default settings.
    ///
    /// # Errors
    ///
    /// Fails only if the default configuration is rejected.
    pub fn open_in_memory() -> CoreResult<Self> {
        Self::open(Config::default())
    }

    /// Verifies credentials and wraps the raw store if encryption is on.
    fn attach(raw: &Arc<dyn KeyValueStore>, config: &Config) -> CoreResult<Arc<dyn KeyValueStore>> {
        match security::bootstrap(raw, config.credentials.as_ref())? {
            Some(key) => Ok(Arc::new(EncryptedStore::new(Arc::clone(raw), key))),
            None => Ok(Arc::clone(raw)),
        }
    }

    /// Returns the named collection, creating it if needed.
    ///
    /// Every call for the same name returns a handle to the same collection
    /// while it stays open. Once it has been closed or dropped, a fresh
    /// handle is created.
    ///
    /// # Errors
    ///
    /// `DatabaseClosed`, an invalid name, or a store failure.
    pub fn collection(&self, name: &str) -> CoreResult<Collection> {
        self.ensure_open()?;
        keys::validate_collection_name(name)?;

        let mut collections = self.collections.lock();
        if let Some(existing) = collections.get(name) {
            if existing.is_open() {
                return Ok(existing.clone());
            }
        }

        let catalog_key = keys::catalog_key(name);
        if self.store.get(&catalog_key)?.is_none() {
            self.store.put(&catalog_key, &[])?;
            debug!(collection = name, "collection created");
        }
        let collection = Collection::load(
            name,
            &self.config.field_separator,
            Arc::clone(&self.store),
            Arc::clone(&self.next_txid),
        )?;
        collections.insert(name.to_string(), collection.clone());
        Ok(collection)
    }

    /// Returns true if a collection with this name exists.
    ///
    /// # Errors
    ///
    /// `DatabaseClosed` or a store failure.
    pub fn has_collection(&self, name: &str) -> CoreResult<bool> {
        self.ensure_open()?;
        Ok(self.store.get(&keys::catalog_key(name))?.is_some())
    }

    /// Names of all collections, sorted.
    ///
    /// # Errors
    ///
    /// `DatabaseClosed` or a store failure.
    pub fn list_collection_names(&self) -> CoreResult<Vec<String>> {
        self.ensure_open()?;
        Ok(self
            .store
            .scan_prefix(keys::CATALOG_PREFIX)?
            .iter()
            .filter_map(|(key, _)| keys::parse_catalog_key(key))
            .collect())
    }

    /// Drops a collection and all its documents. Unknown names are ignored.
    ///
    /// # Errors
    ///
    /// `DatabaseClosed` or a store failure.
    pub fn drop_collection(&self, name: &str) -> CoreResult<()> {
        if !self.has_collection(name)? {
            return Ok(());
        }
        let collection = self.collection(name)?;
        collection.drop()?;
        self.collections.lock().remove(name);
        Ok(())
    }

    /// What journal recovery did when this database was opened.
    #[must_use]
    pub fn recovery_report(&self) -> RecoveryReport {
        self.recovery
    }

    /// Returns true if values are encrypted at rest.
    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        self.store.is_encrypted()
    }

    /// Returns the configuration the database was opened with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns true until [`close`](Self::close) is called.
    #[must_use]
    pub fn is_open(&self) -> bool {
        *self.is_open.read()
    }

    /// Returns true once [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        !self.is_open()
    }

    /// Rewrites the store file without overwritten or deleted entries.
    ///
    /// # Errors
    ///
    /// `DatabaseClosed` or a store failure.
    pub fn compact(&self) -> CoreResult<()> {
        self.ensure_open()?;
        self.store.compact()?;
        debug!("store compacted");
        Ok(())
    }

    /// Closes the database. Closing twice is a no-op.
    ///
    /// Open transactions are rolled back with a warning; in-flight commits
    /// finish first.
    ///
    /// # Errors
    ///
    /// A store failure while flushing. The store is released regardless.
    pub fn close(&self) -> CoreResult<()> {
        let mut is_open = self.is_open.write();
        if !*is_open {
            return Ok(());
        }
        *is_open = false;

        let collections: Vec<_> = self.collections.lock().drain().map(|(_, c)| c).collect();
        for collection in &collections {
            collection.inner().shutdown();
        }

        let mut result = Ok(());
        if self.config.compact_on_close && !self.config.is_in_memory() {
            result = self.store.compact();
        }
        let result = result.and_then(|()| self.store.commit());
        let closed = self.store.close();
        result.and(closed)?;

        info!(path = ?self.config.store_path, "database closed");
        Ok(())
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if *self.is_open.read() {
            Ok(())
        } else {
            Err(CoreError::DatabaseClosed)
        }
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "error closing database on drop");
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("store_path", &self.config.store_path)
            .field("encrypted", &self.is_encrypted())
            .field("open", &self.is_open())
            .finish()
    }
}

fn validate(config: &Config) -> CoreResult<()> {
    if config.field_separator.is_empty() {
        return Err(CoreError::invalid_operation("field separator is empty"));
    }
    Ok(())
}

/// Returns true if the store file at `path` is protected by credentials.
///
/// # Errors
///
/// `StoreOpen` if the file cannot be opened, or a store failure.
pub fn is_protected(path: &std::path::Path) -> CoreResult<bool> {
    let options = FileStoreOptions {
        create_if_missing: false,
        sync_on_write: false,
    };
    let store = FileStore::open_with(path, options)
        .map_err(|e| CoreError::store_open(format!("{}: {e}", path.display())))?;
    let protected = security::is_protected(&store);
    store.close()?;
    protected
}
