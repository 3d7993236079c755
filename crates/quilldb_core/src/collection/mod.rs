//! Collections: named document sets with transactional writes.
//!
//! A [`Collection`] is a cheap, cloneable handle. All handles of one
//! collection share its committed state, its commit lock and its registry of
//! open transactions.
//!
//! ## Locking
//!
//! Locks are always taken in this order:
//!
//! 1. a transaction's pending state
//! 2. the commit lock
//! 3. the lifecycle, then the committed state
//! 4. the registry of open transactions
//!
//! Force-rolling back transactions copies the registry and releases it before
//! touching any transaction.

mod state;
mod write;

pub(crate) use state::CollectionState;
pub use write::{UpdateOptions, WriteResult};

use crate::document::{decode_document, encode_document, Document, DocumentId};
use crate::error::{CoreError, CoreResult};
use crate::filter::Filter;
use crate::journal::{JournalOp, TransactionJournal};
use crate::keys;
use crate::transaction::{Transaction, TransactionInner};
use crate::types::{SequenceNumber, TransactionId};
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use quilldb_storage::{KeyValueStore, WriteBatch};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

/// Lifecycle of a collection handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Lifecycle {
    Open,
    Closed,
    Dropped,
}

type Registry = BTreeMap<TransactionId, (SequenceNumber, Weak<TransactionInner>)>;

pub(crate) struct CollectionInner {
    pub(crate) name: String,
    pub(crate) separator: String,
    store: Arc<dyn KeyValueStore>,
    next_txid: Arc<AtomicU64>,
    lifecycle: RwLock<Lifecycle>,
    pub(crate) state: RwLock<CollectionState>,
    commit_lock: Mutex<()>,
    active: Mutex<Registry>,
}

impl CollectionInner {
    pub(crate) fn ensure_usable(&self) -> CoreResult<()> {
        check_lifecycle(&self.name, *self.lifecycle.read())
    }

    /// Registers a new transaction at the current committed sequence.
    fn begin(self: &Arc<Self>) -> CoreResult<Transaction> {
        // Holding the lifecycle read lock keeps close/drop from missing us.
        let lifecycle = self.lifecycle.read();
        check_lifecycle(&self.name, *lifecycle)?;

        let txid = TransactionId::new(self.next_txid.fetch_add(1, Ordering::Relaxed));
        let state = self.state.read();
        let snapshot = state.committed_seq();
        let txn = Transaction::new(txid, snapshot, Arc::clone(self));
        self.active
            .lock()
            .insert(txid, (snapshot, Arc::downgrade(txn.inner())));
        drop(state);
        drop(lifecycle);

        debug!(collection = %self.name, %txid, %snapshot, "transaction started");
        Ok(txn)
    }

    /// Deletes the journal a failed commit left in the store.
    pub(crate) fn discard_journal(&self, txid: TransactionId) -> CoreResult<()> {
        self.store.delete(&keys::journal_key(txid))?;
        debug!(collection = %self.name, %txid, "discarded journal of failed commit");
        Ok(())
    }

    pub(crate) fn deregister(&self, txid: TransactionId) {
        self.active.lock().remove(&txid);
    }

    /// Applies one transaction's resolved writes.
    ///
    /// Fails with `TransactionConflict` if any id was committed after
    /// `snapshot`. A store failure leaves the committed state as it was.
    /// `stranded` is set when the journal of a failed attempt could not be
    /// deleted, and cleared once no journal of this transaction remains.
    pub(crate) fn commit(
        &self,
        txid: TransactionId,
        snapshot: SequenceNumber,
        writes: Vec<(DocumentId, Option<Document>)>,
        stranded: &mut bool,
    ) -> CoreResult<SequenceNumber> {
        let _commit = self.commit_lock.lock();
        self.ensure_usable()?;

        let sequence = {
            let state = self.state.read();
            if let Some((id, _)) = writes
                .iter()
                .find(|(id, _)| state.latest_seq(id).is_some_and(|seq| seq > snapshot))
            {
                return Err(CoreError::transaction_conflict(&self.name, id.as_str()));
            }
            if writes.is_empty() {
                return Ok(state.committed_seq());
            }
            state.committed_seq().next()
        };

        let mut ops = Vec::with_capacity(writes.len());
        for (id, doc) in &writes {
            ops.push(match doc {
                Some(doc) => JournalOp::Put {
                    id: id.clone(),
                    payload: encode_document(doc)?,
                },
                None => JournalOp::Delete { id: id.clone() },
            });
        }

        let mut batch = WriteBatch::new();
        for op in &ops {
            match op {
                JournalOp::Put { id, payload } => {
                    batch.put(keys::document_key(&self.name, id), payload.clone());
                }
                JournalOp::Delete { id } => {
                    batch.delete(keys::document_key(&self.name, id));
                }
            }
        }

        let journal_key = keys::journal_key(txid);
        let journal = TransactionJournal {
            txid,
            collection: self.name.clone(),
            sequence,
            ops,
        };
        self.store.put(&journal_key, &journal.encode()?)?;

        batch.delete(journal_key.clone());
        if let Err(e) = self.store.write(batch) {
            *stranded = match self.store.delete(&journal_key) {
                Ok(()) => false,
                Err(cleanup) => {
                    warn!(
                        collection = %self.name,
                        %txid,
                        error = %cleanup,
                        "failed to discard journal of failed commit"
                    );
                    true
                }
            };
            return Err(e.into());
        }
        *stranded = false;

        let mut state = self.state.write();
        let applied = state.apply(writes);
        let horizon = self
            .active
            .lock()
            .values()
            .map(|(snapshot, _)| *snapshot)
            .min()
            .unwrap_or(applied);
        state.prune(horizon);
        Ok(applied)
    }

    /// Force-rolls back every open transaction.
    fn abort_active(&self, reason: &str) {
        let registry = std::mem::take(&mut *self.active.lock());
        for (txid, (_, txn)) in registry {
            if txn.upgrade().is_some_and(|txn| txn.force_rollback()) {
                warn!(collection = %self.name, %txid, "rolled back open transaction on {reason}");
            }
        }
    }

    /// Closes the handle for database shutdown and waits for in-flight
    /// commits.
    pub(crate) fn shutdown(&self) {
        {
            let mut lifecycle = self.lifecycle.write();
            if *lifecycle == Lifecycle::Open {
                *lifecycle = Lifecycle::Closed;
            }
        }
        self.abort_active("database close");
        drop(self.commit_lock.lock());
    }

    /// Read access to the committed state.
    ///
    /// Readers must take the committed sequence from this same guard: a
    /// commit landing between two guards can prune the older version.
    fn committed_state(&self) -> CoreResult<RwLockReadGuard<'_, CollectionState>> {
        self.ensure_usable()?;
        Ok(self.state.read())
    }
}

fn check_lifecycle(name: &str, lifecycle: Lifecycle) -> CoreResult<()> {
    match lifecycle {
        Lifecycle::Open => Ok(()),
        Lifecycle::Closed => Err(CoreError::collection_closed(name)),
        Lifecycle::Dropped => Err(CoreError::collection_dropped(name)),
    }
}

/// A named set of documents.
///
/// Writes made directly on a collection run as implicit single-call
/// transactions. Use [`begin_transaction`](Self::begin_transaction) to group
/// several writes into one atomic commit.
///
/// # Example
///
/// ```rust
/// use quilldb_core::{Database, Document, Filter};
///
/// let db = Database::open_in_memory().unwrap();
/// let people = db.collection("people").unwrap();
///
/// let txn = people.begin_transaction().unwrap();
/// txn.insert([Document::new().with("firstName", "fn1")]).unwrap();
/// assert_eq!(people.size().unwrap(), 0);
/// txn.commit().unwrap();
///
/// assert_eq!(people.find(&Filter::eq("firstName", "fn1")).unwrap().len(), 1);
/// ```
#[derive(Clone)]
pub struct Collection {
    inner: Arc<CollectionInner>,
}

impl Collection {
    /// Loads a collection's documents from the store.
    pub(crate) fn load(
        name: &str,
        separator: &str,
        store: Arc<dyn KeyValueStore>,
        next_txid: Arc<AtomicU64>,
    ) -> CoreResult<Self> {
        let prefix = keys::collection_prefix(name);
        let mut docs = Vec::new();
        for (key, value) in store.scan_prefix(&prefix)? {
            let id = std::str::from_utf8(&key[prefix.len()..])
                .ok()
                .and_then(DocumentId::from_text)
                .ok_or_else(|| {
                    CoreError::codec(format!("invalid document key in collection {name}"))
                })?;
            docs.push((id, decode_document(&value)?));
        }
        debug!(collection = name, documents = docs.len(), "collection loaded");

        Ok(Self {
            inner: Arc::new(CollectionInner {
                name: name.to_string(),
                separator: separator.to_string(),
                store,
                next_txid,
                lifecycle: RwLock::new(Lifecycle::Open),
                state: RwLock::new(CollectionState::load(docs)),
                commit_lock: Mutex::new(()),
                active: Mutex::new(BTreeMap::new()),
            }),
        })
    }

    pub(crate) fn inner(&self) -> &Arc<CollectionInner> {
        &self.inner
    }

    /// Returns the collection name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns true while the collection is neither closed nor dropped.
    #[must_use]
    pub fn is_open(&self) -> bool {
        *self.inner.lifecycle.read() == Lifecycle::Open
    }

    /// Returns true once the collection has been dropped.
    #[must_use]
    pub fn is_dropped(&self) -> bool {
        *self.inner.lifecycle.read() == Lifecycle::Dropped
    }

    /// Starts a transaction reading the current committed state.
    ///
    /// # Errors
    ///
    /// Fails if the collection is closed or dropped.
    pub fn begin_transaction(&self) -> CoreResult<Transaction> {
        self.inner.begin()
    }

    /// Inserts documents in one implicit transaction.
    ///
    /// Documents without an `_id` get a generated one.
    ///
    /// # Errors
    ///
    /// `DuplicateKey` if an id already exists or repeats within the call;
    /// nothing is inserted in that case.
    pub fn insert(&self, docs: impl IntoIterator<Item = Document>) -> CoreResult<WriteResult> {
        self.implicit(|txn| txn.insert(docs))
    }

    /// Merges `update` into every matching document.
    ///
    /// # Errors
    ///
    /// Fails if the collection is unusable, the commit conflicts or the store
    /// fails.
    pub fn update(&self, filter: &Filter, update: &Document) -> CoreResult<WriteResult> {
        self.update_with_options(filter, update, UpdateOptions::default())
    }

    /// [`update`](Self::update) with explicit options.
    ///
    /// # Errors
    ///
    /// See [`update`](Self::update).
    pub fn update_with_options(
        &self,
        filter: &Filter,
        update: &Document,
        options: UpdateOptions,
    ) -> CoreResult<WriteResult> {
        self.implicit(|txn| txn.update_with_options(filter, update, options))
    }

    /// Removes every matching document. Matching nothing is not an error.
    ///
    /// # Errors
    ///
    /// Fails if the collection is unusable, the commit conflicts or the store
    /// fails.
    pub fn remove(&self, filter: &Filter) -> CoreResult<WriteResult> {
        self.implicit(|txn| txn.remove(filter))
    }

    /// Returns committed documents matching the filter, ordered by id.
    ///
    /// # Errors
    ///
    /// Fails if the collection is closed or dropped.
    pub fn find(&self, filter: &Filter) -> CoreResult<Vec<Document>> {
        let state = self.inner.committed_state()?;
        let snapshot = state.committed_seq();
        let separator = &self.inner.separator;
        if let Some(id) = filter.as_id() {
            return Ok(state.get(id, snapshot).cloned().into_iter().collect());
        }
        Ok(state
            .iter_at(snapshot)
            .filter(|(id, doc)| filter.matches(id, doc, separator))
            .map(|(_, doc)| doc.clone())
            .collect())
    }

    /// Returns the committed document with this id.
    ///
    /// # Errors
    ///
    /// Fails if the collection is closed or dropped.
    pub fn get_by_id(&self, id: &DocumentId) -> CoreResult<Option<Document>> {
        let state = self.inner.committed_state()?;
        Ok(state.get(id, state.committed_seq()).cloned())
    }

    /// Number of committed documents.
    ///
    /// # Errors
    ///
    /// Fails if the collection is closed or dropped.
    pub fn size(&self) -> CoreResult<usize> {
        let state = self.inner.committed_state()?;
        Ok(state.count_at(state.committed_seq()))
    }

    /// Closes the collection, rolling back its open transactions and waiting
    /// for commits already in flight.
    ///
    /// Closing a closed or dropped collection does nothing. Get a fresh handle
    /// from the database to use the collection again.
    pub fn close(&self) {
        {
            let mut lifecycle = self.inner.lifecycle.write();
            if *lifecycle != Lifecycle::Open {
                return;
            }
            *lifecycle = Lifecycle::Closed;
        }
        self.inner.abort_active("collection close");
        // A commit past its usability check still lands before a fresh
        // handle can load the collection.
        drop(self.inner.commit_lock.lock());
        debug!(collection = %self.inner.name, "collection closed");
    }

    /// Deletes the collection and all its documents.
    ///
    /// Open transactions are rolled back. Every later operation on any handle
    /// of this collection fails with `CollectionDropped`.
    ///
    /// # Errors
    ///
    /// `CollectionDropped` if already dropped; a store failure leaves the
    /// collection as it was.
    pub fn drop(&self) -> CoreResult<()> {
        let previous = {
            let mut lifecycle = self.inner.lifecycle.write();
            if *lifecycle == Lifecycle::Dropped {
                return Err(CoreError::collection_dropped(&self.inner.name));
            }
            std::mem::replace(&mut *lifecycle, Lifecycle::Dropped)
        };
        self.inner.abort_active("collection drop");

        let _commit = self.inner.commit_lock.lock();
        let mut batch = WriteBatch::new();
        for id in self.inner.state.read().ids() {
            batch.delete(keys::document_key(&self.inner.name, id));
        }
        batch.delete(keys::catalog_key(&self.inner.name));
        if let Err(e) = self.inner.store.write(batch) {
            *self.inner.lifecycle.write() = previous;
            return Err(e.into());
        }
        self.inner.state.write().clear();
        debug!(collection = %self.inner.name, "collection dropped");
        Ok(())
    }

    fn implicit<T>(&self, op: impl FnOnce(&Transaction) -> CoreResult<T>) -> CoreResult<T> {
        let txn = self.begin_transaction()?;
        let out = op(&txn)?;
        txn.commit()?;
        Ok(out)
    }
}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.inner.name)
            .field("lifecycle", &*self.inner.lifecycle.read())
            .finish()
    }
}
