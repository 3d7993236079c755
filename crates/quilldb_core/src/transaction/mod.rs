//! Transactions over a single collection.
//!
//! A transaction reads the collection as of the moment it began, plus its
//! own pending writes. Nobody else sees those writes until commit.
//!
//! Commit is first-committer-wins: if any document the transaction writes
//! was committed by someone else after the transaction began, the commit
//! fails with `TransactionConflict` and the transaction is rolled back. The
//! engine never retries on its own.

mod state;

pub use state::TransactionState;

use crate::collection::{CollectionInner, UpdateOptions, WriteResult};
use crate::document::{Document, DocumentId, ID_FIELD};
use crate::error::{CoreError, CoreResult};
use crate::filter::Filter;
use crate::types::{SequenceNumber, TransactionId};
use parking_lot::Mutex;
use state::{PendingOp, PendingState};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

pub(crate) struct TransactionInner {
    id: TransactionId,
    snapshot: SequenceNumber,
    collection: Arc<CollectionInner>,
    pending: Mutex<PendingState>,
}

impl TransactionInner {
    /// Rolls back if still open. Returns true if it did.
    pub(crate) fn force_rollback(&self) -> bool {
        let mut pending = self.pending.lock();
        if pending.state.is_open() {
            self.discard_stranded_or_warn(&mut pending);
            pending.finish(TransactionState::RolledBack);
            true
        } else {
            false
        }
    }

    /// Deletes the journal a failed commit left behind, if any.
    fn discard_stranded(&self, pending: &mut PendingState) -> CoreResult<()> {
        if pending.stranded_journal {
            self.collection.discard_journal(self.id)?;
            pending.stranded_journal = false;
        }
        Ok(())
    }

    fn discard_stranded_or_warn(&self, pending: &mut PendingState) {
        if let Err(e) = self.discard_stranded(pending) {
            warn!(
                txid = %self.id,
                error = %e,
                "journal of failed commit left in store, it will be replayed at next open"
            );
        }
    }

    fn lookup(&self, pending: &PendingState, id: &DocumentId) -> Option<Document> {
        match pending.overlay.get(id) {
            Some(doc) => doc.clone(),
            None => self.collection.state.read().get(id, self.snapshot).cloned(),
        }
    }

    /// Documents visible to this transaction that match `filter`, by id.
    fn scan(&self, pending: &PendingState, filter: &Filter) -> Vec<(DocumentId, Document)> {
        if let Some(id) = filter.as_id() {
            return self
                .lookup(pending, id)
                .map(|doc| (id.clone(), doc))
                .into_iter()
                .collect();
        }

        let separator = &self.collection.separator;
        let mut found = BTreeMap::new();
        {
            let state = self.collection.state.read();
            for (id, doc) in state.iter_at(self.snapshot) {
                if !pending.overlay.contains_key(id) && filter.matches(id, doc, separator) {
                    found.insert(id.clone(), doc.clone());
                }
            }
        }
        for (id, doc) in &pending.overlay {
            if let Some(doc) = doc {
                if filter.matches(id, doc, separator) {
                    found.insert(id.clone(), doc.clone());
                }
            }
        }
        found.into_iter().collect()
    }

    /// Locks the pending state of an open transaction on a usable collection.
    fn open_pending(&self) -> CoreResult<parking_lot::MutexGuard<'_, PendingState>> {
        let pending = self.pending.lock();
        pending.ensure_open(self.id)?;
        self.collection.ensure_usable()?;
        Ok(pending)
    }

    fn finish(&self, pending: &mut PendingState, state: TransactionState) {
        pending.finish(state);
        self.collection.deregister(self.id);
    }
}

/// A unit of work against one collection.
///
/// Dropping an open transaction rolls it back.
///
/// # Example
///
/// ```rust
/// use quilldb_core::{Database, Document, ALL};
///
/// let db = Database::open_in_memory().unwrap();
/// let test = db.collection("test").unwrap();
///
/// let txn = test.begin_transaction().unwrap();
/// txn.insert([Document::new().with("firstName", "fn1")]).unwrap();
/// assert_eq!(txn.find(&ALL).unwrap().len(), 1);
/// txn.rollback().unwrap();
///
/// assert_eq!(test.size().unwrap(), 0);
/// ```
pub struct Transaction {
    inner: Arc<TransactionInner>,
}

impl Transaction {
    pub(crate) fn new(
        id: TransactionId,
        snapshot: SequenceNumber,
        collection: Arc<CollectionInner>,
    ) -> Self {
        Self {
            inner: Arc::new(TransactionInner {
                id,
                snapshot,
                collection,
                pending: Mutex::new(PendingState::new()),
            }),
        }
    }

    pub(crate) fn inner(&self) -> &Arc<TransactionInner> {
        &self.inner
    }

    /// Returns the transaction id.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.inner.id
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.inner.pending.lock().state
    }

    /// Returns true while the transaction accepts reads and writes.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state().is_open()
    }

    /// Name of the collection this transaction works on.
    #[must_use]
    pub fn collection_name(&self) -> &str {
        &self.inner.collection.name
    }

    /// Stages documents for insertion.
    ///
    /// Documents without an `_id` (or with a null one) get a generated UUID.
    /// Either every document is staged or none is.
    ///
    /// # Errors
    ///
    /// - `TransactionClosed` if the transaction is not open
    /// - `InvalidDocument` if an `_id` is not non-empty text
    /// - `DuplicateKey` if an id is visible to this transaction or repeats
    pub fn insert(&self, docs: impl IntoIterator<Item = Document>) -> CoreResult<WriteResult> {
        let mut pending = self.inner.open_pending()?;

        let mut staged = Vec::new();
        let mut seen = BTreeSet::new();
        for mut doc in docs {
            let id = assign_id(&mut doc)?;
            if !seen.insert(id.clone()) || self.inner.lookup(&pending, &id).is_some() {
                return Err(CoreError::duplicate_key(
                    self.collection_name(),
                    id.as_str(),
                ));
            }
            staged.push((id, doc));
        }

        let ids: Vec<_> = staged.iter().map(|(id, _)| id.clone()).collect();
        for (id, doc) in staged {
            pending.record(PendingOp::Insert { id, doc });
        }
        Ok(WriteResult::from_ids(ids))
    }

    /// Merges `update` into every matching document.
    ///
    /// # Errors
    ///
    /// See [`update_with_options`](Self::update_with_options).
    pub fn update(&self, filter: &Filter, update: &Document) -> CoreResult<WriteResult> {
        self.update_with_options(filter, update, UpdateOptions::default())
    }

    /// Merges `update` into matching documents.
    ///
    /// The `_id` of an existing document never changes. With
    /// `insert_if_absent`, `update` itself is inserted when nothing matches.
    ///
    /// # Errors
    ///
    /// `TransactionClosed` if the transaction is not open; insert errors when
    /// `insert_if_absent` inserts.
    pub fn update_with_options(
        &self,
        filter: &Filter,
        update: &Document,
        options: UpdateOptions,
    ) -> CoreResult<WriteResult> {
        let mut pending = self.inner.open_pending()?;

        let mut targets = self.inner.scan(&pending, filter);
        if options.just_once {
            targets.truncate(1);
        }

        if targets.is_empty() {
            if !options.insert_if_absent {
                return Ok(WriteResult::default());
            }
            let mut doc = update.clone();
            let id = assign_id(&mut doc)?;
            if self.inner.lookup(&pending, &id).is_some() {
                return Err(CoreError::duplicate_key(
                    self.collection_name(),
                    id.as_str(),
                ));
            }
            pending.record(PendingOp::Insert {
                id: id.clone(),
                doc,
            });
            return Ok(WriteResult::from_ids(vec![id]));
        }

        let mut patch = update.clone();
        patch.remove_field(ID_FIELD);
        let mut ids = Vec::with_capacity(targets.len());
        for (id, mut doc) in targets {
            doc.merge(&patch);
            ids.push(id.clone());
            pending.record(PendingOp::Update { id, doc });
        }
        Ok(WriteResult::from_ids(ids))
    }

    /// Stages removal of every matching document.
    ///
    /// # Errors
    ///
    /// `TransactionClosed` if the transaction is not open.
    pub fn remove(&self, filter: &Filter) -> CoreResult<WriteResult> {
        let mut pending = self.inner.open_pending()?;
        let ids: Vec<_> = self
            .inner
            .scan(&pending, filter)
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        for id in &ids {
            pending.record(PendingOp::Remove { id: id.clone() });
        }
        Ok(WriteResult::from_ids(ids))
    }

    /// Returns matching documents, including this transaction's own writes,
    /// ordered by id.
    ///
    /// # Errors
    ///
    /// `TransactionClosed` if the transaction is not open.
    pub fn find(&self, filter: &Filter) -> CoreResult<Vec<Document>> {
        let pending = self.inner.open_pending()?;
        Ok(self
            .inner
            .scan(&pending, filter)
            .into_iter()
            .map(|(_, doc)| doc)
            .collect())
    }

    /// Returns the document with this id as this transaction sees it.
    ///
    /// # Errors
    ///
    /// `TransactionClosed` if the transaction is not open.
    pub fn get_by_id(&self, id: &DocumentId) -> CoreResult<Option<Document>> {
        let pending = self.inner.open_pending()?;
        Ok(self.inner.lookup(&pending, id))
    }

    /// Number of documents this transaction sees.
    ///
    /// # Errors
    ///
    /// `TransactionClosed` if the transaction is not open.
    pub fn size(&self) -> CoreResult<usize> {
        let pending = self.inner.open_pending()?;
        Ok(self.inner.scan(&pending, &Filter::All).len())
    }

    /// Commits every staged write atomically.
    ///
    /// # Errors
    ///
    /// - `TransactionClosed` if the transaction is not open
    /// - `TransactionConflict` if another transaction committed one of the
    ///   same documents first; this transaction is then rolled back
    /// - `StoreIo` if the store fails; nothing is applied and the
    ///   transaction stays open so it can be retried or rolled back
    pub fn commit(&self) -> CoreResult<()> {
        let mut pending = self.inner.pending.lock();
        pending.ensure_open(self.inner.id)?;

        let writes = pending.resolve_writes();
        let ops = pending.journal_len();
        let result = self.inner.collection.commit(
            self.inner.id,
            self.inner.snapshot,
            writes,
            &mut pending.stranded_journal,
        );
        match result {
            Ok(sequence) => {
                self.inner.finish(&mut pending, TransactionState::Committed);
                debug!(txid = %self.inner.id, %sequence, ops, "transaction committed");
                Ok(())
            }
            Err(e @ CoreError::TransactionConflict { .. }) => {
                self.inner.discard_stranded(&mut pending)?;
                self.inner.finish(&mut pending, TransactionState::RolledBack);
                debug!(txid = %self.inner.id, error = %e, "transaction rolled back on conflict");
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Discards every staged write.
    ///
    /// If an earlier commit failed after its journal became durable, that
    /// journal is deleted first so the writes are not replayed at the next
    /// open. Rolling back a rolled-back transaction does nothing.
    ///
    /// # Errors
    ///
    /// - `TransactionClosed` if the transaction was committed or closed
    /// - `StoreIo` if the leftover journal cannot be deleted; the
    ///   transaction stays open
    pub fn rollback(&self) -> CoreResult<()> {
        let mut pending = self.inner.pending.lock();
        match pending.state {
            TransactionState::Open => {
                self.inner.discard_stranded(&mut pending)?;
                let ops = pending.journal_len();
                self.inner.finish(&mut pending, TransactionState::RolledBack);
                debug!(txid = %self.inner.id, ops, "transaction rolled back");
                Ok(())
            }
            TransactionState::RolledBack => self.inner.discard_stranded(&mut pending),
            TransactionState::Committed | TransactionState::Closed => {
                Err(CoreError::transaction_closed(self.inner.id.as_u64()))
            }
        }
    }

    /// Rolls back if open and releases the transaction. Idempotent.
    pub fn close(&self) {
        let mut pending = self.inner.pending.lock();
        if pending.state.is_open() {
            debug!(txid = %self.inner.id, "closing open transaction, rolling back");
        }
        self.inner.discard_stranded_or_warn(&mut pending);
        if pending.state != TransactionState::Closed {
            self.inner.finish(&mut pending, TransactionState::Closed);
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.inner.id)
            .field("collection", &self.inner.collection.name)
            .field("snapshot", &self.inner.snapshot)
            .field("state", &self.state())
            .finish()
    }
}

/// Returns the document's id, generating one if it has none.
fn assign_id(doc: &mut Document) -> CoreResult<DocumentId> {
    let explicit = doc
        .get_field(ID_FIELD)
        .filter(|value| !value.is_null())
        .map(|value| {
            value.as_text().and_then(DocumentId::from_text).ok_or_else(|| {
                CoreError::invalid_document(format!(
                    "{ID_FIELD} must be a non-empty text value, got {}",
                    value.type_name()
                ))
            })
        });
    match explicit {
        Some(id) => id,
        None => {
            let id = DocumentId::generate();
            doc.put_field(ID_FIELD, id.as_str());
            Ok(id)
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::document::{Document, ID_FIELD};
    use crate::error::CoreError;
    use crate::filter::{Filter, ALL};
    use crate::{Database, TransactionState, UpdateOptions};

    fn person(first: &str, last: &str) -> Document {
        Document::new().with("firstName", first).with("lastName", last)
    }

    #[test]
    fn own_writes_visible_only_inside() {
        let db = Database::open_in_memory().unwrap();
        let c = db.collection("test").unwrap();
        let txn = c.begin_transaction().unwrap();
        let other = c.begin_transaction().unwrap();

        let ids = txn.insert([person("fn1", "ln1")]).unwrap().ids;
        assert_eq!(txn.find(&ALL).unwrap().len(), 1);
        assert!(txn.get_by_id(&ids[0]).unwrap().is_some());
        assert!(other.get_by_id(&ids[0]).unwrap().is_none());
        assert_eq!(c.size().unwrap(), 0);

        txn.commit().unwrap();
        assert_eq!(c.size().unwrap(), 1);
        // Snapshot taken before the commit stays as it was.
        assert_eq!(other.size().unwrap(), 0);
    }

    #[test]
    fn update_and_remove_see_pending_inserts() {
        let db = Database::open_in_memory().unwrap();
        let c = db.collection("test").unwrap();
        let txn = c.begin_transaction().unwrap();
        txn.insert([person("fn1", "ln1"), person("fn2", "ln2")]).unwrap();

        let updated = txn
            .update(&Filter::eq("firstName", "fn1"), &Document::new().with("age", 40))
            .unwrap();
        assert_eq!(updated.count, 1);
        let removed = txn.remove(&Filter::eq("firstName", "fn2")).unwrap();
        assert_eq!(removed.count, 1);
        txn.commit().unwrap();

        let docs = c.find(&ALL).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].get("age"), Some(&40i64.into()));
    }

    #[test]
    fn update_keeps_id() {
        let db = Database::open_in_memory().unwrap();
        let c = db.collection("test").unwrap();
        let id = c.insert([person("a", "b")]).unwrap().ids.remove(0);

        c.update(
            &Filter::id(id.clone()),
            &Document::new().with(ID_FIELD, "other").with("firstName", "z"),
        )
        .unwrap();
        let doc = c.get_by_id(&id).unwrap().unwrap();
        assert_eq!(doc.id(), Some(id));
        assert_eq!(doc.get("firstName"), Some(&"z".into()));
    }

    #[test]
    fn update_options() {
        let db = Database::open_in_memory().unwrap();
        let c = db.collection("test").unwrap();
        c.insert([person("a", "same"), person("b", "same")]).unwrap();

        let once = c
            .update_with_options(
                &Filter::eq("lastName", "same"),
                &Document::new().with("flag", true),
                UpdateOptions::new().just_once(true),
            )
            .unwrap();
        assert_eq!(once.count, 1);
        assert_eq!(c.find(&Filter::eq("flag", true)).unwrap().len(), 1);

        let nothing = c
            .update(&Filter::eq("lastName", "none"), &person("x", "none"))
            .unwrap();
        assert!(nothing.is_empty());

        let upsert = c
            .update_with_options(
                &Filter::eq("lastName", "none"),
                &person("x", "none"),
                UpdateOptions::new().insert_if_absent(true),
            )
            .unwrap();
        assert_eq!(upsert.count, 1);
        assert_eq!(c.size().unwrap(), 3);
    }

    #[test]
    fn invalid_id_is_rejected() {
        let db = Database::open_in_memory().unwrap();
        let c = db.collection("test").unwrap();
        let txn = c.begin_transaction().unwrap();
        for bad in [Document::new().with(ID_FIELD, 5), Document::new().with(ID_FIELD, "")] {
            let err = txn.insert([bad]).unwrap_err();
            assert!(matches!(err, CoreError::InvalidDocument { .. }));
        }
        assert!(txn.is_open());
    }

    #[test]
    fn state_transitions() {
        let db = Database::open_in_memory().unwrap();
        let c = db.collection("test").unwrap();

        let txn = c.begin_transaction().unwrap();
        assert_eq!(txn.state(), TransactionState::Open);
        txn.commit().unwrap();
        assert_eq!(txn.state(), TransactionState::Committed);
        assert!(matches!(
            txn.commit(),
            Err(CoreError::TransactionClosed { .. })
        ));
        assert!(matches!(
            txn.rollback(),
            Err(CoreError::TransactionClosed { .. })
        ));
        txn.close();
        txn.close();
        assert_eq!(txn.state(), TransactionState::Closed);

        let txn = c.begin_transaction().unwrap();
        txn.rollback().unwrap();
        txn.rollback().unwrap();
        assert_eq!(txn.state(), TransactionState::RolledBack);
        assert!(matches!(
            txn.insert([Document::new()]),
            Err(CoreError::TransactionClosed { .. })
        ));
    }

    #[test]
    fn first_committer_wins() {
        let db = Database::open_in_memory().unwrap();
        let c = db.collection("test").unwrap();
        let id = c.insert([person("a", "b")]).unwrap().ids.remove(0);

        let t1 = c.begin_transaction().unwrap();
        let t2 = c.begin_transaction().unwrap();
        let filter = Filter::id(id.clone());
        t1.update(&filter, &Document::new().with("by", "t1")).unwrap();
        t2.update(&filter, &Document::new().with("by", "t2")).unwrap();

        t1.commit().unwrap();
        let err = t2.commit().unwrap_err();
        assert!(matches!(err, CoreError::TransactionConflict { .. }));
        assert_eq!(t2.state(), TransactionState::RolledBack);
        t2.rollback().unwrap();

        let doc = c.get_by_id(&id).unwrap().unwrap();
        assert_eq!(doc.get("by"), Some(&"t1".into()));
    }

    #[test]
    fn disjoint_writes_do_not_conflict() {
        let db = Database::open_in_memory().unwrap();
        let c = db.collection("test").unwrap();
        let t1 = c.begin_transaction().unwrap();
        let t2 = c.begin_transaction().unwrap();
        t1.insert([person("a", "1")]).unwrap();
        t2.insert([person("b", "2")]).unwrap();
        t2.commit().unwrap();
        t1.commit().unwrap();
        assert_eq!(c.size().unwrap(), 2);
    }

    #[test]
    fn concurrent_insert_of_same_id_conflicts() {
        let db = Database::open_in_memory().unwrap();
        let c = db.collection("test").unwrap();
        let t1 = c.begin_transaction().unwrap();
        let t2 = c.begin_transaction().unwrap();
        t1.insert([Document::new().with(ID_FIELD, "k")]).unwrap();
        t2.insert([Document::new().with(ID_FIELD, "k")]).unwrap();
        t1.commit().unwrap();
        assert!(matches!(
            t2.commit(),
            Err(CoreError::TransactionConflict { .. })
        ));
    }

    #[test]
    fn dropping_open_transaction_rolls_back() {
        let db = Database::open_in_memory().unwrap();
        let c = db.collection("test").unwrap();
        {
            let txn = c.begin_transaction().unwrap();
            txn.insert([person("a", "b")]).unwrap();
        }
        assert_eq!(c.size().unwrap(), 0);
    }

    #[test]
    fn old_snapshot_still_reads_after_later_commits() {
        let db = Database::open_in_memory().unwrap();
        let c = db.collection("test").unwrap();
        let id = c.insert([person("a", "v1")]).unwrap().ids.remove(0);

        let reader = c.begin_transaction().unwrap();
        c.update(&Filter::id(id.clone()), &Document::new().with("lastName", "v2"))
            .unwrap();
        c.remove(&Filter::id(id.clone())).unwrap();

        let seen = reader.get_by_id(&id).unwrap().unwrap();
        assert_eq!(seen.get("lastName"), Some(&"v1".into()));
        assert!(c.get_by_id(&id).unwrap().is_none());
    }
}
