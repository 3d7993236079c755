//! Journal recovery at database open.

use super::{JournalOp, TransactionJournal};
use crate::error::CoreResult;
use crate::keys::{self, JOURNAL_PREFIX};
use quilldb_storage::{KeyValueStore, WriteBatch};
use tracing::{info, warn};

/// Outcome of journal recovery.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Committed journals whose writes were redone.
    pub replayed: usize,
    /// Incomplete or corrupt journals that were thrown away.
    pub discarded: usize,
}

impl RecoveryReport {
    /// Returns true if no journal was found.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.replayed == 0 && self.discarded == 0
    }
}

/// Replays committed journals and discards the rest.
///
/// Replay is idempotent: a journal whose documents were already written
/// before the crash simply writes them again. Each journal is resolved in
/// one atomic batch together with its own deletion.
pub(crate) fn recover(store: &dyn KeyValueStore) -> CoreResult<RecoveryReport> {
    let mut report = RecoveryReport::default();

    for (key, value) in store.scan_prefix(JOURNAL_PREFIX)? {
        let key_txid = keys::parse_journal_key(&key);
        let mut batch = WriteBatch::new();

        match TransactionJournal::decode(&value) {
            Ok(Some(journal)) if Some(journal.txid) == key_txid => {
                for op in &journal.ops {
                    match op {
                        JournalOp::Put { id, payload } => {
                            batch.put(
                                keys::document_key(&journal.collection, id),
                                payload.clone(),
                            );
                        }
                        JournalOp::Delete { id } => {
                            batch.delete(keys::document_key(&journal.collection, id));
                        }
                    }
                }
                info!(
                    txid = %journal.txid,
                    collection = %journal.collection,
                    ops = journal.ops.len(),
                    "replaying committed journal"
                );
                report.replayed += 1;
            }
            Ok(Some(journal)) => {
                warn!(txid = %journal.txid, "discarding journal stored under a foreign key");
                report.discarded += 1;
            }
            Ok(None) => {
                warn!(key = ?key_txid, "discarding journal without commit record");
                report.discarded += 1;
            }
            Err(e) => {
                warn!(key = ?key_txid, error = %e, "discarding corrupt journal");
                report.discarded += 1;
            }
        }

        batch.delete(key);
        store.write(batch)?;
    }

    if !report.is_clean() {
        store.commit()?;
        info!(
            replayed = report.replayed,
            discarded = report.discarded,
            "journal recovery complete"
        );
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{encode_document, Document, DocumentId};
    use crate::journal::JournalRecord;
    use crate::types::{SequenceNumber, TransactionId};
    use quilldb_storage::InMemoryStore;

    fn id(text: &str) -> DocumentId {
        DocumentId::from_text(text).unwrap()
    }

    fn committed(txid: u64) -> TransactionJournal {
        let doc = Document::new().with("_id", "new").with("v", 1);
        TransactionJournal {
            txid: TransactionId::new(txid),
            collection: "c".into(),
            sequence: SequenceNumber::new(1),
            ops: vec![
                JournalOp::Put {
                    id: id("new"),
                    payload: encode_document(&doc).unwrap(),
                },
                JournalOp::Delete { id: id("old") },
            ],
        }
    }

    #[test]
    fn clean_store_reports_nothing() {
        let store = InMemoryStore::new();
        assert!(recover(&store).unwrap().is_clean());
    }

    #[test]
    fn committed_journal_is_replayed() {
        let store = InMemoryStore::new();
        store.put(&keys::document_key("c", &id("old")), b"stale").unwrap();
        let journal = committed(5);
        store
            .put(&keys::journal_key(journal.txid), &journal.encode().unwrap())
            .unwrap();

        let report = recover(&store).unwrap();
        assert_eq!(report, RecoveryReport { replayed: 1, discarded: 0 });
        assert!(store.get(&keys::document_key("c", &id("new"))).unwrap().is_some());
        assert!(store.get(&keys::document_key("c", &id("old"))).unwrap().is_none());
        assert!(store.scan_prefix(JOURNAL_PREFIX).unwrap().is_empty());
    }

    #[test]
    fn incomplete_journal_is_discarded() {
        let store = InMemoryStore::new();
        let txid = TransactionId::new(8);
        let begin = JournalRecord::Begin {
            txid,
            collection: "c".into(),
        }
        .encode()
        .unwrap();
        store.put(&keys::journal_key(txid), &begin).unwrap();

        let report = recover(&store).unwrap();
        assert_eq!(report, RecoveryReport { replayed: 0, discarded: 1 });
        assert!(store.scan_prefix(b"d").unwrap().is_empty());
        assert!(store.scan_prefix(JOURNAL_PREFIX).unwrap().is_empty());
    }

    #[test]
    fn corrupt_journal_is_discarded() {
        let store = InMemoryStore::new();
        let journal = committed(9);
        let mut bytes = journal.encode().unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        store.put(&keys::journal_key(journal.txid), &bytes).unwrap();

        let report = recover(&store).unwrap();
        assert_eq!(report.discarded, 1);
        assert!(store.get(&keys::document_key("c", &id("new"))).unwrap().is_none());
    }

    #[test]
    fn journal_under_wrong_key_is_discarded() {
        let store = InMemoryStore::new();
        let journal = committed(1);
        store
            .put(&keys::journal_key(TransactionId::new(2)), &journal.encode().unwrap())
            .unwrap();
        assert_eq!(recover(&store).unwrap().discarded, 1);
    }
}
