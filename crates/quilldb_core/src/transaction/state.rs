//! Transaction state machine and pending writes.

use crate::document::{Document, DocumentId};
use crate::error::{CoreError, CoreResult};
use crate::types::TransactionId;
use std::collections::BTreeMap;
use std::fmt;

/// State of a transaction.
///
/// ```text
/// Open ──commit──▶ Committed ──┐
///   │                          ├──close──▶ Closed
///   └──rollback──▶ RolledBack ─┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Accepting reads and writes.
    Open,
    /// Writes are committed.
    Committed,
    /// Writes were discarded.
    RolledBack,
    /// Finished and released.
    Closed,
}

impl TransactionState {
    /// Returns true only for [`TransactionState::Open`].
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Open)
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Open => "open",
            Self::Committed => "committed",
            Self::RolledBack => "rolled back",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// One journaled write.
#[derive(Debug, Clone)]
pub(crate) enum PendingOp {
    Insert { id: DocumentId, doc: Document },
    Update { id: DocumentId, doc: Document },
    Remove { id: DocumentId },
}

impl PendingOp {
    fn resolve(self) -> (DocumentId, Option<Document>) {
        match self {
            Self::Insert { id, doc } | Self::Update { id, doc } => (id, Some(doc)),
            Self::Remove { id } => (id, None),
        }
    }
}

/// Everything a transaction owns before commit.
///
/// `journal` is the ordered list of writes; `overlay` is the per-id result of
/// replaying it, used to answer the transaction's own reads.
#[derive(Debug)]
pub(crate) struct PendingState {
    pub(crate) state: TransactionState,
    journal: Vec<PendingOp>,
    pub(crate) overlay: BTreeMap<DocumentId, Option<Document>>,
    /// A failed commit left its durable journal in the store. It must be
    /// deleted before the transaction can end without committing.
    pub(crate) stranded_journal: bool,
}

impl PendingState {
    pub(crate) fn new() -> Self {
        Self {
            state: TransactionState::Open,
            journal: Vec::new(),
            overlay: BTreeMap::new(),
            stranded_journal: false,
        }
    }

    pub(crate) fn ensure_open(&self, txid: TransactionId) -> CoreResult<()> {
        if self.state.is_open() {
            Ok(())
        } else {
            Err(CoreError::transaction_closed(txid.as_u64()))
        }
    }

    pub(crate) fn record(&mut self, op: PendingOp) {
        let (id, doc) = op.clone().resolve();
        self.overlay.insert(id, doc);
        self.journal.push(op);
    }

    pub(crate) fn journal_len(&self) -> usize {
        self.journal.len()
    }

    /// Replays the journal in append order into one final write per id.
    pub(crate) fn resolve_writes(&self) -> Vec<(DocumentId, Option<Document>)> {
        let mut writes = BTreeMap::new();
        for op in self.journal.iter().cloned() {
            let (id, doc) = op.resolve();
            writes.insert(id, doc);
        }
        writes.into_iter().collect()
    }

    /// Moves to a final state and releases the pending writes.
    pub(crate) fn finish(&mut self, state: TransactionState) {
        self.state = state;
        self.journal.clear();
        self.overlay.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(text: &str) -> DocumentId {
        DocumentId::from_text(text).unwrap()
    }

    #[test]
    fn later_writes_win() {
        let mut pending = PendingState::new();
        pending.record(PendingOp::Insert {
            id: id("a"),
            doc: Document::new().with("v", 1),
        });
        pending.record(PendingOp::Update {
            id: id("a"),
            doc: Document::new().with("v", 2),
        });
        pending.record(PendingOp::Insert {
            id: id("b"),
            doc: Document::new(),
        });
        pending.record(PendingOp::Remove { id: id("b") });

        assert_eq!(pending.journal_len(), 4);
        let writes = pending.resolve_writes();
        assert_eq!(
            writes,
            vec![
                (id("a"), Some(Document::new().with("v", 2))),
                (id("b"), None),
            ]
        );
        assert_eq!(pending.overlay.get(&id("b")), Some(&None));
    }

    #[test]
    fn finished_state_rejects_use() {
        let mut pending = PendingState::new();
        pending.record(PendingOp::Remove { id: id("a") });
        pending.finish(TransactionState::RolledBack);

        assert!(pending.overlay.is_empty());
        assert!(pending.resolve_writes().is_empty());
        assert!(matches!(
            pending.ensure_open(TransactionId::new(4)),
            Err(CoreError::TransactionClosed { txid: 4 })
        ));
    }

    #[test]
    fn only_open_is_open() {
        assert!(TransactionState::Open.is_open());
        for state in [
            TransactionState::Committed,
            TransactionState::RolledBack,
            TransactionState::Closed,
        ] {
            assert!(!state.is_open());
        }
        assert_eq!(TransactionState::RolledBack.to_string(), "rolled back");
    }
}
