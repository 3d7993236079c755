//! Durable transaction journals.
//!
//! Before a commit touches any document key, the transaction's resolved
//! writes are stored as one journal value under `\0journal/<txid>`. The
//! store write that makes this value durable is the commit's durable mark:
//!
//! 1. Journal written: the commit will survive a crash (recovery replays it)
//! 2. Documents written and journal deleted in one atomic batch
//!
//! A crash before step 1 leaves no trace, which is equivalent to the
//! transaction never having committed.

mod record;
mod recovery;

pub use record::{JournalRecord, JournalRecordType, JOURNAL_MAGIC, JOURNAL_VERSION};
pub use recovery::RecoveryReport;
pub(crate) use recovery::recover;

use crate::document::DocumentId;
use crate::error::{CoreError, CoreResult};
use crate::types::{SequenceNumber, TransactionId};

/// A resolved write carried by a journal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum JournalOp {
    /// Store the encoded document under its id.
    Put {
        /// Document id.
        id: DocumentId,
        /// Encoded document.
        payload: Vec<u8>,
    },
    /// Delete the document.
    Delete {
        /// Document id.
        id: DocumentId,
    },
}

/// Everything needed to redo one transaction's commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TransactionJournal {
    pub(crate) txid: TransactionId,
    pub(crate) collection: String,
    pub(crate) sequence: SequenceNumber,
    pub(crate) ops: Vec<JournalOp>,
}

impl TransactionJournal {
    /// Serializes the journal as `Begin, ops..., Commit`.
    pub(crate) fn encode(&self) -> CoreResult<Vec<u8>> {
        let mut buf = JournalRecord::Begin {
            txid: self.txid,
            collection: self.collection.clone(),
        }
        .encode()?;
        for op in &self.ops {
            let record = match op {
                JournalOp::Put { id, payload } => JournalRecord::Put {
                    txid: self.txid,
                    id: id.as_str().to_string(),
                    payload: payload.clone(),
                },
                JournalOp::Delete { id } => JournalRecord::Delete {
                    txid: self.txid,
                    id: id.as_str().to_string(),
                },
            };
            buf.extend(record.encode()?);
        }
        buf.extend(
            JournalRecord::Commit {
                txid: self.txid,
                sequence: self.sequence,
            }
            .encode()?,
        );
        Ok(buf)
    }

    /// Parses a journal value.
    ///
    /// Returns `Ok(None)` if the journal never reached its commit record.
    pub(crate) fn decode(data: &[u8]) -> CoreResult<Option<Self>> {
        let mut offset = 0;
        let mut records = Vec::new();
        while offset < data.len() {
            let (record, used) = JournalRecord::decode(&data[offset..])?;
            records.push(record);
            offset += used;
        }

        let mut records = records.into_iter();
        let (txid, collection) = match records.next() {
            Some(JournalRecord::Begin { txid, collection }) => (txid, collection),
            Some(_) => {
                return Err(CoreError::journal_corruption(
                    "journal must start with Begin",
                ))
            }
            None => return Ok(None),
        };

        let mut ops = Vec::new();
        while let Some(record) = records.next() {
            if record.txid() != txid {
                return Err(CoreError::journal_corruption(format!(
                    "record for {} inside journal of {txid}",
                    record.txid()
                )));
            }
            match record {
                JournalRecord::Put { id, payload, .. } => ops.push(JournalOp::Put {
                    id: parse_id(id)?,
                    payload,
                }),
                JournalRecord::Delete { id, .. } => {
                    ops.push(JournalOp::Delete { id: parse_id(id)? });
                }
                JournalRecord::Commit { sequence, .. } => {
                    if records.next().is_some() {
                        return Err(CoreError::journal_corruption("records after Commit"));
                    }
                    return Ok(Some(Self {
                        txid,
                        collection,
                        sequence,
                        ops,
                    }));
                }
                JournalRecord::Begin { .. } => {
                    return Err(CoreError::journal_corruption("nested Begin record"));
                }
            }
        }
        Ok(None)
    }
}

fn parse_id(text: String) -> CoreResult<DocumentId> {
    DocumentId::from_text(text).ok_or_else(|| CoreError::journal_corruption("empty document id"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn journal() -> TransactionJournal {
        TransactionJournal {
            txid: TransactionId::new(3),
            collection: "people".into(),
            sequence: SequenceNumber::new(11),
            ops: vec![
                JournalOp::Put {
                    id: DocumentId::from_text("a").unwrap(),
                    payload: vec![0xa0],
                },
                JournalOp::Delete {
                    id: DocumentId::from_text("b").unwrap(),
                },
            ],
        }
    }

    #[test]
    fn committed_journal_decodes() {
        let journal = journal();
        let bytes = journal.encode().unwrap();
        assert_eq!(TransactionJournal::decode(&bytes).unwrap(), Some(journal));
    }

    #[test]
    fn journal_without_commit_is_incomplete() {
        let journal = journal();
        let bytes = journal.encode().unwrap();
        let commit_len = JournalRecord::Commit {
            txid: journal.txid,
            sequence: journal.sequence,
        }
        .encode()
        .unwrap()
        .len();
        let cut = &bytes[..bytes.len() - commit_len];
        assert_eq!(TransactionJournal::decode(cut).unwrap(), None);
    }

    #[test]
    fn torn_journal_is_corrupt() {
        let bytes = journal().encode().unwrap();
        assert!(TransactionJournal::decode(&bytes[..bytes.len() - 2]).is_err());
    }

    #[test]
    fn foreign_record_is_corrupt() {
        let mut bytes = journal().encode().unwrap();
        bytes.extend(
            JournalRecord::Delete {
                txid: TransactionId::new(99),
                id: "x".into(),
            }
            .encode()
            .unwrap(),
        );
        assert!(TransactionJournal::decode(&bytes).is_err());
    }

    #[test]
    fn empty_journal_is_incomplete() {
        assert_eq!(TransactionJournal::decode(&[]).unwrap(), None);
    }
}
