//! Journal record types and serialization.
//!
//! Every record is wrapped in an envelope:
//!
//! ```text
//! | magic "QJNL" (4) | version (2) | type (1) | length (4) | payload | crc32 (4) |
//! ```
//!
//! The CRC covers everything before it. All integers are little-endian.

use crate::error::{CoreError, CoreResult};
use crate::types::{SequenceNumber, TransactionId};
use quilldb_storage::compute_crc32;

/// Magic bytes identifying a journal record.
pub const JOURNAL_MAGIC: [u8; 4] = *b"QJNL";

/// Current journal format version.
pub const JOURNAL_VERSION: u16 = 1;

/// magic (4) + version (2) + type (1) + length (4)
const ENVELOPE_HEADER: usize = 11;

/// Type of journal record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum JournalRecordType {
    /// Opens a transaction's journal.
    Begin = 1,
    /// Inserts or replaces a document.
    Put = 2,
    /// Deletes a document.
    Delete = 3,
    /// Durable commit mark.
    Commit = 4,
}

impl JournalRecordType {
    /// Converts a byte to a record type.
    #[must_use]
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Begin),
            2 => Some(Self::Put),
            3 => Some(Self::Delete),
            4 => Some(Self::Commit),
            _ => None,
        }
    }

    /// Converts the record type to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// A journal record describing part of a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalRecord {
    /// Opens a transaction's journal.
    Begin {
        /// Transaction ID.
        txid: TransactionId,
        /// Collection the transaction writes to.
        collection: String,
    },

    /// Inserts or replaces a document.
    Put {
        /// Transaction ID.
        txid: TransactionId,
        /// Document id.
        id: String,
        /// Encoded document.
        payload: Vec<u8>,
    },

    /// Deletes a document.
    Delete {
        /// Transaction ID.
        txid: TransactionId,
        /// Document id.
        id: String,
    },

    /// Durable commit mark.
    Commit {
        /// Transaction ID.
        txid: TransactionId,
        /// Sequence number assigned to this commit.
        sequence: SequenceNumber,
    },
}

impl JournalRecord {
    /// Returns the record type.
    #[must_use]
    pub fn record_type(&self) -> JournalRecordType {
        match self {
            Self::Begin { .. } => JournalRecordType::Begin,
            Self::Put { .. } => JournalRecordType::Put,
            Self::Delete { .. } => JournalRecordType::Delete,
            Self::Commit { .. } => JournalRecordType::Commit,
        }
    }

    /// Returns the transaction ID.
    #[must_use]
    pub fn txid(&self) -> TransactionId {
        match self {
            Self::Begin { txid, .. }
            | Self::Put { txid, .. }
            | Self::Delete { txid, .. }
            | Self::Commit { txid, .. } => *txid,
        }
    }

    /// Serializes the record with its envelope.
    ///
    /// # Errors
    ///
    /// Returns an error if a field is longer than a 4-byte length allows.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        let payload = self.encode_payload()?;
        let mut buf = Vec::with_capacity(ENVELOPE_HEADER + payload.len() + 4);
        buf.extend_from_slice(&JOURNAL_MAGIC);
        buf.extend_from_slice(&JOURNAL_VERSION.to_le_bytes());
        buf.push(self.record_type().as_byte());
        buf.extend_from_slice(&len_u32(payload.len())?.to_le_bytes());
        buf.extend_from_slice(&payload);
        let crc = compute_crc32(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        Ok(buf)
    }

    /// Decodes one record from the start of `data`.
    ///
    /// Returns the record and the number of bytes it occupied.
    ///
    /// # Errors
    ///
    /// Returns an error if the envelope is truncated, has a bad magic, version
    /// or checksum, or the payload is malformed.
    pub fn decode(data: &[u8]) -> CoreResult<(Self, usize)> {
        if data.len() < ENVELOPE_HEADER {
            return Err(CoreError::journal_corruption("truncated record header"));
        }
        if data[..4] != JOURNAL_MAGIC {
            return Err(CoreError::journal_corruption("invalid magic"));
        }
        let version = u16::from_le_bytes([data[4], data[5]]);
        if version != JOURNAL_VERSION {
            return Err(CoreError::journal_corruption(format!(
                "unsupported version {version}"
            )));
        }
        let record_type = JournalRecordType::from_byte(data[6]).ok_or_else(|| {
            CoreError::journal_corruption(format!("unknown record type {}", data[6]))
        })?;
        let len = u32::from_le_bytes([data[7], data[8], data[9], data[10]]) as usize;
        let body_end = ENVELOPE_HEADER + len;
        let total = body_end + 4;
        if data.len() < total {
            return Err(CoreError::journal_corruption("truncated record"));
        }
        let stored = u32::from_le_bytes([
            data[body_end],
            data[body_end + 1],
            data[body_end + 2],
            data[body_end + 3],
        ]);
        let computed = compute_crc32(&data[..body_end]);
        if stored != computed {
            return Err(CoreError::journal_corruption(format!(
                "checksum mismatch: expected {stored:08x}, got {computed:08x}"
            )));
        }
        let record = Self::decode_payload(record_type, &data[ENVELOPE_HEADER..body_end])?;
        Ok((record, total))
    }

    fn encode_payload(&self) -> CoreResult<Vec<u8>> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&self.txid().as_u64().to_le_bytes());
        match self {
            Self::Begin { collection, .. } => put_bytes(&mut buf, collection.as_bytes())?,
            Self::Put { id, payload, .. } => {
                put_bytes(&mut buf, id.as_bytes())?;
                put_bytes(&mut buf, payload)?;
            }
            Self::Delete { id, .. } => put_bytes(&mut buf, id.as_bytes())?,
            Self::Commit { sequence, .. } => {
                buf.extend_from_slice(&sequence.as_u64().to_le_bytes());
            }
        }
        Ok(buf)
    }

    fn decode_payload(record_type: JournalRecordType, payload: &[u8]) -> CoreResult<Self> {
        let mut reader = PayloadReader { payload, cursor: 0 };
        let txid = TransactionId::new(reader.u64()?);
        let record = match record_type {
            JournalRecordType::Begin => Self::Begin {
                txid,
                collection: reader.text()?,
            },
            JournalRecordType::Put => Self::Put {
                txid,
                id: reader.text()?,
                payload: reader.bytes()?.to_vec(),
            },
            JournalRecordType::Delete => Self::Delete {
                txid,
                id: reader.text()?,
            },
            JournalRecordType::Commit => Self::Commit {
                txid,
                sequence: SequenceNumber::new(reader.u64()?),
            },
        };
        if reader.cursor != payload.len() {
            return Err(CoreError::journal_corruption(format!(
                "trailing bytes in {record_type:?} record"
            )));
        }
        Ok(record)
    }
}

struct PayloadReader<'a> {
    payload: &'a [u8],
    cursor: usize,
}

impl<'a> PayloadReader<'a> {
    fn take(&mut self, len: usize) -> CoreResult<&'a [u8]> {
        let end = self
            .cursor
            .checked_add(len)
            .filter(|end| *end <= self.payload.len())
            .ok_or_else(|| CoreError::journal_corruption("unexpected end of payload"))?;
        let slice = &self.payload[self.cursor..end];
        self.cursor = end;
        Ok(slice)
    }

    fn u64(&mut self) -> CoreResult<u64> {
        let bytes: [u8; 8] = self
            .take(8)?
            .try_into()
            .map_err(|_| CoreError::journal_corruption("invalid u64"))?;
        Ok(u64::from_le_bytes(bytes))
    }

    fn bytes(&mut self) -> CoreResult<&'a [u8]> {
        let raw: [u8; 4] = self
            .take(4)?
            .try_into()
            .map_err(|_| CoreError::journal_corruption("invalid length"))?;
        self.take(u32::from_le_bytes(raw) as usize)
    }

    fn text(&mut self) -> CoreResult<String> {
        let bytes = self.bytes()?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| CoreError::journal_corruption("text is not UTF-8"))
    }
}

fn put_bytes(buf: &mut Vec<u8>, bytes: &[u8]) -> CoreResult<()> {
    buf.extend_from_slice(&len_u32(bytes.len())?.to_le_bytes());
    buf.extend_from_slice(bytes);
    Ok(())
}

fn len_u32(len: usize) -> CoreResult<u32> {
    u32::try_from(len)
        .map_err(|_| CoreError::invalid_operation(format!("journal field too large: {len} bytes")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples() -> Vec<JournalRecord> {
        let txid = TransactionId::new(42);
        vec![
            JournalRecord::Begin {
                txid,
                collection: "test".into(),
            },
            JournalRecord::Put {
                txid,
                id: "doc-1".into(),
                payload: vec![0xa1, 0x61, 0x61, 0x01],
            },
            JournalRecord::Delete {
                txid,
                id: "doc-2".into(),
            },
            JournalRecord::Commit {
                txid,
                sequence: SequenceNumber::new(7),
            },
        ]
    }

    #[test]
    fn record_type_bytes() {
        for t in [
            JournalRecordType::Begin,
            JournalRecordType::Put,
            JournalRecordType::Delete,
            JournalRecordType::Commit,
        ] {
            assert_eq!(JournalRecordType::from_byte(t.as_byte()), Some(t));
        }
        assert_eq!(JournalRecordType::from_byte(0), None);
    }

    #[test]
    fn records_decode_from_concatenation() {
        let records = samples();
        let mut data = Vec::new();
        for record in &records {
            data.extend(record.encode().unwrap());
        }

        let mut offset = 0;
        let mut decoded = Vec::new();
        while offset < data.len() {
            let (record, used) = JournalRecord::decode(&data[offset..]).unwrap();
            decoded.push(record);
            offset += used;
        }
        assert_eq!(decoded, records);
    }

    #[test]
    fn checksum_mismatch_detected() {
        let mut bytes = samples()[1].encode().unwrap();
        bytes[ENVELOPE_HEADER + 9] ^= 0xff;
        let err = JournalRecord::decode(&bytes).unwrap_err();
        assert!(matches!(err, CoreError::JournalCorruption { .. }));
    }

    #[test]
    fn truncation_detected() {
        let bytes = samples()[1].encode().unwrap();
        assert!(JournalRecord::decode(&bytes[..bytes.len() - 1]).is_err());
        assert!(JournalRecord::decode(&bytes[..5]).is_err());
    }

    #[test]
    fn unknown_type_detected() {
        let mut bytes = samples()[0].encode().unwrap();
        bytes[6] = 99;
        assert!(JournalRecord::decode(&bytes).is_err());
    }
}
