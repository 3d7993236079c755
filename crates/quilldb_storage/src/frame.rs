//! On-disk frame format for the file store.
//!
//! Every [`WriteBatch`] is written as one frame:
//!
//! ```text
//! | magic (4) | version (2) | length (4) | payload (N) | crc32 (4) |
//! ```
//!
//! The payload is the batch's operations:
//!
//! ```text
//! | op count (4) | { type (1) | key len (4) | key | [value len (4) | value] }* |
//! ```
//!
//! The CRC covers everything before it. All integers are little-endian.

use crate::error::{StorageError, StorageResult};
use crate::store::{WriteBatch, WriteOp};

/// Magic bytes opening every frame.
pub(crate) const FRAME_MAGIC: [u8; 4] = *b"QLOG";

/// Current frame format version.
pub(crate) const FRAME_VERSION: u16 = 1;

/// magic (4) + version (2) + length (4)
pub(crate) const HEADER_SIZE: usize = 10;

/// CRC size.
pub(crate) const CRC_SIZE: usize = 4;

const OP_PUT: u8 = 1;
const OP_DELETE: u8 = 2;

/// Outcome of reading one frame from the tail of a log.
#[derive(Debug)]
pub(crate) enum FrameRead {
    /// A complete, checksummed frame.
    Complete {
        /// The decoded batch.
        batch: WriteBatch,
        /// Total frame size in bytes.
        len: usize,
    },
    /// The remaining bytes end mid-frame (a write interrupted by a crash).
    Torn,
}

/// Encodes a batch as a complete frame.
pub(crate) fn encode_frame(batch: &WriteBatch) -> StorageResult<Vec<u8>> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&to_u32(batch.len(), "op count")?.to_le_bytes());
    for op in batch.iter() {
        match op {
            WriteOp::Put { key, value } => {
                payload.push(OP_PUT);
                payload.extend_from_slice(&to_u32(key.len(), "key")?.to_le_bytes());
                payload.extend_from_slice(key);
                payload.extend_from_slice(&to_u32(value.len(), "value")?.to_le_bytes());
                payload.extend_from_slice(value);
            }
            WriteOp::Delete { key } => {
                payload.push(OP_DELETE);
                payload.extend_from_slice(&to_u32(key.len(), "key")?.to_le_bytes());
                payload.extend_from_slice(key);
            }
        }
    }

    let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
    frame.extend_from_slice(&FRAME_MAGIC);
    frame.extend_from_slice(&FRAME_VERSION.to_le_bytes());
    frame.extend_from_slice(&to_u32(payload.len(), "frame payload")?.to_le_bytes());
    frame.extend_from_slice(&payload);
    let crc = compute_crc32(&frame);
    frame.extend_from_slice(&crc.to_le_bytes());
    Ok(frame)
}

/// Decodes the frame at the start of `data`, which begins at file `offset`.
///
/// Incomplete trailing data is reported as [`FrameRead::Torn`]; a complete
/// frame with a bad magic, version or checksum is an error.
pub(crate) fn decode_frame(data: &[u8], offset: u64) -> StorageResult<FrameRead> {
    if data.len() < HEADER_SIZE {
        return Ok(FrameRead::Torn);
    }
    if data[..4] != FRAME_MAGIC {
        return Err(StorageError::corrupted(offset, "invalid frame magic"));
    }
    let version = u16::from_le_bytes([data[4], data[5]]);
    if version != FRAME_VERSION {
        return Err(StorageError::corrupted(
            offset,
            format!("unsupported frame version {version}"),
        ));
    }
    let payload_len = u32::from_le_bytes([data[6], data[7], data[8], data[9]]) as usize;
    let total = HEADER_SIZE + payload_len + CRC_SIZE;
    if data.len() < total {
        return Ok(FrameRead::Torn);
    }

    let body_end = HEADER_SIZE + payload_len;
    let stored = u32::from_le_bytes([
        data[body_end],
        data[body_end + 1],
        data[body_end + 2],
        data[body_end + 3],
    ]);
    let computed = compute_crc32(&data[..body_end]);
    if stored != computed {
        return Err(StorageError::corrupted(
            offset,
            format!("checksum mismatch: expected {stored:08x}, got {computed:08x}"),
        ));
    }

    let batch = decode_payload(&data[HEADER_SIZE..body_end], offset)?;
    Ok(FrameRead::Complete { batch, len: total })
}

fn decode_payload(payload: &[u8], offset: u64) -> StorageResult<WriteBatch> {
    let mut cursor = 0usize;

    let read_u32 = |cursor: &mut usize| -> StorageResult<u32> {
        let end = *cursor + 4;
        let bytes: [u8; 4] = payload
            .get(*cursor..end)
            .and_then(|s| s.try_into().ok())
            .ok_or_else(|| StorageError::corrupted(offset, "unexpected end of frame payload"))?;
        *cursor = end;
        Ok(u32::from_le_bytes(bytes))
    };

    let read_bytes = |cursor: &mut usize, len: usize| -> StorageResult<Vec<u8>> {
        let end = *cursor + len;
        let bytes = payload
            .get(*cursor..end)
            .ok_or_else(|| StorageError::corrupted(offset, "unexpected end of frame payload"))?
            .to_vec();
        *cursor = end;
        Ok(bytes)
    };

    let count = read_u32(&mut cursor)? as usize;
    let mut ops = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        let op_type = *payload
            .get(cursor)
            .ok_or_else(|| StorageError::corrupted(offset, "unexpected end of frame payload"))?;
        cursor += 1;
        let key_len = read_u32(&mut cursor)? as usize;
        let key = read_bytes(&mut cursor, key_len)?;
        match op_type {
            OP_PUT => {
                let value_len = read_u32(&mut cursor)? as usize;
                let value = read_bytes(&mut cursor, value_len)?;
                ops.push(WriteOp::Put { key, value });
            }
            OP_DELETE => ops.push(WriteOp::Delete { key }),
            other => {
                return Err(StorageError::corrupted(
                    offset,
                    format!("unknown operation type {other}"),
                ))
            }
        }
    }

    if cursor != payload.len() {
        return Err(StorageError::corrupted(offset, "trailing bytes in frame payload"));
    }
    Ok(WriteBatch::from(ops))
}

fn to_u32(len: usize, what: &str) -> StorageResult<u32> {
    u32::try_from(len).map_err(|_| {
        StorageError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("{what} too large: {len} bytes"),
        ))
    })
}

/// Computes the CRC32 (IEEE) checksum of `data`.
#[must_use]
pub fn compute_crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}
