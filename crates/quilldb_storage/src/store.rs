//! Key-value store trait definition.

use crate::error::StorageResult;

/// A single mutation inside a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    /// Insert or overwrite a key.
    Put {
        /// Key bytes.
        key: Vec<u8>,
        /// Value bytes.
        value: Vec<u8>,
    },
    /// Remove a key. Removing an absent key is not an error.
    Delete {
        /// Key bytes.
        key: Vec<u8>,
    },
}

impl WriteOp {
    /// Returns the key this operation touches.
    #[must_use]
    pub fn key(&self) -> &[u8] {
        match self {
            Self::Put { key, .. } | Self::Delete { key } => key,
        }
    }
}

/// An ordered group of mutations applied atomically.
///
/// Operations apply in insertion order, so a later operation on the same key
/// wins over an earlier one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    /// Creates an empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a put.
    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> &mut Self {
        self.ops.push(WriteOp::Put {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    /// Appends a delete.
    pub fn delete(&mut self, key: impl Into<Vec<u8>>) -> &mut Self {
        self.ops.push(WriteOp::Delete { key: key.into() });
        self
    }

    /// Returns the number of operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Returns true if the batch holds no operations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Iterates over the operations in order.
    pub fn iter(&self) -> impl Iterator<Item = &WriteOp> {
        self.ops.iter()
    }

    /// Consumes the batch and returns its operations.
    #[must_use]
    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }
}

impl From<Vec<WriteOp>> for WriteBatch {
    fn from(ops: Vec<WriteOp>) -> Self {
        Self { ops }
    }
}

/// A sorted map from opaque keys to byte payloads.
///
/// # Invariants
///
/// - [`write`](Self::write) applies every operation of a batch or none of them
/// - Once `write` returns `Ok` on a durable store, the batch survives a crash
/// - [`scan_prefix`](Self::scan_prefix) returns entries in ascending key order
/// - After [`close`](Self::close), every operation fails with
///   [`StorageError::Closed`](crate::StorageError::Closed)
///
/// # Implementors
///
/// - [`crate::InMemoryStore`]
/// - [`crate::FileStore`]
/// - [`crate::EncryptedStore`]
pub trait KeyValueStore: Send + Sync {
    /// Reads the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is closed or the value cannot be read.
    fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>>;

    /// Applies a batch atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is closed or the batch could not be made
    /// durable; in that case none of its operations are visible.
    fn write(&self, batch: WriteBatch) -> StorageResult<()>;

    /// Returns every entry whose key starts with `prefix`, sorted by key.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is closed or a value cannot be read.
    fn scan_prefix(&self, prefix: &[u8]) -> StorageResult<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Flushes everything written so far to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    fn commit(&self) -> StorageResult<()>;

    /// Releases the store. Closing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the final flush fails.
    fn close(&self) -> StorageResult<()>;

    /// Returns true once [`close`](Self::close) has been called.
    fn is_closed(&self) -> bool;

    /// Returns true if values are encrypted at rest.
    fn is_encrypted(&self) -> bool {
        false
    }

    /// Reclaims space held by overwritten or deleted entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the rewrite fails.
    fn compact(&self) -> StorageResult<()> {
        Ok(())
    }

    /// Stores a single value.
    ///
    /// # Errors
    ///
    /// See [`write`](Self::write).
    fn put(&self, key: &[u8], value: &[u8]) -> StorageResult<()> {
        let mut batch = WriteBatch::new();
        batch.put(key, value);
        self.write(batch)
    }

    /// Removes a single key.
    ///
    /// # Errors
    ///
    /// See [`write`](Self::write).
    fn delete(&self, key: &[u8]) -> StorageResult<()> {
        let mut batch = WriteBatch::new();
        batch.delete(key);
        self.write(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_preserves_order() {
        let mut batch = WriteBatch::new();
        batch.put(b"a".to_vec(), b"1".to_vec()).delete(b"a".to_vec());

        let ops: Vec<_> = batch.iter().collect();
        assert_eq!(ops.len(), 2);
        assert!(matches!(ops[0], WriteOp::Put { .. }));
        assert!(matches!(ops[1], WriteOp::Delete { .. }));
        assert_eq!(ops[1].key(), b"a");
    }

    #[test]
    fn empty_batch() {
        let batch = WriteBatch::new();
        assert!(batch.is_empty());
        assert_eq!(batch.len(), 0);
    }
}
