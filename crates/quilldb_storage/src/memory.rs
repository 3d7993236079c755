//! In-memory key-value store.

use crate::error::{StorageError, StorageResult};
use crate::store::{KeyValueStore, WriteBatch, WriteOp};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// An in-memory key-value store.
///
/// This store keeps everything in a `BTreeMap` and is suitable for:
/// - Unit tests
/// - Ephemeral databases that don't need persistence
///
/// Contents are discarded when the store is closed.
///
/// # Example
///
/// ```rust
/// use quilldb_storage::{InMemoryStore, KeyValueStore};
///
/// let store = InMemoryStore::new();
/// store.put(b"k", b"v").unwrap();
/// assert_eq!(store.scan_prefix(b"").unwrap().len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryStore {
    data: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    closed: AtomicBool,
}

impl InMemoryStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of keys held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Returns true if the store holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    fn ensure_open(&self) -> StorageResult<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(StorageError::Closed)
        } else {
            Ok(())
        }
    }
}

impl KeyValueStore for InMemoryStore {
    fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        self.ensure_open()?;
        Ok(self.data.read().get(key).cloned())
    }

    fn write(&self, batch: WriteBatch) -> StorageResult<()> {
        self.ensure_open()?;
        let mut data = self.data.write();
        for op in batch.into_ops() {
            match op {
                WriteOp::Put { key, value } => {
                    data.insert(key, value);
                }
                WriteOp::Delete { key } => {
                    data.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> StorageResult<Vec<(Vec<u8>, Vec<u8>)>> {
        self.ensure_open()?;
        let data = self.data.read();
        Ok(data
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn commit(&self) -> StorageResult<()> {
        // Nothing to flush
        self.ensure_open()
    }

    fn close(&self) -> StorageResult<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.data.write().clear();
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_new_is_empty() {
        let store = InMemoryStore::new();
        assert!(store.is_empty());
        assert_eq!(store.get(b"missing").unwrap(), None);
    }

    #[test]
    fn memory_put_get_delete() {
        let store = InMemoryStore::new();
        store.put(b"a", b"1").unwrap();
        assert_eq!(store.get(b"a").unwrap(), Some(b"1".to_vec()));

        store.put(b"a", b"2").unwrap();
        assert_eq!(store.get(b"a").unwrap(), Some(b"2".to_vec()));

        store.delete(b"a").unwrap();
        assert_eq!(store.get(b"a").unwrap(), None);
    }

    #[test]
    fn memory_batch_applies_in_order() {
        let store = InMemoryStore::new();
        let mut batch = WriteBatch::new();
        batch
            .put(b"x".to_vec(), b"1".to_vec())
            .put(b"y".to_vec(), b"2".to_vec())
            .delete(b"x".to_vec());
        store.write(batch).unwrap();

        assert_eq!(store.get(b"x").unwrap(), None);
        assert_eq!(store.get(b"y").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn memory_scan_prefix_is_sorted_and_bounded() {
        let store = InMemoryStore::new();
        store.put(b"doc/b", b"2").unwrap();
        store.put(b"doc/a", b"1").unwrap();
        store.put(b"meta", b"m").unwrap();
        store.put(b"doc0", b"x").unwrap();

        let entries = store.scan_prefix(b"doc/").unwrap();
        let keys: Vec<_> = entries.iter().map(|(k, _)| k.as_slice()).collect();
        assert_eq!(keys, vec![b"doc/a".as_slice(), b"doc/b".as_slice()]);
    }

    #[test]
    fn memory_close_discards_and_rejects() {
        let store = InMemoryStore::new();
        store.put(b"a", b"1").unwrap();
        store.close().unwrap();
        assert!(store.is_closed());
        assert!(matches!(store.get(b"a"), Err(StorageError::Closed)));
        assert!(matches!(store.put(b"a", b"1"), Err(StorageError::Closed)));

        // Second close is a no-op
        store.close().unwrap();
    }

    #[test]
    fn memory_is_not_encrypted() {
        assert!(!InMemoryStore::new().is_encrypted());
    }
}
