//! Encrypting key-value store wrapper.
//!
//! ## Security Model
//!
//! - Each value is sealed independently with AES-256-GCM
//! - Sealed layout: `nonce (12 bytes) || ciphertext || tag (16 bytes)`
//! - The entry's key is bound as associated data, so a value copied under
//!   another key fails authentication
//! - Keys are stored in plaintext to keep ordered prefix scans working
//! - Key material is never stored; it must be provided (or derived) by the
//!   caller and is zeroized on drop

use crate::error::{StorageError, StorageResult};
use crate::store::{KeyValueStore, WriteBatch, WriteOp};
use aes_gcm::{
    aead::{generic_array::GenericArray, Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use std::sync::Arc;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of AES-256 key in bytes.
pub const KEY_SIZE: usize = 32;
/// Size of GCM nonce in bytes.
pub const NONCE_SIZE: usize = 12;
/// Size of GCM authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// Encryption key for the encrypted store.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey {
    bytes: [u8; KEY_SIZE],
}

impl EncryptionKey {
    /// Creates a key from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes slice is not exactly 32 bytes.
    pub fn from_bytes(bytes: &[u8]) -> StorageResult<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(StorageError::Encryption(format!(
                "invalid key size: expected {KEY_SIZE}, got {}",
                bytes.len()
            )));
        }
        let mut key_bytes = [0u8; KEY_SIZE];
        key_bytes.copy_from_slice(bytes);
        Ok(Self { bytes: key_bytes })
    }

    /// Generates a random key.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Returns the key as a byte slice.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// A store that seals every value before handing it to an inner store.
///
/// # Example
///
/// ```rust
/// use quilldb_storage::{EncryptedStore, EncryptionKey, InMemoryStore, KeyValueStore};
/// use std::sync::Arc;
///
/// let inner = Arc::new(InMemoryStore::new());
/// let store = EncryptedStore::new(inner.clone(), EncryptionKey::generate());
/// store.put(b"k", b"secret").unwrap();
///
/// assert_eq!(store.get(b"k").unwrap(), Some(b"secret".to_vec()));
/// assert_ne!(inner.get(b"k").unwrap(), Some(b"secret".to_vec()));
/// ```
pub struct EncryptedStore {
    inner: Arc<dyn KeyValueStore>,
    cipher: Aes256Gcm,
}

impl EncryptedStore {
    /// Wraps `inner`, sealing values with `key`.
    #[must_use]
    pub fn new(inner: Arc<dyn KeyValueStore>, key: EncryptionKey) -> Self {
        let cipher = Aes256Gcm::new(GenericArray::from_slice(key.as_bytes()));
        Self { inner, cipher }
    }

    /// Returns the wrapped store.
    #[must_use]
    pub fn inner(&self) -> &Arc<dyn KeyValueStore> {
        &self.inner
    }

    /// Seals `plaintext`, binding it to `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if encryption fails.
    pub fn seal(&self, key: &[u8], plaintext: &[u8]) -> StorageResult<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(
                nonce,
                Payload {
                    msg: plaintext,
                    aad: key,
                },
            )
            .map_err(|_| StorageError::Encryption("encryption failed".to_string()))?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend(ciphertext);
        Ok(sealed)
    }

    /// Opens a value produced by [`seal`](Self::seal) under the same key.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is too short, was sealed with another
    /// encryption key, or was tampered with.
    pub fn open_sealed(&self, key: &[u8], sealed: &[u8]) -> StorageResult<Vec<u8>> {
        if sealed.len() < NONCE_SIZE + TAG_SIZE {
            return Err(StorageError::Encryption("ciphertext too short".to_string()));
        }
        let nonce = Nonce::from_slice(&sealed[..NONCE_SIZE]);
        self.cipher
            .decrypt(
                nonce,
                Payload {
                    msg: &sealed[NONCE_SIZE..],
                    aad: key,
                },
            )
            .map_err(|_| StorageError::Encryption("authentication failed".to_string()))
    }
}

impl KeyValueStore for EncryptedStore {
    fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        match self.inner.get(key)? {
            Some(sealed) => Ok(Some(self.open_sealed(key, &sealed)?)),
            None => Ok(None),
        }
    }

    fn write(&self, batch: WriteBatch) -> StorageResult<()> {
        let mut sealed = WriteBatch::new();
        for op in batch.into_ops() {
            match op {
                WriteOp::Put { key, value } => {
                    let value = self.seal(&key, &value)?;
                    sealed.put(key, value);
                }
                WriteOp::Delete { key } => {
                    sealed.delete(key);
                }
            }
        }
        self.inner.write(sealed)
    }

    fn scan_prefix(&self, prefix: &[u8]) -> StorageResult<Vec<(Vec<u8>, Vec<u8>)>> {
        self.inner
            .scan_prefix(prefix)?
            .into_iter()
            .map(|(key, sealed)| {
                let value = self.open_sealed(&key, &sealed)?;
                Ok((key, value))
            })
            .collect()
    }

    fn commit(&self) -> StorageResult<()> {
        self.inner.commit()
    }

    fn close(&self) -> StorageResult<()> {
        self.inner.close()
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    fn is_encrypted(&self) -> bool {
        true
    }

    fn compact(&self) -> StorageResult<()> {
        self.inner.compact()
    }
}

impl std::fmt::Debug for EncryptedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedStore")
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryStore;

    fn store_with(key: [u8; KEY_SIZE]) -> (Arc<InMemoryStore>, EncryptedStore) {
        let inner = Arc::new(InMemoryStore::new());
        let store = EncryptedStore::new(
            inner.clone(),
            EncryptionKey::from_bytes(&key).unwrap(),
        );
        (inner, store)
    }

    #[test]
    fn values_are_sealed_at_rest() {
        let (inner, store) = store_with([0x42; KEY_SIZE]);
        store.put(b"doc", b"Hello, encrypted world!").unwrap();

        let raw = inner.get(b"doc").unwrap().unwrap();
        assert_eq!(raw.len(), NONCE_SIZE + 23 + TAG_SIZE);
        assert_ne!(&raw[NONCE_SIZE..NONCE_SIZE + 23], b"Hello, encrypted world!");
        assert_eq!(
            store.get(b"doc").unwrap(),
            Some(b"Hello, encrypted world!".to_vec())
        );
    }

    #[test]
    fn tampered_value_fails() {
        let (inner, store) = store_with([0x42; KEY_SIZE]);
        store.put(b"doc", b"secret").unwrap();

        let mut raw = inner.get(b"doc").unwrap().unwrap();
        raw[NONCE_SIZE + 1] ^= 0xFF;
        inner.put(b"doc", &raw).unwrap();

        assert!(matches!(store.get(b"doc"), Err(StorageError::Encryption(_))));
    }

    #[test]
    fn different_keys_fail() {
        let inner = Arc::new(InMemoryStore::new());
        let writer = EncryptedStore::new(
            inner.clone(),
            EncryptionKey::from_bytes(&[0x42; KEY_SIZE]).unwrap(),
        );
        let reader = EncryptedStore::new(
            inner.clone(),
            EncryptionKey::from_bytes(&[0x43; KEY_SIZE]).unwrap(),
        );

        writer.put(b"doc", b"secret").unwrap();
        assert!(reader.get(b"doc").is_err());
    }

    #[test]
    fn value_moved_to_other_key_fails() {
        let (inner, store) = store_with([0x01; KEY_SIZE]);
        store.put(b"a", b"payload").unwrap();
        let raw = inner.get(b"a").unwrap().unwrap();
        inner.put(b"b", &raw).unwrap();

        assert!(store.get(b"b").is_err());
    }

    #[test]
    fn scan_decrypts_in_key_order() {
        let (_, store) = store_with([0x07; KEY_SIZE]);
        let mut batch = WriteBatch::new();
        batch
            .put(b"p/2".to_vec(), b"two".to_vec())
            .put(b"p/1".to_vec(), b"one".to_vec())
            .delete(b"p/3".to_vec());
        store.write(batch).unwrap();

        let entries = store.scan_prefix(b"p/").unwrap();
        assert_eq!(
            entries,
            vec![
                (b"p/1".to_vec(), b"one".to_vec()),
                (b"p/2".to_vec(), b"two".to_vec()),
            ]
        );
        assert!(store.is_encrypted());
    }

    #[test]
    fn invalid_key_size_rejected() {
        assert!(EncryptionKey::from_bytes(&[0u8; 16]).is_err());
    }

    #[test]
    fn key_debug_is_redacted() {
        let key = EncryptionKey::generate();
        assert!(format!("{key:?}").contains("REDACTED"));
    }
}
