//! Credential verification and encryption key derivation.
//!
//! A protected database stores a security record in plaintext under the
//! reserved security key. The record holds the key-derivation salt and a
//! verifier: a fixed phrase sealed with the derived key. Opening succeeds only
//! if the supplied credentials derive a key that unseals the verifier.
//!
//! ## Key Derivation
//!
//! HKDF-SHA256 with a random 16-byte salt; the input key material is
//! `username || 0x00 || password`.

use crate::config::Credentials;
use crate::error::{CoreError, CoreResult};
use crate::keys::SECURITY_KEY;
use hkdf::Hkdf;
use quilldb_storage::{EncryptedStore, EncryptionKey, KeyValueStore, KEY_SIZE};
use rand::RngCore;
use sha2::Sha256;
use std::sync::Arc;
use tracing::{debug, info};
use zeroize::Zeroizing;

/// Size of the key-derivation salt.
pub const SALT_SIZE: usize = 16;

const RECORD_MAGIC: [u8; 4] = *b"QSEC";
const RECORD_VERSION: u8 = 1;
const KDF_INFO: &[u8] = b"quilldb-encryption-key-v1";
const CHECK_PHRASE: &[u8] = b"quilldb credential check";

/// Persisted proof that a database is protected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SecurityRecord {
    salt: [u8; SALT_SIZE],
    verifier: Vec<u8>,
}

impl SecurityRecord {
    /// Creates a record for new credentials and returns it with the derived key.
    fn create(
        credentials: &Credentials,
        raw: &Arc<dyn KeyValueStore>,
    ) -> CoreResult<(Self, EncryptionKey)> {
        let mut salt = [0u8; SALT_SIZE];
        rand::thread_rng().fill_bytes(&mut salt);
        let key = derive_key(credentials, &salt)?;
        let verifier =
            EncryptedStore::new(Arc::clone(raw), key.clone()).seal(SECURITY_KEY, CHECK_PHRASE)?;
        Ok((Self { salt, verifier }, key))
    }

    /// Derives the key for `credentials` and checks it against the verifier.
    fn verify(
        &self,
        credentials: &Credentials,
        raw: &Arc<dyn KeyValueStore>,
    ) -> CoreResult<EncryptionKey> {
        let key = derive_key(credentials, &self.salt)?;
        let sealer = EncryptedStore::new(Arc::clone(raw), key.clone());
        match sealer.open_sealed(SECURITY_KEY, &self.verifier) {
            Ok(phrase) if phrase == CHECK_PHRASE => Ok(key),
            _ => Err(CoreError::authentication("invalid username or password")),
        }
    }

    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4 + 1 + SALT_SIZE + 4 + self.verifier.len());
        buf.extend_from_slice(&RECORD_MAGIC);
        buf.push(RECORD_VERSION);
        buf.extend_from_slice(&self.salt);
        #[allow(clippy::cast_possible_truncation)]
        buf.extend_from_slice(&(self.verifier.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.verifier);
        buf
    }

    fn decode(bytes: &[u8]) -> CoreResult<Self> {
        let invalid = || CoreError::store_open("invalid security record");
        if bytes.len() < 4 + 1 + SALT_SIZE + 4 || bytes[..4] != RECORD_MAGIC {
            return Err(invalid());
        }
        if bytes[4] != RECORD_VERSION {
            return Err(CoreError::store_open(format!(
                "unsupported security record version {}",
                bytes[4]
            )));
        }
        let mut salt = [0u8; SALT_SIZE];
        salt.copy_from_slice(&bytes[5..5 + SALT_SIZE]);
        let len_at = 5 + SALT_SIZE;
        let len_bytes: [u8; 4] = bytes[len_at..len_at + 4]
            .try_into()
            .map_err(|_| invalid())?;
        let len = u32::from_le_bytes(len_bytes) as usize;
        let verifier = bytes.get(len_at + 4..).ok_or_else(invalid)?;
        if verifier.len() != len {
            return Err(invalid());
        }
        Ok(Self {
            salt,
            verifier: verifier.to_vec(),
        })
    }
}

/// Derives the store encryption key from credentials and salt.
///
/// # Errors
///
/// Returns an error if key expansion fails.
pub fn derive_key(credentials: &Credentials, salt: &[u8]) -> CoreResult<EncryptionKey> {
    let mut ikm = Zeroizing::new(Vec::with_capacity(
        credentials.username.len() + 1 + credentials.password.len(),
    ));
    ikm.extend_from_slice(credentials.username.as_bytes());
    ikm.push(0);
    ikm.extend_from_slice(credentials.password.as_bytes());

    let hk = Hkdf::<Sha256>::new(Some(salt), &ikm);
    let mut bytes = Zeroizing::new([0u8; KEY_SIZE]);
    hk.expand(KDF_INFO, &mut bytes[..])
        .map_err(|_| CoreError::authentication("key derivation failed"))?;
    EncryptionKey::from_bytes(&bytes[..]).map_err(CoreError::from)
}

/// Applies the open rules for credentials against the raw store.
///
/// Returns the encryption key if the database is protected.
///
/// | credentials | store                      | outcome                    |
/// |-------------|----------------------------|----------------------------|
/// | none        | unprotected                | open unencrypted           |
/// | none        | protected                  | `Authentication`           |
/// | given       | empty                      | initialise protection      |
/// | given       | protected                  | verify, else `Authentication` |
/// | given       | unprotected with data      | `Authentication`           |
pub(crate) fn bootstrap(
    raw: &Arc<dyn KeyValueStore>,
    credentials: Option<&Credentials>,
) -> CoreResult<Option<EncryptionKey>> {
    let record = raw
        .get(SECURITY_KEY)?
        .map(|bytes| SecurityRecord::decode(&bytes))
        .transpose()?;

    match (credentials, record) {
        (None, None) => Ok(None),
        (None, Some(_)) => Err(CoreError::authentication(
            "database is protected; credentials required",
        )),
        (Some(credentials), Some(record)) => {
            let key = record.verify(credentials, raw)?;
            debug!(user = %credentials.username, "credentials verified");
            Ok(Some(key))
        }
        (Some(credentials), None) => {
            if !raw.scan_prefix(b"")?.is_empty() {
                return Err(CoreError::authentication(
                    "database is not protected; cannot open with credentials",
                ));
            }
            let (record, key) = SecurityRecord::create(credentials, raw)?;
            raw.put(SECURITY_KEY, &record.encode())?;
            info!(user = %credentials.username, "initialised database protection");
            Ok(Some(key))
        }
    }
}

/// Returns true if the raw store carries a security record.
pub(crate) fn is_protected(raw: &dyn KeyValueStore) -> CoreResult<bool> {
    Ok(raw.get(SECURITY_KEY)?.is_some())
}
