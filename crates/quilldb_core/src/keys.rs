//! Store key layout.
//!
//! ```text
//! d | name len (u32 BE) | collection name | document id   -> document (CBOR)
//! \0meta/collection/<name>                                -> catalog entry
//! \0meta/security                                         -> security record
//! \0journal/<txid u64 BE>                                 -> transaction journal
//! ```
//!
//! Document keys start with `d`, so they never collide with the reserved
//! namespaces, which start with a zero byte. The length prefix keeps one
//! collection's prefix from matching another's.

use crate::document::DocumentId;
use crate::error::{CoreError, CoreResult};
use crate::types::TransactionId;

/// Longest accepted collection name in bytes.
pub const MAX_COLLECTION_NAME_LEN: usize = 1024;

const DOCUMENT_TAG: u8 = b'd';

/// Prefix of collection catalog entries.
pub(crate) const CATALOG_PREFIX: &[u8] = b"\0meta/collection/";

/// Key of the security record.
pub(crate) const SECURITY_KEY: &[u8] = b"\0meta/security";

/// Prefix of transaction journals.
pub(crate) const JOURNAL_PREFIX: &[u8] = b"\0journal/";

/// Checks that a collection name can be used in keys.
pub(crate) fn validate_collection_name(name: &str) -> CoreResult<()> {
    if name.is_empty() {
        return Err(CoreError::invalid_operation("collection name is empty"));
    }
    if name.len() > MAX_COLLECTION_NAME_LEN {
        return Err(CoreError::invalid_operation(format!(
            "collection name longer than {MAX_COLLECTION_NAME_LEN} bytes"
        )));
    }
    if name.contains('\0') {
        return Err(CoreError::invalid_operation(
            "collection name contains a NUL byte",
        ));
    }
    Ok(())
}

/// Prefix shared by every document key of a collection.
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn collection_prefix(collection: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(5 + collection.len());
    key.push(DOCUMENT_TAG);
    // Names are validated to MAX_COLLECTION_NAME_LEN
    key.extend_from_slice(&(collection.len() as u32).to_be_bytes());
    key.extend_from_slice(collection.as_bytes());
    key
}

/// Key of one document.
pub(crate) fn document_key(collection: &str, id: &DocumentId) -> Vec<u8> {
    let mut key = collection_prefix(collection);
    key.extend_from_slice(id.as_bytes());
    key
}

/// Catalog key of a collection.
pub(crate) fn catalog_key(collection: &str) -> Vec<u8> {
    let mut key = CATALOG_PREFIX.to_vec();
    key.extend_from_slice(collection.as_bytes());
    key
}

/// Extracts the collection name from a catalog key.
pub(crate) fn parse_catalog_key(key: &[u8]) -> Option<String> {
    let name = key.strip_prefix(CATALOG_PREFIX)?;
    String::from_utf8(name.to_vec()).ok()
}

/// Journal key of a transaction.
pub(crate) fn journal_key(txid: TransactionId) -> Vec<u8> {
    let mut key = JOURNAL_PREFIX.to_vec();
    key.extend_from_slice(&txid.as_u64().to_be_bytes());
    key
}

/// Extracts the transaction id from a journal key.
pub(crate) fn parse_journal_key(key: &[u8]) -> Option<TransactionId> {
    let raw: [u8; 8] = key.strip_prefix(JOURNAL_PREFIX)?.try_into().ok()?;
    Some(TransactionId::new(u64::from_be_bytes(raw)))
}
