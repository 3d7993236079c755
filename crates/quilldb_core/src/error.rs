//! Error types for quilldb core.

use quilldb_storage::StorageError;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in quilldb core operations.
///
/// Validation errors are reported by the call that violates the invariant and
/// leave in-memory state untouched. Store failures are always surfaced; the
/// engine never retries them.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A document id collides with an existing document.
    #[error("duplicate key: document {id} already exists in collection {collection}")]
    DuplicateKey {
        /// Collection name.
        collection: String,
        /// Conflicting document id.
        id: String,
    },

    /// The collection has been dropped.
    #[error("collection {name} has been dropped")]
    CollectionDropped {
        /// Collection name.
        name: String,
    },

    /// The collection has been closed.
    #[error("collection {name} is closed")]
    CollectionClosed {
        /// Collection name.
        name: String,
    },

    /// The transaction is no longer open.
    #[error("transaction {txid} is closed")]
    TransactionClosed {
        /// Transaction id.
        txid: u64,
    },

    /// Another transaction committed a write to the same document first.
    #[error("transaction conflict on document {id} in collection {collection}")]
    TransactionConflict {
        /// Collection name.
        collection: String,
        /// Conflicting document id.
        id: String,
    },

    /// Credentials are wrong or missing.
    #[error("authentication failed: {message}")]
    Authentication {
        /// Description of the failure.
        message: String,
    },

    /// The backing store failed.
    #[error("store I/O error: {0}")]
    StoreIo(#[from] StorageError),

    /// The backing store could not be opened.
    #[error("cannot open store: {message}")]
    StoreOpen {
        /// Description of the failure.
        message: String,
    },

    /// The database is closed.
    #[error("database is closed")]
    DatabaseClosed,

    /// A document is malformed.
    #[error("invalid document: {message}")]
    InvalidDocument {
        /// Description of the problem.
        message: String,
    },

    /// A persisted journal is corrupted or invalid.
    #[error("journal corruption: {message}")]
    JournalCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// Document encoding or decoding failed.
    #[error("codec error: {message}")]
    Codec {
        /// Description of the failure.
        message: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates a duplicate key error.
    pub fn duplicate_key(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self::DuplicateKey {
            collection: collection.into(),
            id: id.into(),
        }
    }

    /// Creates a collection dropped error.
    pub fn collection_dropped(name: impl Into<String>) -> Self {
        Self::CollectionDropped { name: name.into() }
    }

    /// Creates a collection closed error.
    pub fn collection_closed(name: impl Into<String>) -> Self {
        Self::CollectionClosed { name: name.into() }
    }

    /// Creates a transaction closed error.
    pub fn transaction_closed(txid: u64) -> Self {
        Self::TransactionClosed { txid }
    }

    /// Creates a transaction conflict error.
    pub fn transaction_conflict(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self::TransactionConflict {
            collection: collection.into(),
            id: id.into(),
        }
    }

    /// Creates an authentication error.
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
        }
    }

    /// Creates a store open error.
    pub fn store_open(message: impl Into<String>) -> Self {
        Self::StoreOpen {
            message: message.into(),
        }
    }

    /// Creates an invalid document error.
    pub fn invalid_document(message: impl Into<String>) -> Self {
        Self::InvalidDocument {
            message: message.into(),
        }
    }

    /// Creates a journal corruption error.
    pub fn journal_corruption(message: impl Into<String>) -> Self {
        Self::JournalCorruption {
            message: message.into(),
        }
    }

    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns true if the failure came from the backing store.
    #[must_use]
    pub fn is_store_io(&self) -> bool {
        matches!(self, Self::StoreIo(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = CoreError::duplicate_key("users", "abc");
        assert_eq!(
            err.to_string(),
            "duplicate key: document abc already exists in collection users"
        );

        let err = CoreError::transaction_closed(7);
        assert_eq!(err.to_string(), "transaction 7 is closed");
    }

    #[test]
    fn storage_error_converts() {
        let err: CoreError = StorageError::Closed.into();
        assert!(err.is_store_io());
        assert!(err.to_string().starts_with("store I/O error"));
    }
}
