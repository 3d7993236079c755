//! # quilldb core
//!
//! Transactional document collections on top of a [`KeyValueStore`].
//!
//! This crate provides:
//! - [`Document`]s with dotted field paths and a CBOR binary form
//! - [`Collection`]s with implicit single-call transactions
//! - [`Transaction`]s with snapshot isolation, read-your-writes and
//!   first-committer-wins conflict detection
//! - A durable commit journal replayed on open
//! - Encryption at rest unlocked by [`Credentials`]
//!
//! ## Example
//!
//! ```rust
//! use quilldb_core::{Database, Document, ALL};
//!
//! let db = Database::open_in_memory().unwrap();
//! let test = db.collection("test").unwrap();
//!
//! let txn = test.begin_transaction().unwrap();
//! txn.insert([
//!     Document::new().with("firstName", "fn1"),
//!     Document::new().with("firstName", "fn2"),
//! ])
//! .unwrap();
//! txn.commit().unwrap();
//! txn.close();
//!
//! assert_eq!(test.find(&ALL).unwrap().len(), 2);
//! ```
//!
//! [`KeyValueStore`]: quilldb_storage::KeyValueStore

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod collection;
mod config;
mod database;
mod document;
mod error;
mod filter;
pub mod journal;
mod keys;
mod security;
mod transaction;
mod types;

pub use collection::{Collection, UpdateOptions, WriteResult};
pub use config::{Config, Credentials, DEFAULT_FIELD_SEPARATOR};
pub use database::{is_protected, Database};
pub use document::{decode_document, encode_document, Document, DocumentId, Value, ID_FIELD};
pub use error::{CoreError, CoreResult};
pub use filter::{Filter, ALL};
pub use journal::RecoveryReport;
pub use keys::MAX_COLLECTION_NAME_LEN;
pub use security::{derive_key, SALT_SIZE};
pub use transaction::{Transaction, TransactionState};
pub use types::{SequenceNumber, TransactionId};
