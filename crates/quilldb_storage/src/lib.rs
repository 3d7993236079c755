//! # quilldb storage
//!
//! The key-value store capability that quilldb persists documents through.
//!
//! Stores are **opaque sorted maps** from byte keys to byte values. They know
//! nothing about documents, collections or transactions; quilldb owns the key
//! layout and the meaning of every value.
//!
//! ## Design Principles
//!
//! - A [`WriteBatch`] is applied all-or-nothing
//! - A successful [`KeyValueStore::write`] on a durable store survives a crash
//! - Stores are `Send + Sync` and use `&self` with internal locking
//! - Writes are serialized inside the store (single writer)
//!
//! ## Available Stores
//!
//! - [`InMemoryStore`] - ephemeral, discarded on close
//! - [`FileStore`] - log-structured single file with crash-tolerant replay
//! - [`EncryptedStore`] - wrapper sealing values with AES-256-GCM
//!
//! ## Example
//!
//! ```rust
//! use quilldb_storage::{InMemoryStore, KeyValueStore};
//!
//! let store = InMemoryStore::new();
//! store.put(b"greeting", b"hello").unwrap();
//! assert_eq!(store.get(b"greeting").unwrap(), Some(b"hello".to_vec()));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod encrypted;
mod error;
mod file;
mod frame;
mod memory;
mod store;

pub use encrypted::{EncryptedStore, EncryptionKey, KEY_SIZE, NONCE_SIZE, TAG_SIZE};
pub use error::{StorageError, StorageResult};
pub use file::{FileStore, FileStoreOptions};
pub use frame::compute_crc32;
pub use memory::InMemoryStore;
pub use store::{KeyValueStore, WriteBatch, WriteOp};
