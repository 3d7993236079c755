//! # quilldb testkit
//!
//! Test utilities for quilldb.
//!
//! This crate provides:
//! - [`TestDatabase`] fixtures over the {in-memory, file} × {protected,
//!   unprotected} matrix
//! - The reference documents used by the end-to-end suites
//! - Property-based generators for values and documents
//! - [`FaultyStore`], a store that fails writes on demand
//!
//! ## Usage
//!
//! ```rust
//! use quilldb_testkit::prelude::*;
//!
//! for setup in MATRIX {
//!     let db = TestDatabase::open(setup);
//!     let test = db.collection("test").unwrap();
//!     test.insert(sample_documents()).unwrap();
//!     assert_eq!(test.size().unwrap(), 3);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod faults;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::faults::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use faults::*;
pub use fixtures::*;
pub use generators::*;
