//! Test fixtures and database helpers.
//!
//! Every end-to-end suite runs against the same four setups: in-memory or
//! file-backed, each with and without credentials.

use chrono::{DateTime, Utc};
use quilldb_core::{Config, Database, Document, Value};
use std::fmt;
use std::path::PathBuf;
use tempfile::TempDir;

/// User name of protected test databases.
pub const TEST_USER: &str = "test-user";

/// Password of protected test databases.
pub const TEST_PASSWORD: &str = "test-password";

/// One cell of the test matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Setup {
    /// Keep the store in memory instead of a temp file.
    pub in_memory: bool,
    /// Open with [`TEST_USER`] / [`TEST_PASSWORD`].
    pub protected: bool,
}

impl fmt::Display for Setup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InMemory = {}, Protected = {}", self.in_memory, self.protected)
    }
}

/// The four setups every suite runs against.
pub const MATRIX: [Setup; 4] = [
    Setup {
        in_memory: false,
        protected: false,
    },
    Setup {
        in_memory: false,
        protected: true,
    },
    Setup {
        in_memory: true,
        protected: false,
    },
    Setup {
        in_memory: true,
        protected: true,
    },
];

/// A test database with automatic cleanup.
pub struct TestDatabase {
    /// The database instance.
    pub db: Database,
    /// Configuration used to open (and reopen) the database.
    config: Config,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl TestDatabase {
    /// Opens a database for one cell of the matrix.
    pub fn open(setup: Setup) -> Self {
        let temp_dir = (!setup.in_memory)
            .then(|| TempDir::new().expect("Failed to create temp directory"));

        let mut config = Config::new().field_separator(".");
        if let Some(dir) = &temp_dir {
            config = config.store_path(dir.path().join("test.qdb"));
        }
        if setup.protected {
            config = config.credentials(TEST_USER, TEST_PASSWORD);
        }

        let db = Database::open(config.clone()).expect("Failed to open test database");
        Self {
            db,
            config,
            _temp_dir: temp_dir,
        }
    }

    /// Creates a new unprotected in-memory test database.
    pub fn memory() -> Self {
        Self::open(Setup {
            in_memory: true,
            protected: false,
        })
    }

    /// Creates a new unprotected file-based test database.
    pub fn file() -> Self {
        Self::open(Setup {
            in_memory: false,
            protected: false,
        })
    }

    /// Returns the store file path if file-based, None if in-memory.
    pub fn path(&self) -> Option<PathBuf> {
        self.config.store_path.clone()
    }

    /// Returns the configuration the database was opened with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Closes the database and opens it again with the same configuration.
    ///
    /// In-memory databases come back empty.
    pub fn reopen(&mut self) {
        self.db.close().expect("Failed to close test database");
        self.db = Database::open(self.config.clone()).expect("Failed to reopen test database");
    }
}

impl std::ops::Deref for TestDatabase {
    type Target = Database;

    fn deref(&self) -> &Self::Target {
        &self.db
    }
}

/// Runs a test once per matrix cell.
///
/// # Example
///
/// ```rust
/// use quilldb_testkit::for_each_setup;
///
/// for_each_setup(|setup, db| {
///     let test = db.collection("test").unwrap();
///     assert_eq!(test.size().unwrap(), 0, "{setup}");
/// });
/// ```
pub fn for_each_setup<F>(mut f: F)
where
    F: FnMut(Setup, &mut TestDatabase),
{
    for setup in MATRIX {
        let mut db = TestDatabase::open(setup);
        f(setup, &mut db);
    }
}

/// Installs a `tracing` subscriber that writes through the test harness.
///
/// The filter comes from `RUST_LOG`. Calling this more than once is fine.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn timestamp(text: &str) -> Value {
    let at = DateTime::parse_from_rfc3339(text)
        .expect("Invalid fixture timestamp")
        .with_timezone(&Utc);
    Value::date(at)
}

/// The three reference documents.
///
/// They cover text, dates, byte strings, lists and a document without a
/// list field.
pub fn sample_documents() -> Vec<Document> {
    let doc1 = Document::new()
        .with("firstName", "fn1")
        .with("lastName", "ln1")
        .with("birthDay", timestamp("2012-07-01T16:02:48.440Z"))
        .with("data", vec![1u8, 2, 3])
        .with("list", Value::array(["one", "two", "three"]))
        .with("body", "a quick brown fox jump over the lazy dog");
    let doc2 = Document::new()
        .with("firstName", "fn2")
        .with("lastName", "ln2")
        .with("birthDay", timestamp("2010-06-12T16:02:48.440Z"))
        .with("data", vec![3u8, 4, 3])
        .with("list", Value::array(["three", "four", "three"]))
        .with("body", "quick hello world from quill");
    let doc3 = Document::new()
        .with("firstName", "fn3")
        .with("lastName", "ln2")
        .with("birthDay", timestamp("2014-04-17T16:02:48.440Z"))
        .with("data", vec![9u8, 4, 8])
        .with(
            "body",
            "Lorem ipsum dolor sit amet, consectetur adipiscing elit. \
             Sed nunc mi, mattis ullamcorper dignissim vitae, condimentum non lorem.",
        );
    vec![doc1, doc2, doc3]
}

/// Strips `_id` so stored documents compare equal to their inserted form.
pub fn without_id(mut doc: Document) -> Document {
    doc.remove_field(quilldb_core::ID_FIELD);
    doc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matrix_covers_every_combination() {
        let mut seen: Vec<_> = MATRIX.iter().map(|s| (s.in_memory, s.protected)).collect();
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), 4);
    }

    #[test]
    fn setups_open_as_configured() {
        for_each_setup(|setup, db| {
            assert_eq!(db.path().is_none(), setup.in_memory, "{setup}");
            assert_eq!(db.is_encrypted(), setup.protected, "{setup}");
        });
    }

    #[test]
    fn samples_have_no_ids() {
        let docs = sample_documents();
        assert_eq!(docs.len(), 3);
        assert!(docs.iter().all(|d| d.id().is_none()));
        assert_eq!(docs[2].get("list"), None);
    }
}
