//! CLI command implementations.

pub mod compact;
pub mod dump;
pub mod inspect;
pub mod recover;

use quilldb_core::{Config, CoreResult, Database};
use std::path::PathBuf;
use tracing::debug;

/// The store a command works on.
#[derive(Debug, Clone)]
pub struct Target {
    /// Store file path.
    pub path: PathBuf,
    /// User name and password, for protected stores.
    pub credentials: Option<(String, String)>,
}

impl Target {
    /// Opens the existing store. Never creates a file.
    pub fn open(&self) -> CoreResult<Database> {
        debug!(path = %self.path.display(), protected = self.credentials.is_some(), "opening store");
        let mut config = Config::new()
            .store_path(&self.path)
            .create_if_missing(false);
        if let Some((user, password)) = &self.credentials {
            config = config.credentials(user.as_str(), password.as_str());
        }
        Database::open(config)
    }

    /// Size of the store file in bytes.
    pub fn file_size(&self) -> std::io::Result<u64> {
        Ok(std::fs::metadata(&self.path)?.len())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::Target;
    use quilldb_core::{Config, Database, Document};
    use tempfile::TempDir;

    /// A store file holding a `people` collection with two documents.
    pub(crate) fn populated(credentials: Option<(&str, &str)>) -> (TempDir, Target) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cli.qdb");
        let mut config = Config::new().store_path(&path);
        if let Some((user, password)) = credentials {
            config = config.credentials(user, password);
        }

        let db = Database::open(config).unwrap();
        db.collection("people")
            .unwrap()
            .insert([
                Document::new().with("_id", "a").with("name", "Ada"),
                Document::new()
                    .with("_id", "b")
                    .with("name", "Bob")
                    .with("tags", quilldb_core::Value::array(["x", "y"])),
            ])
            .unwrap();
        db.collection("empty").unwrap();
        db.close().unwrap();

        let target = Target {
            path,
            credentials: credentials.map(|(u, p)| (u.to_string(), p.to_string())),
        };
        (dir, target)
    }
}
