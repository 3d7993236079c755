//! Database configuration.

use std::fmt;
use std::path::{Path, PathBuf};

/// Default separator for dotted field paths.
pub const DEFAULT_FIELD_SEPARATOR: &str = ".";

/// A username and password pair.
///
/// Supplying credentials when opening a database enables encryption at rest.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// User name.
    pub username: String,
    /// Password.
    pub password: String,
}

impl Credentials {
    /// Creates a credential pair.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Configuration for opening a database.
#[derive(Debug, Clone)]
pub struct Config {
    /// Store file location. `None` opens an in-memory database whose
    /// contents are discarded on close.
    pub store_path: Option<PathBuf>,

    /// Credentials enabling encryption at rest.
    pub credentials: Option<Credentials>,

    /// Separator used to address nested fields.
    pub field_separator: String,

    /// Whether to sync the store file on every commit (safer but slower).
    pub sync_on_commit: bool,

    /// Whether to compact the store file on a clean close.
    pub compact_on_close: bool,

    /// Whether to create the store file if it doesn't exist.
    pub create_if_missing: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_path: None,
            credentials: None,
            field_separator: DEFAULT_FIELD_SEPARATOR.to_string(),
            sync_on_commit: true,
            compact_on_close: false,
            create_if_missing: true,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the store file location.
    #[must_use]
    pub fn store_path(mut self, path: impl AsRef<Path>) -> Self {
        self.store_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Enables encryption with the given credentials.
    #[must_use]
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some(Credentials::new(username, password));
        self
    }

    /// Sets the field path separator.
    #[must_use]
    pub fn field_separator(mut self, separator: impl Into<String>) -> Self {
        self.field_separator = separator.into();
        self
    }

    /// Sets whether to sync on every commit.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets whether to compact the store file on close.
    #[must_use]
    pub const fn compact_on_close(mut self, value: bool) -> Self {
        self.compact_on_close = value;
        self
    }

    /// Sets whether to create the store file if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Returns true if the database lives only in memory.
    #[must_use]
    pub fn is_in_memory(&self) -> bool {
        self.store_path.is_none()
    }

    /// Returns true if credentials were supplied.
    #[must_use]
    pub fn is_protected(&self) -> bool {
        self.credentials.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert!(config.is_in_memory());
        assert!(!config.is_protected());
        assert_eq!(config.field_separator, ".");
        assert!(config.sync_on_commit);
        assert!(!config.compact_on_close);
        assert!(config.create_if_missing);
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .store_path("/tmp/quill.db")
            .credentials("user", "pass")
            .field_separator("/")
            .sync_on_commit(false);

        assert_eq!(config.store_path.as_deref(), Some(Path::new("/tmp/quill.db")));
        assert!(config.is_protected());
        assert_eq!(config.field_separator, "/");
        assert!(!config.sync_on_commit);
    }

    #[test]
    fn credentials_debug_hides_password() {
        let creds = Credentials::new("user", "hunter2");
        let shown = format!("{creds:?}");
        assert!(shown.contains("user"));
        assert!(!shown.contains("hunter2"));
    }
}
