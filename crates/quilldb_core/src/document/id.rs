//! Document identifier.

use std::fmt;
use uuid::Uuid;

/// Name of the identity field every stored document carries.
pub const ID_FIELD: &str = "_id";

/// Unique identifier for a document within a collection.
///
/// Document IDs are:
/// - Assigned at insert time when the document has none (UUID v4 text)
/// - Unique within their collection
/// - Immutable once assigned
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DocumentId(String);

impl DocumentId {
    /// Creates a new random document ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Creates a document ID from text.
    ///
    /// Returns `None` if the text is empty.
    #[must_use]
    pub fn from_text(text: impl Into<String>) -> Option<Self> {
        let text = text.into();
        if text.is_empty() {
            None
        } else {
            Some(Self(text))
        }
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the ID as bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Debug for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DocumentId({})", self.0)
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn generated_ids_are_unique() {
        let ids: HashSet<_> = (0..1000).map(|_| DocumentId::generate()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn generated_id_is_uuid_text() {
        let id = DocumentId::generate();
        assert!(Uuid::parse_str(id.as_str()).is_ok());
    }

    #[test]
    fn empty_text_is_rejected() {
        assert!(DocumentId::from_text("").is_none());
        assert_eq!(DocumentId::from_text("abc").unwrap().to_string(), "abc");
    }
}
