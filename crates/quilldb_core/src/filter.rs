//! Document selection filters.

use crate::document::{Document, DocumentId, Value};

/// Selects documents in a collection or transaction.
///
/// Field paths are resolved with the collection's field separator.
///
/// # Example
///
/// ```rust
/// use quilldb_core::{Document, DocumentId, Filter};
///
/// let doc = Document::new().with("lastName", "ln2").with("age", 30);
/// let id = DocumentId::from_text("a").unwrap();
///
/// let filter = Filter::eq("lastName", "ln2").and(Filter::eq("age", 30).not().not());
/// assert!(filter.matches(&id, &doc, "."));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Matches every document.
    All,
    /// Matches the document with this id.
    Id(DocumentId),
    /// Matches documents whose field at the path equals the value.
    ///
    /// Integers and floats compare numerically.
    Eq(String, Value),
    /// Matches documents matched by every inner filter.
    And(Vec<Filter>),
    /// Matches documents matched by at least one inner filter.
    Or(Vec<Filter>),
    /// Matches documents the inner filter does not match.
    Not(Box<Filter>),
}

/// Filter matching every document.
pub const ALL: Filter = Filter::All;

impl Filter {
    /// Creates an id filter.
    #[must_use]
    pub fn id(id: DocumentId) -> Self {
        Self::Id(id)
    }

    /// Creates an equality filter.
    pub fn eq(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Eq(path.into(), value.into())
    }

    /// Combines two filters with AND.
    #[must_use]
    pub fn and(self, other: Filter) -> Self {
        match self {
            Self::And(mut filters) => {
                filters.push(other);
                Self::And(filters)
            }
            this => Self::And(vec![this, other]),
        }
    }

    /// Combines two filters with OR.
    #[must_use]
    pub fn or(self, other: Filter) -> Self {
        match self {
            Self::Or(mut filters) => {
                filters.push(other);
                Self::Or(filters)
            }
            this => Self::Or(vec![this, other]),
        }
    }

    /// Negates the filter.
    #[must_use]
    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Self::Not(Box::new(self))
    }

    /// Returns the id if this filter selects exactly one id.
    #[must_use]
    pub fn as_id(&self) -> Option<&DocumentId> {
        match self {
            Self::Id(id) => Some(id),
            _ => None,
        }
    }

    /// Evaluates the filter against a document.
    #[must_use]
    pub fn matches(&self, id: &DocumentId, doc: &Document, separator: &str) -> bool {
        match self {
            Self::All => true,
            Self::Id(wanted) => wanted == id,
            Self::Eq(path, value) => doc
                .get_path(path, separator)
                .is_some_and(|found| found.loosely_equals(value)),
            Self::And(filters) => filters.iter().all(|f| f.matches(id, doc, separator)),
            Self::Or(filters) => filters.iter().any(|f| f.matches(id, doc, separator)),
            Self::Not(inner) => !inner.matches(id, doc, separator),
        }
    }
}

impl Default for Filter {
    fn default() -> Self {
        Self::All
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> (DocumentId, Document) {
        let id = DocumentId::from_text("d1").unwrap();
        let doc = Document::new()
            .with("_id", "d1")
            .with("firstName", "fn1")
            .with("address.city", "Oslo")
            .with("score", 10);
        (id, doc)
    }

    #[test]
    fn all_and_id() {
        let (id, doc) = sample();
        assert!(ALL.matches(&id, &doc, "."));
        assert!(Filter::id(id.clone()).matches(&id, &doc, "."));
        let other = DocumentId::from_text("d2").unwrap();
        assert!(!Filter::id(other).matches(&id, &doc, "."));
    }

    #[test]
    fn eq_on_nested_path() {
        let (id, doc) = sample();
        assert!(Filter::eq("address.city", "Oslo").matches(&id, &doc, "."));
        assert!(!Filter::eq("address.city", "Bergen").matches(&id, &doc, "."));
        assert!(!Filter::eq("missing", Value::Null).matches(&id, &doc, "."));
    }

    #[test]
    fn eq_uses_separator() {
        let (id, doc) = sample();
        assert!(Filter::eq("address/city", "Oslo").matches(&id, &doc, "/"));
        assert!(!Filter::eq("address.city", "Oslo").matches(&id, &doc, "/"));
    }

    #[test]
    fn numeric_equality_is_loose() {
        let (id, doc) = sample();
        assert!(Filter::eq("score", 10.0).matches(&id, &doc, "."));
    }

    #[test]
    fn combinators() {
        let (id, doc) = sample();
        let both = Filter::eq("firstName", "fn1").and(Filter::eq("score", 10));
        assert!(both.matches(&id, &doc, "."));
        assert_eq!(
            both.clone().and(ALL),
            Filter::And(vec![
                Filter::eq("firstName", "fn1"),
                Filter::eq("score", 10),
                Filter::All
            ])
        );

        let either = Filter::eq("firstName", "nope").or(Filter::eq("score", 10));
        assert!(either.matches(&id, &doc, "."));
        assert!(!either.not().matches(&id, &doc, "."));
    }

    #[test]
    fn as_id_only_for_id_filters() {
        let id = DocumentId::from_text("x").unwrap();
        assert_eq!(Filter::id(id.clone()).as_id(), Some(&id));
        assert_eq!(ALL.as_id(), None);
    }
}
