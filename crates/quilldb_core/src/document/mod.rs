//! Documents: ordered, field-path addressable records.
//!
//! A [`Document`] maps field names to [`Value`]s and keeps insertion order.
//! Nested documents are addressed with dotted paths (`"address.city"`); the
//! separator is configurable through the `*_path` methods.
//!
//! Documents have value semantics. Cloning is always explicit.

mod codec;
mod id;
mod value;

pub use codec::{decode_document, encode_document};
pub use id::{DocumentId, ID_FIELD};
pub use value::Value;

use crate::config::DEFAULT_FIELD_SEPARATOR;

/// An ordered mapping from field names to values.
///
/// # Example
///
/// ```rust
/// use quilldb_core::{Document, Value};
///
/// let mut doc = Document::new();
/// doc.put("name.first", "Ada").put("age", 36);
///
/// assert_eq!(doc.get("name.first"), Some(&Value::from("Ada")));
/// assert_eq!(doc.fields(), vec!["name.first".to_string(), "age".to_string()]);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    fields: Vec<(String, Value)>,
}

impl Document {
    /// Creates an empty document.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`put`](Self::put).
    #[must_use]
    pub fn with(mut self, path: &str, value: impl Into<Value>) -> Self {
        self.put(path, value);
        self
    }

    /// Sets the value at a dotted path, creating intermediate documents.
    ///
    /// An intermediate field holding a non-document value is replaced by a
    /// document.
    pub fn put(&mut self, path: &str, value: impl Into<Value>) -> &mut Self {
        self.put_path(path, DEFAULT_FIELD_SEPARATOR, value)
    }

    /// Returns the value at a dotted path, if present.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&Value> {
        self.get_path(path, DEFAULT_FIELD_SEPARATOR)
    }

    /// Removes and returns the value at a dotted path.
    pub fn remove(&mut self, path: &str) -> Option<Value> {
        self.remove_path(path, DEFAULT_FIELD_SEPARATOR)
    }

    /// Returns true if a value exists at a dotted path.
    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// [`put`](Self::put) with an explicit separator.
    pub fn put_path(&mut self, path: &str, separator: &str, value: impl Into<Value>) -> &mut Self {
        let segments = split_path(path, separator);
        self.put_segments(&segments, value.into());
        self
    }

    /// [`get`](Self::get) with an explicit separator.
    ///
    /// A numeric segment indexes into an array.
    #[must_use]
    pub fn get_path(&self, path: &str, separator: &str) -> Option<&Value> {
        let mut segments = split_path(path, separator).into_iter();
        let mut current = self.get_field(segments.next()?)?;
        for segment in segments {
            current = match current {
                Value::Document(doc) => doc.get_field(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// [`remove`](Self::remove) with an explicit separator.
    pub fn remove_path(&mut self, path: &str, separator: &str) -> Option<Value> {
        let segments = split_path(path, separator);
        self.remove_segments(&segments)
    }

    /// [`contains`](Self::contains) with an explicit separator.
    #[must_use]
    pub fn contains_path(&self, path: &str, separator: &str) -> bool {
        self.get_path(path, separator).is_some()
    }

    /// Sets a top-level field without path interpretation.
    pub fn put_field(&mut self, key: &str, value: impl Into<Value>) -> &mut Self {
        let value = value.into();
        match self.position(key) {
            Some(index) => self.fields[index].1 = value,
            None => self.fields.push((key.to_string(), value)),
        }
        self
    }

    /// Returns a top-level field without path interpretation.
    #[must_use]
    pub fn get_field(&self, key: &str) -> Option<&Value> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Removes a top-level field without path interpretation.
    pub fn remove_field(&mut self, key: &str) -> Option<Value> {
        let index = self.position(key)?;
        Some(self.fields.remove(index).1)
    }

    /// Returns the document's id, if it has a valid one.
    #[must_use]
    pub fn id(&self) -> Option<DocumentId> {
        self.get_field(ID_FIELD)
            .and_then(Value::as_text)
            .and_then(DocumentId::from_text)
    }

    /// Merges `other` into this document.
    ///
    /// Fields present in both are overwritten by `other`, except nested
    /// documents, which are merged recursively.
    pub fn merge(&mut self, other: &Document) -> &mut Self {
        for (key, value) in &other.fields {
            match (self.get_field_mut(key), value) {
                (Some(Value::Document(mine)), Value::Document(theirs)) => {
                    mine.merge(theirs);
                }
                _ => {
                    self.put_field(key, value.clone());
                }
            }
        }
        self
    }

    /// Returns the dotted paths of all leaf fields, in order.
    #[must_use]
    pub fn fields(&self) -> Vec<String> {
        self.fields_with(DEFAULT_FIELD_SEPARATOR)
    }

    /// [`fields`](Self::fields) joined with an explicit separator.
    #[must_use]
    pub fn fields_with(&self, separator: &str) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_paths("", separator, &mut out);
        out
    }

    /// Returns the number of top-level fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if the document has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterates over top-level fields in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.fields.iter().position(|(k, _)| k == key)
    }

    fn get_field_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.fields
            .iter_mut()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    fn put_segments(&mut self, segments: &[&str], value: Value) {
        match segments {
            [] => {}
            [last] => {
                self.put_field(last, value);
            }
            [head, rest @ ..] => {
                let index = match self.position(head) {
                    Some(index) => {
                        if !matches!(self.fields[index].1, Value::Document(_)) {
                            self.fields[index].1 = Value::Document(Document::new());
                        }
                        index
                    }
                    None => {
                        self.fields
                            .push(((*head).to_string(), Value::Document(Document::new())));
                        self.fields.len() - 1
                    }
                };
                if let Value::Document(child) = &mut self.fields[index].1 {
                    child.put_segments(rest, value);
                }
            }
        }
    }

    fn remove_segments(&mut self, segments: &[&str]) -> Option<Value> {
        match segments {
            [] => None,
            [last] => self.remove_field(last),
            [head, rest @ ..] => match self.get_field_mut(head)? {
                Value::Document(child) => child.remove_segments(rest),
                _ => None,
            },
        }
    }

    fn collect_paths(&self, prefix: &str, separator: &str, out: &mut Vec<String>) {
        for (key, value) in &self.fields {
            let path = if prefix.is_empty() {
                key.clone()
            } else {
                format!("{prefix}{separator}{key}")
            };
            match value {
                Value::Document(child) if !child.is_empty() => {
                    child.collect_paths(&path, separator, out);
                }
                _ => out.push(path),
            }
        }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Document {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut doc = Document::new();
        for (key, value) in iter {
            doc.put_field(&key.into(), value);
        }
        doc
    }
}

fn split_path<'a>(path: &'a str, separator: &str) -> Vec<&'a str> {
    if separator.is_empty() {
        vec![path]
    } else {
        path.split(separator).collect()
    }
}
