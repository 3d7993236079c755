//! Write results and update options.

use crate::document::DocumentId;

/// Outcome of an insert, update or remove.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteResult {
    /// Number of documents affected.
    pub count: usize,
    /// Ids of the affected documents, in the order they were written.
    pub ids: Vec<DocumentId>,
}

impl WriteResult {
    /// Creates a result from the affected ids.
    #[must_use]
    pub fn from_ids(ids: Vec<DocumentId>) -> Self {
        Self {
            count: ids.len(),
            ids,
        }
    }

    /// Returns true if nothing was affected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// Options for updates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOptions {
    /// Insert the update document if nothing matches.
    pub insert_if_absent: bool,
    /// Update only the first matching document.
    pub just_once: bool,
}

impl UpdateOptions {
    /// Creates default options (update all matches, never insert).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to insert when nothing matches.
    #[must_use]
    pub const fn insert_if_absent(mut self, value: bool) -> Self {
        self.insert_if_absent = value;
        self
    }

    /// Sets whether to stop after the first match.
    #[must_use]
    pub const fn just_once(mut self, value: bool) -> Self {
        self.just_once = value;
        self
    }
}
