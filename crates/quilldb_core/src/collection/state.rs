//! Versioned committed state of a collection.

use crate::document::{Document, DocumentId};
use crate::types::SequenceNumber;
use std::collections::BTreeMap;

/// One committed version of a document. `None` is a deletion.
#[derive(Debug, Clone)]
struct Version {
    seq: SequenceNumber,
    doc: Option<Document>,
}

/// The authoritative document set of a collection, with enough history to
/// serve every open snapshot.
///
/// Each commit gets the next sequence number and appends one version per
/// written document. A reader at snapshot `s` sees, for each id, the newest
/// version with `seq <= s`.
#[derive(Debug, Default)]
pub(crate) struct CollectionState {
    docs: BTreeMap<DocumentId, Vec<Version>>,
    committed_seq: SequenceNumber,
}

impl CollectionState {
    /// Creates a state from documents loaded off the store, at sequence 0.
    pub(crate) fn load(docs: impl IntoIterator<Item = (DocumentId, Document)>) -> Self {
        let docs = docs
            .into_iter()
            .map(|(id, doc)| {
                let version = Version {
                    seq: SequenceNumber::default(),
                    doc: Some(doc),
                };
                (id, vec![version])
            })
            .collect();
        Self {
            docs,
            committed_seq: SequenceNumber::default(),
        }
    }

    /// Sequence number of the latest commit.
    pub(crate) fn committed_seq(&self) -> SequenceNumber {
        self.committed_seq
    }

    /// Returns the document visible at `snapshot`.
    pub(crate) fn get(&self, id: &DocumentId, snapshot: SequenceNumber) -> Option<&Document> {
        self.docs
            .get(id)
            .and_then(|versions| visible(versions, snapshot))
    }

    /// Sequence number of the latest committed write to `id`.
    pub(crate) fn latest_seq(&self, id: &DocumentId) -> Option<SequenceNumber> {
        self.docs
            .get(id)
            .and_then(|versions| versions.last())
            .map(|v| v.seq)
    }

    /// Iterates over the documents visible at `snapshot`, ordered by id.
    pub(crate) fn iter_at(
        &self,
        snapshot: SequenceNumber,
    ) -> impl Iterator<Item = (&DocumentId, &Document)> {
        self.docs
            .iter()
            .filter_map(move |(id, versions)| visible(versions, snapshot).map(|doc| (id, doc)))
    }

    /// Number of documents visible at `snapshot`.
    pub(crate) fn count_at(&self, snapshot: SequenceNumber) -> usize {
        self.iter_at(snapshot).count()
    }

    /// Applies one commit's writes and returns its sequence number.
    pub(crate) fn apply(
        &mut self,
        writes: impl IntoIterator<Item = (DocumentId, Option<Document>)>,
    ) -> SequenceNumber {
        let seq = self.committed_seq.next();
        for (id, doc) in writes {
            self.docs.entry(id).or_default().push(Version { seq, doc });
        }
        self.committed_seq = seq;
        seq
    }

    /// Drops versions no snapshot at or after `horizon` can see.
    ///
    /// For each id, the newest version with `seq <= horizon` and everything
    /// newer is kept. Ids whose only remaining version is a deletion at or
    /// before the horizon are forgotten.
    pub(crate) fn prune(&mut self, horizon: SequenceNumber) {
        self.docs.retain(|_, versions| {
            let keep_from = versions
                .iter()
                .rposition(|v| v.seq <= horizon)
                .unwrap_or(0);
            versions.drain(..keep_from);
            !(versions.len() == 1 && versions[0].doc.is_none() && versions[0].seq <= horizon)
        });
    }

    /// Ids with any retained version, live or deleted.
    pub(crate) fn ids(&self) -> impl Iterator<Item = &DocumentId> {
        self.docs.keys()
    }

    /// Removes every document and its history.
    pub(crate) fn clear(&mut self) {
        self.docs.clear();
        self.committed_seq = self.committed_seq.next();
    }

    #[cfg(test)]
    fn version_count(&self, id: &DocumentId) -> usize {
        self.docs.get(id).map_or(0, Vec::len)
    }
}

fn visible(versions: &[Version], snapshot: SequenceNumber) -> Option<&Document> {
    versions
        .iter()
        .rev()
        .find(|v| v.seq <= snapshot)
        .and_then(|v| v.doc.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(text: &str) -> DocumentId {
        DocumentId::from_text(text).unwrap()
    }

    fn doc(v: i64) -> Document {
        Document::new().with("v", v)
    }

    #[test]
    fn loaded_documents_are_visible_at_zero() {
        let state = CollectionState::load(vec![(id("a"), doc(1))]);
        assert_eq!(state.committed_seq(), SequenceNumber::new(0));
        assert_eq!(state.get(&id("a"), SequenceNumber::new(0)), Some(&doc(1)));
        assert_eq!(state.latest_seq(&id("a")), Some(SequenceNumber::new(0)));
    }

    #[test]
    fn snapshots_see_their_own_version() {
        let mut state = CollectionState::default();
        let s1 = state.apply(vec![(id("a"), Some(doc(1)))]);
        let s2 = state.apply(vec![(id("a"), Some(doc(2)))]);
        let s3 = state.apply(vec![(id("a"), None)]);

        assert_eq!(state.get(&id("a"), SequenceNumber::new(0)), None);
        assert_eq!(state.get(&id("a"), s1), Some(&doc(1)));
        assert_eq!(state.get(&id("a"), s2), Some(&doc(2)));
        assert_eq!(state.get(&id("a"), s3), None);
        assert_eq!(state.count_at(s2), 1);
        assert_eq!(state.count_at(s3), 0);
    }

    #[test]
    fn iteration_is_ordered_by_id() {
        let mut state = CollectionState::default();
        let seq = state.apply(vec![(id("b"), Some(doc(2))), (id("a"), Some(doc(1)))]);
        let ids: Vec<_> = state.iter_at(seq).map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn prune_keeps_what_horizon_needs() {
        let mut state = CollectionState::default();
        let s1 = state.apply(vec![(id("a"), Some(doc(1)))]);
        let s2 = state.apply(vec![(id("a"), Some(doc(2)))]);
        let _s3 = state.apply(vec![(id("a"), Some(doc(3)))]);

        state.prune(s2);
        assert_eq!(state.version_count(&id("a")), 2);
        assert_eq!(state.get(&id("a"), s2), Some(&doc(2)));
        assert_eq!(state.get(&id("a"), s1), None);

        state.prune(state.committed_seq());
        assert_eq!(state.version_count(&id("a")), 1);
    }

    #[test]
    fn prune_forgets_old_deletions() {
        let mut state = CollectionState::default();
        state.apply(vec![(id("a"), Some(doc(1)))]);
        let gone = state.apply(vec![(id("a"), None)]);

        state.prune(gone);
        assert_eq!(state.version_count(&id("a")), 0);
        assert_eq!(state.latest_seq(&id("a")), None);
    }

    #[test]
    fn clear_empties_and_advances() {
        let mut state = CollectionState::default();
        let seq = state.apply(vec![(id("a"), Some(doc(1)))]);
        state.clear();
        assert!(state.committed_seq() > seq);
        assert_eq!(state.count_at(state.committed_seq()), 0);
    }
}
