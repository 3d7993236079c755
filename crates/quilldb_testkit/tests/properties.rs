//! Property tests for id assignment, isolation and rollback.

use proptest::prelude::*;
use quilldb_core::{Config, Database, Document, Filter, ALL};
use quilldb_testkit::prelude::*;
use std::collections::HashSet;

/// A write staged inside a transaction.
#[derive(Debug, Clone)]
enum Op {
    Insert(Document),
    UpdateAll(Document),
    RemoveNth(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        document_strategy().prop_map(Op::Insert),
        document_strategy().prop_map(Op::UpdateAll),
        (0usize..8).prop_map(Op::RemoveNth),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn assigned_ids_are_unique_and_stable(docs in documents_strategy(24)) {
        let db = Database::open_in_memory().unwrap();
        let collection = db.collection("test").unwrap();

        let result = collection.insert(docs.clone()).unwrap();
        let unique: HashSet<_> = result.ids.iter().cloned().collect();
        prop_assert_eq!(unique.len(), docs.len());

        for (id, doc) in result.ids.iter().zip(docs) {
            let stored = collection.get_by_id(id).unwrap().unwrap();
            let stored_id = stored.id();
            prop_assert_eq!(stored_id.as_ref(), Some(id));
            prop_assert_eq!(without_id(stored), doc);
        }
    }

    #[test]
    fn rollback_leaves_committed_state_unchanged(
        seed in documents_strategy(6),
        ops in prop::collection::vec(op_strategy(), 1..12),
    ) {
        let db = Database::open_in_memory().unwrap();
        let collection = db.collection("test").unwrap();
        collection.insert(seed).unwrap();
        let before = collection.find(&ALL).unwrap();

        let txn = collection.begin_transaction().unwrap();
        for op in ops {
            match op {
                Op::Insert(doc) => {
                    txn.insert([doc]).unwrap();
                }
                Op::UpdateAll(doc) => {
                    txn.update(&ALL, &doc).unwrap();
                }
                Op::RemoveNth(n) => {
                    let visible = txn.find(&ALL).unwrap();
                    if let Some(id) = visible.get(n).and_then(Document::id) {
                        txn.remove(&Filter::id(id)).unwrap();
                    }
                }
            }
        }
        txn.rollback().unwrap();

        prop_assert_eq!(collection.find(&ALL).unwrap(), before);
    }

    #[test]
    fn encrypted_documents_round_trip(docs in documents_strategy(4)) {
        let db = Database::open(Config::new().credentials("user", "pass")).unwrap();
        let collection = db.collection("test").unwrap();
        let ids = collection.insert(docs.clone()).unwrap().ids;
        // Force a read from the store rather than the in-memory state.
        collection.close();
        let reloaded = db.collection("test").unwrap();

        for (id, doc) in ids.iter().zip(docs) {
            let stored = reloaded.get_by_id(id).unwrap().unwrap();
            prop_assert_eq!(without_id(stored), doc);
        }
    }
}
