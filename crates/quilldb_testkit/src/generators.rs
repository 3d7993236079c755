//! Property-based test generators using proptest.
//!
//! Generated values survive a codec round trip unchanged: floats are finite
//! and dates carry millisecond precision.

use chrono::DateTime;
use proptest::prelude::*;
use quilldb_core::{Document, Value};

/// Strategy for generating valid collection names.
pub fn collection_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z][a-zA-Z0-9_]{0,31}").expect("Invalid regex")
}

/// Strategy for generating field names that contain no separator and never
/// collide with `_id`.
pub fn field_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-zA-Z0-9]{0,11}").expect("Invalid regex")
}

/// Strategy for generating dates between 1970 and 2100.
pub fn date_strategy() -> impl Strategy<Value = Value> {
    (0i64..4_102_444_800_000).prop_map(|millis| {
        let at = DateTime::from_timestamp_millis(millis).expect("Timestamp in range");
        Value::date(at)
    })
}

/// Strategy for generating scalar values.
pub fn scalar_value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Integer),
        (-1.0e12f64..1.0e12).prop_map(Value::Float),
        "[ -~]{0,24}".prop_map(Value::Text),
        prop::collection::vec(any::<u8>(), 0..32).prop_map(Value::Bytes),
        date_strategy(),
    ]
}

/// Strategy for generating values, nesting arrays and documents up to three
/// levels deep.
pub fn value_strategy() -> impl Strategy<Value = Value> {
    scalar_value_strategy().prop_recursive(3, 32, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::vec((field_name_strategy(), inner), 0..4)
                .prop_map(|fields| Value::Document(fields.into_iter().collect())),
        ]
    })
}

/// Strategy for generating documents without an `_id`.
pub fn document_strategy() -> impl Strategy<Value = Document> {
    prop::collection::vec((field_name_strategy(), value_strategy()), 0..8)
        .prop_map(|fields| fields.into_iter().collect())
}

/// Strategy for generating a batch of documents.
pub fn documents_strategy(max: usize) -> impl Strategy<Value = Vec<Document>> {
    prop::collection::vec(document_strategy(), 1..=max.max(1))
}
