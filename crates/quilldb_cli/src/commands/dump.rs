//! Dump command implementation.

use super::Target;
use chrono::SecondsFormat;
use quilldb_core::{Document, Value, ALL};
use serde_json::{Map, Number};
use std::io::Write;

/// Runs the dump command, writing one JSON object per line.
pub fn run(
    target: &Target,
    collection: &str,
    limit: Option<usize>,
    out: &mut impl Write,
) -> Result<(), Box<dyn std::error::Error>> {
    let db = target.open()?;
    if !db.has_collection(collection)? {
        db.close()?;
        return Err(format!("Collection not found: {collection}").into());
    }

    let docs = db.collection(collection)?.find(&ALL)?;
    for doc in docs.iter().take(limit.unwrap_or(usize::MAX)) {
        writeln!(out, "{}", serde_json::Value::Object(document_to_json(doc)))?;
    }

    db.close()?;
    Ok(())
}

/// Converts a document to a JSON object.
///
/// Dates become RFC 3339 strings with millisecond precision, byte strings
/// become arrays of numbers and non-finite floats become `null`.
pub fn document_to_json(doc: &Document) -> Map<String, serde_json::Value> {
    doc.iter()
        .map(|(key, value)| (key.to_string(), value_to_json(value)))
        .collect()
}

fn value_to_json(value: &Value) -> serde_json::Value {
    use serde_json::Value as Json;

    match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Integer(i) => Json::from(*i),
        Value::Float(f) => Number::from_f64(*f).map_or(Json::Null, Json::Number),
        Value::Text(s) => Json::String(s.clone()),
        Value::Bytes(bytes) => Json::Array(bytes.iter().map(|b| Json::from(*b)).collect()),
        Value::Date(at) => Json::String(at.to_rfc3339_opts(SecondsFormat::Millis, true)),
        Value::Array(items) => Json::Array(items.iter().map(value_to_json).collect()),
        Value::Document(doc) => Json::Object(document_to_json(doc)),
    }
}
