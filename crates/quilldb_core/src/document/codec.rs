//! Binary form of documents.
//!
//! Documents are stored as CBOR maps keyed by field name, in field order.
//! Dates use the standard epoch-based tag (1) with a float number of seconds,
//! which round trips at millisecond precision.

use super::{Document, Value};
use crate::error::{CoreError, CoreResult};
use chrono::{TimeZone, Utc};
use ciborium::value::Value as Cbor;

/// CBOR tag for epoch-based date/time.
const TAG_EPOCH_DATETIME: u64 = 1;

/// Encodes a document to CBOR bytes.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_document(doc: &Document) -> CoreResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(&document_to_cbor(doc), &mut buf)
        .map_err(|e| CoreError::codec(e.to_string()))?;
    Ok(buf)
}

/// Decodes a document from CBOR bytes.
///
/// # Errors
///
/// Returns an error if the bytes are not a CBOR map with text keys, or hold
/// a value quilldb cannot represent.
pub fn decode_document(bytes: &[u8]) -> CoreResult<Document> {
    let cbor: Cbor =
        ciborium::de::from_reader(bytes).map_err(|e| CoreError::codec(e.to_string()))?;
    match cbor {
        Cbor::Map(entries) => cbor_to_document(entries),
        other => Err(CoreError::codec(format!(
            "expected a map at top level, found {}",
            cbor_kind(&other)
        ))),
    }
}

fn document_to_cbor(doc: &Document) -> Cbor {
    Cbor::Map(
        doc.iter()
            .map(|(key, value)| (Cbor::Text(key.to_string()), value_to_cbor(value)))
            .collect(),
    )
}

#[allow(clippy::cast_precision_loss)]
fn value_to_cbor(value: &Value) -> Cbor {
    match value {
        Value::Null => Cbor::Null,
        Value::Bool(b) => Cbor::Bool(*b),
        Value::Integer(i) => Cbor::Integer((*i).into()),
        Value::Float(f) => Cbor::Float(*f),
        Value::Text(s) => Cbor::Text(s.clone()),
        Value::Bytes(b) => Cbor::Bytes(b.clone()),
        Value::Date(at) => Cbor::Tag(
            TAG_EPOCH_DATETIME,
            Box::new(Cbor::Float(at.timestamp_millis() as f64 / 1000.0)),
        ),
        Value::Array(items) => Cbor::Array(items.iter().map(value_to_cbor).collect()),
        Value::Document(doc) => document_to_cbor(doc),
    }
}

fn cbor_to_document(entries: Vec<(Cbor, Cbor)>) -> CoreResult<Document> {
    let mut doc = Document::new();
    for (key, value) in entries {
        let key = match key {
            Cbor::Text(key) => key,
            other => {
                return Err(CoreError::codec(format!(
                    "document keys must be text, found {}",
                    cbor_kind(&other)
                )))
            }
        };
        doc.put_field(&key, cbor_to_value(value)?);
    }
    Ok(doc)
}

#[allow(clippy::cast_possible_truncation)]
fn cbor_to_value(cbor: Cbor) -> CoreResult<Value> {
    Ok(match cbor {
        Cbor::Null => Value::Null,
        Cbor::Bool(b) => Value::Bool(b),
        Cbor::Integer(i) => Value::Integer(
            i64::try_from(i).map_err(|_| CoreError::codec("integer out of range"))?,
        ),
        Cbor::Float(f) => Value::Float(f),
        Cbor::Text(s) => Value::Text(s),
        Cbor::Bytes(b) => Value::Bytes(b),
        Cbor::Array(items) => Value::Array(
            items
                .into_iter()
                .map(cbor_to_value)
                .collect::<CoreResult<Vec<_>>>()?,
        ),
        Cbor::Map(entries) => Value::Document(cbor_to_document(entries)?),
        Cbor::Tag(TAG_EPOCH_DATETIME, inner) => {
            let millis = match *inner {
                Cbor::Float(secs) => (secs * 1000.0).round() as i64,
                Cbor::Integer(secs) => i64::try_from(secs)
                    .ok()
                    .and_then(|s| s.checked_mul(1000))
                    .ok_or_else(|| CoreError::codec("date out of range"))?,
                other => {
                    return Err(CoreError::codec(format!(
                        "date must be numeric, found {}",
                        cbor_kind(&other)
                    )))
                }
            };
            let at = Utc
                .timestamp_millis_opt(millis)
                .single()
                .ok_or_else(|| CoreError::codec("date out of range"))?;
            Value::Date(at)
        }
        other => {
            return Err(CoreError::codec(format!(
                "unsupported value: {}",
                cbor_kind(&other)
            )))
        }
    })
}

fn cbor_kind(cbor: &Cbor) -> &'static str {
    match cbor {
        Cbor::Null => "null",
        Cbor::Bool(_) => "bool",
        Cbor::Integer(_) => "integer",
        Cbor::Float(_) => "float",
        Cbor::Text(_) => "text",
        Cbor::Bytes(_) => "bytes",
        Cbor::Array(_) => "array",
        Cbor::Map(_) => "map",
        Cbor::Tag(..) => "tag",
        _ => "unknown",
    }
}
