//! Conversions between JSON and SQLite scalars.
//!
//! Rows only hold scalars: null, integer, real, text, and bytes. Bytes travel
//! as `{"$bytes": [..]}` inside the sandbox and as `{"$base64": ".."}` or a
//! base64 string over HTTP.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Map, Number, Value};

pub use rusqlite::types::Value as SqlValue;

use crate::error::{Error, Result};

/// Column name and value pairs in caller order.
pub type RowData = Vec<(String, SqlValue)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobEncoding {
    /// `"aGVsbG8="`, used by the HTTP data surface.
    Base64,
    /// `{"$bytes": [104, 101, ...]}`, revived as `Uint8Array` in the sandbox.
    Tagged,
}

// f64 values in this range convert to i64 without loss of the integer part.
const I64_FLOAT_MIN: f64 = -9_223_372_036_854_775_808.0;
const I64_FLOAT_MAX: f64 = 9_223_372_036_854_775_807.0;

/// Converts a JSON scalar into a bindable SQLite value.
///
/// Integer-valued finite numbers bind as INTEGER so that numbers coming out
/// of JavaScript (which has a single number type) keep integer semantics.
pub fn from_json(value: &Value) -> Result<SqlValue> {
    match value {
        Value::Null => Ok(SqlValue::Null),
        Value::Bool(b) => Ok(SqlValue::Integer(i64::from(*b))),
        Value::Number(n) => number_to_sql(n),
        Value::String(s) => Ok(SqlValue::Text(s.clone())),
        Value::Object(map) => bytes_from_object(map),
        Value::Array(_) => Err(Error::invalid(
            "arrays are not supported as column values",
        )),
    }
}

fn number_to_sql(n: &Number) -> Result<SqlValue> {
    if let Some(i) = n.as_i64() {
        return Ok(SqlValue::Integer(i));
    }
    if n.as_u64().is_some() {
        return Err(Error::invalid(format!("integer {n} is out of range")));
    }
    let f = n
        .as_f64()
        .ok_or_else(|| Error::invalid(format!("unsupported number {n}")))?;
    if !f.is_finite() {
        return Err(Error::invalid("non-finite numbers are not supported"));
    }
    if f.fract() == 0.0 && (I64_FLOAT_MIN..I64_FLOAT_MAX).contains(&f) {
        return Ok(SqlValue::Integer(f as i64));
    }
    Ok(SqlValue::Real(f))
}

fn bytes_from_object(map: &Map<String, Value>) -> Result<SqlValue> {
    if map.len() == 1 {
        if let Some(Value::Array(items)) = map.get("$bytes") {
            let bytes = items
                .iter()
                .map(|item| {
                    item.as_u64()
                        .and_then(|b| u8::try_from(b).ok())
                        .ok_or_else(|| Error::invalid("$bytes entries must be 0..=255"))
                })
                .collect::<Result<Vec<u8>>>()?;
            return Ok(SqlValue::Blob(bytes));
        }
        if let Some(Value::String(encoded)) = map.get("$base64") {
            let bytes = BASE64
                .decode(encoded)
                .map_err(|e| Error::invalid(format!("invalid $base64 value: {e}")))?;
            return Ok(SqlValue::Blob(bytes));
        }
    }
    Err(Error::invalid("nested objects are not supported as column values"))
}

/// Converts a stored value back to JSON.
#[must_use]
pub fn to_json(value: &SqlValue, blobs: BlobEncoding) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(i) => Value::from(*i),
        SqlValue::Real(f) => Number::from_f64(*f).map_or(Value::Null, Value::Number),
        SqlValue::Text(s) => Value::String(s.clone()),
        SqlValue::Blob(bytes) => match blobs {
            BlobEncoding::Base64 => Value::String(BASE64.encode(bytes)),
            BlobEncoding::Tagged => {
                let mut tagged = Map::new();
                tagged.insert(
                    "$bytes".to_string(),
                    Value::Array(bytes.iter().map(|b| Value::from(*b)).collect()),
                );
                Value::Object(tagged)
            }
        },
    }
}

/// Converts a JSON object into row data, rejecting non-scalar values.
pub fn row_from_json(object: &Map<String, Value>) -> Result<RowData> {
    object
        .iter()
        .map(|(column, value)| {
            from_json(value)
                .map(|v| (column.clone(), v))
                .map_err(|e| match e {
                    Error::InvalidInput(msg) => Error::InvalidInput(format!("{column}: {msg}")),
                    other => other,
                })
        })
        .collect()
}

/// Converts a JSON value expected to be an object into row data.
pub fn row_from_value(value: &Value) -> Result<RowData> {
    match value {
        Value::Object(map) => row_from_json(map),
        _ => Err(Error::invalid("expected an object of column values")),
    }
}

/// Converts a JSON array of positional parameters.
pub fn params_from_json(value: &Value) -> Result<Vec<SqlValue>> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => items.iter().map(from_json).collect(),
        _ => Err(Error::invalid("parameters must be an array")),
    }
}
