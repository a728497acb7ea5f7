//! Common helper functions for Vault operations.

use crate::schema::{FieldMap, FieldValue};
use serde_json::{Map, Value};

/// Extracts the first message of Vault's `{"errors": [...]}` body, falling
/// back to the raw text.
pub fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|val| {
            val.get("errors")
                .and_then(|v| v.as_array())
                .and_then(|errors| errors.first())
                .and_then(|msg| msg.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.to_string())
}

/// Returns the `data` object of a response, or the response itself for
/// endpoints that answer at the top level.
pub fn response_data(response: &Value) -> &Value {
    match response.get("data") {
        Some(data) if data.is_object() => data,
        _ => response,
    }
}

/// Converts a JSON attribute into a [`FieldValue`] by shape. `null` and
/// nested objects of non-scalars yield `None`.
pub fn field_value_from_json(value: &Value) -> Option<FieldValue> {
    match value {
        Value::Bool(b) => Some(FieldValue::Bool(*b)),
        Value::Number(n) => n.as_i64().map(FieldValue::Int),
        Value::String(s) => Some(FieldValue::String(s.clone())),
        Value::Array(items) => items
            .iter()
            .map(scalar_to_string)
            .collect::<Option<Vec<_>>>()
            .map(FieldValue::StringList),
        Value::Object(entries) => entries
            .iter()
            .map(|(k, v)| scalar_to_string(v).map(|s| (k.clone(), s)))
            .collect::<Option<_>>()
            .map(FieldValue::StringMap),
        Value::Null => None,
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Copies the listed attributes of `source` into `target`.
pub fn read_fields(source: &Value, names: &[&'static str], target: &mut FieldMap) {
    for name in names {
        if let Some(value) = source.get(*name).and_then(field_value_from_json) {
            target.insert(*name, value);
        }
    }
}

/// Serializes the listed fields of `fields` into a JSON object. Fields named
/// in `durations` are sent as `"<n>s"`.
pub fn write_fields(
    fields: &FieldMap,
    names: &[&'static str],
    durations: &[&'static str],
) -> Map<String, Value> {
    let mut body = Map::new();
    for name in names {
        let Some(value) = fields.get(name) else {
            continue;
        };
        let json = match value {
            FieldValue::Int(secs) if durations.contains(name) => {
                Value::String(format!("{}s", secs))
            }
            other => serde_json::json!(other),
        };
        body.insert((*name).to_string(), json);
    }
    body
}
