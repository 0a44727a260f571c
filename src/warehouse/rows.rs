//! Conversion of BigQuery's `{"f": [{"v": ...}]}` rows to JSON objects.
//!
//! BigQuery sends every scalar as a string. Values are retyped by their
//! schema: integers, floats and booleans become JSON numbers and booleans,
//! timestamps become RFC 3339 strings, records become nested objects and
//! repeated fields become arrays. Everything else (NUMERIC, DATE, BYTES, ...)
//! stays a string so no precision is lost.

use super::types::FieldSchema;
use chrono::{DateTime, SecondsFormat};
use serde_json::{Map, Number, Value};

/// Convert a page of rows.
pub fn convert_rows(schema: &[FieldSchema], rows: &[Value]) -> Vec<Map<String, Value>> {
    rows.iter().map(|row| convert_row(schema, row)).collect()
}

/// Convert one row (or one RECORD value) to an object keyed by field name.
pub fn convert_row(fields: &[FieldSchema], row: &Value) -> Map<String, Value> {
    let cells = row
        .get("f")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    fields
        .iter()
        .enumerate()
        .map(|(i, field)| {
            let value = cells
                .get(i)
                .and_then(|cell| cell.get("v"))
                .unwrap_or(&Value::Null);
            (field.name.clone(), convert_field(field, value))
        })
        .collect()
}

fn convert_field(field: &FieldSchema, value: &Value) -> Value {
    if value.is_null() {
        return Value::Null;
    }

    if field.is_repeated() {
        let items = value.as_array().map(Vec::as_slice).unwrap_or_default();
        return Value::Array(
            items
                .iter()
                .map(|item| convert_single(field, item.get("v").unwrap_or(&Value::Null)))
                .collect(),
        );
    }

    convert_single(field, value)
}

fn convert_single(field: &FieldSchema, value: &Value) -> Value {
    if value.is_null() {
        return Value::Null;
    }

    let text = match value {
        Value::String(s) => s.as_str(),
        Value::Object(_) if is_record(field) => {
            return Value::Object(convert_row(&field.fields, value));
        }
        other => return other.clone(),
    };

    match field.field_type.to_ascii_uppercase().as_str() {
        "INTEGER" | "INT64" => text.parse::<i64>().map(Value::from).ok(),
        "FLOAT" | "FLOAT64" => text
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number),
        "BOOLEAN" | "BOOL" => match text.to_ascii_lowercase().as_str() {
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            _ => None,
        },
        "TIMESTAMP" => timestamp_to_rfc3339(text).map(Value::String),
        _ => None,
    }
    .unwrap_or_else(|| Value::String(text.to_string()))
}

fn is_record(field: &FieldSchema) -> bool {
    matches!(
        field.field_type.to_ascii_uppercase().as_str(),
        "RECORD" | "STRUCT"
    )
}

/// BigQuery timestamps arrive as integer microseconds (with
/// `useInt64Timestamp`) or as floating-point seconds.
fn timestamp_to_rfc3339(text: &str) -> Option<String> {
    let micros = match text.parse::<i64>() {
        Ok(micros) => micros,
        Err(_) => {
            let seconds = text.parse::<f64>().ok()?;
            (seconds * 1_000_000.0).round() as i64
        }
    };

    DateTime::from_timestamp_micros(micros)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::AutoSi, true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn field(name: &str, ty: &str) -> FieldSchema {
        FieldSchema::new(name, ty)
    }

    #[test]
    fn test_scalar_types() {
        let schema = vec![
            field("id", "INTEGER"),
            field("score", "FLOAT64"),
            field("active", "BOOLEAN"),
            field("name", "STRING"),
            field("amount", "NUMERIC"),
            field("day", "DATE"),
        ];
        let row = json!({"f": [
            {"v": "42"},
            {"v": "3.5"},
            {"v": "true"},
            {"v": "Ada"},
            {"v": "12345678901234567890.123"},
            {"v": "2024-03-01"}
        ]});

        let converted = convert_row(&schema, &row);
        assert_eq!(converted["id"], json!(42));
        assert_eq!(converted["score"], json!(3.5));
        assert_eq!(converted["active"], json!(true));
        assert_eq!(converted["name"], json!("Ada"));
        assert_eq!(converted["amount"], json!("12345678901234567890.123"));
        assert_eq!(converted["day"], json!("2024-03-01"));
    }

    #[test]
    fn test_nulls_and_missing_cells() {
        let schema = vec![field("a", "INTEGER"), field("b", "STRING")];
        let converted = convert_row(&schema, &json!({"f": [{"v": null}]}));
        assert_eq!(converted["a"], Value::Null);
        assert_eq!(converted["b"], Value::Null);
    }

    #[test]
    fn test_timestamps() {
        let schema = vec![field("t1", "TIMESTAMP"), field("t2", "TIMESTAMP")];
        let row = json!({"f": [{"v": "1700000000000000"}, {"v": "1.7E9"}]});

        let converted = convert_row(&schema, &row);
        assert_eq!(converted["t1"], json!("2023-11-14T22:13:20Z"));
        assert_eq!(converted["t2"], json!("2023-11-14T22:13:20Z"));
    }

    #[test]
    fn test_record_and_repeated() {
        let mut address = field("address", "RECORD");
        address.fields = vec![field("city", "STRING"), field("zip", "INTEGER")];
        let mut tags = field("tags", "STRING");
        tags.mode = Some("REPEATED".to_string());
        let mut scores = field("scores", "INT64");
        scores.mode = Some("REPEATED".to_string());

        let schema = vec![address, tags, scores];
        let row = json!({"f": [
            {"v": {"f": [{"v": "Paris"}, {"v": "75001"}]}},
            {"v": [{"v": "a"}, {"v": "b"}]},
            {"v": [{"v": "1"}, {"v": "2"}]}
        ]});

        let converted = convert_row(&schema, &row);
        assert_eq!(converted["address"], json!({"city": "Paris", "zip": 75001}));
        assert_eq!(converted["tags"], json!(["a", "b"]));
        assert_eq!(converted["scores"], json!([1, 2]));
    }

    #[test]
    fn test_unparseable_scalar_stays_string() {
        let schema = vec![field("n", "INTEGER"), field("f", "FLOAT")];
        let converted = convert_row(&schema, &json!({"f": [{"v": "abc"}, {"v": "NaN"}]}));
        assert_eq!(converted["n"], json!("abc"));
        assert_eq!(converted["f"], json!("NaN"));
    }

    #[test]
    fn test_convert_rows_keeps_order() {
        let schema = vec![field("id", "INTEGER")];
        let rows = vec![json!({"f": [{"v": "1"}]}), json!({"f": [{"v": "2"}]})];
        let converted = convert_rows(&schema, &rows);
        assert_eq!(converted.len(), 2);
        assert_eq!(converted[1]["id"], json!(2));
    }
}
