//! Normalise the many shapes an extraction service answers with into a flat
//! list of records.

use serde_json::Value;

use super::ExtractionError;
use crate::models::Record;

/// Key the extraction prompt asks the service to wrap results in.
const DATA_KEY: &str = "data";

/// Turn an extraction payload into records.
///
/// Accepted shapes, in order:
/// - `null` or `{}`: no records
/// - `[{..}, {..}]`: records as-is
/// - `{"data": <payload>}`: unwrap and normalise `<payload>`
/// - `{"jobs": [{..}]}`: an object whose only array value holds records
/// - `{..}` of non-array values: a single record
/// - a JSON string holding any of the above
pub fn normalize_records(payload: Value) -> Result<Vec<Record>, ExtractionError> {
    match payload {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(i, item)| match item {
                Value::Object(map) => Ok(map),
                other => Err(ExtractionError::invalid(format!(
                    "record {} is a {}, expected an object",
                    i,
                    type_name(&other)
                ))),
            })
            .collect(),
        Value::Object(mut map) => {
            if map.is_empty() {
                return Ok(Vec::new());
            }
            if map.len() == 1 {
                if let Some(inner) = map.remove(DATA_KEY) {
                    return normalize_records(inner);
                }
            }

            let single_array = map.len() == 1 && map.values().all(Value::is_array);
            if single_array {
                return match map.into_iter().next() {
                    Some((_, inner)) => normalize_records(inner),
                    None => Ok(Vec::new()),
                };
            }
            Ok(vec![map])
        }
        Value::String(text) => {
            let parsed: Value = serde_json::from_str(text.trim()).map_err(|e| {
                ExtractionError::invalid(format!("response text is not JSON: {}", e))
            })?;
            if parsed.is_string() {
                return Err(ExtractionError::invalid("response is a bare string"));
            }
            normalize_records(parsed)
        }
        other => Err(ExtractionError::invalid(format!(
            "expected records, got a {}",
            type_name(&other)
        ))),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::ExtractionErrorKind;
    use serde_json::json;

    #[test]
    fn test_wrapped_data_array() {
        let records = normalize_records(json!({"data": [{"a": 1}, {"a": 2}]})).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1]["a"], 2);
    }

    #[test]
    fn test_bare_array_and_single_array_key() {
        assert_eq!(normalize_records(json!([{"a": 1}])).unwrap().len(), 1);
        let records = normalize_records(json!({"products": [{"sku": "x"}, {"sku": "y"}]})).unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_flat_object_is_one_record() {
        let records = normalize_records(json!({"title": "A", "tags": ["x"], "n": 1})).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["title"], "A");
    }

    #[test]
    fn test_empty_shapes() {
        assert!(normalize_records(Value::Null).unwrap().is_empty());
        assert!(normalize_records(json!({})).unwrap().is_empty());
        assert!(normalize_records(json!({"data": []})).unwrap().is_empty());
    }

    #[test]
    fn test_json_in_string() {
        let records = normalize_records(json!("{\"data\": [{\"id\": \"1\"}]}")).unwrap();
        assert_eq!(records[0]["id"], "1");
    }

    #[test]
    fn test_invalid_shapes() {
        let err = normalize_records(json!([1, 2])).unwrap_err();
        assert_eq!(err.kind, ExtractionErrorKind::InvalidResponse);
        assert!(normalize_records(json!(42)).is_err());
        assert!(normalize_records(json!("not json")).is_err());
    }
}
