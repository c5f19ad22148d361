//! Query parameter validation and encoding
//!
//! Parameters are taken from any `Serialize` value that serializes to a JSON
//! object. Each entry is validated before it is allowed onto the URL:
//!
//! - `null` and empty strings are dropped
//! - object values are rejected with a warning and never serialized
//! - arrays are expanded into repeated keys
//! - every other scalar is stringified
//!
//! Pairs come out in the order the keys were serialized.

use crate::error::{ApiError, Result};
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

/// Validated `key=value` pairs plus the keys that were rejected
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncodedQuery {
    pairs: Vec<(String, String)>,
    rejected: Vec<String>,
}

impl EncodedQuery {
    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }

    pub fn into_pairs(self) -> Vec<(String, String)> {
        self.pairs
    }

    /// Keys dropped because their value was an object
    pub fn rejected(&self) -> &[String] {
        &self.rejected
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// Validate and encode query parameters.
///
/// Fails only when the value as a whole is not a map; individual bad entries
/// are dropped so that one malformed parameter does not abort the request.
pub fn encode_query<Q: Serialize + ?Sized>(query: &Q) -> Result<EncodedQuery> {
    let map = match serde_json::to_value(query)? {
        Value::Null => return Ok(EncodedQuery::default()),
        Value::Object(map) => map,
        other => {
            return Err(ApiError::InvalidRequest {
                message: format!("Query parameters must be a map, got {}", type_name(&other)),
            })
        }
    };

    let mut encoded = EncodedQuery::default();
    for (key, value) in map {
        match value {
            Value::Array(items) => {
                for item in items {
                    push_scalar(&key, item, &mut encoded);
                }
            }
            other => push_scalar(&key, other, &mut encoded),
        }
    }
    Ok(encoded)
}

fn push_scalar(key: &str, value: Value, encoded: &mut EncodedQuery) {
    let rendered = match value {
        Value::Null => return,
        Value::String(s) if s.is_empty() => return,
        Value::String(s) => s,
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Object(_) | Value::Array(_) => {
            warn!(param = key, "Dropping query parameter with non-scalar value");
            if !encoded.rejected.iter().any(|k| k == key) {
                encoded.rejected.push(key.to_string());
            }
            return;
        }
    };
    encoded.pairs.push((key.to_string(), rendered));
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pairs(query: &EncodedQuery) -> Vec<(&str, &str)> {
        query
            .pairs()
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect()
    }

    #[test]
    fn test_object_values_are_rejected() {
        let query = encode_query(&json!({"foo": {"bar": 1}, "page": 2})).unwrap();
        assert_eq!(pairs(&query), vec![("page", "2")]);
        assert_eq!(query.rejected(), ["foo".to_string()]);
    }

    #[test]
    fn test_empty_and_null_values_are_dropped() {
        let query = encode_query(&json!({"q": "", "status": null, "role": "brand"})).unwrap();
        assert_eq!(pairs(&query), vec![("role", "brand")]);
        assert!(query.rejected().is_empty());
    }

    #[test]
    fn test_arrays_expand_to_repeated_keys() {
        let query =
            encode_query(&json!({"tag": ["fitness", "", null, 3, {"x": 1}], "active": true}))
                .unwrap();
        assert_eq!(
            pairs(&query),
            vec![("tag", "fitness"), ("tag", "3"), ("active", "true")]
        );
        assert_eq!(query.rejected(), ["tag".to_string()]);
    }

    #[test]
    fn test_pairs_keep_insertion_order() {
        let query = encode_query(&json!({"z": 1, "a": 2, "m": "x"})).unwrap();
        assert_eq!(pairs(&query), vec![("z", "1"), ("a", "2"), ("m", "x")]);
    }

    #[test]
    fn test_struct_queries() {
        #[derive(Serialize)]
        struct ListCampaigns {
            status: Option<String>,
            limit: u32,
        }

        let query = encode_query(&ListCampaigns {
            status: None,
            limit: 20,
        })
        .unwrap();
        assert_eq!(pairs(&query), vec![("limit", "20")]);
    }

    #[test]
    fn test_non_map_query_is_invalid() {
        assert!(matches!(
            encode_query(&json!(["a", "b"])),
            Err(ApiError::InvalidRequest { .. })
        ));
        assert!(encode_query(&()).unwrap().is_empty());
    }
}
