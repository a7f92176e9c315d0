//! Case-insensitive parameter bag.
//!
//! Keys are folded to lowercase on insert. Values keep their JSON type; the
//! string accessors render scalars and treat `null`, blanks and containers as
//! absent.

use std::collections::HashMap;

use serde_json::Value;

use super::error::ActionError;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    values: HashMap<String, Value>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: &str, value: impl Into<Value>) {
        self.values.insert(key.to_lowercase(), value.into());
    }

    /// Raw JSON value under `key`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(&key.to_lowercase())
    }

    /// Trimmed, non-empty string form of `key`.
    pub fn optional_str(&self, key: &str) -> Option<String> {
        let rendered = match self.get(key)? {
            Value::String(s) => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Null | Value::Array(_) | Value::Object(_) => return None,
        };
        (!rendered.is_empty()).then_some(rendered)
    }

    /// Like [`Params::optional_str`], but a miss is a validation error.
    pub fn required_str(&self, key: &str) -> Result<String, ActionError> {
        self.optional_str(key)
            .ok_or_else(|| ActionError::MissingParam(key.to_string()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Keys present, lowercased. For logging.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

impl FromIterator<(String, Value)> for Params {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        let mut params = Self::new();
        for (key, value) in iter {
            params.insert(&key, value);
        }
        params
    }
}

impl From<serde_json::Map<String, Value>> for Params {
    fn from(map: serde_json::Map<String, Value>) -> Self {
        map.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn params(value: Value) -> Params {
        match value {
            Value::Object(map) => Params::from(map),
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let p = params(json!({ "numeroExpediente": "X-1" }));
        assert_eq!(p.optional_str("numeroexpediente").as_deref(), Some("X-1"));
        assert_eq!(p.optional_str("NUMEROEXPEDIENTE").as_deref(), Some("X-1"));
    }

    #[test]
    fn test_scalars_render_as_strings() {
        let p = params(json!({ "id": 42, "flag": true, "q": "  hola  " }));
        assert_eq!(p.optional_str("id").as_deref(), Some("42"));
        assert_eq!(p.optional_str("flag").as_deref(), Some("true"));
        assert_eq!(p.optional_str("q").as_deref(), Some("hola"));
    }

    #[test]
    fn test_blank_null_and_containers_are_absent() {
        let p = params(json!({ "a": "   ", "b": null, "c": [1], "d": {} }));
        for key in ["a", "b", "c", "d", "missing"] {
            assert_eq!(p.optional_str(key), None, "key {key}");
        }
        assert_eq!(p.len(), 4);
    }

    #[test]
    fn test_required_miss_is_validation_error() {
        let err = Params::new().required_str("id").unwrap_err();
        assert_eq!(err.code(), "MISSING_PARAM");
        assert!(err.retryable());
    }

    #[test]
    fn test_later_key_variant_wins() {
        let mut p = Params::new();
        p.insert("Id", "first");
        p.insert("ID", "second");
        assert_eq!(p.optional_str("id").as_deref(), Some("second"));
        assert_eq!(p.len(), 1);
    }
}
