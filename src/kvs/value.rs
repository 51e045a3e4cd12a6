//! Stored values
//!
//! Values are opaque to the store. They are kept as a closed set of JSON
//! shapes so a value written by a client survives replication, transfer
//! and cloning unchanged (object keys come back sorted).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_shapes() {
        let cases = [
            "null",
            "true",
            "42",
            "-1.5",
            r#""text""#,
            r#"[1,"two",null]"#,
            r#"{"a":{"b":[true]}}"#,
        ];
        for raw in cases {
            let value: Value = serde_json::from_str(raw).unwrap();
            assert_eq!(serde_json::to_string(&value).unwrap(), raw);
        }
    }

    #[test]
    fn test_variants() {
        assert_eq!(serde_json::from_str::<Value>("7").unwrap(), Value::from(7));
        assert_eq!(
            serde_json::from_str::<Value>(r#""x""#).unwrap(),
            Value::from("x")
        );
        assert!(serde_json::from_str::<Value>("null").unwrap().is_null());
    }
}
