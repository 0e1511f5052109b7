//! Generic field values carried in a message body.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A message body: string-keyed fields.
pub type FieldMap = BTreeMap<String, Value>;

/// A single field value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    String(String),
    Int(i32),
    /// Integers that do not fit in 32 bits (large artifact sizes).
    Long(i64),
    Bool(bool),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Map(FieldMap),
}

impl Value {
    /// The representation this value is stored in.
    pub fn field_type(&self) -> FieldType {
        match self {
            Value::String(_) => FieldType::String,
            Value::Int(_) | Value::Long(_) => FieldType::Int,
            Value::Bool(_) => FieldType::Bool,
            Value::Bytes(_) => FieldType::Bytes,
            Value::List(_) => FieldType::List,
            Value::Map(_) => FieldType::Map,
        }
    }

    /// Encode an integer in the narrowest representation that holds it.
    pub fn integer(n: i64) -> Self {
        match i32::try_from(n) {
            Ok(small) => Value::Int(small),
            Err(_) => Value::Long(n),
        }
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

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// The declared type of a payload field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    String,
    Int,
    Bool,
    Bytes,
    List,
    Map,
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldType::String => "string",
            FieldType::Int => "int",
            FieldType::Bool => "bool",
            FieldType::Bytes => "bytes",
            FieldType::List => "list",
            FieldType::Map => "map",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_picks_narrow_representation() {
        assert_eq!(Value::integer(734_003_200), Value::Int(734_003_200));
        assert_eq!(Value::integer(5_000_000_000), Value::Long(5_000_000_000));
        assert_eq!(Value::integer(-1), Value::Int(-1));
    }

    #[test]
    fn json_shape_is_tagged() {
        let v = Value::from("live");
        let json = serde_json::to_string(&v).unwrap();
        assert_eq!(json, r#"{"type":"string","value":"live"}"#);
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v);
    }
}
