use std::collections::BTreeMap;

use serde_derive::{Deserialize, Serialize};

use super::PropertyId;

/// A property value. Values are dynamically typed and compare equal only
/// within the same type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Bytes(#[serde(with = "serde_bytes")] Vec<u8>),
    List(Vec<Value>),
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::String(s) => write!(f, "{}", s),
            Value::Bytes(bytes) => {
                for byte in bytes {
                    write!(f, "{:02x}", byte)?;
                }
                Ok(())
            }
            Value::List(values) => {
                write!(f, "[")?;
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", value)?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
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

/// The property map of a vertex or edge, keyed by interned property id.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Properties {
    properties: BTreeMap<PropertyId, Value>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a property, returning the previous value if any.
    pub fn set(&mut self, key: PropertyId, value: Value) -> Option<Value> {
        self.properties.insert(key, value)
    }

    pub fn get(&self, key: PropertyId) -> Option<&Value> {
        self.properties.get(&key)
    }

    /// Clears a property, returning the previous value if any.
    pub fn clear(&mut self, key: PropertyId) -> Option<Value> {
        self.properties.remove(&key)
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (PropertyId, &Value)> {
        self.properties.iter().map(|(key, value)| (*key, value))
    }
}
