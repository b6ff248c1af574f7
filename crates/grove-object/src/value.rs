//! Dynamic attribute values.
//!
//! Attribute values form a tree of plain data, with two leaf kinds
//! that tie into the engine: [`Value::Object`] holds a live reference
//! to another persistent object (serialized as an OID stub), and
//! [`Value::Blob`] holds a binary stream persisted out-of-band in the
//! transaction log.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::blob::Blob;
use crate::handle::PRef;

/// An object's attribute map.
pub type StateMap = BTreeMap<String, Value>;

/// A single attribute value.
#[derive(Debug, Clone)]
pub enum Value {
    /// Absent value.
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Floating point number.
    Float(f64),
    /// UTF-8 text.
    Text(String),
    /// Raw bytes stored inline with the object state.
    Bytes(Vec<u8>),
    /// Ordered list of values.
    List(Vec<Value>),
    /// String-keyed map of values.
    Map(BTreeMap<String, Value>),
    /// Reference to another persistent object.
    Object(PRef),
    /// Binary stream persisted in the transaction log.
    Blob(Blob),
}

impl Value {
    /// Returns the integer if this is an `Int`.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the text if this is a `Text`.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the object reference if this is an `Object`.
    pub fn as_object(&self) -> Option<&PRef> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// Returns the blob if this is a `Blob`.
    pub fn as_blob(&self) -> Option<&Blob> {
        match self {
            Value::Blob(blob) => Some(blob),
            _ => None,
        }
    }

    /// Returns true if this is `Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            // References compare by identity, like the objects they
            // point to.
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
            (Value::Blob(a), Value::Blob(b)) => a.same_blob(b),
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<PRef> for Value {
    fn from(v: PRef) -> Self {
        Value::Object(v)
    }
}

impl From<&PRef> for Value {
    fn from(v: &PRef) -> Self {
        Value::Object(Arc::clone(v))
    }
}

impl From<Blob> for Value {
    fn from(v: Blob) -> Self {
        Value::Blob(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::Persistent;

    #[test]
    fn test_conversions() {
        assert_eq!(Value::from(3i64).as_int(), Some(3));
        assert_eq!(Value::from("hi").as_text(), Some("hi"));
        assert!(Value::Null.is_null());
        assert_eq!(Value::from(true), Value::Bool(true));
    }

    #[test]
    fn test_object_identity_equality() {
        let a = Persistent::new();
        let b = Persistent::new();
        assert_eq!(Value::from(&a), Value::from(&a));
        assert_ne!(Value::from(&a), Value::from(&b));
    }

    #[test]
    fn test_map_equality() {
        let mut m1 = StateMap::new();
        m1.insert("x".into(), Value::Int(1));
        let mut m2 = StateMap::new();
        m2.insert("x".into(), Value::Int(1));
        assert_eq!(Value::Map(m1), Value::Map(m2));
    }
}
