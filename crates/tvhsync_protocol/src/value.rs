//! Dynamic HTSP field value type.

use crate::message::HtspMessage;
use serde::{Deserialize, Serialize};

/// A dynamic HTSP field value.
///
/// HTSP knows five field types: signed 64-bit integers, UTF-8 strings,
/// binary blobs, lists and nested maps. Booleans travel as integers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Signed integer (`S64`).
    Integer(i64),
    /// Text string (`STR`).
    Text(String),
    /// Nested message (`MAP`).
    Map(HtspMessage),
    /// List of values (`LIST`).
    List(Vec<Value>),
    /// Byte string (`BIN`). Serialized as a list of numbers.
    Bytes(Vec<u8>),
}

impl Value {
    /// Returns the integer value, if any.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the text value, if any.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the byte value, if any.
    ///
    /// A list made up entirely of small integers is not reinterpreted;
    /// callers that read JSON replays should use [`Value::to_bytes`].
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Returns owned bytes, accepting both `Bytes` and integer lists.
    pub fn to_bytes(&self) -> Option<Vec<u8>> {
        match self {
            Value::Bytes(b) => Some(b.clone()),
            Value::List(items) => items
                .iter()
                .map(|v| v.as_integer().and_then(|n| u8::try_from(n).ok()))
                .collect(),
            _ => None,
        }
    }

    /// Returns the list value, if any.
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Returns the nested message, if any.
    pub fn as_map(&self) -> Option<&HtspMessage> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Returns a short type name for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Integer(_) => "integer",
            Value::Text(_) => "text",
            Value::Map(_) => "map",
            Value::List(_) => "list",
            Value::Bytes(_) => "bytes",
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Integer(i64::from(n))
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Integer(i64::from(n))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Integer(i64::from(b))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<HtspMessage> for Value {
    fn from(m: HtspMessage) -> Self {
        Value::Map(m)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}
