//! Decoded HTSP messages.

use crate::error::{ProtocolError, ProtocolResult};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A decoded HTSP message: a flat map of named, typed fields.
///
/// Requests and pushes carry their kind in the `method` field; responses
/// are correlated to their request through the `seq` field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HtspMessage {
    fields: BTreeMap<String, Value>,
}

impl HtspMessage {
    /// Creates an empty message.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a request message for the given method.
    pub fn request(method: &str) -> Self {
        Self::new().with("method", method)
    }

    /// Adds a field, builder style.
    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    /// Adds a field only when the value is present.
    #[must_use]
    pub fn with_opt<V: Into<Value>>(mut self, key: &str, value: Option<V>) -> Self {
        if let Some(value) = value {
            self.set(key, value);
        }
        self
    }

    /// Sets a field, replacing any previous value.
    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.fields.insert(key.to_string(), value.into());
    }

    /// Removes a field.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.fields.remove(key)
    }

    /// Returns a field's raw value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Returns true if the field is present.
    pub fn contains(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    /// Iterates over all fields in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if the message has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// The `method` field.
    pub fn method(&self) -> Option<&str> {
        self.str("method")
    }

    /// The `seq` field used for request/response correlation.
    pub fn seq(&self) -> Option<u32> {
        self.u32("seq")
    }

    /// Sets the `seq` field.
    pub fn set_seq(&mut self, seq: u32) {
        self.set("seq", seq);
    }

    /// Integer field.
    pub fn i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(Value::as_integer)
    }

    /// Integer field narrowed to `u32`. Out-of-range values read as absent.
    pub fn u32(&self, key: &str) -> Option<u32> {
        self.i64(key).and_then(|n| u32::try_from(n).ok())
    }

    /// Integer field narrowed to `i32`.
    pub fn i32(&self, key: &str) -> Option<i32> {
        self.i64(key).and_then(|n| i32::try_from(n).ok())
    }

    /// Integer field read as a flag (non-zero is true).
    pub fn flag(&self, key: &str) -> Option<bool> {
        self.i64(key).map(|n| n != 0)
    }

    /// Text field.
    pub fn str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_text)
    }

    /// Text field, owned.
    pub fn string(&self, key: &str) -> Option<String> {
        self.str(key).map(str::to_string)
    }

    /// Binary field. Integer lists are accepted as bytes.
    pub fn bytes(&self, key: &str) -> Option<Vec<u8>> {
        self.get(key).and_then(Value::to_bytes)
    }

    /// List field.
    pub fn list(&self, key: &str) -> Option<&[Value]> {
        self.get(key).and_then(Value::as_list)
    }

    /// List of nested messages. Non-map entries are skipped.
    pub fn messages(&self, key: &str) -> Vec<&HtspMessage> {
        self.list(key)
            .map(|items| items.iter().filter_map(Value::as_map).collect())
            .unwrap_or_default()
    }

    /// List of `u32` values. Entries that are not integers are skipped.
    pub fn u32_list(&self, key: &str) -> Option<Vec<u32>> {
        self.list(key).map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_integer().and_then(|n| u32::try_from(n).ok()))
                .collect()
        })
    }

    /// Required `u32` field.
    pub fn require_u32(&self, key: &'static str) -> ProtocolResult<u32> {
        match self.get(key) {
            None => Err(ProtocolError::MissingField(key)),
            Some(v) => v
                .as_integer()
                .and_then(|n| u32::try_from(n).ok())
                .ok_or_else(|| ProtocolError::wrong_type(key, "u32")),
        }
    }

    /// Required non-empty text field.
    pub fn require_str(&self, key: &'static str) -> ProtocolResult<&str> {
        match self.get(key) {
            None => Err(ProtocolError::MissingField(key)),
            Some(v) => match v.as_text() {
                Some("") => Err(ProtocolError::MissingField(key)),
                Some(s) => Ok(s),
                None => Err(ProtocolError::wrong_type(key, "text")),
            },
        }
    }

    /// Interprets a command response carrying `success` and `error`.
    ///
    /// Returns `Ok(())` when `success` is non-zero.
    pub fn command_result(&self) -> ProtocolResult<()> {
        if self.flag("success").unwrap_or(false) {
            Ok(())
        } else {
            Err(ProtocolError::Rejected(
                self.string("error").unwrap_or_default(),
            ))
        }
    }
}

impl FromIterator<(String, Value)> for HtspMessage {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_and_accessors() {
        let msg = HtspMessage::request("channelAdd")
            .with("channelId", 7u32)
            .with("channelName", "One")
            .with_opt::<i64>("channelNumber", None);

        assert_eq!(msg.method(), Some("channelAdd"));
        assert_eq!(msg.u32("channelId"), Some(7));
        assert_eq!(msg.str("channelName"), Some("One"));
        assert!(!msg.contains("channelNumber"));
        assert_eq!(msg.len(), 3);
    }

    #[test]
    fn negative_integer_is_not_u32() {
        let msg = HtspMessage::new().with("id", -1i64);
        assert_eq!(msg.u32("id"), None);
        assert!(matches!(
            msg.require_u32("id"),
            Err(ProtocolError::WrongType { .. })
        ));
    }

    #[test]
    fn missing_and_empty_required_fields() {
        let msg = HtspMessage::new().with("id", "");
        assert_eq!(msg.require_str("id"), Err(ProtocolError::MissingField("id")));
        assert_eq!(
            msg.require_u32("channelId"),
            Err(ProtocolError::MissingField("channelId"))
        );
    }

    #[test]
    fn nested_lists() {
        let inner = HtspMessage::new().with("uuid", "abc").with("name", "htsp");
        let msg = HtspMessage::new()
            .with("profiles", vec![Value::Map(inner), Value::Integer(3)])
            .with("members", vec![Value::Integer(1), Value::Integer(2)]);

        let profiles = msg.messages("profiles");
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0].str("name"), Some("htsp"));
        assert_eq!(msg.u32_list("members"), Some(vec![1, 2]));
    }

    #[test]
    fn command_result() {
        let ok = HtspMessage::new().with("success", 1i64);
        assert!(ok.command_result().is_ok());

        let err = HtspMessage::new()
            .with("success", 0i64)
            .with("error", "no such entry");
        assert_eq!(
            err.command_result(),
            Err(ProtocolError::Rejected("no such entry".into()))
        );
    }

    #[test]
    fn json_roundtrip_of_nested_message() {
        let json = r#"{"method":"tagAdd","tagId":5,"members":[101,102],"extra":{"a":1}}"#;
        let msg: HtspMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.method(), Some("tagAdd"));
        assert_eq!(msg.u32_list("members"), Some(vec![101, 102]));
        assert_eq!(msg.get("extra").and_then(Value::as_map).and_then(|m| m.i64("a")), Some(1));
    }

    mod prop {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn u32_fields_read_back(n in any::<u32>()) {
                let msg = HtspMessage::new().with("id", n);
                prop_assert_eq!(msg.u32("id"), Some(n));
                prop_assert_eq!(msg.require_u32("id"), Ok(n));
            }

            #[test]
            fn json_preserves_text_and_integers(name in "[a-zA-Z0-9 ]{0,16}", n in any::<i64>()) {
                let msg = HtspMessage::new().with("name", name.as_str()).with("n", n);
                let json = serde_json::to_string(&msg).unwrap();
                let back: HtspMessage = serde_json::from_str(&json).unwrap();
                prop_assert_eq!(back, msg);
            }
        }
    }
}
