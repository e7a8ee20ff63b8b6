//! The uniform message envelope exchanged between the bus and translators.
//!
//! A `Message` carries an opaque JSON payload, a header map used for routing
//! metadata (origin, anti-echo signature), and a string property map that
//! translators may use as a private side channel.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Header naming the origin translator and channel address
/// (e.g. `"vertx:inbound-channel"`).
pub const FROM_HEADER: &str = "from";

/// Header naming the origin translator.
pub const SOURCE_HEADER: &str = "source";

/// Anti-echo marker set on every message a translator pushes out to its
/// channel. Only its presence is significant.
pub const TRANSLATOR_SIGNATURE: &str = "processed-signature";

/// Message headers: name -> opaque value.
pub type Headers = HashMap<String, Value>;

/// Message properties: name -> string.
pub type Properties = HashMap<String, String>;

/// A message travelling through the federated bus.
///
/// Messages are owned by whichever component currently holds them; fan-out
/// clones the envelope so no two deliveries share mutable state. Clones keep
/// the same `id`, which makes a single inbound message traceable across all
/// of its deliveries in the logs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// UUIDv7 correlation id. Not part of message equality.
    #[serde(default = "Uuid::now_v7")]
    id: Uuid,
    /// Opaque payload. `Value::Null` means "no payload".
    #[serde(default)]
    payload: Value,
    /// Routing metadata.
    #[serde(default)]
    headers: Headers,
    /// Translator-private side-channel data.
    #[serde(default)]
    properties: Properties,
}

impl Message {
    /// Create a message with the given payload and empty headers/properties.
    pub fn new(payload: impl Into<Value>) -> Self {
        Self {
            id: Uuid::now_v7(),
            payload: payload.into(),
            headers: Headers::new(),
            properties: Properties::new(),
        }
    }

    /// Create a message with no payload.
    pub fn empty() -> Self {
        Self::new(Value::Null)
    }

    /// Builder-style header setter.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set_header(name, value);
        self
    }

    /// Builder-style property setter.
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_property(name, value);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn set_payload(&mut self, payload: impl Into<Value>) {
        self.payload = payload.into();
    }

    /// Consume the message and return its payload.
    pub fn into_payload(self) -> Value {
        self.payload
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// Replace all headers.
    pub fn set_headers(&mut self, headers: Headers) {
        self.headers = headers;
    }

    pub fn header(&self, name: &str) -> Option<&Value> {
        self.headers.get(name)
    }

    /// Get a header, falling back to `default` when it is not set.
    pub fn header_or<'a>(&'a self, name: &str, default: &'a Value) -> &'a Value {
        self.headers.get(name).unwrap_or(default)
    }

    /// Get a header as a string slice, if it is set and is a JSON string.
    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(Value::as_str)
    }

    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.headers.insert(name.into(), value.into());
    }

    pub fn remove_header(&mut self, name: &str) -> Option<Value> {
        self.headers.remove(name)
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    /// Replace all properties.
    pub fn set_properties(&mut self, properties: Properties) {
        self.properties = properties;
    }

    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties.get(name).map(String::as_str)
    }

    /// Get a property, falling back to `default` when it is not set.
    pub fn property_or<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        self.property(name).unwrap_or(default)
    }

    pub fn set_property(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(name.into(), value.into());
    }

    /// Origin translator name, from the `source` header.
    pub fn source(&self) -> Option<&str> {
        self.header_str(SOURCE_HEADER)
    }

    /// Origin translator and channel address, from the `from` header.
    pub fn origin(&self) -> Option<&str> {
        self.header_str(FROM_HEADER)
    }

    /// Stamp the origin headers. Called by a translator right before it hands
    /// a freshly received message to the bus.
    pub fn set_origin(&mut self, translator: &str, address: &str) {
        self.set_header(FROM_HEADER, format!("{translator}:{address}"));
        self.set_header(SOURCE_HEADER, translator);
    }
}

impl Default for Message {
    fn default() -> Self {
        Self::empty()
    }
}

impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.payload == other.payload
            && self.headers == other.headers
            && self.properties == other.properties
    }
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[payload=[{}]; headers={:?}; properties={:?}]",
            self.payload, self.headers, self.properties
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn headers_and_properties_are_separate_namespaces() {
        let mut message = Message::new("hello");
        message.set_header("a", "1");
        message.set_property("b", "2");

        assert_eq!(message.header("a"), Some(&json!("1")));
        assert_eq!(message.property("b"), Some("2"));
        assert!(message.header("b").is_none());
        assert!(message.property("a").is_none());
    }

    #[test]
    fn header_or_falls_back_to_default() {
        let message = Message::new("hello").with_header("a", "1");
        let default = json!("3");

        assert_eq!(message.header_or("C", &default), &json!("3"));
        assert_eq!(message.header_or("a", &default), &json!("1"));
        assert_eq!(message.property_or("missing", "x"), "x");
    }

    #[test]
    fn equality_ignores_correlation_id() {
        let a = Message::new("hello")
            .with_header("a", "1")
            .with_property("b", "2");
        let b = Message::new("hello")
            .with_header("a", "1")
            .with_property("b", "2");

        assert_ne!(a.id(), b.id());
        assert_eq!(a, b);

        let c = b.clone().with_property("b", "other");
        assert_ne!(a, c);
    }

    #[test]
    fn clone_keeps_id() {
        let a = Message::new(json!({"k": 1}));
        let b = a.clone();
        assert_eq!(a.id(), b.id());
    }

    #[test]
    fn set_origin_stamps_from_and_source() {
        let mut message = Message::new("hello");
        message.set_origin("vertx", "inbound-channel");

        assert_eq!(message.origin(), Some("vertx:inbound-channel"));
        assert_eq!(message.source(), Some("vertx"));
    }

    #[test]
    fn empty_message_has_null_payload() {
        let message = Message::default();
        assert!(message.payload().is_null());
        assert!(message.headers().is_empty());
        assert!(message.properties().is_empty());
    }

    #[test]
    fn deserialize_missing_fields_uses_defaults() {
        let message: Message = serde_json::from_str(r#"{"payload": "x"}"#).unwrap();
        assert_eq!(message.payload(), &json!("x"));
        assert!(message.headers().is_empty());
    }

    #[test]
    fn display_lists_all_parts() {
        let message = Message::new("p").with_header("h", "v");
        let shown = message.to_string();
        assert!(shown.contains("payload=[\"p\"]"));
        assert!(shown.contains("headers="));
        assert!(shown.contains("properties="));
    }
}
