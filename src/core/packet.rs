//! Typed key/value pairs and the decoded packet view.
//!
//! Outbound packets are built as an ordered `Vec<Pair>`; every pair carries an
//! explicit [`Value`] kind so rendering never guesses. Inbound packets are kept
//! as raw, unescaped byte values and converted on access.

use std::borrow::Cow;
use std::fmt;

use crate::core::wire;
use crate::error::Result;

/// The reserved key whose value is a nested dictionary.
pub const BODY_KEY: &str = "body";

/// Kind tag for a [`Value`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Str,
    Int,
    Int64,
    Bool,
    Dict,
}

/// A typed outbound value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Str(String),
    Int(u32),
    Int64(i64),
    Bool(bool),
    Dict(Vec<Pair>),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Str(_) => ValueKind::Str,
            Value::Int(_) => ValueKind::Int,
            Value::Int64(_) => ValueKind::Int64,
            Value::Bool(_) => ValueKind::Bool,
            Value::Dict(_) => ValueKind::Dict,
        }
    }
}

/// One ordered key/value entry of an outbound packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pair {
    pub key: Cow<'static, str>,
    pub value: Value,
}

impl Pair {
    pub fn new(key: impl Into<Cow<'static, str>>, value: Value) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }

    pub fn string(key: impl Into<Cow<'static, str>>, value: impl Into<String>) -> Self {
        Self::new(key, Value::Str(value.into()))
    }

    pub fn int(key: impl Into<Cow<'static, str>>, value: u32) -> Self {
        Self::new(key, Value::Int(value))
    }

    pub fn int64(key: impl Into<Cow<'static, str>>, value: i64) -> Self {
        Self::new(key, Value::Int64(value))
    }

    pub fn boolean(key: impl Into<Cow<'static, str>>, value: bool) -> Self {
        Self::new(key, Value::Bool(value))
    }

    pub fn dict(key: impl Into<Cow<'static, str>>, pairs: Vec<Pair>) -> Self {
        Self::new(key, Value::Dict(pairs))
    }
}

/// A decoded packet: ordered `(key, raw value)` entries.
///
/// Keys may repeat on the wire; every lookup resolves to the first match.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Packet {
    fields: Vec<(String, Vec<u8>)>,
}

impl Packet {
    pub(crate) fn from_fields(fields: Vec<(String, Vec<u8>)>) -> Self {
        Self { fields }
    }

    /// Decode a nested dictionary value (the content of a `body` field)
    pub fn from_dictionary(raw: &[u8]) -> Result<Self> {
        wire::decode_dictionary(raw)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Key of the first field, used for classification
    pub fn leading_key(&self) -> Option<&str> {
        self.fields.first().map(|(k, _)| k.as_str())
    }

    /// Iterate over all entries in wire order
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Raw unescaped value of the first field named `key`
    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_slice())
    }

    /// Legacy lookup: missing keys read as the empty string
    pub fn find(&self, key: &str) -> Cow<'_, str> {
        String::from_utf8_lossy(self.get(key).unwrap_or_default())
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.get(key)
            .map(|raw| String::from_utf8_lossy(raw).into_owned())
    }

    pub fn get_int(&self, key: &str) -> Option<u32> {
        self.get(key).and_then(parse_int)
    }

    pub fn get_int64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(parse_int64)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(parse_bool)
    }

    /// Decode the nested dictionary stored under `key`.
    ///
    /// Returns `None` when the key is absent or its content is not a dictionary.
    pub fn get_nested(&self, key: &str) -> Option<Packet> {
        self.get(key).and_then(|raw| Packet::from_dictionary(raw).ok())
    }

    /// Shorthand for `get_nested(BODY_KEY)`
    pub fn get_body(&self) -> Option<Packet> {
        self.get_nested(BODY_KEY)
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(
                self.fields
                    .iter()
                    .map(|(k, v)| (k, String::from_utf8_lossy(v))),
            )
            .finish()
    }
}

/// Parse a raw integer value
pub fn parse_int(raw: &[u8]) -> Option<u32> {
    std::str::from_utf8(raw).ok()?.trim().parse().ok()
}

/// Parse a raw 64-bit integer value
pub fn parse_int64(raw: &[u8]) -> Option<i64> {
    std::str::from_utf8(raw).ok()?.trim().parse().ok()
}

/// Parse a raw boolean. An empty value is the legacy "flag present" form.
pub fn parse_bool(raw: &[u8]) -> Option<bool> {
    match raw {
        b"" | b"true" | b"True" | b"1" => Some(true),
        b"false" | b"False" | b"0" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Packet {
        Packet::from_fields(vec![
            ("bm".into(), b"1".to_vec()),
            ("t".into(), b"42".to_vec()),
            ("msg".into(), b"first".to_vec()),
            ("msg".into(), b"second".to_vec()),
            ("flag".into(), Vec::new()),
        ])
    }

    #[test]
    fn missing_key_reads_as_empty_string() {
        let packet = sample();
        assert_eq!(packet.find("nope"), "");
        assert_eq!(packet.get("nope"), None);
        assert_eq!(packet.get_int("nope"), None);
    }

    #[test]
    fn duplicate_keys_resolve_to_first() {
        let packet = sample();
        assert_eq!(packet.find("msg"), "first");
        assert_eq!(packet.len(), 5);
    }

    #[test]
    fn typed_accessors() {
        let packet = sample();
        assert_eq!(packet.leading_key(), Some("bm"));
        assert_eq!(packet.get_int("t"), Some(42));
        assert_eq!(packet.get_int64("t"), Some(42));
        assert_eq!(packet.get_int("msg"), None);
        assert_eq!(packet.get_bool("flag"), Some(true));
        assert_eq!(packet.get_bool("msg"), None);
    }

    #[test]
    fn pair_constructors_tag_kinds() {
        assert_eq!(Pair::string("a", "b").value.kind(), ValueKind::Str);
        assert_eq!(Pair::int("a", 1).value.kind(), ValueKind::Int);
        assert_eq!(Pair::int64("a", -1).value.kind(), ValueKind::Int64);
        assert_eq!(Pair::boolean("a", true).value.kind(), ValueKind::Bool);
        assert_eq!(Pair::dict("a", vec![]).value.kind(), ValueKind::Dict);
    }
}
