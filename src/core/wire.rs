//! Text wire grammar: escaping, rendering and parsing.
//!
//! ```text
//! packet     = "\" key "\" value *( "\" key "\" value ) "\final\"
//! dictionary = entry *( 0x1C entry ), entry = key "=" value
//! ```
//!
//! A `body` value is a dictionary that is itself escaped as a packet value, so
//! the field delimiter never appears inside it. All escaping is byte-level.

use tracing::trace;

use crate::core::kind::{classify, Classification};
use crate::core::packet::{Packet, Pair, Value};
use crate::error::{constants, ProtocolError, Result};

/// Field delimiter of the packet grammar
pub const DELIMITER: u8 = b'\\';
/// End-of-packet marker, including both delimiters
pub const TERMINATOR: &[u8] = b"\\final\\";
/// Entry separator inside a dictionary
pub const DICT_SEPARATOR: u8 = 0x1C;
/// Key/value separator inside a dictionary entry
pub const DICT_ASSIGN: u8 = b'=';

/// The two framings that share the pair encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Grammar {
    Packet,
    Dictionary,
}

impl Grammar {
    fn escape(self, raw: &[u8], out: &mut Vec<u8>) {
        match self {
            Grammar::Packet => escape_value(raw, out),
            Grammar::Dictionary => escape_dictionary(raw, out),
        }
    }
}

/// A decoded frame with its classification
#[derive(Debug, Clone)]
pub struct Decoded {
    pub packet: Packet,
    pub class: Classification,
}

/// Escape a packet value: `/` -> `/1`, `\` -> `/2`
pub fn escape_value(raw: &[u8], out: &mut Vec<u8>) {
    for &b in raw {
        match b {
            b'/' => out.extend_from_slice(b"/1"),
            DELIMITER => out.extend_from_slice(b"/2"),
            _ => out.push(b),
        }
    }
}

/// Reverse [`escape_value`]. Unknown escape sequences are kept verbatim.
pub fn unescape_value(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == b'/' && i + 1 < raw.len() {
            match raw[i + 1] {
                b'1' => {
                    out.push(b'/');
                    i += 2;
                    continue;
                }
                b'2' => {
                    out.push(DELIMITER);
                    i += 2;
                    continue;
                }
                _ => {}
            }
        }
        out.push(raw[i]);
        i += 1;
    }
    out
}

/// Escape a dictionary key or value: `^` -> `^5E`, `=` -> `^3D`, 0x1C -> `^1C`
pub fn escape_dictionary(raw: &[u8], out: &mut Vec<u8>) {
    for &b in raw {
        match b {
            b'^' => out.extend_from_slice(b"^5E"),
            DICT_ASSIGN => out.extend_from_slice(b"^3D"),
            DICT_SEPARATOR => out.extend_from_slice(b"^1C"),
            _ => out.push(b),
        }
    }
}

/// Reverse [`escape_dictionary`]
pub fn unescape_dictionary(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == b'^' && i + 3 <= raw.len() {
            let decoded = match &raw[i + 1..i + 3] {
                b"5E" => Some(b'^'),
                b"3D" => Some(DICT_ASSIGN),
                b"1C" => Some(DICT_SEPARATOR),
                _ => None,
            };
            if let Some(b) = decoded {
                out.push(b);
                i += 3;
                continue;
            }
        }
        out.push(raw[i]);
        i += 1;
    }
    out
}

fn render_scalar(value: &Value) -> Vec<u8> {
    match value {
        Value::Str(s) => s.as_bytes().to_vec(),
        Value::Int(n) => n.to_string().into_bytes(),
        Value::Int64(n) => n.to_string().into_bytes(),
        Value::Bool(true) => b"true".to_vec(),
        Value::Bool(false) => b"false".to_vec(),
        Value::Dict(inner) => encode_pairs(inner, Grammar::Dictionary),
    }
}

fn encode_pairs(pairs: &[Pair], grammar: Grammar) -> Vec<u8> {
    let mut out = Vec::with_capacity(pairs.len() * 16);
    for (i, pair) in pairs.iter().enumerate() {
        let value = render_scalar(&pair.value);
        match grammar {
            Grammar::Packet => {
                out.push(DELIMITER);
                grammar.escape(pair.key.as_bytes(), &mut out);
                out.push(DELIMITER);
                grammar.escape(&value, &mut out);
            }
            Grammar::Dictionary => {
                if i > 0 {
                    out.push(DICT_SEPARATOR);
                }
                grammar.escape(pair.key.as_bytes(), &mut out);
                out.push(DICT_ASSIGN);
                grammar.escape(&value, &mut out);
            }
        }
    }
    if grammar == Grammar::Packet {
        out.extend_from_slice(TERMINATOR);
    }
    out
}

/// Encode an ordered pair sequence as a complete packet, terminator included
pub fn encode(pairs: &[Pair]) -> Vec<u8> {
    encode_pairs(pairs, Grammar::Packet)
}

/// Encode a pair sequence as a dictionary string (no outer escaping)
pub fn encode_dictionary(pairs: &[Pair]) -> Vec<u8> {
    encode_pairs(pairs, Grammar::Dictionary)
}

/// Split a packet frame into unescaped fields
pub fn parse_fields(frame: &[u8]) -> Result<Packet> {
    let content = frame.strip_suffix(TERMINATOR).unwrap_or(frame);
    let content = content.strip_prefix(&[DELIMITER]).ok_or_else(|| {
        ProtocolError::DecodeError(constants::ERR_MISSING_LEADING_DELIMITER.into())
    })?;
    if content.is_empty() {
        return Err(ProtocolError::DecodeError(constants::ERR_EMPTY_PACKET.into()));
    }

    let tokens: Vec<&[u8]> = content.split(|&b| b == DELIMITER).collect();
    if tokens.len() % 2 != 0 {
        return Err(ProtocolError::DecodeError(
            constants::ERR_UNBALANCED_FIELDS.into(),
        ));
    }

    let mut fields = Vec::with_capacity(tokens.len() / 2);
    for chunk in tokens.chunks_exact(2) {
        if chunk[0].is_empty() {
            return Err(ProtocolError::DecodeError(constants::ERR_EMPTY_KEY.into()));
        }
        let key = String::from_utf8_lossy(&unescape_value(chunk[0])).into_owned();
        fields.push((key, unescape_value(chunk[1])));
    }
    Ok(Packet::from_fields(fields))
}

/// Parse a dictionary string (already outer-unescaped)
pub fn decode_dictionary(raw: &[u8]) -> Result<Packet> {
    let mut fields = Vec::new();
    for entry in raw.split(|&b| b == DICT_SEPARATOR) {
        if entry.is_empty() {
            continue;
        }
        let (key, value) = match entry.iter().position(|&b| b == DICT_ASSIGN) {
            Some(idx) => (&entry[..idx], &entry[idx + 1..]),
            None => (entry, &[][..]),
        };
        if key.is_empty() {
            return Err(ProtocolError::DecodeError(constants::ERR_EMPTY_KEY.into()));
        }
        let key = String::from_utf8_lossy(&unescape_dictionary(key)).into_owned();
        fields.push((key, unescape_dictionary(value)));
    }
    Ok(Packet::from_fields(fields))
}

/// Decode one frame into a packet and its classification.
///
/// Never fails: structural problems yield [`Classification::Malformed`] with an
/// empty packet, and unknown leading keys yield `Unrecognized`.
pub fn decode(frame: &[u8]) -> Decoded {
    match parse_fields(frame) {
        Ok(packet) => {
            let class = classify(&packet);
            Decoded { packet, class }
        }
        Err(e) => {
            trace!(error = %e, len = frame.len(), "Malformed frame");
            Decoded {
                packet: Packet::default(),
                class: Classification::Malformed,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::kind::PacketKind;

    #[test]
    fn encodes_in_pair_order() {
        let bytes = encode(&[
            Pair::string("lc", "1"),
            Pair::string("nc", "abc"),
            Pair::int("id", 1),
        ]);
        assert_eq!(bytes, b"\\lc\\1\\nc\\abc\\id\\1\\final\\".to_vec());
    }

    #[test]
    fn booleans_render_canonically() {
        let bytes = encode(&[Pair::boolean("error", true), Pair::boolean("fatal", false)]);
        assert_eq!(bytes, b"\\error\\true\\fatal\\false\\final\\".to_vec());
    }

    #[test]
    fn escapes_delimiters_in_values() {
        let bytes = encode(&[Pair::string("msg", "a\\b/c")]);
        assert_eq!(bytes, b"\\msg\\a/2b/1c\\final\\".to_vec());

        let decoded = decode(&bytes);
        assert_eq!(decoded.packet.find("msg"), "a\\b/c");
    }

    #[test]
    fn unknown_escape_is_kept() {
        assert_eq!(unescape_value(b"/3x/"), b"/3x/".to_vec());
        assert_eq!(unescape_dictionary(b"^ZZ^"), b"^ZZ^".to_vec());
    }

    #[test]
    fn nested_body_is_escaped_for_outer_packet() {
        let bytes = encode(&[
            Pair::boolean("persistr", true),
            Pair::dict(
                "body",
                vec![
                    Pair::int("UserID", 7),
                    Pair::string("ImageURL", "http://x/a=b"),
                ],
            ),
        ]);
        // the body's own delimiters never leak as the outer delimiter
        let text = String::from_utf8_lossy(&bytes);
        assert_eq!(text.matches('\\').count(), 6);

        let decoded = decode(&bytes);
        let body = decoded.packet.get_body().expect("body present");
        assert_eq!(body.get_int("UserID"), Some(7));
        assert_eq!(body.find("ImageURL"), "http://x/a=b");
    }

    #[test]
    fn empty_body_decodes() {
        let decoded = decode(b"\\persist\\1\\cmd\\1\\dsn\\2\\lid\\6\\body\\\\final\\");
        assert!(matches!(decoded.class, Classification::Typed(PacketKind::Persist(_))));
        let body = decoded.packet.get_body().expect("body present");
        assert!(body.is_empty());
    }

    #[test]
    fn malformed_frames() {
        for frame in [
            &b"lc\\1\\final\\"[..],
            b"\\lc\\final\\",
            b"\\final\\",
            b"\\\\1\\final\\",
            b"",
        ] {
            let decoded = decode(frame);
            assert_eq!(decoded.class, Classification::Malformed, "{frame:?}");
            assert!(decoded.packet.is_empty());
        }
    }

    #[test]
    fn unrecognized_leading_key() {
        let decoded = decode(b"\\hello\\world\\final\\");
        assert_eq!(decoded.class, Classification::Unrecognized);
        assert_eq!(decoded.packet.find("hello"), "world");
    }

    #[test]
    fn dictionary_lookup_by_entry() {
        let dict = decode_dictionary(b"UserName=tom\x1cEmail=tom^3Dx@example.com").unwrap();
        assert_eq!(dict.leading_key(), Some("UserName"));
        assert_eq!(dict.find("Email"), "tom=x@example.com");
    }
}
