//! Property-based tests using proptest
//!
//! Codec laws over randomly generated pair sequences: decode inverts encode
//! (nested bodies included), encoding is deterministic and arbitrary input
//! never makes the decoder panic.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use bytes::BytesMut;
use msim_server::core::codec::MsimCodec;
use msim_server::core::packet::{parse_bool, parse_int, parse_int64, Packet, Pair, Value};
use msim_server::core::wire::{
    self, escape_dictionary, escape_value, unescape_dictionary, unescape_value,
};
use proptest::prelude::*;
use tokio_util::codec::Decoder;

fn key() -> impl Strategy<Value = String> {
    // `final` in key position is the terminator
    "[a-zA-Z!][a-zA-Z0-9_!]{0,11}".prop_filter("terminator key", |k| k != "final")
}

fn scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<String>().prop_map(Value::Str),
        // bias toward the reserved bytes of both grammars
        "[\\\\/^=\u{1c}a-z]{0,16}".prop_map(Value::Str),
        // values that spell the terminator word
        prop_oneof![Just("final"), Just("\\final\\"), Just("final\\")]
            .prop_map(|s| Value::Str(s.to_string())),
        any::<u32>().prop_map(Value::Int),
        any::<i64>().prop_map(Value::Int64),
        any::<bool>().prop_map(Value::Bool),
    ]
}

fn scalar_pairs(max: usize) -> impl Strategy<Value = Vec<Pair>> {
    prop::collection::vec((key(), scalar()), 0..max)
        .prop_map(|pairs| pairs.into_iter().map(|(k, v)| Pair::new(k, v)).collect())
}

fn packet_pairs() -> impl Strategy<Value = Vec<Pair>> {
    let value = prop_oneof![
        4 => scalar(),
        1 => scalar_pairs(6).prop_map(Value::Dict),
    ];
    prop::collection::vec((key(), value), 1..10)
        .prop_map(|pairs| pairs.into_iter().map(|(k, v)| Pair::new(k, v)).collect())
}

/// Check that `decoded` carries exactly `expected`, in order, with typed values intact
fn assert_matches(decoded: &Packet, expected: &[Pair]) -> Result<(), TestCaseError> {
    prop_assert_eq!(decoded.len(), expected.len());
    for ((key, raw), pair) in decoded.pairs().zip(expected) {
        prop_assert_eq!(key, &*pair.key);
        match &pair.value {
            Value::Str(s) => prop_assert_eq!(raw, s.as_bytes()),
            Value::Int(n) => prop_assert_eq!(parse_int(raw), Some(*n)),
            Value::Int64(n) => prop_assert_eq!(parse_int64(raw), Some(*n)),
            Value::Bool(b) => prop_assert_eq!(parse_bool(raw), Some(*b)),
            Value::Dict(inner) => {
                let nested = Packet::from_dictionary(raw).expect("nested dictionary");
                assert_matches(&nested, inner)?;
            }
        }
    }
    Ok(())
}

// Property: decode(encode(p)) preserves keys, order and typed values
proptest! {
    #[test]
    fn prop_packet_roundtrip(pairs in packet_pairs()) {
        let encoded = wire::encode(&pairs);
        let decoded = wire::parse_fields(&encoded).expect("well-formed packet");
        assert_matches(&decoded, &pairs)?;
    }
}

// Property: the stream codec frames exactly what encode produced
proptest! {
    #[test]
    fn prop_codec_frames_concatenated_packets(batch in prop::collection::vec(packet_pairs(), 1..5)) {
        let mut codec = MsimCodec::default();
        let mut buf = BytesMut::new();
        for pairs in &batch {
            buf.extend_from_slice(&wire::encode(pairs));
        }

        for pairs in &batch {
            let decoded = codec.decode(&mut buf).expect("no codec error").expect("a full frame");
            assert_matches(&decoded.packet, pairs)?;
        }
        prop_assert!(buf.is_empty());
    }
}

// Property: encoding is deterministic
proptest! {
    #[test]
    fn prop_encoding_deterministic(pairs in packet_pairs()) {
        prop_assert_eq!(wire::encode(&pairs), wire::encode(&pairs));
    }
}

// Property: escaped text never contains a raw delimiter and unescapes back
proptest! {
    #[test]
    fn prop_value_escape_inverts(raw in prop::collection::vec(any::<u8>(), 0..256)) {
        let mut escaped = Vec::new();
        escape_value(&raw, &mut escaped);
        prop_assert!(!escaped.contains(&b'\\'));
        prop_assert_eq!(unescape_value(&escaped), raw);
    }

    #[test]
    fn prop_dictionary_escape_inverts(raw in prop::collection::vec(any::<u8>(), 0..256)) {
        let mut escaped = Vec::new();
        escape_dictionary(&raw, &mut escaped);
        prop_assert!(!escaped.contains(&b'='));
        prop_assert!(!escaped.contains(&0x1C));
        prop_assert_eq!(unescape_dictionary(&escaped), raw);
    }
}

// Property: arbitrary bytes never panic the decoder or the codec
proptest! {
    #[test]
    fn prop_decode_total(data in prop::collection::vec(any::<u8>(), 0..2048)) {
        let _ = wire::decode(&data);

        let mut codec = MsimCodec::default();
        let mut buf = BytesMut::from(&data[..]);
        while let Ok(Some(_)) = codec.decode(&mut buf) {}
    }
}
