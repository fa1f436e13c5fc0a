//! Canonical byte serialization of typed index keys.
//!
//! Every key within one index shares a single variant; mixing variants in
//! one `HashBucketConfig` is a build-time error caught at the config layer,
//! not here. The canonical bytes are stable (equal values serialize
//! identically) and collision-free across variants (no string key's bytes
//! can collide with an int64 key's bytes), since each variant is itself a
//! one-field wire message tagged the same way `HashRecord.key` expects.

use crate::wire::{self, WireValue};
use std::io::Cursor;

/// The stable type names that appear in on-disk configs, mirroring the
/// original's fully-qualified key message names.
pub const STRING_KEY: &str = "bagz_index.keys.StringKey";
pub const INT64_KEY: &str = "bagz_index.keys.Int64Key";
pub const TUPLE_STRING_KEY: &str = "bagz_index.keys.TupleStringKey";

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KeyValue {
    Str(String),
    Int64(i64),
    TupleStr(Vec<String>),
}

impl KeyValue {
    pub fn variant_name(&self) -> &'static str {
        match self {
            KeyValue::Str(_) => STRING_KEY,
            KeyValue::Int64(_) => INT64_KEY,
            KeyValue::TupleStr(_) => TUPLE_STRING_KEY,
        }
    }

    /// Serializes this key to its canonical byte representation.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        match self {
            KeyValue::Str(s) => {
                wire::write_bytes_field(&mut buf, 1, s.as_bytes()).expect("write to Vec cannot fail")
            }
            KeyValue::Int64(n) => {
                wire::write_varint_field(&mut buf, 1, *n).expect("write to Vec cannot fail")
            }
            KeyValue::TupleStr(parts) => {
                for part in parts {
                    wire::write_bytes_field(&mut buf, 1, part.as_bytes())
                        .expect("write to Vec cannot fail");
                }
            }
        }
        buf
    }

    /// Deserializes bytes previously produced by [`KeyValue::serialize`] for
    /// the given variant name.
    pub fn deserialize(variant: &str, bytes: &[u8]) -> anyhow::Result<KeyValue> {
        match variant {
            STRING_KEY => {
                let mut cursor = Cursor::new(bytes);
                let (field, value) = wire::read_field(&mut cursor)?
                    .ok_or_else(|| anyhow::anyhow!("empty StringKey payload"))?;
                let WireValue::Bytes(raw) = value else {
                    anyhow::bail!("StringKey field {field} was not length-delimited");
                };
                Ok(KeyValue::Str(String::from_utf8(raw)?))
            }
            INT64_KEY => {
                let mut cursor = Cursor::new(bytes);
                let (_, value) = wire::read_field(&mut cursor)?
                    .ok_or_else(|| anyhow::anyhow!("empty Int64Key payload"))?;
                let WireValue::Varint(raw) = value else {
                    anyhow::bail!("Int64Key field was not a varint");
                };
                Ok(KeyValue::Int64(raw as i64))
            }
            TUPLE_STRING_KEY => {
                let mut cursor = Cursor::new(bytes);
                let mut parts = Vec::new();
                while let Some((_, value)) = wire::read_field(&mut cursor)? {
                    let WireValue::Bytes(raw) = value else {
                        anyhow::bail!("TupleStringKey field was not length-delimited");
                    };
                    parts.push(String::from_utf8(raw)?);
                }
                Ok(KeyValue::TupleStr(parts))
            }
            other => anyhow::bail!("unknown key variant: {other}"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn string_key_roundtrip() {
        let k = KeyValue::Str("hello".to_string());
        let bytes = k.serialize();
        assert_eq!(KeyValue::deserialize(STRING_KEY, &bytes).unwrap(), k);
    }

    #[test]
    fn int64_key_roundtrip() {
        let k = KeyValue::Int64(-42);
        let bytes = k.serialize();
        assert_eq!(KeyValue::deserialize(INT64_KEY, &bytes).unwrap(), k);
    }

    #[test]
    fn tuple_string_key_roundtrip() {
        let k = KeyValue::TupleStr(vec!["a".to_string(), "b".to_string()]);
        let bytes = k.serialize();
        assert_eq!(KeyValue::deserialize(TUPLE_STRING_KEY, &bytes).unwrap(), k);
    }

    #[test]
    fn distinct_values_serialize_distinctly() {
        let a = KeyValue::Str("hello".to_string()).serialize();
        let b = KeyValue::Str("world".to_string()).serialize();
        assert_ne!(a, b);
    }

    #[test]
    fn equal_values_serialize_identically() {
        let a = KeyValue::Int64(7).serialize();
        let b = KeyValue::Int64(7).serialize();
        assert_eq!(a, b);
    }
}
