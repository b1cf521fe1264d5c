//! Canonical binary encoding of column mappings
//!
//! All integers are big-endian.
//!
//! Map layout:
//! - Entry count (u32)
//! - Per entry, in ascending name order:
//!   - Name length (u32) + UTF-8 name
//!   - Value tag (u8): 0 = NULL, 1 = INT, 2 = FLOAT, 3 = STR
//!   - Value payload: nothing / i64 / f64 bits as u64 / u32 length + UTF-8
//!
//! Every field is length-prefixed, so names or values containing any byte
//! sequence (including the `|` key separator) decode unambiguously.
//!
//! Log keys are `table || '|' || encode_map(primary_key)`. Table names are
//! rejected upstream if they contain `|`, so the first separator always ends
//! the table name.

use std::io::{Cursor, Read};

use thiserror::Error;

use super::value::{ColumnMap, Value};

/// Separator between the table name and the encoded primary key.
pub const KEY_SEPARATOR: u8 = b'|';

/// Smallest possible encoded map entry: name length + empty name + tag.
const MIN_ENTRY_SIZE: usize = 4 + 1;

/// Errors raised while decoding canonical payloads.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("payload truncated: {0}")]
    Truncated(&'static str),

    #[error("unknown value tag {0}")]
    UnknownTag(u8),

    #[error("invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),

    #[error("{0} trailing bytes after map")]
    TrailingBytes(usize),

    #[error("entry count {count} exceeds payload size {size}")]
    ImplausibleCount { count: u32, size: usize },

    #[error("key has no table separator")]
    MissingSeparator,
}

/// Encode a mapping canonically.
pub fn encode_map(map: &ColumnMap) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4 + map.len() * 16);
    buf.extend_from_slice(&(map.len() as u32).to_be_bytes());

    for (name, value) in map {
        put_bytes(&mut buf, name.as_bytes());
        buf.push(value.tag());
        match value {
            Value::Null => {}
            Value::Int(v) => buf.extend_from_slice(&v.to_be_bytes()),
            Value::Float(v) => buf.extend_from_slice(&v.to_bits().to_be_bytes()),
            Value::Str(s) => put_bytes(&mut buf, s.as_bytes()),
        }
    }

    buf
}

/// Decode a canonically encoded mapping. The whole slice must be consumed.
pub fn decode_map(data: &[u8]) -> Result<ColumnMap, CodecError> {
    let mut cursor = Cursor::new(data);

    let count = read_u32(&mut cursor, "entry count")?;
    if (count as usize).saturating_mul(MIN_ENTRY_SIZE) > data.len() {
        return Err(CodecError::ImplausibleCount {
            count,
            size: data.len(),
        });
    }

    let mut map = ColumnMap::new();
    for _ in 0..count {
        let name = read_string(&mut cursor, "column name")?;

        let mut tag = [0u8; 1];
        cursor
            .read_exact(&mut tag)
            .map_err(|_| CodecError::Truncated("value tag"))?;

        let value = match tag[0] {
            0 => Value::Null,
            1 => Value::Int(i64::from_be_bytes(read_array(&mut cursor, "int value")?)),
            2 => Value::Float(f64::from_bits(u64::from_be_bytes(read_array(
                &mut cursor,
                "float value",
            )?))),
            3 => Value::Str(read_string(&mut cursor, "string value")?),
            other => return Err(CodecError::UnknownTag(other)),
        };

        map.insert(name, value);
    }

    let consumed = cursor.position() as usize;
    if consumed != data.len() {
        return Err(CodecError::TrailingBytes(data.len() - consumed));
    }

    Ok(map)
}

/// Encode the log key for a row: `table || '|' || encode_map(pk)`.
pub fn encode_key(table: &str, primary_key: &ColumnMap) -> Vec<u8> {
    let encoded = encode_map(primary_key);
    let mut buf = Vec::with_capacity(table.len() + 1 + encoded.len());
    buf.extend_from_slice(table.as_bytes());
    buf.push(KEY_SEPARATOR);
    buf.extend_from_slice(&encoded);
    buf
}

/// Split a log key back into its table name and primary key.
pub fn decode_key(key: &[u8]) -> Result<(String, ColumnMap), CodecError> {
    let split = key
        .iter()
        .position(|b| *b == KEY_SEPARATOR)
        .ok_or(CodecError::MissingSeparator)?;

    let table = std::str::from_utf8(&key[..split])
        .map_err(|_| CodecError::InvalidUtf8("table name"))?
        .to_string();
    let primary_key = decode_map(&key[split + 1..])?;

    Ok((table, primary_key))
}

fn put_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    buf.extend_from_slice(bytes);
}

fn read_array<const N: usize>(
    cursor: &mut Cursor<&[u8]>,
    what: &'static str,
) -> Result<[u8; N], CodecError> {
    let mut buf = [0u8; N];
    cursor
        .read_exact(&mut buf)
        .map_err(|_| CodecError::Truncated(what))?;
    Ok(buf)
}

fn read_u32(cursor: &mut Cursor<&[u8]>, what: &'static str) -> Result<u32, CodecError> {
    Ok(u32::from_be_bytes(read_array(cursor, what)?))
}

fn read_string(cursor: &mut Cursor<&[u8]>, what: &'static str) -> Result<String, CodecError> {
    let len = read_u32(cursor, what)? as usize;
    let remaining = cursor.get_ref().len() - cursor.position() as usize;
    if len > remaining {
        return Err(CodecError::Truncated(what));
    }

    let mut buf = vec![0u8; len];
    cursor
        .read_exact(&mut buf)
        .map_err(|_| CodecError::Truncated(what))?;

    String::from_utf8(buf).map_err(|_| CodecError::InvalidUtf8(what))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::columns;

    #[test]
    fn test_encoding_is_insertion_order_independent() {
        let mut a = ColumnMap::new();
        a.insert("b".into(), Value::Int(2));
        a.insert("a".into(), Value::Int(1));

        let mut b = ColumnMap::new();
        b.insert("a".into(), Value::Int(1));
        b.insert("b".into(), Value::Int(2));

        assert_eq!(encode_map(&a), encode_map(&b));
    }

    #[test]
    fn test_all_value_kinds_decode() {
        let map = columns([
            ("f", Value::Float(-2.5)),
            ("i", Value::Int(i64::MIN)),
            ("n", Value::Null),
            ("s", Value::from("héllo")),
        ]);
        assert_eq!(decode_map(&encode_map(&map)).unwrap(), map);
    }

    #[test]
    fn test_delimiters_inside_values_survive() {
        let map = columns([("name", "a|b, c=d}"), ("k=v", "{x}")]);
        assert_eq!(decode_map(&encode_map(&map)).unwrap(), map);
    }

    #[test]
    fn test_empty_map() {
        let map = ColumnMap::new();
        let encoded = encode_map(&map);
        assert_eq!(encoded, vec![0, 0, 0, 0]);
        assert!(decode_map(&encoded).unwrap().is_empty());
    }

    #[test]
    fn test_composite_key_roundtrip() {
        let pk = columns([("tenant", Value::from("acme")), ("id", Value::Int(42))]);
        let key = encode_key("orders", &pk);

        let (table, decoded) = decode_key(&key).unwrap();
        assert_eq!(table, "orders");
        assert_eq!(decoded, pk);
    }

    #[test]
    fn test_distinct_keys_encode_distinctly() {
        // A naive "k=v" join would make these collide.
        let a = columns([("a", "1|b=2")]);
        let b = columns([("a", "1"), ("b", "2")]);
        assert_ne!(encode_key("t", &a), encode_key("t", &b));
    }

    #[test]
    fn test_truncated_payload_rejected() {
        let encoded = encode_map(&columns([("name", "Alice")]));
        let err = decode_map(&encoded[..encoded.len() - 2]).unwrap_err();
        assert!(matches!(err, CodecError::Truncated(_)));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut encoded = encode_map(&columns([("id", 1)]));
        encoded.push(0xFF);
        assert_eq!(decode_map(&encoded), Err(CodecError::TrailingBytes(1)));
    }

    #[test]
    fn test_unknown_tag_rejected() {
        let mut encoded = encode_map(&columns([("x", Value::Null)]));
        let tag_pos = encoded.len() - 1;
        encoded[tag_pos] = 9;
        assert_eq!(decode_map(&encoded), Err(CodecError::UnknownTag(9)));
    }

    #[test]
    fn test_implausible_count_rejected() {
        let encoded = [0xFF, 0xFF, 0xFF, 0xFF];
        assert!(matches!(
            decode_map(&encoded),
            Err(CodecError::ImplausibleCount { .. })
        ));
    }

    #[test]
    fn test_key_without_separator_rejected() {
        assert_eq!(decode_key(b"users"), Err(CodecError::MissingSeparator));
    }
}
