//! Schema-driven binary encoding of single records.
//!
//! Fields are written in schema declaration order with a fixed rule per
//! type:
//!
//! | Type | Encoding |
//! |------|----------|
//! | `int`, `long` | zig-zag varint ([`varint`]) |
//! | `float`, `double` | 4 / 8 bytes little-endian IEEE 754 |
//! | `boolean` | one byte, `0` or `1` |
//! | `bytes`, `string` | varint length, then the raw bytes |
//! | enum | varint symbol index |
//! | union | varint member index, then the member's encoding |
//! | array, map | blocks of `count` items (map items are key, value) ending with a zero count |
//! | record | each field in order, nothing else |
//! | `null` | nothing |
//!
//! The encoding carries no type information, so decoding always needs the
//! schema the bytes were written with.

use std::sync::Arc;

use thiserror::Error;

use crate::record::FinalizedRecord;
use crate::schema::{Schema, TypeSchema};

mod decode;
mod encode;
pub mod varint;

/// Largest item count the encoder puts in one array/map block.
pub const MAX_BLOCK_ITEMS: usize = 1 << 16;
/// Items of types that encode to zero bytes (`null`, empty records) cannot
/// be bounded by the input length, so each decode call has a fixed budget.
pub const MAX_ZERO_WIDTH_ITEMS: usize = 1 << 20;
/// Deepest value nesting the decoder follows.
pub const MAX_DEPTH: usize = 128;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Truncated data")]
    Truncated,
    #[error("Invalid encoding: {0}")]
    InvalidEncoding(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("Record was built against a different schema")]
    SchemaMismatch,
    #[error("Value at '{field}' does not conform to {expected} (got {found})")]
    TypeMismatch { field: String, expected: String, found: String },
}

/// Encode `record` into a fresh buffer.
pub fn encode(schema: &Schema, record: &FinalizedRecord) -> Result<Vec<u8>, EncodeError> {
    let mut out = Vec::new();
    encode_into(schema, record, &mut out)?;
    Ok(out)
}

/// Append the encoding of `record` to `out`.  On error `out` may hold a
/// partial encoding; the caller truncates it.
pub fn encode_into(schema: &Schema, record: &FinalizedRecord, out: &mut Vec<u8>) -> Result<(), EncodeError> {
    if !record.schema().is_same(schema) {
        return Err(EncodeError::SchemaMismatch);
    }
    encode::Encoder::new(schema, out).write_record(record, record.type_name())
}

/// Decode one root-type record from the front of `bytes`.
/// Returns the record and the number of bytes consumed.
pub fn decode(schema: &Arc<Schema>, bytes: &[u8]) -> Result<(FinalizedRecord, usize), DecodeError> {
    let mut decoder = decode::Decoder::new(schema, bytes);
    let record = decoder.read_record(schema.name())?;
    Ok((record, decoder.position()))
}

/// Fewest bytes one root record can encode to.  Zero for records whose
/// fields are all `null`.
pub fn min_record_size(schema: &Schema) -> usize {
    schema.root().min_size()
}

/// Fewest bytes any value of `ty` encodes to.  `named` gives the size of a
/// named type; unknown names count as zero.
pub(crate) fn min_encoded_size(ty: &TypeSchema, named: impl Fn(&str) -> Option<usize>) -> usize {
    match ty {
        TypeSchema::Null   => 0,
        TypeSchema::Float  => 4,
        TypeSchema::Double => 8,
        TypeSchema::Named(name) => named(name).unwrap_or(0),
        // one varint at least: a boolean byte, a length, a count or a tag
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Record;
    use crate::value::Value;
    use std::collections::BTreeMap;

    fn schema(source: &str) -> Arc<Schema> {
        Arc::new(Schema::parse(source).unwrap())
    }

    fn user() -> Arc<Schema> {
        schema(r#"{"type":"record","name":"User","fields":[
            {"name":"name","type":"string"},
            {"name":"favorite_number","type":"int","default":0},
            {"name":"favorite_color","type":["null","string"],"default":null}]}"#)
    }

    #[test]
    fn user_record_bytes() {
        let s = user();
        let mut r = Record::new(Arc::clone(&s));
        r.set("name", "India").unwrap();
        r.set("favorite_number", 1947).unwrap();
        let bytes = encode(&s, &r.finalize().unwrap()).unwrap();
        assert_eq!(bytes, [0x0a, b'I', b'n', b'd', b'i', b'a', 0xb6, 0x1e, 0x00]);

        r.set("favorite_color", "green").unwrap();
        let bytes = encode(&s, &r.finalize().unwrap()).unwrap();
        assert_eq!(&bytes[8..], [0x02, 0x0a, b'g', b'r', b'e', b'e', b'n']);

        let (back, used) = decode(&s, &bytes).unwrap();
        assert_eq!(used, bytes.len());
        assert_eq!(back.get("favorite_color").unwrap(), &Value::from("green"));
    }

    #[test]
    fn every_type_roundtrips() {
        let s = schema(r#"{"type":"record","name":"All","fields":[
            {"name":"n","type":"null"},
            {"name":"b","type":"boolean"},
            {"name":"i","type":"int"},
            {"name":"l","type":"long"},
            {"name":"f","type":"float"},
            {"name":"d","type":"double"},
            {"name":"by","type":"bytes"},
            {"name":"s","type":"string"},
            {"name":"e","type":{"type":"enum","name":"Suit","symbols":["HEART","SPADE"]}},
            {"name":"a","type":{"type":"array","items":"long"}},
            {"name":"m","type":{"type":"map","values":["null","Suit"]}},
            {"name":"next","type":["null","All"],"default":null}]}"#);

        let mut inner = Record::new(Arc::clone(&s));
        inner.set("n", Value::Null).unwrap();
        inner.set("b", false).unwrap();
        inner.set("i", -1).unwrap();
        inner.set("l", i64::MIN).unwrap();
        inner.set("f", 1.5f32).unwrap();
        inner.set("d", -0.25f64).unwrap();
        inner.set("by", vec![0u8, 255, 7]).unwrap();
        inner.set("s", "").unwrap();
        inner.set("e", Value::Enum("SPADE".into())).unwrap();
        inner.set("a", Value::Array(vec![])).unwrap();
        inner.set("m", Value::Map(BTreeMap::new())).unwrap();
        let inner = inner.finalize().unwrap();

        let mut outer = inner.to_record();
        outer.set("b", true).unwrap();
        outer.set("s", "héllo").unwrap();
        outer.set("a", Value::Array((0..300).map(Value::Long).collect())).unwrap();
        let mut m = BTreeMap::new();
        m.insert("x".to_owned(), Value::Null);
        m.insert("y".to_owned(), Value::Enum("HEART".into()));
        outer.set("m", Value::Map(m)).unwrap();
        outer.set("next", inner).unwrap();
        let outer = outer.finalize().unwrap();

        let bytes = encode(&s, &outer).unwrap();
        let (back, used) = decode(&s, &bytes).unwrap();
        assert_eq!(used, bytes.len());
        assert_eq!(back, outer);
    }

    #[test]
    fn encoding_rejects_foreign_records() {
        let s = user();
        let other = schema(r#"{"type":"record","name":"Other","fields":[]}"#);
        let r = Record::new(other).finalize().unwrap();
        assert_eq!(encode(&s, &r), Err(EncodeError::SchemaMismatch));
    }

    #[test]
    fn decoding_rejects_bad_input() {
        let s = user();
        // truncated inside the name
        assert_eq!(decode(&s, &[0x0a, b'I', b'n']).unwrap_err(), DecodeError::Truncated);
        // union tag 2 of a two-member union
        let bad_tag = [0x02, b'x', 0x00, 0x04];
        assert!(matches!(decode(&s, &bad_tag), Err(DecodeError::InvalidEncoding(_))));
        // negative string length
        assert!(matches!(decode(&s, &[0x01]), Err(DecodeError::InvalidEncoding(_))));
        // huge declared length is reported as truncation, not allocated
        let mut huge = Vec::new();
        varint::write_long(&mut huge, i64::MAX);
        assert_eq!(decode(&s, &huge).unwrap_err(), DecodeError::Truncated);
        // invalid UTF-8
        assert!(matches!(decode(&s, &[0x02, 0xff, 0x00, 0x00]), Err(DecodeError::InvalidEncoding(_))));
        // int outside the 32-bit range
        let mut wide = vec![0x02, b'x'];
        varint::write_long(&mut wide, i64::from(i32::MAX) + 1);
        wide.push(0x00);
        assert!(matches!(decode(&s, &wide), Err(DecodeError::InvalidEncoding(_))));
    }

    #[test]
    fn bad_enum_index_and_boolean() {
        let s = schema(r#"{"type":"record","name":"R","fields":[
            {"name":"ok","type":"boolean"},
            {"name":"e","type":{"type":"enum","name":"E","symbols":["A"]}}]}"#);
        assert!(matches!(decode(&s, &[0x02, 0x00]), Err(DecodeError::InvalidEncoding(_))));
        assert!(matches!(decode(&s, &[0x01, 0x02]), Err(DecodeError::InvalidEncoding(_))));
        assert!(decode(&s, &[0x01, 0x00]).is_ok());
    }

    #[test]
    fn zero_width_items_are_budgeted() {
        let s = schema(r#"{"type":"record","name":"R","fields":[
            {"name":"a","type":{"type":"array","items":"null"}}]}"#);
        let mut bytes = Vec::new();
        varint::write_long(&mut bytes, i64::MAX);
        assert!(matches!(decode(&s, &bytes), Err(DecodeError::InvalidEncoding(_))));

        let mut bytes = Vec::new();
        varint::write_long(&mut bytes, 3);
        bytes.push(0);
        let (r, _) = decode(&s, &bytes).unwrap();
        assert_eq!(r.get("a").unwrap(), &Value::Array(vec![Value::Null; 3]));
    }

    #[test]
    fn minimum_record_sizes() {
        assert_eq!(min_record_size(&user()), 3);
        let empty = schema(r#"{"type":"record","name":"E","fields":[{"name":"n","type":"null"}]}"#);
        assert_eq!(min_record_size(&empty), 0);
        let floats = schema(r#"{"type":"record","name":"F","fields":[
            {"name":"f","type":"float"},{"name":"d","type":"double"},
            {"name":"inner","type":{"type":"record","name":"I","fields":[{"name":"b","type":"boolean"}]}}]}"#);
        assert_eq!(min_record_size(&floats), 13);
    }

    #[test]
    fn shared_record_types_are_measured_once() {
        // T9 holds ten T8s, each holding ten T7s, and so on down to T0
        let mut fields = vec![r#"{"name":"d0","type":{"type":"record","name":"T0","fields":[{"name":"v","type":"long"}]}}"#.to_owned()];
        for level in 1..10 {
            let inner: Vec<String> = (0..10)
                .map(|i| format!(r#"{{"name":"f{i}","type":"T{}"}}"#, level - 1))
                .collect();
            fields.push(format!(
                r#"{{"name":"d{level}","type":{{"type":"record","name":"T{level}","fields":[{}]}}}}"#,
                inner.join(",")
            ));
        }
        let s = schema(&format!(r#"{{"type":"record","name":"Root","fields":[{}]}}"#, fields.join(",")));
        assert_eq!(min_record_size(&s), 1_111_111_111);
        assert_eq!(s.record_type("T9").unwrap().min_size(), 1_000_000_000);
    }

    #[test]
    fn negative_block_counts_carry_a_size() {
        let s = schema(r#"{"type":"record","name":"R","fields":[
            {"name":"a","type":{"type":"array","items":"int"}}]}"#);
        // count -2, byte size 2, items 1 and 2, end
        let bytes = [0x03, 0x04, 0x02, 0x04, 0x00];
        let (r, used) = decode(&s, &bytes).unwrap();
        assert_eq!(used, bytes.len());
        assert_eq!(r.get("a").unwrap(), &Value::Array(vec![Value::Int(1), Value::Int(2)]));
    }
}
