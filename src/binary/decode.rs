use std::collections::BTreeMap;
use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};

use super::varint::read_long;
use super::{min_encoded_size, DecodeError, MAX_DEPTH, MAX_ZERO_WIDTH_ITEMS};
use crate::record::FinalizedRecord;
use crate::schema::{NamedType, Schema, TypeSchema};
use crate::value::Value;

pub(super) struct Decoder<'a> {
    schema:     &'a Arc<Schema>,
    input:      &'a [u8],
    pos:        usize,
    depth:      usize,
    zero_width: usize,
}

impl<'a> Decoder<'a> {
    pub(super) fn new(schema: &'a Arc<Schema>, input: &'a [u8]) -> Self {
        Self { schema, input, pos: 0, depth: 0, zero_width: MAX_ZERO_WIDTH_ITEMS }
    }

    /// Bytes consumed so far.
    pub(super) fn position(&self) -> usize {
        self.pos
    }

    fn remaining(&self) -> usize {
        self.input.len() - self.pos
    }

    pub(super) fn read_record(&mut self, name: &str) -> Result<FinalizedRecord, DecodeError> {
        self.enter()?;
        let schema = self.schema;
        let record_type = schema.record_type(name)
            .ok_or_else(|| invalid(format!("{name} is not a record type")))?;
        let mut values = Vec::with_capacity(record_type.fields.len());
        for field in &record_type.fields {
            values.push(self.read_value(&field.ty)?);
        }
        self.depth -= 1;
        Ok(FinalizedRecord::from_parts(Arc::clone(schema), Arc::from(name), values))
    }

    fn read_value(&mut self, ty: &TypeSchema) -> Result<Value, DecodeError> {
        Ok(match ty {
            TypeSchema::Null    => Value::Null,
            TypeSchema::Boolean => match self.take(1)?[0] {
                0 => Value::Boolean(false),
                1 => Value::Boolean(true),
                b => return Err(invalid(format!("boolean byte {b:#04x}"))),
            },
            TypeSchema::Int => {
                let v = self.read_long()?;
                Value::Int(i32::try_from(v).map_err(|_| invalid(format!("int out of range: {v}")))?)
            }
            TypeSchema::Long   => Value::Long(self.read_long()?),
            TypeSchema::Float  => Value::Float(LittleEndian::read_f32(self.take(4)?)),
            TypeSchema::Double => Value::Double(LittleEndian::read_f64(self.take(8)?)),
            TypeSchema::Bytes  => Value::Bytes(self.read_bytes()?.to_vec()),
            TypeSchema::String => Value::String(self.read_string()?),
            TypeSchema::Array(items) => {
                self.enter()?;
                let mut out = Vec::new();
                while let Some(count) = self.read_block_count(items)? {
                    out.reserve(count);
                    for _ in 0..count {
                        out.push(self.read_value(items)?);
                    }
                }
                self.depth -= 1;
                Value::Array(out)
            }
            TypeSchema::Map(values) => {
                self.enter()?;
                let mut out = BTreeMap::new();
                while let Some(count) = self.read_block_count(values)? {
                    for _ in 0..count {
                        let key = self.read_string()?;
                        out.insert(key, self.read_value(values)?);
                    }
                }
                self.depth -= 1;
                Value::Map(out)
            }
            TypeSchema::Union(members) => {
                let tag = self.read_long()?;
                let member = usize::try_from(tag).ok()
                    .and_then(|i| members.get(i))
                    .ok_or_else(|| invalid(format!("union index {tag} out of range")))?;
                self.enter()?;
                let v = self.read_value(member)?;
                self.depth -= 1;
                v
            }
            TypeSchema::Named(name) => {
                let schema = self.schema;
                match schema.named(name) {
                    Some(NamedType::Enum(e)) => {
                        let idx = self.read_long()?;
                        let symbol = usize::try_from(idx).ok()
                            .and_then(|i| e.symbols.get(i))
                            .ok_or_else(|| invalid(format!("enum index {idx} out of range for {name}")))?;
                        Value::Enum(symbol.clone())
                    }
                    Some(NamedType::Record(_)) => Value::Record(self.read_record(name)?),
                    None => return Err(invalid(format!("unknown type {name}"))),
                }
            }
        })
    }

    fn enter(&mut self) -> Result<(), DecodeError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(invalid(format!("nesting deeper than {MAX_DEPTH}")));
        }
        Ok(())
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if n > self.remaining() {
            return Err(DecodeError::Truncated);
        }
        let input: &'a [u8] = self.input;
        let out = &input[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn read_long(&mut self) -> Result<i64, DecodeError> {
        let (v, used) = read_long(&self.input[self.pos..])?;
        self.pos += used;
        Ok(v)
    }

    /// A non-negative length that fits in what is left of the input.
    fn read_len(&mut self) -> Result<usize, DecodeError> {
        let len = self.read_long()?;
        if len < 0 {
            return Err(invalid(format!("negative length {len}")));
        }
        match usize::try_from(len) {
            Ok(n) if n <= self.remaining() => Ok(n),
            _ => Err(DecodeError::Truncated),
        }
    }

    fn read_bytes(&mut self) -> Result<&'a [u8], DecodeError> {
        let len = self.read_len()?;
        self.take(len)
    }

    fn read_string(&mut self) -> Result<String, DecodeError> {
        let raw = self.read_bytes()?;
        std::str::from_utf8(raw)
            .map(str::to_owned)
            .map_err(|e| invalid(format!("string is not UTF-8: {e}")))
    }

    /// Item count of the next array/map block, `None` at the terminating
    /// zero.  A negative count is followed by the block's byte size, which
    /// is read and ignored.
    fn read_block_count(&mut self, item: &TypeSchema) -> Result<Option<usize>, DecodeError> {
        let raw = self.read_long()?;
        let count = match raw {
            0 => return Ok(None),
            c if c > 0 => c,
            c => {
                let c = c.checked_neg().ok_or_else(|| invalid("block count overflows".into()))?;
                self.read_len()?;
                c
            }
        };
        let count = usize::try_from(count).map_err(|_| DecodeError::Truncated)?;

        let schema = self.schema;
        let min = min_encoded_size(item, |name| schema.named(name).map(NamedType::min_size));
        if min == 0 {
            if count > self.zero_width {
                return Err(invalid(format!("more than {MAX_ZERO_WIDTH_ITEMS} zero-width items")));
            }
            self.zero_width -= count;
        } else if count > self.remaining() / min {
            return Err(DecodeError::Truncated);
        }
        Ok(Some(count))
    }
}

fn invalid(reason: String) -> DecodeError {
    DecodeError::InvalidEncoding(reason)
}
