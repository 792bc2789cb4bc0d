use byteorder::{ByteOrder, LittleEndian};

use super::varint::write_long;
use super::{EncodeError, MAX_BLOCK_ITEMS};
use crate::record::FinalizedRecord;
use crate::schema::{NamedType, Schema, TypeSchema};
use crate::value::Value;

pub(super) struct Encoder<'a> {
    schema: &'a Schema,
    out:    &'a mut Vec<u8>,
}

impl<'a> Encoder<'a> {
    pub(super) fn new(schema: &'a Schema, out: &'a mut Vec<u8>) -> Self {
        Self { schema, out }
    }

    pub(super) fn write_record(&mut self, record: &FinalizedRecord, type_name: &str) -> Result<(), EncodeError> {
        if record.type_name() != type_name || !record.schema().is_same(self.schema) {
            return Err(EncodeError::SchemaMismatch);
        }
        let schema = self.schema;
        let record_type = schema.record_type(type_name).ok_or(EncodeError::SchemaMismatch)?;
        for (field, value) in record_type.fields.iter().zip(record.values()) {
            self.write_value(&field.ty, value, &field.name)?;
        }
        Ok(())
    }

    fn write_value(&mut self, ty: &TypeSchema, value: &Value, path: &str) -> Result<(), EncodeError> {
        match (ty, value) {
            (TypeSchema::Null, Value::Null)          => {}
            (TypeSchema::Boolean, Value::Boolean(b)) => self.out.push(u8::from(*b)),
            (TypeSchema::Int, Value::Int(i))         => write_long(self.out, i64::from(*i)),
            (TypeSchema::Long, Value::Long(l))       => write_long(self.out, *l),
            (TypeSchema::Float, Value::Float(f)) => {
                let mut buf = [0u8; 4];
                LittleEndian::write_f32(&mut buf, *f);
                self.out.extend_from_slice(&buf);
            }
            (TypeSchema::Double, Value::Double(d)) => {
                let mut buf = [0u8; 8];
                LittleEndian::write_f64(&mut buf, *d);
                self.out.extend_from_slice(&buf);
            }
            (TypeSchema::Bytes, Value::Bytes(b))   => self.write_bytes(b),
            (TypeSchema::String, Value::String(s)) => self.write_bytes(s.as_bytes()),
            (TypeSchema::Array(items), Value::Array(xs)) => {
                for chunk in xs.chunks(MAX_BLOCK_ITEMS) {
                    write_long(self.out, chunk.len() as i64);
                    for x in chunk {
                        self.write_value(items, x, path)?;
                    }
                }
                write_long(self.out, 0);
            }
            (TypeSchema::Map(values), Value::Map(m)) => {
                let entries: Vec<(&String, &Value)> = m.iter().collect();
                for chunk in entries.chunks(MAX_BLOCK_ITEMS) {
                    write_long(self.out, chunk.len() as i64);
                    for (k, v) in chunk {
                        self.write_bytes(k.as_bytes());
                        self.write_value(values, v, path)?;
                    }
                }
                write_long(self.out, 0);
            }
            (TypeSchema::Union(members), v) => {
                let schema = self.schema;
                let idx = schema.union_branch(members, v)
                    .ok_or_else(|| mismatch(ty, v, path))?;
                write_long(self.out, idx as i64);
                self.write_value(&members[idx], v, path)?;
            }
            (TypeSchema::Named(name), v) => {
                let schema = self.schema;
                match (schema.named(name), v) {
                    (Some(NamedType::Enum(e)), Value::Enum(symbol)) => {
                        let idx = e.index_of(symbol).ok_or_else(|| mismatch(ty, v, path))?;
                        write_long(self.out, idx as i64);
                    }
                    (Some(NamedType::Record(_)), Value::Record(r)) => self.write_record(r, name)?,
                    _ => return Err(mismatch(ty, v, path)),
                }
            }
            (_, v) => return Err(mismatch(ty, v, path)),
        }
        Ok(())
    }

    fn write_bytes(&mut self, bytes: &[u8]) {
        write_long(self.out, bytes.len() as i64);
        self.out.extend_from_slice(bytes);
    }
}

fn mismatch(ty: &TypeSchema, value: &Value, path: &str) -> EncodeError {
    EncodeError::TypeMismatch {
        field:    path.to_owned(),
        expected: ty.to_string(),
        found:    value.kind().to_owned(),
    }
}
