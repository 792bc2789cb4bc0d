//! Runtime values held by records.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Number, Value as Json};

use crate::record::{FinalizedRecord, Record, RecordError};
use crate::schema::{NamedType, Schema, TypeSchema};

/// A dynamically typed field value.
///
/// Union fields hold the plain member value; which member it belongs to is
/// decided by its runtime type when it is assigned or encoded.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Bytes(Vec<u8>),
    String(String),
    /// Enum symbol.
    Enum(String),
    Array(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Record(FinalizedRecord),
}

impl Value {
    /// Short runtime type name for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null       => "null",
            Value::Boolean(_) => "boolean",
            Value::Int(_)     => "int",
            Value::Long(_)    => "long",
            Value::Float(_)   => "float",
            Value::Double(_)  => "double",
            Value::Bytes(_)   => "bytes",
            Value::String(_)  => "string",
            Value::Enum(_)    => "enum",
            Value::Array(_)   => "array",
            Value::Map(_)     => "map",
            Value::Record(_)  => "record",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::Enum(s) => Some(s),
            _ => None,
        }
    }

    /// Convert a JSON value into a value of type `ty`.
    ///
    /// Unions take the first member the JSON converts to.  Bytes are JSON
    /// strings whose code points are all below 256.  `path` names the field
    /// for error messages.
    pub fn from_json(schema: &Arc<Schema>, ty: &TypeSchema, json: &Json, path: &str) -> Result<Value, RecordError> {
        let mismatch = || RecordError::TypeMismatch {
            field:    path.to_owned(),
            expected: ty.to_string(),
            found:    json_kind(json).to_owned(),
        };

        Ok(match (ty, json) {
            (TypeSchema::Null, Json::Null)         => Value::Null,
            (TypeSchema::Boolean, Json::Bool(b))   => Value::Boolean(*b),
            (TypeSchema::Int, Json::Number(n))     => {
                let v = n.as_i64().and_then(|v| i32::try_from(v).ok()).ok_or_else(mismatch)?;
                Value::Int(v)
            }
            (TypeSchema::Long, Json::Number(n))    => Value::Long(n.as_i64().ok_or_else(mismatch)?),
            (TypeSchema::Float, Json::Number(n))   => Value::Float(n.as_f64().ok_or_else(mismatch)? as f32),
            (TypeSchema::Double, Json::Number(n))  => Value::Double(n.as_f64().ok_or_else(mismatch)?),
            (TypeSchema::String, Json::String(s))  => Value::String(s.clone()),
            (TypeSchema::Bytes, Json::String(s))   => {
                let bytes = s.chars()
                    .map(|c| u8::try_from(u32::from(c)).ok())
                    .collect::<Option<Vec<u8>>>()
                    .ok_or_else(mismatch)?;
                Value::Bytes(bytes)
            }
            (TypeSchema::Array(items), Json::Array(xs)) => {
                let mut out = Vec::with_capacity(xs.len());
                for (i, x) in xs.iter().enumerate() {
                    out.push(Value::from_json(schema, items, x, &format!("{path}[{i}]"))?);
                }
                Value::Array(out)
            }
            (TypeSchema::Map(values), Json::Object(m)) => {
                let mut out = BTreeMap::new();
                for (k, x) in m {
                    out.insert(k.clone(), Value::from_json(schema, values, x, &format!("{path}.{k}"))?);
                }
                Value::Map(out)
            }
            (TypeSchema::Union(members), _) => {
                return members.iter()
                    .find_map(|m| Value::from_json(schema, m, json, path).ok())
                    .ok_or_else(mismatch);
            }
            (TypeSchema::Named(name), _) => match (schema.named(name), json) {
                (Some(NamedType::Enum(e)), Json::String(s)) if e.index_of(s).is_some() => {
                    Value::Enum(s.clone())
                }
                (Some(NamedType::Record(_)), Json::Object(m)) => {
                    let mut record = Record::with_type(Arc::clone(schema), name)?;
                    for (k, x) in m {
                        let field_ty = record.field_type(k)?.clone();
                        let v = Value::from_json(schema, &field_ty, x, &format!("{path}.{k}"))?;
                        record.set(k, v)?;
                    }
                    Value::Record(record.finalize()?)
                }
                _ => return Err(mismatch()),
            },
            _ => return Err(mismatch()),
        })
    }

    /// JSON rendering.  Unions are untagged; non-finite floats become `null`.
    pub fn to_json(&self) -> Json {
        match self {
            Value::Null       => Json::Null,
            Value::Boolean(b) => Json::Bool(*b),
            Value::Int(i)     => Json::from(*i),
            Value::Long(l)    => Json::from(*l),
            Value::Float(f)   => Number::from_f64(f64::from(*f)).map_or(Json::Null, Json::Number),
            Value::Double(d)  => Number::from_f64(*d).map_or(Json::Null, Json::Number),
            Value::Bytes(b)   => Json::String(b.iter().map(|&c| char::from(c)).collect()),
            Value::String(s) | Value::Enum(s) => Json::String(s.clone()),
            Value::Array(xs)  => Json::Array(xs.iter().map(Value::to_json).collect()),
            Value::Map(m)     => Json::Object(
                m.iter().map(|(k, v)| (k.clone(), v.to_json())).collect::<Map<String, Json>>()
            ),
            Value::Record(r)  => r.to_json(),
        }
    }
}

fn json_kind(json: &Json) -> &'static str {
    match json {
        Json::Null      => "null",
        Json::Bool(_)   => "boolean",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_)  => "array",
        Json::Object(_) => "object",
    }
}

// ── Conversions ──────────────────────────────────────────────────────────────

impl From<bool>   for Value { fn from(v: bool)   -> Self { Value::Boolean(v) } }
impl From<i32>    for Value { fn from(v: i32)    -> Self { Value::Int(v) } }
impl From<i64>    for Value { fn from(v: i64)    -> Self { Value::Long(v) } }
impl From<f32>    for Value { fn from(v: f32)    -> Self { Value::Float(v) } }
impl From<f64>    for Value { fn from(v: f64)    -> Self { Value::Double(v) } }
impl From<String> for Value { fn from(v: String) -> Self { Value::String(v) } }
impl From<&str>   for Value { fn from(v: &str)   -> Self { Value::String(v.to_owned()) } }
impl From<Vec<u8>> for Value { fn from(v: Vec<u8>) -> Self { Value::Bytes(v) } }
impl From<FinalizedRecord> for Value { fn from(v: FinalizedRecord) -> Self { Value::Record(v) } }

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}
