//! Generic records: name-keyed field values checked against a schema.
//!
//! [`Record`] is the mutable builder.  Every `set` is type-checked against
//! the declared field type.  [`Record::finalize`] produces a
//! [`FinalizedRecord`], an immutable snapshot that the binary codec and the
//! container writer accept.  A finalized record can be turned back into a
//! builder with [`FinalizedRecord::to_record`]; that copies the values and
//! leaves the snapshot untouched.

use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value as Json};
use thiserror::Error;

use crate::schema::{RecordType, Schema, TypeSchema};
use crate::value::Value;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecordError {
    #[error("Unknown field: {0}")]
    UnknownField(String),
    #[error("Type mismatch for field '{field}': expected {expected}, got {found}")]
    TypeMismatch { field: String, expected: String, found: String },
    #[error("Missing value for required field '{0}'")]
    MissingField(String),
    #[error("Unknown record type: {0}")]
    UnknownType(String),
}

// ── Record ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Record {
    schema: Arc<Schema>,
    name:   Arc<str>,
    /// One slot per field in declaration order; `None` means never set.
    values: Vec<Option<Value>>,
}

impl Record {
    /// A record of the schema's root type with every field at its default.
    pub fn new(schema: Arc<Schema>) -> Record {
        let name: Arc<str> = Arc::from(schema.name());
        let values = initial_values(&schema, schema.root());
        Record { schema, name, values }
    }

    /// A record of any record type declared in `schema`.
    pub fn with_type(schema: Arc<Schema>, name: &str) -> Result<Record, RecordError> {
        let record_type = schema.record_type(name)
            .ok_or_else(|| RecordError::UnknownType(name.to_owned()))?;
        let values = initial_values(&schema, record_type);
        Ok(Record { name: Arc::from(name), values, schema })
    }

    /// Build and finalize a record of the root type from a JSON object.
    /// Absent keys keep their defaults.
    pub fn from_json(schema: Arc<Schema>, json: &Json) -> Result<FinalizedRecord, RecordError> {
        let root = TypeSchema::Named(schema.name().to_owned());
        match Value::from_json(&schema, &root, json, schema.name())? {
            Value::Record(r) => Ok(r),
            other => Err(RecordError::TypeMismatch {
                field:    schema.name().to_owned(),
                expected: "record".into(),
                found:    other.kind().into(),
            }),
        }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn type_name(&self) -> &str {
        &self.name
    }

    fn record_type(&self) -> Result<&RecordType, RecordError> {
        self.schema.record_type(&self.name)
            .ok_or_else(|| RecordError::UnknownType(self.name.to_string()))
    }

    /// Declared type of `field`.
    pub fn field_type(&self, field: &str) -> Result<&TypeSchema, RecordError> {
        self.record_type()?
            .field(field)
            .map(|f| &f.ty)
            .ok_or_else(|| RecordError::UnknownField(field.to_owned()))
    }

    /// Assign a field.  The value's runtime type must conform to the field
    /// type; for unions it must match exactly one member.
    pub fn set<V: Into<Value>>(&mut self, field: &str, value: V) -> Result<(), RecordError> {
        let value = value.into();
        let record_type = self.record_type()?;
        let idx = record_type.position(field)
            .ok_or_else(|| RecordError::UnknownField(field.to_owned()))?;
        let ty = &record_type.fields[idx].ty;
        if !self.schema.conforms(ty, &value) {
            return Err(RecordError::TypeMismatch {
                field:    field.to_owned(),
                expected: ty.to_string(),
                found:    value.kind().to_owned(),
            });
        }
        self.values[idx] = Some(value);
        Ok(())
    }

    pub fn get(&self, field: &str) -> Result<&Value, RecordError> {
        let idx = self.record_type()?
            .position(field)
            .ok_or_else(|| RecordError::UnknownField(field.to_owned()))?;
        self.values[idx]
            .as_ref()
            .ok_or_else(|| RecordError::MissingField(field.to_owned()))
    }

    pub fn is_set(&self, field: &str) -> bool {
        self.record_type()
            .ok()
            .and_then(|rt| rt.position(field))
            .is_some_and(|i| self.values[i].is_some())
    }

    /// Snapshot the record.  Fails with `MissingField` naming the first
    /// required field that has neither a value nor a default.
    pub fn finalize(&self) -> Result<FinalizedRecord, RecordError> {
        let record_type = self.record_type()?;
        let mut values = Vec::with_capacity(self.values.len());
        for (slot, field) in self.values.iter().zip(&record_type.fields) {
            match slot {
                Some(v) => values.push(v.clone()),
                None    => return Err(RecordError::MissingField(field.name.clone())),
            }
        }
        Ok(FinalizedRecord {
            schema: Arc::clone(&self.schema),
            name:   Arc::clone(&self.name),
            values: values.into(),
        })
    }
}

/// Defaults first, then `null` for nullable fields, otherwise unset.
fn initial_values(schema: &Arc<Schema>, record_type: &RecordType) -> Vec<Option<Value>> {
    record_type.fields.iter().map(|field| match &field.default {
        // Defaults were validated when the schema was parsed.
        Some(json) => Value::from_json(schema, &field.ty, json, &field.name).ok(),
        None if field.ty.is_nullable() => Some(Value::Null),
        None => None,
    }).collect()
}

// ── FinalizedRecord ──────────────────────────────────────────────────────────

/// Immutable, complete record.  Cloning is cheap; the values are shared.
#[derive(Debug, Clone)]
pub struct FinalizedRecord {
    schema: Arc<Schema>,
    name:   Arc<str>,
    values: Arc<[Value]>,
}

impl FinalizedRecord {
    /// `values` must be complete and in declaration order; the decoder is
    /// the only caller.
    pub(crate) fn from_parts(schema: Arc<Schema>, name: Arc<str>, values: Vec<Value>) -> Self {
        Self { schema, name, values: values.into() }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn type_name(&self) -> &str {
        &self.name
    }

    /// Values in schema declaration order.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn get(&self, field: &str) -> Result<&Value, RecordError> {
        self.schema.record_type(&self.name)
            .and_then(|rt| rt.position(field))
            .and_then(|i| self.values.get(i))
            .ok_or_else(|| RecordError::UnknownField(field.to_owned()))
    }

    /// `(field name, value)` pairs in declaration order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> + '_ {
        self.schema.record_type(&self.name)
            .into_iter()
            .flat_map(|rt| rt.fields.iter().map(|f| f.name.as_str()))
            .zip(self.values.iter())
    }

    /// Copy back into a mutable builder.
    pub fn to_record(&self) -> Record {
        Record {
            schema: Arc::clone(&self.schema),
            name:   Arc::clone(&self.name),
            values: self.values.iter().cloned().map(Some).collect(),
        }
    }

    pub fn to_json(&self) -> Json {
        Json::Object(
            self.fields()
                .map(|(k, v)| (k.to_owned(), v.to_json()))
                .collect::<Map<String, Json>>()
        )
    }
}

impl PartialEq for FinalizedRecord {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.values == other.values
            && self.schema.is_same(&other.schema)
    }
}

impl fmt::Display for FinalizedRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}
