//! Record schemas.
//!
//! A [`Schema`] is the root record type of a container plus a registry of
//! every named type (records and enums) it declares.  Type trees refer to
//! named types through [`TypeSchema::Named`], which is how a record can
//! mention itself without an owning cycle.
//!
//! Schemas are parsed from JSON (see [`parser`]) and written back out with
//! [`Schema::to_json`]; the written form is what container headers embed.
//! Equality is structural: two schemas are equal when they declare the same
//! names, the same fields in the same order and the same defaults.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::io;
use std::path::Path;

use thiserror::Error;

use crate::value::Value;

mod parser;
mod writer;

pub use parser::parse;

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Malformed schema JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid schema: {0}")]
    Invalid(String),
    #[error("Unknown type: {0}")]
    UnknownType(String),
    #[error("Type {0} is defined more than once")]
    DuplicateName(String),
    #[error("Duplicate field '{field}' in record {record}")]
    DuplicateField { record: String, field: String },
    #[error("Union declares {0} more than once")]
    DuplicateUnionMember(String),
    #[error("Unions may not directly contain unions")]
    NestedUnion,
    #[error("Duplicate symbol '{symbol}' in enum {name}")]
    DuplicateSymbol { name: String, symbol: String },
    #[error("Invalid default for field '{field}': {reason}")]
    InvalidDefault { field: String, reason: String },
    #[error("Record {0} can never be constructed: it requires an instance of itself")]
    Unconstructible(String),
    #[error("Unknown field: {0}")]
    UnknownField(String),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

// ── Type model ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum TypeSchema {
    Null,
    Boolean,
    /// 32-bit signed integer.
    Int,
    /// 64-bit signed integer.
    Long,
    Float,
    Double,
    Bytes,
    String,
    Array(Box<TypeSchema>),
    /// String-keyed map.
    Map(Box<TypeSchema>),
    Union(Vec<TypeSchema>),
    /// Full name of a record or enum in the schema registry.
    Named(String),
}

impl TypeSchema {
    pub fn primitive(name: &str) -> Option<TypeSchema> {
        Some(match name {
            "null"               => TypeSchema::Null,
            "boolean"            => TypeSchema::Boolean,
            "int"    | "int32"   => TypeSchema::Int,
            "long"   | "int64"   => TypeSchema::Long,
            "float"  | "float32" => TypeSchema::Float,
            "double" | "float64" => TypeSchema::Double,
            "bytes"              => TypeSchema::Bytes,
            "string"             => TypeSchema::String,
            _                    => return None,
        })
    }

    /// Key that must be unique among the members of one union.
    pub fn branch_key(&self) -> &str {
        match self {
            TypeSchema::Null      => "null",
            TypeSchema::Boolean   => "boolean",
            TypeSchema::Int       => "int",
            TypeSchema::Long      => "long",
            TypeSchema::Float     => "float",
            TypeSchema::Double    => "double",
            TypeSchema::Bytes     => "bytes",
            TypeSchema::String    => "string",
            TypeSchema::Array(_)  => "array",
            TypeSchema::Map(_)    => "map",
            TypeSchema::Union(_)  => "union",
            TypeSchema::Named(n)  => n,
        }
    }

    /// `true` for unions that accept `null`.
    pub fn is_nullable(&self) -> bool {
        match self {
            TypeSchema::Null => true,
            TypeSchema::Union(members) => members.contains(&TypeSchema::Null),
            _ => false,
        }
    }
}

impl fmt::Display for TypeSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeSchema::Array(items) => write!(f, "array<{items}>"),
            TypeSchema::Map(values)  => write!(f, "map<{values}>"),
            TypeSchema::Union(members) => {
                f.write_str("union[")?;
                for (i, m) in members.iter().enumerate() {
                    if i > 0 { f.write_str(", ")?; }
                    write!(f, "{m}")?;
                }
                f.write_str("]")
            }
            other => f.write_str(other.branch_key()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    pub name:    String,
    pub ty:      TypeSchema,
    /// Default exactly as declared; validated against `ty` at parse time.
    pub default: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordType {
    pub name:   String,
    pub fields: Vec<FieldDescriptor>,
    positions:  HashMap<String, usize>,
    min_size:   usize,
}

impl RecordType {
    pub(crate) fn new(name: String, fields: Vec<FieldDescriptor>, min_size: usize) -> Self {
        let positions = fields.iter()
            .enumerate()
            .map(|(i, f)| (f.name.clone(), i))
            .collect();
        Self { name, fields, positions, min_size }
    }

    /// Fewest bytes one encoded instance occupies.
    pub fn min_size(&self) -> usize {
        self.min_size
    }

    pub fn position(&self, field: &str) -> Option<usize> {
        self.positions.get(field).copied()
    }

    pub fn field(&self, field: &str) -> Option<&FieldDescriptor> {
        self.position(field).map(|i| &self.fields[i])
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumType {
    pub name:    String,
    pub symbols: Vec<String>,
    pub default: Option<String>,
}

impl EnumType {
    pub fn index_of(&self, symbol: &str) -> Option<usize> {
        self.symbols.iter().position(|s| s == symbol)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NamedType {
    Record(RecordType),
    Enum(EnumType),
}

impl NamedType {
    pub fn name(&self) -> &str {
        match self {
            NamedType::Record(r) => &r.name,
            NamedType::Enum(e)   => &e.name,
        }
    }

    pub fn min_size(&self) -> usize {
        match self {
            NamedType::Record(r) => r.min_size,
            NamedType::Enum(_)   => 1,
        }
    }
}

// ── Schema ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    root:  String,
    names: BTreeMap<String, NamedType>,
}

impl Schema {
    /// Parse a JSON schema document.  The top-level type must be a record.
    pub fn parse(source: &str) -> Result<Schema, SchemaError> {
        parser::parse(source)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Schema, SchemaError> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    pub(crate) fn from_parts(root: String, names: BTreeMap<String, NamedType>) -> Self {
        Self { root, names }
    }

    /// Full name of the root record type.
    pub fn name(&self) -> &str {
        &self.root
    }

    pub fn root(&self) -> &RecordType {
        match self.names.get(&self.root) {
            Some(NamedType::Record(r)) => r,
            // The parser only builds schemas whose root is a registered record.
            _ => unreachable!("schema root {} is not a record", self.root),
        }
    }

    /// Fields of the root record, in declaration order.
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.root().fields
    }

    /// Look up a root field by name.
    pub fn resolve(&self, field: &str) -> Result<&FieldDescriptor, SchemaError> {
        self.root()
            .field(field)
            .ok_or_else(|| SchemaError::UnknownField(field.to_owned()))
    }

    pub fn named(&self, name: &str) -> Option<&NamedType> {
        self.names.get(name)
    }

    pub fn named_types(&self) -> impl Iterator<Item = &NamedType> {
        self.names.values()
    }

    pub fn record_type(&self, name: &str) -> Option<&RecordType> {
        match self.names.get(name) {
            Some(NamedType::Record(r)) => Some(r),
            _ => None,
        }
    }

    pub fn enum_type(&self, name: &str) -> Option<&EnumType> {
        match self.names.get(name) {
            Some(NamedType::Enum(e)) => Some(e),
            _ => None,
        }
    }

    /// Identity check first, structural comparison second.
    pub fn is_same(&self, other: &Schema) -> bool {
        std::ptr::eq(self, other) || self == other
    }

    /// Does `value` conform to `ty`?  Runtime types must match exactly; no
    /// numeric promotion is applied.
    pub fn conforms(&self, ty: &TypeSchema, value: &Value) -> bool {
        match (ty, value) {
            (TypeSchema::Null,    Value::Null)       => true,
            (TypeSchema::Boolean, Value::Boolean(_)) => true,
            (TypeSchema::Int,     Value::Int(_))     => true,
            (TypeSchema::Long,    Value::Long(_))    => true,
            (TypeSchema::Float,   Value::Float(_))   => true,
            (TypeSchema::Double,  Value::Double(_))  => true,
            (TypeSchema::Bytes,   Value::Bytes(_))   => true,
            (TypeSchema::String,  Value::String(_))  => true,
            (TypeSchema::Array(items), Value::Array(vs)) => {
                vs.iter().all(|v| self.conforms(items, v))
            }
            (TypeSchema::Map(values), Value::Map(m)) => {
                m.values().all(|v| self.conforms(values, v))
            }
            (TypeSchema::Union(members), v) => self.union_branch(members, v).is_some(),
            (TypeSchema::Named(name), Value::Enum(symbol)) => {
                self.enum_type(name).is_some_and(|e| e.index_of(symbol).is_some())
            }
            (TypeSchema::Named(name), Value::Record(r)) => {
                r.type_name() == name && r.schema().is_same(self)
            }
            _ => false,
        }
    }

    /// Index of the one union member `value` conforms to.  `None` when no
    /// member or more than one member matches.
    pub fn union_branch(&self, members: &[TypeSchema], value: &Value) -> Option<usize> {
        let mut matching = members.iter()
            .enumerate()
            .filter(|(_, m)| self.conforms(m, value))
            .map(|(i, _)| i);
        let first = matching.next()?;
        match matching.next() {
            Some(_) => None,
            None    => Some(first),
        }
    }

    /// The schema as a JSON document.  Named types are defined where they
    /// are first used and referenced by full name afterwards.
    pub fn to_json(&self) -> serde_json::Value {
        writer::schema_to_json(self)
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

impl std::str::FromStr for Schema {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Schema::parse(s)
    }
}
