//! JSON schema parser.
//!
//! Accepted forms:
//!
//! | JSON | Type |
//! |------|------|
//! | `"int"`, `"string"`, ... | primitive (`int32`/`int64`/`float32`/`float64` are aliases) |
//! | `"Name"` | reference to a named type defined earlier |
//! | `{"type": "record", "name", "namespace"?, "fields"}` | record |
//! | `{"type": "enum", "name", "namespace"?, "symbols", "default"?}` | enum |
//! | `{"type": "array", "items"}` / `{"type": "map", "values"}` | containers |
//! | `[t1, t2, ...]` | union |
//!
//! Named types must be defined before they are referenced.  The one
//! exception is a record mentioning itself (or a record that encloses it)
//! inside its own field list.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use serde_json::{Map, Value as Json};

use super::{EnumType, FieldDescriptor, NamedType, RecordType, Schema, SchemaError, TypeSchema};
use crate::binary::min_encoded_size;
use crate::value::Value;

pub fn parse(source: &str) -> Result<Schema, SchemaError> {
    let json: Json = serde_json::from_str(source)?;
    let mut parser = Parser::default();

    let root = match parser.parse_type(&json, None)? {
        TypeSchema::Named(name) if matches!(parser.names.get(&name), Some(NamedType::Record(_))) => name,
        other => {
            return Err(SchemaError::Invalid(format!(
                "top-level type must be a record, found {other}"
            )))
        }
    };

    let schema = Schema::from_parts(root, parser.names);
    check_constructible(&schema)?;
    check_default_expansion(&schema)?;
    check_defaults(schema)
}

#[derive(Default)]
struct Parser {
    names:    BTreeMap<String, NamedType>,
    /// Records whose field lists are being parsed right now.
    defining: Vec<String>,
}

impl Parser {
    fn parse_type(&mut self, json: &Json, namespace: Option<&str>) -> Result<TypeSchema, SchemaError> {
        match json {
            Json::String(name) => match TypeSchema::primitive(name) {
                Some(p) => Ok(p),
                None    => self.resolve_reference(name, namespace),
            },
            Json::Array(members) => self.parse_union(members, namespace),
            Json::Object(map) => self.parse_object(map, namespace),
            other => Err(SchemaError::Invalid(format!("not a type declaration: {other}"))),
        }
    }

    fn parse_object(&mut self, map: &Map<String, Json>, namespace: Option<&str>) -> Result<TypeSchema, SchemaError> {
        let ty = map.get("type")
            .ok_or_else(|| SchemaError::Invalid("type object has no \"type\" attribute".into()))?;

        let tag = match ty {
            Json::String(tag) => tag.as_str(),
            // {"type": [...]} or {"type": {...}}: a wrapped type
            nested => return self.parse_type(nested, namespace),
        };

        match tag {
            "record" => self.parse_record(map, namespace),
            "enum"   => self.parse_enum(map, namespace),
            "array"  => {
                let items = map.get("items")
                    .ok_or_else(|| SchemaError::Invalid("array type has no \"items\"".into()))?;
                Ok(TypeSchema::Array(Box::new(self.parse_type(items, namespace)?)))
            }
            "map" => {
                let values = map.get("values")
                    .ok_or_else(|| SchemaError::Invalid("map type has no \"values\"".into()))?;
                Ok(TypeSchema::Map(Box::new(self.parse_type(values, namespace)?)))
            }
            other => match TypeSchema::primitive(other) {
                Some(p) => Ok(p),
                None    => self.resolve_reference(other, namespace),
            },
        }
    }

    fn parse_union(&mut self, members: &[Json], namespace: Option<&str>) -> Result<TypeSchema, SchemaError> {
        if members.is_empty() {
            return Err(SchemaError::Invalid("union must have at least one member".into()));
        }
        let mut seen = HashSet::new();
        let mut out  = Vec::with_capacity(members.len());
        for member in members {
            let ty = self.parse_type(member, namespace)?;
            if matches!(ty, TypeSchema::Union(_)) {
                return Err(SchemaError::NestedUnion);
            }
            if !seen.insert(ty.branch_key().to_owned()) {
                return Err(SchemaError::DuplicateUnionMember(ty.branch_key().to_owned()));
            }
            out.push(ty);
        }
        Ok(TypeSchema::Union(out))
    }

    fn parse_record(&mut self, map: &Map<String, Json>, namespace: Option<&str>) -> Result<TypeSchema, SchemaError> {
        let full = self.declare_name(map, namespace)?;
        let inner_ns = namespace_of(&full).map(str::to_owned);

        let fields_json = map.get("fields")
            .and_then(Json::as_array)
            .ok_or_else(|| SchemaError::Invalid(format!("record {full} has no \"fields\" array")))?;

        self.defining.push(full.clone());
        let mut fields: Vec<FieldDescriptor> = Vec::with_capacity(fields_json.len());
        for field in fields_json {
            let field = field.as_object()
                .ok_or_else(|| SchemaError::Invalid(format!("record {full}: field is not an object")))?;
            let name = field.get("name")
                .and_then(Json::as_str)
                .ok_or_else(|| SchemaError::Invalid(format!("record {full}: field without a name")))?;
            if fields.iter().any(|f| f.name == name) {
                return Err(SchemaError::DuplicateField { record: full, field: name.to_owned() });
            }
            let ty_json = field.get("type")
                .ok_or_else(|| SchemaError::Invalid(format!("field {full}.{name} has no type")))?;
            let ty = self.parse_type(ty_json, inner_ns.as_deref())?;
            fields.push(FieldDescriptor {
                name:    name.to_owned(),
                ty,
                default: field.get("default").cloned(),
            });
        }
        self.defining.pop();

        // referenced records are complete by now, except self/enclosing
        // ones, which only count through unions and containers
        let names = &self.names;
        let min_size = fields.iter().fold(0usize, |acc, f| {
            acc.saturating_add(min_encoded_size(&f.ty, |n| names.get(n).map(NamedType::min_size)))
        });
        self.names.insert(full.clone(), NamedType::Record(RecordType::new(full.clone(), fields, min_size)));
        Ok(TypeSchema::Named(full))
    }

    fn parse_enum(&mut self, map: &Map<String, Json>, namespace: Option<&str>) -> Result<TypeSchema, SchemaError> {
        let full = self.declare_name(map, namespace)?;
        let symbols_json = map.get("symbols")
            .and_then(Json::as_array)
            .ok_or_else(|| SchemaError::Invalid(format!("enum {full} has no \"symbols\" array")))?;

        let mut symbols: Vec<String> = Vec::with_capacity(symbols_json.len());
        for s in symbols_json {
            let s = s.as_str()
                .ok_or_else(|| SchemaError::Invalid(format!("enum {full}: symbol is not a string")))?;
            if symbols.iter().any(|x| x == s) {
                return Err(SchemaError::DuplicateSymbol { name: full, symbol: s.to_owned() });
            }
            symbols.push(s.to_owned());
        }
        if symbols.is_empty() {
            return Err(SchemaError::Invalid(format!("enum {full} declares no symbols")));
        }

        let default = match map.get("default") {
            None => None,
            Some(Json::String(s)) if symbols.contains(s) => Some(s.clone()),
            Some(other) => {
                return Err(SchemaError::InvalidDefault {
                    field:  full,
                    reason: format!("{other} is not one of the enum symbols"),
                })
            }
        };

        self.names.insert(full.clone(), NamedType::Enum(EnumType { name: full.clone(), symbols, default }));
        Ok(TypeSchema::Named(full))
    }

    /// Compute the full name of a record/enum declaration and make sure it
    /// has not been taken.
    fn declare_name(&self, map: &Map<String, Json>, namespace: Option<&str>) -> Result<String, SchemaError> {
        let name = map.get("name")
            .and_then(Json::as_str)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| SchemaError::Invalid("named type without a \"name\"".into()))?;
        let ns = match map.get("namespace") {
            Some(Json::String(ns)) => Some(ns.as_str()),
            Some(Json::Null) | None => namespace,
            Some(other) => return Err(SchemaError::Invalid(format!("namespace must be a string, found {other}"))),
        };
        let full = full_name(name, ns);
        if self.names.contains_key(&full) || self.defining.contains(&full) {
            return Err(SchemaError::DuplicateName(full));
        }
        Ok(full)
    }

    fn resolve_reference(&self, name: &str, namespace: Option<&str>) -> Result<TypeSchema, SchemaError> {
        let mut candidates = Vec::with_capacity(2);
        if !name.contains('.') {
            if let Some(ns) = namespace.filter(|ns| !ns.is_empty()) {
                candidates.push(format!("{ns}.{name}"));
            }
        }
        candidates.push(name.to_owned());

        candidates.into_iter()
            .find(|c| self.names.contains_key(c) || self.defining.contains(c))
            .map(TypeSchema::Named)
            .ok_or_else(|| SchemaError::UnknownType(name.to_owned()))
    }
}

fn full_name(name: &str, namespace: Option<&str>) -> String {
    match namespace {
        _ if name.contains('.')           => name.to_owned(),
        Some(ns) if !ns.is_empty()        => format!("{ns}.{name}"),
        _                                 => name.to_owned(),
    }
}

fn namespace_of(full: &str) -> Option<&str> {
    full.rsplit_once('.').map(|(ns, _)| ns)
}

/// Reject records that can only be built from an instance of themselves,
/// e.g. `{"name": "A", "fields": [{"name": "a", "type": "A"}]}`.
fn check_constructible(schema: &Schema) -> Result<(), SchemaError> {
    fn buildable(ty: &TypeSchema, schema: &Schema, done: &HashSet<String>) -> bool {
        match ty {
            TypeSchema::Named(n)      => done.contains(n) || schema.enum_type(n).is_some(),
            TypeSchema::Union(ms)     => ms.iter().any(|m| buildable(m, schema, done)),
            // empty arrays and maps terminate any recursion
            _                         => true,
        }
    }

    let mut done: HashSet<String> = HashSet::new();
    loop {
        let mut changed = false;
        for named in schema.named_types() {
            if let NamedType::Record(r) = named {
                if !done.contains(&r.name) && r.fields.iter().all(|f| buildable(&f.ty, schema, &done)) {
                    done.insert(r.name.clone());
                    changed = true;
                }
            }
        }
        if !changed { break; }
    }

    match schema.named_types().find(|n| matches!(n, NamedType::Record(_)) && !done.contains(n.name())) {
        Some(stuck) => Err(SchemaError::Unconstructible(stuck.name().to_owned())),
        None        => Ok(()),
    }
}

/// Most record instances the defaults of all record types may build.
const MAX_DEFAULT_RECORDS: u64 = 1 << 16;

/// Building a record runs every field default, and an object default for a
/// record-typed field builds another record.  Reject defaults that need
/// their own record type again, and defaults that expand too far, before
/// any of them is converted.
fn check_default_expansion(schema: &Schema) -> Result<(), SchemaError> {
    // record -> (field path, record type built by that field's default)
    let mut builds: HashMap<&str, Vec<(String, &str)>> = HashMap::new();
    for named in schema.named_types() {
        let NamedType::Record(record) = named else { continue };
        let mut edges = Vec::new();
        for field in &record.fields {
            if let Some(default) = &field.default {
                let mut found = Vec::new();
                records_in_default(schema, &field.ty, default, &mut found);
                let path = format!("{}.{}", record.name, field.name);
                edges.extend(found.into_iter().map(|r| (path.clone(), r)));
            }
        }
        builds.insert(record.name.as_str(), edges);
    }

    // iterative depth-first walk; a frame is (record, next edge, records built)
    let mut cost: HashMap<&str, u64> = HashMap::new();
    let mut open: HashSet<&str> = HashSet::new();
    let mut total = 0u64;
    for &start in builds.keys() {
        if cost.contains_key(start) {
            continue;
        }
        let mut stack = vec![(start, 0usize, 1u64)];
        open.insert(start);
        while let Some(&(name, next, built)) = stack.last() {
            let edges = builds.get(name).map_or(&[][..], Vec::as_slice);
            let Some((path, inner)) = edges.get(next).map(|(p, i)| (p, *i)) else {
                stack.pop();
                open.remove(name);
                if built > MAX_DEFAULT_RECORDS {
                    return Err(SchemaError::InvalidDefault {
                        field:  name.to_owned(),
                        reason: format!("defaults build more than {MAX_DEFAULT_RECORDS} records"),
                    });
                }
                cost.insert(name, built);
                total = total.saturating_add(built);
                if let Some(parent) = stack.last_mut() {
                    parent.2 = parent.2.saturating_add(built);
                }
                continue;
            };
            let top = stack.len() - 1;
            stack[top].1 += 1;
            if let Some(&c) = cost.get(inner) {
                stack[top].2 = built.saturating_add(c);
            } else if open.contains(inner) {
                return Err(SchemaError::InvalidDefault {
                    field:  path.clone(),
                    reason: format!("building the default needs a {inner} default again"),
                });
            } else {
                open.insert(inner);
                stack.push((inner, 0, 1));
            }
        }
    }
    if total > MAX_DEFAULT_RECORDS {
        return Err(SchemaError::Invalid(format!(
            "record defaults build more than {MAX_DEFAULT_RECORDS} records"
        )));
    }
    Ok(())
}

/// Record types an object in `json` would be converted to, with repeats.
/// Every union member the JSON could fit is counted.
fn records_in_default<'s>(schema: &'s Schema, ty: &'s TypeSchema, json: &Json, out: &mut Vec<&'s str>) {
    match (ty, json) {
        (TypeSchema::Array(items), Json::Array(xs)) => {
            xs.iter().for_each(|x| records_in_default(schema, items, x, out));
        }
        (TypeSchema::Map(values), Json::Object(m)) => {
            m.values().for_each(|x| records_in_default(schema, values, x, out));
        }
        (TypeSchema::Union(members), _) => {
            members.iter().for_each(|m| records_in_default(schema, m, json, out));
        }
        (TypeSchema::Named(name), Json::Object(m)) => {
            let Some(record) = schema.record_type(name) else { return };
            out.push(name.as_str());
            for (k, x) in m {
                if let Some(field) = record.field(k) {
                    records_in_default(schema, &field.ty, x, out);
                }
            }
        }
        _ => {}
    }
}

/// Convert every declared default once to prove it conforms.  Conversion
/// needs a shared schema (record defaults hold one), so the schema is
/// wrapped for the duration of the check and unwrapped afterwards.
fn check_defaults(schema: Schema) -> Result<Schema, SchemaError> {
    let shared = Arc::new(schema);
    for named in shared.named_types() {
        let NamedType::Record(record) = named else { continue };
        for field in &record.fields {
            if let Some(default) = &field.default {
                let path = format!("{}.{}", record.name, field.name);
                Value::from_json(&shared, &field.ty, default, &path)
                    .map_err(|e| SchemaError::InvalidDefault { field: path, reason: e.to_string() })?;
            }
        }
    }
    Arc::try_unwrap(shared)
        .map_err(|_| SchemaError::Invalid("schema still shared after default validation".into()))
}
