use std::collections::HashSet;

use serde_json::{json, Map, Value as Json};

use super::{NamedType, Schema, TypeSchema};

pub(super) fn schema_to_json(schema: &Schema) -> Json {
    let mut defined = HashSet::new();
    type_to_json(schema, &TypeSchema::Named(schema.name().to_owned()), &mut defined)
}

fn type_to_json(schema: &Schema, ty: &TypeSchema, defined: &mut HashSet<String>) -> Json {
    match ty {
        TypeSchema::Array(items)   => json!({"type": "array", "items": type_to_json(schema, items, defined)}),
        TypeSchema::Map(values)    => json!({"type": "map", "values": type_to_json(schema, values, defined)}),
        TypeSchema::Union(members) => Json::Array(
            members.iter().map(|m| type_to_json(schema, m, defined)).collect()
        ),
        TypeSchema::Named(name) => {
            // Define on first use, reference afterwards.
            if !defined.insert(name.clone()) {
                return Json::String(name.clone());
            }
            match schema.named(name) {
                Some(named) => named_to_json(schema, named, defined),
                None        => Json::String(name.clone()),
            }
        }
        primitive => Json::String(primitive.branch_key().to_owned()),
    }
}

fn named_to_json(schema: &Schema, named: &NamedType, defined: &mut HashSet<String>) -> Json {
    let mut out = Map::new();
    match named {
        NamedType::Record(record) => {
            out.insert("type".into(), "record".into());
            push_name(&mut out, &record.name);
            let fields: Vec<Json> = record.fields.iter().map(|f| {
                let mut field = Map::new();
                field.insert("name".into(), f.name.clone().into());
                field.insert("type".into(), type_to_json(schema, &f.ty, defined));
                if let Some(default) = &f.default {
                    field.insert("default".into(), default.clone());
                }
                Json::Object(field)
            }).collect();
            out.insert("fields".into(), Json::Array(fields));
        }
        NamedType::Enum(e) => {
            out.insert("type".into(), "enum".into());
            push_name(&mut out, &e.name);
            out.insert("symbols".into(), e.symbols.clone().into());
            if let Some(default) = &e.default {
                out.insert("default".into(), default.clone().into());
            }
        }
    }
    Json::Object(out)
}

/// Full names are written verbatim; a name without a namespace gets an
/// explicit empty one so it does not inherit the enclosing namespace.
fn push_name(out: &mut Map<String, Json>, full: &str) {
    out.insert("name".into(), full.into());
    if !full.contains('.') {
        out.insert("namespace".into(), "".into());
    }
}
