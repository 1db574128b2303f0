//! Schema compilation: inline local `$ref`s, break reference cycles, and
//! derive the maps the pointer canonicalizer runs on.
//!
//! A `$ref` that points back at a schema currently being inlined is
//! *recursive*. It stays in the output as `{"$ref": "#<compiled pointer>"}`
//! addressing the compiled location it loops to; every other local `$ref`
//! is replaced by its target with the sibling keywords merged on top.
use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::algebra::{is_all_of_wrapper, merge_schemas};
use crate::pointer::{self, ArrayMap, RecursiveRefMap};

/// Keywords whose value is a map of name → sub-schema.
const SCHEMA_MAPS: &[&str] = &["properties", "patternProperties", "dependencies"];

/// Keywords whose value is a single sub-schema.
const SCHEMA_SLOTS: &[&str] = &[
    "additionalItems",
    "additionalProperties",
    "contains",
    "propertyNames",
    "not",
    "if",
    "then",
    "else",
];

/// Keywords whose value is a list of sub-schemas.
const SCHEMA_LISTS: &[&str] = &["allOf", "anyOf", "oneOf"];

const MAX_REF_HOPS: usize = 32;

#[derive(Debug, Clone, Default)]
pub struct CompiledSchema {
    pub schema: Value,
    /// Compiled `$ref` site → compiled target, schema coordinates.
    pub schema_recursive_refs: RecursiveRefMap,
    /// The same loops in data coordinates.
    pub data_recursive_refs: RecursiveRefMap,
    pub array_map: ArrayMap,
    pub has_root_reference: bool,
}

struct Frame {
    source: String,
    compiled: String,
}

/// Compile `source` into a self-contained schema plus its recursion maps.
pub fn compile_schema(source: &Value) -> CompiledSchema {
    let mut frames = Vec::new();
    let schema = inline(source, source, "", "", &mut frames, 0);

    let mut out = CompiledSchema { schema, ..Default::default() };
    let schema = &out.schema;
    let mut schema_refs = RecursiveRefMap::new();
    let mut array_map = ArrayMap::new();

    pointer::for_each_deep(schema, &mut |node, site| {
        let Some(map) = node.as_object() else { return };
        if let Some(Value::String(target)) = map.get("$ref") {
            if let Some(target) = pointer::normalize(target) {
                if pointer::is_sub_pointer(&target, site) && pointer::get(schema, &target).is_some() {
                    schema_refs.insert(site.to_string(), target);
                }
            }
        }
        if is_array_schema(map) {
            if let Some(data_ptr) = to_data_pointer(site, schema) {
                let tuple = map.get("items").and_then(Value::as_array).map(Vec::len).unwrap_or(0);
                array_map.insert(data_ptr, tuple);
            }
        }
    });

    for (site, target) in &schema_refs {
        if target.is_empty() {
            out.has_root_reference = true;
        }
        if let (Some(from), Some(to)) = (to_data_pointer(site, schema), to_data_pointer(target, schema)) {
            out.data_recursive_refs.insert(from, to);
        }
    }
    out.schema_recursive_refs = schema_refs;
    out.array_map = array_map;
    out
}

fn is_array_schema(map: &Map<String, Value>) -> bool {
    let typed_array = match map.get("type") {
        Some(Value::String(t)) => t == "array",
        Some(Value::Array(ts)) => ts.iter().any(|t| t == "array"),
        _ => false,
    };
    typed_array && (map.contains_key("items") || map.contains_key("additionalItems"))
}

fn inline(root: &Value, node: &Value, source_ptr: &str, compiled_ptr: &str, frames: &mut Vec<Frame>, hops: usize) -> Value {
    let Some(map) = node.as_object() else { return node.clone() };

    if let Some(Value::String(reference)) = map.get("$ref") {
        let Some(target) = reference.strip_prefix('#').and_then(pointer::normalize) else {
            tracing::warn!(reference = %reference, "only local $ref is supported, leaving in place");
            return node.clone();
        };
        if let Some(frame) = frames.iter().rev().find(|f| f.source == target) {
            if frame.compiled == compiled_ptr {
                tracing::warn!(reference = %reference, "$ref resolves to itself, dropping");
                return Value::Object(Map::new());
            }
            let mut out = Map::new();
            out.insert("$ref".into(), Value::String(format!("#{}", frame.compiled)));
            return Value::Object(out);
        }
        let Some(resolved) = pointer::get(root, &target) else {
            tracing::warn!(reference = %reference, "unresolvable $ref, leaving in place");
            return node.clone();
        };
        if hops >= MAX_REF_HOPS {
            tracing::warn!(reference = %reference, "too many chained $ref hops");
            return node.clone();
        }
        let mut siblings = map.clone();
        siblings.remove("$ref");
        let merged = if siblings.is_empty() {
            resolved.clone()
        } else {
            merge_schemas(&[resolved.clone(), Value::Object(siblings)]).unwrap_or_else(|| resolved.clone())
        };
        frames.push(Frame { source: target.clone(), compiled: compiled_ptr.to_string() });
        let out = inline(root, &merged, &target, compiled_ptr, frames, hops + 1);
        frames.pop();
        return out;
    }

    frames.push(Frame { source: source_ptr.to_string(), compiled: compiled_ptr.to_string() });
    let mut out = Map::new();
    for (key, value) in map {
        if key == "definitions" || key == "$defs" {
            continue;
        }
        let src = format!("{source_ptr}/{}", pointer::escape(key));
        let dst = format!("{compiled_ptr}/{}", pointer::escape(key));
        let compiled = match (key.as_str(), value) {
            (k, Value::Object(children)) if SCHEMA_MAPS.contains(&k) => {
                let mut m = Map::new();
                for (name, child) in children {
                    let seg = pointer::escape(name);
                    let c = inline(root, child, &format!("{src}/{seg}"), &format!("{dst}/{seg}"), frames, 0);
                    m.insert(name.clone(), c);
                }
                Value::Object(m)
            }
            ("items", Value::Array(_)) => compile_list(root, value, &src, &dst, frames),
            (k, Value::Array(_)) if SCHEMA_LISTS.contains(&k) => compile_list(root, value, &src, &dst, frames),
            ("items", Value::Object(_)) => inline(root, value, &src, &dst, frames, 0),
            (k, Value::Object(_)) if SCHEMA_SLOTS.contains(&k) => inline(root, value, &src, &dst, frames, 0),
            _ => value.clone(),
        };
        out.insert(key.clone(), compiled);
    }
    frames.pop();
    collapse_all_of(out)
}

fn compile_list(root: &Value, list: &Value, src: &str, dst: &str, frames: &mut Vec<Frame>) -> Value {
    let Some(xs) = list.as_array() else { return list.clone() };
    let out = xs
        .iter()
        .enumerate()
        .map(|(i, x)| inline(root, x, &format!("{src}/{i}"), &format!("{dst}/{i}"), frames, 0))
        .collect();
    Value::Array(out)
}

/// Fold `allOf` members into their parent when they merge cleanly. Members
/// still holding a recursive `$ref` keep their position, since the ref's
/// compiled pointer addresses them where they are.
fn collapse_all_of(mut map: Map<String, Value>) -> Value {
    let Some(Value::Array(members)) = map.get("allOf") else { return Value::Object(map) };
    if members.iter().any(contains_ref) {
        return Value::Object(map);
    }
    let mut parts = members.clone();
    map.remove("allOf");
    parts.insert(0, Value::Object(map.clone()));
    match merge_schemas(&parts) {
        Some(merged) if !is_all_of_wrapper(&merged) => merged,
        _ => {
            map.insert("allOf".into(), Value::Array(parts.split_off(1)));
            Value::Object(map)
        }
    }
}

fn contains_ref(v: &Value) -> bool {
    match v {
        Value::Object(m) => m.contains_key("$ref") || m.values().any(contains_ref),
        Value::Array(xs) => xs.iter().any(contains_ref),
        _ => false,
    }
}

// ------------------------- Pointer translation --------------------------- //

/// Schema pointer → data pointer. `None` when the pointer passes through a
/// keyword that has no data counterpart (`enum`, `default`, ...).
pub fn to_data_pointer(schema_pointer: &str, schema: &Value) -> Option<String> {
    let keys = pointer::parse(schema_pointer)?;
    let mut out = String::new();
    let mut cur = schema;
    let mut i = 0;
    while i < keys.len() {
        let key = keys[i].as_str();
        match key {
            "properties" => {
                let name = keys.get(i + 1)?;
                cur = cur.get("properties")?.get(name.as_str())?;
                out.push('/');
                out.push_str(&pointer::escape(name));
                i += 2;
            }
            "items" if cur.get("items").is_some_and(Value::is_array) => {
                let idx = keys.get(i + 1)?;
                cur = cur.get("items")?.get(idx.parse::<usize>().ok()?)?;
                out.push('/');
                out.push_str(idx);
                i += 2;
            }
            "items" | "additionalItems" => {
                cur = cur.get(key)?;
                out.push_str("/-");
                i += 1;
            }
            "allOf" | "anyOf" | "oneOf" => {
                let idx = keys.get(i + 1)?.parse::<usize>().ok()?;
                cur = cur.get(key)?.get(idx)?;
                i += 2;
            }
            "not" => {
                cur = cur.get("not")?;
                i += 1;
            }
            _ => return None,
        }
    }
    Some(out)
}

/// Data pointer → schema pointer. Numeric and `-` segments map onto the
/// tuple slot when one is declared, else onto the list schema.
pub fn to_schema_pointer(data_pointer: &str, schema: &Value) -> Option<String> {
    let keys = pointer::parse(data_pointer)?;
    let mut out = String::new();
    let mut cur = schema;
    for key in &keys {
        if cur.get("type").is_some_and(|t| t == "object") || cur.get("properties").is_some() {
            if let Some(child) = cur.get("properties").and_then(|p| p.get(key.as_str())) {
                out.push_str("/properties/");
                out.push_str(&pointer::escape(key));
                cur = child;
                continue;
            }
            if let Some(child) = cur.get("additionalProperties").filter(|a| a.is_object()) {
                out.push_str("/additionalProperties");
                cur = child;
                continue;
            }
            return None;
        }
        let index = if key == "-" { None } else { Some(key.parse::<usize>().ok()?) };
        match (cur.get("items"), index) {
            (Some(Value::Array(tuple)), Some(i)) if i < tuple.len() => {
                out.push_str(&format!("/items/{i}"));
                cur = &tuple[i];
            }
            (Some(Value::Array(_)), _) => {
                let extra = cur.get("additionalItems").filter(|a| a.is_object())?;
                out.push_str("/additionalItems");
                cur = extra;
            }
            (Some(items @ Value::Object(_)), _) => {
                out.push_str("/items");
                cur = items;
            }
            _ => return None,
        }
    }
    Some(out)
}

/// Sub-schema at `schema_pointer`, following `$ref` hops where a step
/// lands on a reference.
pub fn get_sub_schema<'a>(schema: &'a Value, schema_pointer: &str) -> Option<&'a Value> {
    let keys = pointer::parse(schema_pointer)?;
    let mut cur = schema;
    for key in &keys {
        cur = follow_refs(schema, cur)?;
        cur = match cur {
            Value::Object(m) => m.get(key.as_str())?,
            Value::Array(xs) => xs.get(key.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    follow_refs(schema, cur)
}

fn follow_refs<'a>(root: &'a Value, mut cur: &'a Value) -> Option<&'a Value> {
    for _ in 0..MAX_REF_HOPS {
        match cur.get("$ref").and_then(Value::as_str) {
            Some(r) => cur = pointer::get(root, r)?,
            None => return Some(cur),
        }
    }
    None
}

/// True when the parent schema requires the key at `schema_pointer`, or the
/// parent array's `minItems` covers the index.
pub fn is_input_required(schema: &Value, schema_pointer: &str) -> bool {
    let Some(keys) = pointer::parse(schema_pointer) else { return false };
    let Some((last, rest)) = keys.split_last() else { return false };
    if rest.last().is_some_and(|k| k == "properties") {
        let parent = &rest[..rest.len() - 1];
        return pointer::get_keys(schema, parent)
            .and_then(|p| p.get("required"))
            .and_then(Value::as_array)
            .is_some_and(|req| req.iter().any(|r| r == last.as_str()));
    }
    if rest.last().is_some_and(|k| k == "items") {
        if let Ok(index) = last.parse::<u64>() {
            let parent = &rest[..rest.len() - 1];
            let min_items = pointer::get_keys(schema, parent)
                .and_then(|p| p.get("minItems"))
                .and_then(Value::as_u64)
                .unwrap_or(0);
            return min_items > index;
        }
    }
    false
}

/// Type list of a schema, `format` alone implying `string`.
pub fn schema_types(schema: &Value) -> Vec<String> {
    match schema.get("type") {
        Some(Value::String(t)) => vec![t.clone()],
        Some(Value::Array(ts)) => ts.iter().filter_map(Value::as_str).map(String::from).collect(),
        _ if schema.get("format").is_some() => vec!["string".into()],
        _ => Vec::new(),
    }
}

/// Validator name → argument list.
pub type Validators = IndexMap<String, Vec<Value>>;

/// Declarative validator wiring for one schema node.
pub fn get_control_validators(schema: &Value) -> Validators {
    let mut validators = Validators::new();
    let Some(map) = schema.as_object() else { return validators };
    let take = |validators: &mut Validators, key: &str| {
        if let Some(v) = map.get(key) {
            validators.insert(key.to_string(), vec![v.clone()]);
        }
    };
    match map.get("type").and_then(Value::as_str) {
        Some("string") => {
            for key in ["pattern", "format", "minLength", "maxLength"] {
                take(&mut validators, key);
            }
        }
        Some(ty @ ("number" | "integer")) => {
            for (key, exclusive) in [("minimum", "exclusiveMinimum"), ("maximum", "exclusiveMaximum")] {
                match (map.get(key), map.get(exclusive)) {
                    (Some(bound), flag) => {
                        let flag = flag.and_then(Value::as_bool).unwrap_or(false);
                        validators.insert(key.into(), vec![bound.clone(), Value::Bool(flag)]);
                    }
                    // draft-06 numeric exclusive bounds
                    (None, Some(bound @ Value::Number(_))) => {
                        validators.insert(key.into(), vec![bound.clone(), Value::Bool(true)]);
                    }
                    _ => {}
                }
            }
            take(&mut validators, "multipleOf");
            validators.insert("type".into(), vec![Value::String(ty.into())]);
        }
        Some("object") => {
            for key in ["minProperties", "maxProperties", "dependencies"] {
                take(&mut validators, key);
            }
        }
        Some("array") => {
            for key in ["minItems", "maxItems", "uniqueItems"] {
                take(&mut validators, key);
            }
        }
        _ => {}
    }
    take(&mut validators, "enum");
    validators
}

// ------------------------------- Tests ------------------------------------ //

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tree_schema() -> Value {
        json!({
            "definitions": {
                "node": {
                    "type": "object",
                    "properties": {
                        "name": {"type": "string"},
                        "children": {"type": "array", "items": {"$ref": "#/definitions/node"}}
                    }
                }
            },
            "type": "object",
            "properties": {"root": {"$ref": "#/definitions/node"}}
        })
    }

    #[test]
    fn inlines_refs_and_drops_definitions() {
        let compiled = compile_schema(&json!({
            "definitions": {"name": {"type": "string", "maxLength": 5}},
            "type": "object",
            "properties": {"a": {"$ref": "#/definitions/name", "title": "A"}}
        }));
        assert_eq!(
            compiled.schema,
            json!({
                "type": "object",
                "properties": {"a": {"type": "string", "maxLength": 5, "title": "A"}}
            })
        );
        assert!(compiled.schema_recursive_refs.is_empty());
        assert!(!compiled.has_root_reference);
    }

    #[test]
    fn recursive_refs_point_at_compiled_ancestor() {
        let compiled = compile_schema(&tree_schema());
        let items = pointer::get(&compiled.schema, "/properties/root/properties/children/items").unwrap();
        assert_eq!(items, &json!({"$ref": "#/properties/root"}));
        assert_eq!(
            compiled.schema_recursive_refs.get("/properties/root/properties/children/items").map(String::as_str),
            Some("/properties/root")
        );
        assert_eq!(compiled.data_recursive_refs.get("/root/children/-").map(String::as_str), Some("/root"));
        assert_eq!(compiled.array_map.get("/root/children"), Some(&0));
    }

    #[test]
    fn root_reference_is_detected() {
        let compiled = compile_schema(&json!({
            "type": "object",
            "properties": {"next": {"$ref": "#"}}
        }));
        assert!(compiled.has_root_reference);
        assert_eq!(compiled.data_recursive_refs.get("/next").map(String::as_str), Some(""));
    }

    #[test]
    fn all_of_collapses_when_mergeable() {
        let compiled = compile_schema(&json!({
            "allOf": [{"type": "string"}, {"maxLength": 3}]
        }));
        assert_eq!(compiled.schema, json!({"type": "string", "maxLength": 3}));
    }

    #[test]
    fn data_and_schema_pointers_translate() {
        let schema = json!({
            "type": "object",
            "properties": {
                "pair": {
                    "type": "array",
                    "items": [{"type": "string"}, {"type": "number"}],
                    "additionalItems": {"type": "boolean"}
                },
                "list": {"type": "array", "items": {"type": "string"}}
            }
        });
        assert_eq!(to_data_pointer("/properties/pair/items/1", &schema).as_deref(), Some("/pair/1"));
        assert_eq!(to_data_pointer("/properties/pair/additionalItems", &schema).as_deref(), Some("/pair/-"));
        assert_eq!(to_data_pointer("/properties/list/items", &schema).as_deref(), Some("/list/-"));
        assert_eq!(to_data_pointer("/properties/list/enum", &schema), None);

        assert_eq!(to_schema_pointer("/pair/0", &schema).as_deref(), Some("/properties/pair/items/0"));
        assert_eq!(to_schema_pointer("/pair/5", &schema).as_deref(), Some("/properties/pair/additionalItems"));
        assert_eq!(to_schema_pointer("/list/-", &schema).as_deref(), Some("/properties/list/items"));
        assert_eq!(to_schema_pointer("/missing", &schema), None);
    }

    #[test]
    fn required_inputs() {
        let schema = json!({
            "type": "object",
            "required": ["a"],
            "properties": {
                "a": {"type": "string"},
                "b": {"type": "array", "minItems": 1, "items": [{"type": "string"}, {"type": "string"}]}
            }
        });
        assert!(is_input_required(&schema, "/properties/a"));
        assert!(!is_input_required(&schema, "/properties/b"));
        assert!(is_input_required(&schema, "/properties/b/items/0"));
        assert!(!is_input_required(&schema, "/properties/b/items/1"));
    }

    #[test]
    fn sub_schema_follows_refs() {
        let schema = json!({
            "definitions": {"s": {"type": "object", "properties": {"x": {"type": "integer"}}}},
            "properties": {"a": {"$ref": "#/definitions/s"}}
        });
        assert_eq!(get_sub_schema(&schema, "/properties/a/properties/x"), Some(&json!({"type": "integer"})));
    }

    #[test]
    fn validators_by_type() {
        let v = get_control_validators(&json!({"type": "integer", "minimum": 1, "exclusiveMaximum": 9, "enum": [1, 2]}));
        assert_eq!(v["minimum"], vec![json!(1), json!(false)]);
        assert_eq!(v["maximum"], vec![json!(9), json!(true)]);
        assert_eq!(v["type"], vec![json!("integer")]);
        assert_eq!(v["enum"], vec![json!([1, 2])]);

        let v = get_control_validators(&json!({"type": "string", "pattern": "^a", "title": "T"}));
        assert_eq!(v.keys().collect::<Vec<_>>(), vec!["pattern"]);
    }
}
