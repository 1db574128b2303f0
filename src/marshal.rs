//! Raw control values → schema-typed JSON.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use crate::coerce::{has_value, is_empty, to_javascript_type, to_schema_type};
use crate::context::CompileContext;
use crate::pointer;

static DATE_TIME_SECONDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d{4}-[0-1]\d-[0-3]\d[tT\s][0-2]\d:[0-5]\d:[0-5]\d(?:\.\d+)?$").expect("static date-time regex")
});
static DATE_TIME_MINUTES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{4}-[0-1]\d-[0-3]\d[tT\s][0-2]\d:[0-5]\d$").expect("static date-time regex"));
static DATE_ONLY: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{4}-[0-1]\d-[0-3]\d$").expect("static date regex"));

const PRIMITIVE_TYPES: &[&str] = &["string", "integer", "number", "boolean"];

/// Complete a `date-time` missing its zone, seconds, or (with `fix_errors`)
/// its whole time part.
fn complete_date_time(value: &str, fix_errors: bool) -> Option<String> {
    if DATE_TIME_SECONDS.is_match(value) {
        Some(format!("{value}Z"))
    } else if DATE_TIME_MINUTES.is_match(value) {
        Some(format!("{value}:00Z"))
    } else if fix_errors && DATE_ONLY.is_match(value) {
        Some(format!("{value}T00:00:00Z"))
    } else {
        None
    }
}

/// Convert raw form data into data matching the schema types recorded in
/// the pass metadata.
///
/// With `return_empty_fields` every container is kept, even when empty, and
/// empty leaves are converted rather than dropped. Otherwise only required
/// empty arrays and objects are added. With `fix_errors` values go through
/// [`to_schema_type`]'s fallback ladder instead of the strict conversion,
/// so a value that fits no allowed type becomes the nearest fallback
/// instead of being left out.
pub fn format_form_data(raw: &Value, ctx: &CompileContext, return_empty_fields: bool, fix_errors: bool) -> Value {
    let mut formatted = match raw {
        Value::Array(_) => Value::Array(Vec::new()),
        Value::Object(_) => Value::Object(Map::new()),
        other => return other.clone(),
    };

    pointer::for_each_deep(raw, &mut |value, data_pointer| {
        if return_empty_fields && value.is_array() {
            pointer::set_shaped(&mut formatted, data_pointer, Value::Array(Vec::new()), raw);
            return;
        }
        if return_empty_fields && value.is_object() {
            pointer::set_shaped(&mut formatted, data_pointer, Value::Object(Map::new()), raw);
            return;
        }
        let Some(meta) = ctx.meta(data_pointer).filter(|m| m.schema_type.is_some()) else {
            if !(value.is_object() || value.is_array()) || (value.is_null() && return_empty_fields) {
                tracing::error!(pointer = %data_pointer, "schema type not found for form value");
            }
            return;
        };
        let types: Vec<&str> = meta.schema_type.iter().flatten().map(String::as_str).collect();

        if types == ["null"] {
            pointer::set_shaped(&mut formatted, data_pointer, Value::Null, raw);
        } else if (has_value(value) || return_empty_fields) && types.iter().any(|t| PRIMITIVE_TYPES.contains(t)) {
            let converted = if fix_errors || (value.is_null() && return_empty_fields) {
                to_schema_type(value, &types)
            } else {
                to_javascript_type(value, &types, true)
            };
            if !converted.is_null() || return_empty_fields {
                pointer::set_shaped(&mut formatted, data_pointer, converted, raw);
            }
        } else if meta.has_type("object") && !return_empty_fields {
            for key in meta.required.iter().flatten() {
                let child = format!("{data_pointer}/{}", pointer::escape(key));
                let empty = match ctx.meta(&child) {
                    Some(m) if m.has_type("array") => Value::Array(Vec::new()),
                    Some(m) if m.has_type("object") => Value::Object(Map::new()),
                    _ => continue,
                };
                if !pointer::has(&formatted, &child) {
                    pointer::set_shaped(&mut formatted, &child, empty, raw);
                }
            }
        }

        if meta.schema_format.as_deref() == Some("date-time") {
            if let Some(completed) = value.as_str().and_then(|s| complete_date_time(s, fix_errors)) {
                pointer::set_shaped(&mut formatted, data_pointer, Value::String(completed), raw);
            }
        }
    });
    formatted
}

/// Merge values left to right. Objects merge key-wise, arrays merge by
/// position, an object merged with an array merges into each element, and
/// a primitive replaces whatever came before. Empty values are skipped.
pub fn merge_values(values: &[Value]) -> Value {
    let mut merged = Value::Null;
    for current in values {
        if is_empty(current) {
            continue;
        }
        merged = match (merged, current) {
            (m, Value::Object(_) | Value::Array(_)) if is_empty(&m) || !(m.is_object() || m.is_array()) => current.clone(),
            (_, c) if !(c.is_object() || c.is_array()) => c.clone(),
            (Value::Object(mut m), Value::Object(c)) => {
                m.extend(c.iter().map(|(k, v)| (k.clone(), v.clone())));
                Value::Object(m)
            }
            (m @ Value::Object(_), Value::Array(c)) => {
                Value::Array(c.iter().map(|v| merge_values(&[m.clone(), v.clone()])).collect())
            }
            (Value::Array(m), c @ Value::Object(_)) => {
                Value::Array(m.into_iter().map(|v| merge_values(&[v, c.clone()])).collect())
            }
            (Value::Array(m), Value::Array(c)) => {
                let len = m.len().max(c.len());
                let mut m = m.into_iter();
                let mut c = c.iter();
                let mut out = Vec::with_capacity(len);
                for _ in 0..len {
                    out.push(match (m.next(), c.next()) {
                        (Some(a), Some(b)) => merge_values(&[a, b.clone()]),
                        (Some(a), None) => a,
                        (None, Some(b)) => b.clone(),
                        (None, None) => break,
                    });
                }
                Value::Array(out)
            }
            (m, _) => m,
        };
    }
    merged
}

// ------------------------------- Tests ------------------------------------ //

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::FormOptions;
    use crate::template::build_control_template;
    use serde_json::json;

    fn compiled(schema: Value) -> CompileContext {
        let mut ctx = CompileContext::new(&schema, None, FormOptions::default());
        build_control_template(&mut ctx, None, true, "", "", "");
        ctx
    }

    #[test]
    fn coercion_miss_is_dropped_unless_fixing() {
        let ctx = compiled(json!({
            "type": "object",
            "properties": {"age": {"type": "integer"}, "name": {"type": "string"}}
        }));
        let raw = json!({"age": "abc", "name": 5});
        assert_eq!(format_form_data(&raw, &ctx, false, false), json!({"name": "5"}));
        assert_eq!(format_form_data(&raw, &ctx, false, true), json!({"age": 0, "name": "5"}));

        let raw = json!({"age": "42", "name": "x"});
        assert_eq!(format_form_data(&raw, &ctx, false, false), json!({"age": 42, "name": "x"}));
    }

    #[test]
    fn required_string_drops_a_boolean() {
        let ctx = compiled(json!({
            "type": "object",
            "required": ["name"],
            "properties": {"name": {"type": "string"}, "size": {"type": "number"}, "count": {"type": "integer"}}
        }));
        let raw = json!({"name": true});
        assert_eq!(format_form_data(&raw, &ctx, false, false), json!({}));
        assert_eq!(format_form_data(&raw, &ctx, false, true), json!({}));

        let raw = json!({"size": "3.5", "count": "42"});
        assert_eq!(format_form_data(&raw, &ctx, false, true), json!({"size": 3.5, "count": 42}));
    }

    #[test]
    fn numeric_property_names_stay_object_keys() {
        let schema = json!({
            "type": "object",
            "properties": {"a": {"type": "object", "additionalProperties": {"type": "integer"}}}
        });
        let raw = json!({"a": {"0": "1", "1": "2"}});
        let mut ctx = CompileContext::new(&schema, Some(raw.clone()), FormOptions::default());
        build_control_template(&mut ctx, Some(&raw), true, "", "", "");
        assert_eq!(format_form_data(&raw, &ctx, false, false), json!({"a": {"0": 1, "1": 2}}));
        assert_eq!(format_form_data(&raw, &ctx, true, false), json!({"a": {"0": 1, "1": 2}}));
    }

    #[test]
    fn list_values_use_the_generic_item_metadata() {
        let ctx = compiled(json!({
            "type": "object",
            "properties": {"scores": {"type": "array", "items": {"type": "number"}}}
        }));
        let raw = json!({"scores": ["1.5", 2, ""]});
        assert_eq!(format_form_data(&raw, &ctx, false, false), json!({"scores": [1.5, 2]}));
    }

    #[test]
    fn empty_fields_are_kept_on_request() {
        let ctx = compiled(json!({
            "type": "object",
            "required": ["tags"],
            "properties": {
                "tags": {"type": "array", "items": {"type": "string"}},
                "note": {"type": "string"},
                "meta": {"type": "object", "properties": {}}
            }
        }));
        let raw = json!({"note": null, "meta": {}});
        assert_eq!(format_form_data(&raw, &ctx, false, false), json!({"tags": []}));
        assert_eq!(format_form_data(&raw, &ctx, true, false), json!({"note": "", "meta": {}}));
    }

    #[test]
    fn incomplete_date_times_are_finished() {
        let ctx = compiled(json!({
            "type": "object",
            "properties": {"at": {"type": "string", "format": "date-time"}}
        }));
        let fmt = |v: &str, fix: bool| format_form_data(&json!({"at": v}), &ctx, false, fix)["at"].clone();
        assert_eq!(fmt("2000-03-14T01:59:26.535", false), json!("2000-03-14T01:59:26.535Z"));
        assert_eq!(fmt("2000-03-14T01:59", false), json!("2000-03-14T01:59:00Z"));
        assert_eq!(fmt("2000-03-14", false), json!("2000-03-14"));
        assert_eq!(fmt("2000-03-14", true), json!("2000-03-14T00:00:00Z"));
        assert_eq!(fmt("2000-03-14T01:59:26Z", false), json!("2000-03-14T01:59:26Z"));
    }

    #[test]
    fn primitives_pass_through() {
        let ctx = compiled(json!({"type": "string"}));
        assert_eq!(format_form_data(&json!("x"), &ctx, false, false), json!("x"));
    }

    #[test]
    fn merge_values_shapes() {
        assert_eq!(merge_values(&[json!({"a": 1}), json!({"b": 2}), json!(null)]), json!({"a": 1, "b": 2}));
        assert_eq!(merge_values(&[json!({"a": 1}), json!("x")]), json!("x"));
        assert_eq!(merge_values(&[json!([1, {"a": 1}]), json!([2])]), json!([2, {"a": 1}]));
        assert_eq!(
            merge_values(&[json!([{"a": 1}, {"a": 2}]), json!({"b": 0})]),
            json!([{"a": 1, "b": 0}, {"a": 2, "b": 0}])
        );
        assert_eq!(merge_values(&[json!({"k": 1}), json!([{"j": 2}])]), json!([{"k": 1, "j": 2}]));
        assert_eq!(merge_values(&[]), json!(null));
    }
}
