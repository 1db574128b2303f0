//! Per-keyword combinators used by the schema fold.
//!
//! Each combinator receives the accumulator's current value and the incoming
//! value (known to differ) and answers with a [`Combine`].

use serde_json::{Map, Value};

use super::{Combine, is_all_of_wrapper, merge_pair, merge_schemas};
use crate::coerce::number_value;

/// Sibling keywords a combinator may need to look at.
pub(crate) struct Siblings<'a> {
    /// `additionalProperties` of the accumulator before the incoming schema was folded in.
    pub prior_additional: Option<&'a Value>,
    /// `additionalProperties` of the incoming schema.
    pub incoming_additional: Option<&'a Value>,
    /// `required` of the accumulator.
    pub required: Option<&'a Value>,
}

pub(crate) fn combine(key: &str, existing: &Value, incoming: &Value, siblings: &Siblings<'_>) -> Combine {
    match key {
        "allOf" => all_of(existing, incoming),
        "additionalItems" | "additionalProperties" | "contains" | "propertyNames" => {
            sub_schema(key, existing, incoming)
        }
        "anyOf" | "oneOf" | "enum" => intersect(existing, incoming),
        "definitions" | "patternProperties" => keyed_union(existing, incoming),
        "dependencies" => dependencies(existing, incoming, siblings.required),
        "properties" => properties(existing, incoming, siblings),
        "items" => items(existing, incoming),
        "multipleOf" => multiple_of(existing, incoming),
        "maximum" | "exclusiveMaximum" | "maxLength" | "maxItems" | "maxProperties" => {
            bound(existing, incoming, |a, b| a <= b)
        }
        "minimum" | "exclusiveMinimum" | "minLength" | "minItems" | "minProperties" => {
            bound(existing, incoming, |a, b| a >= b)
        }
        "not" => not(existing, incoming),
        "required" => required(existing, incoming),
        "$schema" | "$id" | "id" => Combine::Keep,
        "title" | "description" | "$comment" => Combine::Set(incoming.clone()),
        "type" => types(existing, incoming),
        "uniqueItems" => Combine::Set(Value::Bool(truthy(existing) || truthy(incoming))),
        _ => Combine::Abort,
    }
}

fn truthy(v: &Value) -> bool {
    !matches!(v, Value::Null | Value::Bool(false))
}

fn merged(a: &Value, b: &Value) -> Option<Value> {
    merge_pair(a, b)
}

fn all_of(existing: &Value, incoming: &Value) -> Combine {
    let (Some(a), Some(b)) = (existing.as_array(), incoming.as_array()) else { return Combine::Abort };
    let both: Vec<Value> = a.iter().chain(b).cloned().collect();
    match merge_schemas(&both) {
        Some(m) if !is_all_of_wrapper(&m) => Combine::Set(Value::Array(vec![m])),
        _ => Combine::Set(Value::Array(unique(both))),
    }
}

fn sub_schema(key: &str, existing: &Value, incoming: &Value) -> Combine {
    if key == "additionalProperties" && (*existing == Value::Bool(false) || *incoming == Value::Bool(false)) {
        return Combine::Set(Value::Bool(false));
    }
    match (existing, incoming) {
        (Value::Object(_), Value::Object(_)) => merged(existing, incoming).map_or(Combine::Abort, Combine::Set),
        // `true` is the empty schema
        (Value::Bool(true), other) | (other, Value::Bool(true)) => Combine::Set(other.clone()),
        _ => Combine::Abort,
    }
}

fn intersect(existing: &Value, incoming: &Value) -> Combine {
    let (Some(a), Some(b)) = (existing.as_array(), incoming.as_array()) else { return Combine::Abort };
    let common: Vec<Value> = a.iter().filter(|x| b.contains(x)).cloned().collect();
    if common.is_empty() { Combine::Abort } else { Combine::Set(Value::Array(common)) }
}

fn keyed_union(existing: &Value, incoming: &Value) -> Combine {
    let (Some(a), Some(b)) = (existing.as_object(), incoming.as_object()) else { return Combine::Abort };
    let mut out = a.clone();
    for (k, v) in b {
        match out.get(k) {
            None => {
                out.insert(k.clone(), v.clone());
            }
            Some(cur) if cur == v => {}
            Some(cur) if cur.is_object() && v.is_object() => {
                let Some(m) = merged(cur, v) else { return Combine::Abort };
                out.insert(k.clone(), m);
            }
            Some(_) => return Combine::Abort,
        }
    }
    Combine::Set(Value::Object(out))
}

fn dependencies(existing: &Value, incoming: &Value, required: Option<&Value>) -> Combine {
    let (Some(a), Some(b)) = (existing.as_object(), incoming.as_object()) else { return Combine::Abort };
    let required: Vec<Value> = required.and_then(Value::as_array).cloned().unwrap_or_default();
    // array form `["a", "b"]` is shorthand for `{"required": [...]}`
    let as_schema = |v: &Value| -> Value {
        match v {
            Value::Array(xs) => {
                let mut m = Map::new();
                m.insert("required".into(), Value::Array(unique(required.iter().chain(xs).cloned().collect())));
                Value::Object(m)
            }
            other => other.clone(),
        }
    };
    let mut out = a.clone();
    for (k, v) in b {
        match out.get(k) {
            None => {
                out.insert(k.clone(), v.clone());
            }
            Some(cur) if cur == v => {}
            Some(Value::Array(xs)) if v.is_array() => {
                let all = xs.iter().chain(v.as_array().into_iter().flatten()).cloned().collect();
                out.insert(k.clone(), Value::Array(unique(all)));
            }
            Some(cur) if (cur.is_array() || cur.is_object()) && (v.is_array() || v.is_object()) => {
                let Some(m) = merged(&as_schema(cur), &as_schema(v)) else { return Combine::Abort };
                out.insert(k.clone(), m);
            }
            Some(_) => return Combine::Abort,
        }
    }
    Combine::Set(Value::Object(out))
}

/// Property maps union key-wise. `additionalProperties` decides what happens
/// to keys only one side declares: `false` drops them, a schema is merged in.
fn properties(existing: &Value, incoming: &Value, siblings: &Siblings<'_>) -> Combine {
    let (Some(a), Some(b)) = (existing.as_object(), incoming.as_object()) else { return Combine::Abort };
    let mut out = a.clone();

    if let Some(extra) = siblings.incoming_additional {
        for key in a.keys().filter(|k| !b.contains_key(*k)) {
            match extra {
                Value::Bool(false) => {
                    out.shift_remove(key);
                }
                Value::Object(_) => {
                    let Some(m) = merged(&a[key], extra) else { return Combine::Abort };
                    out.insert(key.clone(), m);
                }
                _ => {}
            }
        }
    }

    for (k, v) in b {
        match out.get(k) {
            Some(cur) if cur == v => {}
            None => match siblings.prior_additional {
                None | Some(Value::Bool(true)) => {
                    out.insert(k.clone(), v.clone());
                }
                Some(prior @ Value::Object(_)) => {
                    let Some(m) = merged(prior, v) else { return Combine::Abort };
                    out.insert(k.clone(), m);
                }
                // closed earlier: the new key is not admitted
                Some(_) => {}
            },
            Some(cur) if cur.is_object() && v.is_object() => {
                let Some(m) = merged(cur, v) else { return Combine::Abort };
                out.insert(k.clone(), m);
            }
            Some(_) => return Combine::Abort,
        }
    }
    Combine::Set(Value::Object(out))
}

fn items(existing: &Value, incoming: &Value) -> Combine {
    match (existing, incoming) {
        (Value::Array(_), Value::Array(_)) => intersect(existing, incoming),
        (Value::Object(_), Value::Object(_)) => merged(existing, incoming).map_or(Combine::Abort, Combine::Set),
        (Value::Array(tuple), obj @ Value::Object(_)) | (obj @ Value::Object(_), Value::Array(tuple)) => {
            let mut out = Vec::with_capacity(tuple.len());
            for item in tuple {
                let Some(m) = merged(item, obj) else { return Combine::Abort };
                out.push(m);
            }
            Combine::Set(Value::Array(out))
        }
        _ => Combine::Abort,
    }
}

fn bound(existing: &Value, incoming: &Value, keep_existing: impl Fn(f64, f64) -> bool) -> Combine {
    match (existing.as_f64(), incoming.as_f64()) {
        (Some(a), Some(b)) if keep_existing(a, b) => Combine::Keep,
        (Some(_), Some(_)) => Combine::Set(incoming.clone()),
        _ => Combine::Abort,
    }
}

fn multiple_of(existing: &Value, incoming: &Value) -> Combine {
    let (Some(a), Some(b)) = (existing.as_f64(), incoming.as_f64()) else { return Combine::Abort };
    lcm(a, b).map_or(Combine::Abort, |m| Combine::Set(number_value(m)))
}

/// Above this an `f64` no longer holds every integer.
const MAX_EXACT: f64 = 9_007_199_254_740_992.0;

/// Least common multiple of two positive numbers with at most ten decimals.
/// `None` when either scaled operand, or the result, leaves exact range.
fn lcm(a: f64, b: f64) -> Option<f64> {
    if a <= 0.0 || b <= 0.0 {
        return None;
    }
    let decimals = |x: f64| (0..=10).find(|d| {
        let scaled = x * 10f64.powi(*d);
        (scaled - scaled.round()).abs() < 1e-9
    });
    let scale = 10f64.powi(decimals(a)?.max(decimals(b)?));
    let (sa, sb) = ((a * scale).round(), (b * scale).round());
    if sa > MAX_EXACT || sb > MAX_EXACT {
        return None;
    }
    let (x, y) = (sa as u128, sb as u128);
    let gcd = {
        let (mut p, mut q) = (x, y);
        while q != 0 {
            (p, q) = (q, p % q);
        }
        p
    };
    if gcd == 0 {
        return None;
    }
    let product = (x / gcd).checked_mul(y)? as f64;
    (product <= MAX_EXACT).then(|| product / scale)
}

fn not(existing: &Value, incoming: &Value) -> Combine {
    if !existing.is_object() || !incoming.is_object() {
        return Combine::Abort;
    }
    let mut any_of = Vec::new();
    for side in [existing, incoming] {
        match side.get("anyOf").and_then(Value::as_array) {
            Some(xs) if side.as_object().is_some_and(|m| m.len() == 1) => any_of.extend(xs.iter().cloned()),
            _ => any_of.push(side.clone()),
        }
    }
    let mut out = Map::new();
    out.insert("anyOf".into(), Value::Array(unique(any_of)));
    Combine::Set(Value::Object(out))
}

fn required(existing: &Value, incoming: &Value) -> Combine {
    match (existing, incoming) {
        (Value::Array(a), Value::Array(b)) => Combine::Set(Value::Array(unique(a.iter().chain(b).cloned().collect()))),
        (Value::Bool(a), Value::Bool(b)) => Combine::Set(Value::Bool(*a || *b)),
        _ => Combine::Abort,
    }
}

fn type_list(v: &Value) -> Option<Vec<&str>> {
    match v {
        Value::String(s) => Some(vec![s.as_str()]),
        Value::Array(xs) => xs.iter().map(Value::as_str).collect(),
        _ => None,
    }
}

fn types(existing: &Value, incoming: &Value) -> Combine {
    let (Some(a), Some(b)) = (type_list(existing), type_list(incoming)) else { return Combine::Abort };
    let common: Vec<&str> = a.into_iter().filter(|t| b.contains(t)).collect();
    match common.as_slice() {
        [] => Combine::Abort,
        [one] => Combine::Set(Value::from(*one)),
        many => Combine::Set(Value::Array(many.iter().map(|t| Value::from(*t)).collect())),
    }
}

/// Order-preserving de-duplication by deep equality.
pub(crate) fn unique(xs: Vec<Value>) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::with_capacity(xs.len());
    for x in xs {
        if !out.contains(&x) {
            out.push(x);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn lcm_handles_integers_and_decimals() {
        assert_eq!(lcm(4.0, 6.0), Some(12.0));
        assert_eq!(lcm(0.5, 0.2), Some(1.0));
        assert_eq!(lcm(0.0, 3.0), None);
    }

    #[test]
    fn lcm_gives_up_outside_exact_range() {
        assert_eq!(lcm(1e30, 1.00000000000000014e30), None);
        assert_eq!(lcm(1e300, 3.0), None);
        assert_eq!(lcm(4_503_599_627_370_496.0, 3.0), None);
        assert_eq!(lcm(1_000_000.0, 1_500_000.0), Some(3_000_000.0));
        assert!(matches!(multiple_of(&json!(1e30), &json!(1.00000000000000014e30)), Combine::Abort));
    }

    #[test]
    fn dependencies_convert_arrays_when_mixed() {
        let siblings = Siblings { prior_additional: None, incoming_additional: None, required: None };
        let Combine::Set(out) = combine(
            "dependencies",
            &json!({"a": ["b"]}),
            &json!({"a": {"properties": {"c": {"type": "string"}}}}),
            &siblings,
        ) else {
            panic!("expected merge");
        };
        assert_eq!(out, json!({"a": {"required": ["b"], "properties": {"c": {"type": "string"}}}}));
    }

    #[test]
    fn closed_properties_prune_foreign_keys() {
        let siblings = Siblings {
            prior_additional: None,
            incoming_additional: Some(&Value::Bool(false)),
            required: None,
        };
        let Combine::Set(out) = combine(
            "properties",
            &json!({"a": {"type": "string"}, "b": {"type": "string"}}),
            &json!({"a": {"maxLength": 2}}),
            &siblings,
        ) else {
            panic!("expected merge");
        };
        assert_eq!(out, json!({"a": {"type": "string", "maxLength": 2}}));
    }
}
