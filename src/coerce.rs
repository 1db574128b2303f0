//! Primitive classification and conversion between raw widget values and
//! schema-typed JSON.
//!
//! Raw values arrive loosely typed: numbers typed into text boxes come back as
//! strings, checkboxes may report `"true"`/`1`, and so on. Two conversions are
//! offered:
//!
//! - [`to_javascript_type`]: canonical native conversion, `null` on a miss.
//! - [`to_schema_type`]: best effort, walking a fallback ladder so the result
//!   always lands on one of the allowed types when that is at all possible.

use serde_json::{Number, Value};

// ---------------------------- Classification ------------------------------ //

pub fn is_primitive(v: &Value) -> bool {
    matches!(v, Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_))
}

/// Not `null` and not the empty string.
pub fn has_value(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

/// `null`, `""`, `[]` and `{}` are empty.
pub fn is_empty(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(xs) => xs.is_empty(),
        Value::Object(m) => m.is_empty(),
        _ => false,
    }
}

/// Numeric reading of a value. Non-strict mode accepts numeric strings.
fn numeric(v: &Value, strict: bool) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) if !strict => {
            let t = s.trim();
            if t.is_empty() { return None; }
            t.parse::<f64>().ok().filter(|f| f.is_finite())
        }
        _ => None,
    }
}

pub fn is_number(v: &Value, strict: bool) -> bool {
    numeric(v, strict).is_some()
}

pub fn is_integer(v: &Value, strict: bool) -> bool {
    numeric(v, strict).is_some_and(|f| f.fract() == 0.0)
}

/// Which boolean reading [`is_boolean`] should accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolTest {
    /// Only real JSON booleans.
    Strict,
    /// `true`, `1`, `"true"`, `"1"`.
    Truthy,
    /// `false`, `0`, `"false"`, `"0"`.
    Falsy,
    /// Either of the above.
    Any,
}

pub fn is_boolean(v: &Value, test: BoolTest) -> bool {
    let truthy = || match v {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64() == Some(1.0),
        Value::String(s) => s == "true" || s == "1",
        _ => false,
    };
    let falsy = || match v {
        Value::Bool(b) => !*b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s == "false" || s == "0",
        _ => false,
    };
    match test {
        BoolTest::Strict => v.is_boolean(),
        BoolTest::Truthy => truthy(),
        BoolTest::Falsy => falsy(),
        BoolTest::Any => truthy() || falsy(),
    }
}

/// JSON Schema type name of a value. With `strict = false`, numeric strings
/// report as `integer`/`number`.
pub fn get_type(v: &Value, strict: bool) -> Option<&'static str> {
    match v {
        Value::Null => Some("null"),
        Value::Array(_) => Some("array"),
        Value::Object(_) => Some("object"),
        Value::Bool(_) => Some("boolean"),
        _ if is_integer(v, strict) => Some("integer"),
        _ if is_number(v, strict) => Some("number"),
        Value::String(_) => Some("string"),
        _ => None,
    }
}

/// Does `v` satisfy schema type `ty`?
pub fn is_type(v: &Value, ty: &str) -> bool {
    match ty {
        "string" => v.is_string(),
        "number" => is_number(v, true),
        "integer" => is_integer(v, true),
        "boolean" => v.is_boolean(),
        "null" => v.is_null(),
        "array" => v.is_array(),
        "object" => v.is_object(),
        _ => false,
    }
}

// ------------------------------ Conversion -------------------------------- //

/// Prefer integral JSON numbers when the float is exact.
pub fn number_value(f: f64) -> Value {
    if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
        Value::from(f as i64)
    } else {
        Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
    }
}

fn contains(types: &[&str], ty: &str) -> bool {
    types.iter().any(|t| *t == ty)
}

/// Canonical conversion to the first matching type in `types`.
///
/// Integers win over numbers, numbers over strings, strings over booleans.
/// A value that fits none of them yields `null`.
pub fn to_javascript_type(v: &Value, types: &[&str], strict_integers: bool) -> Value {
    if v.is_null() {
        return Value::Null;
    }
    if strict_integers && contains(types, "integer") {
        if is_integer(v, true) {
            return v.clone();
        }
        if is_integer(v, false) {
            return numeric(v, false).map(number_value).unwrap_or(Value::Null);
        }
    }
    if contains(types, "number") || (!strict_integers && contains(types, "integer")) {
        if is_number(v, true) {
            return v.clone();
        }
        if let Some(f) = numeric(v, false) {
            return number_value(f);
        }
    }
    if contains(types, "string") {
        match v {
            Value::String(_) => return v.clone(),
            Value::Number(n) => return Value::String(n.to_string()),
            _ => {}
        }
    }
    if contains(types, "boolean") {
        if is_boolean(v, BoolTest::Truthy) {
            return Value::Bool(true);
        }
        if is_boolean(v, BoolTest::Falsy) {
            return Value::Bool(false);
        }
    }
    Value::Null
}

/// Best-effort conversion onto one of `types`.
///
/// Ladder, first hit wins: `null` when allowed and the value is empty; strict
/// booleans pass through; integer / number conversion; string conversion;
/// boolean readings; `""` for a null string; `1`/`0` for numeric targets
/// from booleans and empties; leading-number parse; `!!value`; finally `0`
/// for non-nullable numerics and `null` otherwise.
pub fn to_schema_type(v: &Value, types: &[&str]) -> Value {
    if contains(types, "null") && !has_value(v) {
        return Value::Null;
    }
    if contains(types, "boolean") && is_boolean(v, BoolTest::Strict) {
        return v.clone();
    }
    if contains(types, "integer") {
        let test = to_javascript_type(v, &["integer"], true);
        if !test.is_null() {
            return test;
        }
    }
    if contains(types, "number") {
        let test = to_javascript_type(v, &["number"], true);
        if !test.is_null() {
            return test;
        }
    }
    if (v.is_string() || is_number(v, true)) && contains(types, "string") {
        return to_javascript_type(v, &["string"], true);
    }
    if contains(types, "boolean") && is_boolean(v, BoolTest::Any) {
        return to_javascript_type(v, &["boolean"], true);
    }
    if contains(types, "string") {
        if v.is_null() {
            return Value::String(String::new());
        }
        let test = to_javascript_type(v, &["string"], true);
        if !test.is_null() {
            return test;
        }
    }
    let numeric_target = contains(types, "number") || contains(types, "integer");
    if numeric_target {
        match v {
            Value::Bool(true) => return Value::from(1),
            Value::Bool(false) | Value::Null => return Value::from(0),
            Value::String(s) if s.is_empty() => return Value::from(0),
            _ => {}
        }
    }
    if contains(types, "number") {
        if let Some(f) = leading_number(v).filter(|f| *f != 0.0) {
            return number_value(f);
        }
    }
    if contains(types, "integer") {
        if let Some(f) = leading_number(v).map(f64::trunc).filter(|f| *f != 0.0) {
            return number_value(f);
        }
    }
    if contains(types, "boolean") {
        return Value::Bool(truthy(v));
    }
    if numeric_target && !contains(types, "null") {
        return Value::from(0);
    }
    Value::Null
}

/// Leading numeric prefix of a string, `"12px"` → 12.
fn leading_number(v: &Value) -> Option<f64> {
    let s = v.as_str()?.trim_start();
    let end = s
        .char_indices()
        .take_while(|(i, c)| c.is_ascii_digit() || *c == '.' || (*i == 0 && (*c == '-' || *c == '+')))
        .map(|(i, c)| i + c.len_utf8())
        .last()?;
    s[..end].parse::<f64>().ok()
}

/// Loose truthiness: empty strings, zero and null are false.
fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

// ------------------------------- Tests ------------------------------------ //

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classifies_loose_and_strict() {
        assert_eq!(get_type(&json!("42"), false), Some("integer"));
        assert_eq!(get_type(&json!("42"), true), Some("string"));
        assert_eq!(get_type(&json!(4.5), true), Some("number"));
        assert_eq!(get_type(&json!(null), true), Some("null"));
        assert!(is_boolean(&json!("0"), BoolTest::Falsy));
        assert!(!is_boolean(&json!("0"), BoolTest::Strict));
    }

    #[test]
    fn javascript_type_misses_are_null() {
        assert_eq!(to_javascript_type(&json!("12"), &["integer"], true), json!(12));
        assert_eq!(to_javascript_type(&json!("1.5"), &["number"], true), json!(1.5));
        assert_eq!(to_javascript_type(&json!(7), &["string"], true), json!("7"));
        assert_eq!(to_javascript_type(&json!(true), &["string"], true), Value::Null);
        assert_eq!(to_javascript_type(&json!("abc"), &["integer"], true), Value::Null);
        assert_eq!(to_javascript_type(&json!("true"), &["boolean"], true), json!(true));
    }

    #[test]
    fn schema_type_ladder() {
        assert_eq!(to_schema_type(&json!("3"), &["integer"]), json!(3));
        assert_eq!(to_schema_type(&Value::Null, &["string"]), json!(""));
        assert_eq!(to_schema_type(&json!(true), &["number"]), json!(1));
        assert_eq!(to_schema_type(&json!(""), &["integer"]), json!(0));
        assert_eq!(to_schema_type(&json!("12px"), &["number"]), json!(12));
        assert_eq!(to_schema_type(&json!("nope"), &["integer"]), json!(0));
        assert_eq!(to_schema_type(&json!("nope"), &["integer", "null"]), Value::Null);
        assert_eq!(to_schema_type(&json!(""), &["string", "null"]), Value::Null);
        assert_eq!(to_schema_type(&json!("yes"), &["boolean"]), json!(true));
    }
}
