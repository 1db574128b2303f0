//! JSON Pointer toolkit (RFC 6901) plus the canonicalization pass used as the
//! memoization key for cycle detection.
//!
//! Pointers are plain `String`s. A pointer is *generic* once every array index
//! past an array's tuple prefix has been replaced by `-`, and *canonical* once
//! every recursive `$ref` loop has additionally been folded back onto its
//! target (see [`remove_recursive_references`]).
//!
//! Nothing in here panics or returns `Err`; unresolvable input is `None`.

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

/// Data pointer → number of tuple slots declared for the array living there.
pub type ArrayMap = IndexMap<String, usize>;

/// `$ref` site → pointer of the ancestor it loops back to.
pub type RecursiveRefMap = IndexMap<String, String>;

// ------------------------------- Syntax ---------------------------------- //

pub fn is_json_pointer(s: &str) -> bool {
    let s = s.strip_prefix('#').unwrap_or(s);
    s.is_empty() || s.starts_with('/')
}

pub fn escape(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}

pub fn unescape(key: &str) -> String {
    key.replace("~1", "/").replace("~0", "~")
}

/// Split a pointer into unescaped keys. Strings that are not pointers are
/// read as object paths (`a.b[0]["c d"]`).
pub fn parse(pointer: &str) -> Option<Vec<String>> {
    if !is_json_pointer(pointer) {
        return parse_object_path(pointer);
    }
    let body = pointer.strip_prefix('#').unwrap_or(pointer);
    if body.is_empty() {
        return Some(Vec::new());
    }
    Some(body[1..].split('/').map(unescape).collect())
}

pub fn compile<S: AsRef<str>>(keys: &[S]) -> String {
    keys.iter().map(|k| format!("/{}", escape(k.as_ref()))).collect()
}

/// Like [`compile`] but every empty key (`list[]`) becomes `marker`,
/// usually `-`.
pub fn compile_with_array_marker<S: AsRef<str>>(keys: &[S], marker: &str) -> String {
    keys.iter()
        .map(|k| {
            let k = k.as_ref();
            if k.is_empty() { format!("/{marker}") } else { format!("/{}", escape(k)) }
        })
        .collect()
}

/// Normalize a pointer or object path to a compiled pointer. `#` prefixes are dropped.
pub fn normalize(pointer: &str) -> Option<String> {
    parse(pointer).map(|keys| compile(&keys))
}

/// Last key of a pointer, if any.
pub fn to_key(pointer: &str) -> Option<String> {
    parse(pointer).and_then(|mut keys| keys.pop())
}

pub fn is_index(key: &str) -> bool {
    !key.is_empty() && key.bytes().all(|b| b.is_ascii_digit())
}

static OBJECT_PATH_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\[\s*"((?:[^"\\]|\\.)*)"\s*\]|\[\s*'((?:[^'\\]|\\.)*)'\s*\]|\[\s*([^\]]*?)\s*\]|([^.\[\]]+)"#)
        .expect("static object path regex")
});

/// Parse a JavaScript-style object path (`a.b[0]`, `a["b.c"]`) into keys.
pub fn parse_object_path(path: &str) -> Option<Vec<String>> {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return Some(Vec::new());
    }
    let mut keys = Vec::new();
    for caps in OBJECT_PATH_TOKEN.captures_iter(trimmed) {
        let key = caps.get(1)
            .or_else(|| caps.get(2))
            .or_else(|| caps.get(3))
            .or_else(|| caps.get(4))
            .map(|m| m.as_str().to_string())?;
        keys.push(key);
    }
    if keys.is_empty() { None } else { Some(keys) }
}

/// `long == short`, or `long` continues `short` with further segments.
pub fn is_sub_pointer(short: &str, long: &str) -> bool {
    if short.is_empty() {
        return true;
    }
    long == short || (long.starts_with(short) && long[short.len()..].starts_with('/'))
}

/// Drop the last `n` segments.
pub fn parent(pointer: &str, n: usize) -> Option<String> {
    let keys = parse(pointer)?;
    if keys.len() < n {
        return None;
    }
    Some(compile(&keys[..keys.len() - n]))
}

// ------------------------------- Access ---------------------------------- //

pub fn get<'a>(root: &'a Value, pointer: &str) -> Option<&'a Value> {
    let keys = parse(pointer)?;
    get_keys(root, &keys)
}

pub fn get_keys<'a, S: AsRef<str>>(root: &'a Value, keys: &[S]) -> Option<&'a Value> {
    let mut cur = root;
    for key in keys {
        cur = step(cur, key.as_ref())?;
    }
    Some(cur)
}

fn step<'a>(cur: &'a Value, key: &str) -> Option<&'a Value> {
    match cur {
        Value::Object(map) => map.get(key),
        Value::Array(xs) if key == "-" => xs.last(),
        Value::Array(xs) => key.parse::<usize>().ok().and_then(|i| xs.get(i)),
        _ => None,
    }
}

pub fn get_mut<'a>(root: &'a mut Value, pointer: &str) -> Option<&'a mut Value> {
    let keys = parse(pointer)?;
    let mut cur = root;
    for key in &keys {
        cur = match cur {
            Value::Object(map) => map.get_mut(key)?,
            Value::Array(xs) => {
                if key == "-" {
                    xs.last_mut()?
                } else {
                    xs.get_mut(key.parse::<usize>().ok()?)?
                }
            }
            _ => return None,
        };
    }
    Some(cur)
}

pub fn has(root: &Value, pointer: &str) -> bool {
    get(root, pointer).is_some()
}

/// First pointer in `candidates` that resolves, paired with its root.
pub fn get_first<'a>(candidates: &[(&'a Value, &str)]) -> Option<&'a Value> {
    candidates.iter().find_map(|(root, ptr)| get(root, ptr))
}

/// Write `new_value` at `pointer`, creating missing containers on the way.
/// `-` appends to an array; a numeric key past the end pads with `null`.
/// Returns false when an existing scalar blocks the path.
pub fn set(root: &mut Value, pointer: &str, new_value: Value) -> bool {
    let Some(keys) = parse(pointer) else { return false };
    let array_at = |i: usize| keys.get(i).is_some_and(|k| k == "-" || is_index(k));
    set_keys(root, &keys, new_value, array_at)
}

/// Like [`set`], but each missing container copies the kind of the value at
/// the same path in `shape`, so `{"0": ..}` objects stay objects. Paths
/// `shape` does not reach fall back to the rule [`set`] uses.
pub fn set_shaped(root: &mut Value, pointer: &str, new_value: Value, shape: &Value) -> bool {
    let Some(keys) = parse(pointer) else { return false };
    let array_at = |i: usize| match get_keys(shape, &keys[..i]) {
        Some(Value::Array(_)) => true,
        Some(Value::Object(_)) => false,
        _ => keys.get(i).is_some_and(|k| k == "-" || is_index(k)),
    };
    set_keys(root, &keys, new_value, array_at)
}

/// `array_at(i)` decides whether a container created to hold `keys[i]` is
/// an array.
fn set_keys(root: &mut Value, keys: &[String], new_value: Value, array_at: impl Fn(usize) -> bool) -> bool {
    if keys.is_empty() {
        *root = new_value;
        return true;
    }
    let empty = |i: usize| if array_at(i) { Value::Array(Vec::new()) } else { Value::Object(Map::new()) };
    let mut cur = root;
    for (i, key) in keys.iter().enumerate() {
        let last = i + 1 == keys.len();
        if cur.is_null() {
            *cur = empty(i);
        }
        cur = match cur {
            Value::Object(map) => {
                if last {
                    map.insert(key.clone(), new_value);
                    return true;
                }
                let child = map.entry(key.clone()).or_insert_with(|| empty(i + 1));
                if !child.is_object() && !child.is_array() {
                    *child = empty(i + 1);
                }
                child
            }
            Value::Array(xs) => {
                let idx = if key == "-" {
                    xs.len()
                } else {
                    match key.parse::<usize>() {
                        Ok(idx) => idx,
                        Err(_) => return false,
                    }
                };
                if idx >= xs.len() {
                    xs.resize(idx + 1, Value::Null);
                }
                if last {
                    xs[idx] = new_value;
                    return true;
                }
                if !xs[idx].is_object() && !xs[idx].is_array() {
                    xs[idx] = empty(i + 1);
                }
                &mut xs[idx]
            }
            _ => return false,
        };
    }
    true
}

/// Pre-order walk over every container and leaf, root (`""`) first.
pub fn for_each_deep(root: &Value, f: &mut impl FnMut(&Value, &str)) {
    fn walk(v: &Value, ptr: &mut String, f: &mut impl FnMut(&Value, &str)) {
        f(v, ptr);
        let len = ptr.len();
        match v {
            Value::Object(map) => {
                for (k, child) in map {
                    ptr.push('/');
                    ptr.push_str(&escape(k));
                    walk(child, ptr, f);
                    ptr.truncate(len);
                }
            }
            Value::Array(xs) => {
                for (i, child) in xs.iter().enumerate() {
                    ptr.push('/');
                    ptr.push_str(&i.to_string());
                    walk(child, ptr, f);
                    ptr.truncate(len);
                }
            }
            _ => {}
        }
    }
    let mut ptr = String::new();
    walk(root, &mut ptr, f);
}

// --------------------------- Canonicalization ---------------------------- //

/// Replace list positions with `-`. An index stays concrete only while it
/// addresses a declared tuple slot (index < tuple length in `array_map`).
pub fn to_generic_pointer(pointer: &str, array_map: &ArrayMap) -> String {
    let Some(mut keys) = parse(pointer) else { return pointer.to_string() };
    for i in 0..keys.len() {
        let prefix = compile(&keys[..i]);
        if let Some(&tuple_items) = array_map.get(&prefix) {
            if let Ok(idx) = keys[i].parse::<usize>() {
                if tuple_items <= idx {
                    keys[i] = "-".to_string();
                }
            }
        }
    }
    compile(&keys)
}

/// Canonical pointer: genericize, then fold every recursive loop back onto
/// the pointer it references until nothing changes.
pub fn remove_recursive_references(
    pointer: &str,
    recursive_ref_map: &RecursiveRefMap,
    array_map: &ArrayMap,
) -> String {
    if pointer.is_empty() {
        return String::new();
    }
    let Some(keys) = parse(pointer) else { return pointer.to_string() };
    let mut generic = to_generic_pointer(&compile(&keys), array_map);
    if !generic.contains('/') {
        return generic;
    }
    let mut changed = true;
    while changed {
        changed = false;
        for (from, to) in recursive_ref_map {
            // only loops that shorten the pointer; anything else would not terminate
            if from == to || !is_sub_pointer(to, from) {
                continue;
            }
            while is_sub_pointer(from, &generic) {
                generic = to_generic_pointer(&format!("{to}{}", &generic[from.len()..]), array_map);
                changed = true;
            }
        }
    }
    generic
}

// ------------------------------- Tests ------------------------------------ //

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_and_compile_escape_round() {
        let keys = parse("/a~1b/c~0d/0").unwrap();
        assert_eq!(keys, vec!["a/b", "c~d", "0"]);
        assert_eq!(compile(&keys), "/a~1b/c~0d/0");
        assert_eq!(parse("#/x").unwrap(), vec!["x"]);
        assert_eq!(parse("").unwrap(), Vec::<String>::new());
    }

    #[test]
    fn object_paths_are_accepted() {
        assert_eq!(parse("a.b[0]").unwrap(), vec!["a", "b", "0"]);
        assert_eq!(parse(r#"a["b.c"].d"#).unwrap(), vec!["a", "b.c", "d"]);
        assert_eq!(compile_with_array_marker(&parse("list[].name").unwrap(), "-"), "/list/-/name");
        assert_eq!(compile_with_array_marker(&parse("list[3].name").unwrap(), "-"), "/list/3/name");
    }

    #[test]
    fn set_creates_containers() {
        let mut v = Value::Null;
        assert!(set(&mut v, "/a/0/b", json!(1)));
        assert!(set(&mut v, "/a/-", json!("x")));
        assert_eq!(v, json!({"a": [{"b": 1}, "x"]}));
        assert!(set(&mut v, "/c/2", json!(true)));
        assert_eq!(v["c"], json!([null, null, true]));
    }

    #[test]
    fn shaped_set_keeps_numeric_object_keys() {
        let shape = json!({"a": {"0": "1", "1": "2"}, "b": [[]]});
        let mut v = Value::Null;
        assert!(set_shaped(&mut v, "/a/0", json!(1), &shape));
        assert!(set_shaped(&mut v, "/a/1", json!(2), &shape));
        assert!(set_shaped(&mut v, "/b/0/0", json!(3), &shape));
        assert!(set_shaped(&mut v, "/c/0", json!(4), &shape));
        assert_eq!(v, json!({"a": {"0": 1, "1": 2}, "b": [[3]], "c": [4]}));
    }

    #[test]
    fn sub_pointer_is_segment_aware() {
        assert!(is_sub_pointer("/a", "/a/b"));
        assert!(is_sub_pointer("/a", "/a"));
        assert!(!is_sub_pointer("/a", "/ab"));
        assert!(is_sub_pointer("", "/anything"));
    }

    #[test]
    fn generic_pointer_keeps_tuple_slots() {
        let mut arrays = ArrayMap::new();
        arrays.insert("/pair".into(), 2);
        arrays.insert("/list".into(), 0);
        assert_eq!(to_generic_pointer("/pair/1", &arrays), "/pair/1");
        assert_eq!(to_generic_pointer("/pair/5", &arrays), "/pair/-");
        assert_eq!(to_generic_pointer("/list/0/x", &arrays), "/list/-/x");
    }

    #[test]
    fn recursive_loops_fold_to_their_target() {
        let mut arrays = ArrayMap::new();
        arrays.insert("/tree/children".into(), 0);
        let mut loops = RecursiveRefMap::new();
        loops.insert("/tree/children/-".into(), "/tree".into());
        assert_eq!(
            remove_recursive_references("/tree/children/3/children/0/name", &loops, &arrays),
            "/tree/name"
        );
        assert_eq!(remove_recursive_references("/tree/children/-", &loops, &arrays), "/tree");
        assert_eq!(remove_recursive_references("/other", &loops, &arrays), "/other");
    }

    #[test]
    fn walk_visits_root_first() {
        let mut seen = Vec::new();
        for_each_deep(&json!({"a": [1, {"b": 2}]}), &mut |_, p| seen.push(p.to_string()));
        assert_eq!(seen, vec!["", "/a", "/a/0", "/a/1", "/a/1/b"]);
    }
}
