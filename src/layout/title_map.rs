//! Normalize the accepted title-map shapes into one `{name, value}` list.

use serde_json::{Map, Value, json};

fn entry(name: Value, value: Value) -> Value {
    json!({"name": name, "value": value})
}

/// Object key an enum value is looked up under.
fn key_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn is_empty_value(entry: &Value) -> bool {
    entry.get("value").is_none_or(Value::is_null)
}

/// Build an ordered `{name, value}` list from any of:
///
/// - `[{name, value}, ...]`, filtered to `enum_list` when one is given;
/// - `["Name", ...]` paired by position with `enum_list`;
/// - `{"<value>": "Name", ...}`, ordered by `enum_list` when given;
/// - `enum_list` alone (each value is its own name);
/// - nothing at all, which yields a True / False map.
///
/// Entries carrying a `group` are flattened to `group: name` when
/// `flat_list`, or collected under `{group, items}` otherwise. Optional
/// fields without an empty entry get a leading `None` entry.
pub fn build_title_map(
    title_map: Option<&Value>,
    enum_list: Option<&[Value]>,
    field_required: bool,
    flat_list: bool,
) -> Vec<Value> {
    let mut has_empty = false;
    let mut out: Vec<Value> = match (title_map, enum_list) {
        (Some(Value::Array(titles)), Some(enums)) => {
            let mut out = Vec::new();
            for (i, title) in titles.iter().enumerate() {
                match title {
                    Value::Object(t) => {
                        let value = t.get("value").cloned().unwrap_or(Value::Null);
                        if enums.contains(&value) {
                            out.push(entry(t.get("name").cloned().unwrap_or(Value::Null), value));
                        }
                    }
                    Value::String(_) if i < enums.len() => out.push(entry(title.clone(), enums[i].clone())),
                    _ => {}
                }
            }
            has_empty = out.iter().any(is_empty_value);
            out
        }
        (Some(Value::Array(titles)), None) => {
            if !field_required {
                has_empty = titles.iter().any(is_empty_value);
            }
            titles.clone()
        }
        (Some(Value::Object(names)), Some(enums)) => {
            let out: Vec<Value> = enums
                .iter()
                .filter_map(|value| names.get(&key_of(value)).map(|name| entry(name.clone(), value.clone())))
                .collect();
            has_empty = out.iter().any(is_empty_value);
            out
        }
        (Some(Value::Object(names)), None) => {
            names.iter().map(|(value, name)| entry(name.clone(), Value::String(value.clone()))).collect()
        }
        (_, Some(enums)) => {
            has_empty = enums.iter().any(Value::is_null);
            enums.iter().map(|v| entry(v.clone(), v.clone())).collect()
        }
        (_, None) => vec![entry(json!("True"), json!(true)), entry(json!("False"), json!(false))],
    };

    if out.iter().any(|t| t.get("group").is_some()) {
        has_empty = false;
        out = if flat_list { flatten_groups(out, &mut has_empty) } else { collect_groups(out, &mut has_empty) };
    }
    if !field_required && !has_empty {
        out.insert(0, entry(json!("<em>None</em>"), Value::Null));
    }
    out
}

fn flatten_groups(titles: Vec<Value>, has_empty: &mut bool) -> Vec<Value> {
    let mut out = Vec::new();
    for title in titles {
        let Some(group) = title.get("group").and_then(Value::as_str).map(String::from) else {
            *has_empty |= is_empty_value(&title);
            out.push(title);
            continue;
        };
        if let Some(items) = title.get("items").and_then(Value::as_array) {
            for item in items {
                let mut item = item.clone();
                let name = item.get("name").and_then(Value::as_str).unwrap_or_default().to_string();
                item["name"] = json!(format!("{group}: {name}"));
                *has_empty |= is_empty_value(&item);
                out.push(item);
            }
        }
        if let (Some(name), Some(value)) = (title.get("name").and_then(Value::as_str), title.get("value")) {
            *has_empty |= value.is_null();
            out.push(entry(json!(format!("{group}: {name}")), value.clone()));
        }
    }
    out
}

fn collect_groups(titles: Vec<Value>, has_empty: &mut bool) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::new();
    for title in titles {
        let Some(group) = title.get("group").cloned() else {
            *has_empty |= is_empty_value(&title);
            out.push(title);
            continue;
        };
        if out.last().and_then(|g| g.get("group")) != Some(&group) {
            let items = title.get("items").cloned().unwrap_or_else(|| json!([]));
            let mut g = Map::new();
            g.insert("group".into(), group);
            g.insert("items".into(), items);
            out.push(Value::Object(g));
        }
        if let (Some(name), Some(value)) = (title.get("name"), title.get("value")) {
            *has_empty |= value.is_null();
            if let Some(Value::Array(items)) = out.last_mut().and_then(|g| g.get_mut("items")) {
                items.push(entry(name.clone(), value.clone()));
            }
        }
    }
    out
}

// ------------------------------- Tests ------------------------------------ //

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn three_shapes_normalize_identically() {
        let enums = [json!(1), json!(2)];
        let expected = vec![json!({"name": "A", "value": 1}), json!({"name": "B", "value": 2})];
        assert_eq!(build_title_map(Some(&json!(["A", "B"])), Some(&enums), true, true), expected);
        assert_eq!(build_title_map(Some(&json!({"1": "A", "2": "B"})), Some(&enums), true, true), expected);
        assert_eq!(
            build_title_map(Some(&json!([{"name": "A", "value": 1}, {"name": "B", "value": 2}])), None, true, true),
            expected
        );
    }

    #[test]
    fn optional_fields_get_a_none_entry() {
        let map = build_title_map(None, Some(&[json!("x")]), false, true);
        assert_eq!(map[0], json!({"name": "<em>None</em>", "value": null}));
        assert_eq!(map.len(), 2);

        let map = build_title_map(None, Some(&[json!(null), json!("x")]), false, true);
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn default_boolean_map() {
        assert_eq!(
            build_title_map(None, None, true, true),
            vec![json!({"name": "True", "value": true}), json!({"name": "False", "value": false})]
        );
    }

    #[test]
    fn groups_flatten_or_collect() {
        let titles = json!([
            {"group": "Fruit", "name": "Apple", "value": "a"},
            {"group": "Fruit", "name": "Pear", "value": "p"},
            {"name": "Other", "value": "o"}
        ]);
        let flat = build_title_map(Some(&titles), None, true, true);
        assert_eq!(flat[1], json!({"name": "Fruit: Pear", "value": "p"}));
        assert_eq!(flat.len(), 3);

        let grouped = build_title_map(Some(&titles), None, true, false);
        assert_eq!(grouped.len(), 2);
        assert_eq!(
            grouped[0],
            json!({"group": "Fruit", "items": [{"name": "Apple", "value": "a"}, {"name": "Pear", "value": "p"}]})
        );
    }
}
