//! Input-type detection and widget option normalization.
//!
//! Widgets themselves are rendered elsewhere; all the layout builder needs is
//! a way to ask whether a widget name exists ([`WidgetLibrary`]) and the
//! schema-driven defaults below.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value, json};

use crate::coerce::has_value;
use crate::pointer;

/// Registry of widget names a renderer understands.
pub trait WidgetLibrary {
    fn has_widget(&self, widget_type: &str) -> bool;
}

/// Names every stock renderer registers.
pub const STANDARD_WIDGETS: &[&str] = &[
    "none", "$ref", "alt-date", "alt-datetime", "any-of", "array", "authfieldset", "advancedfieldset",
    "button", "checkbox", "checkboxes", "checkboxbuttons", "checkboxes-inline", "color", "conditional",
    "date", "datetime-local", "div", "email", "fieldset", "file", "flex", "help", "hidden", "html",
    "image", "integer", "message", "month", "msg", "number", "one-of", "optionfieldset", "password",
    "radio", "radiobuttons", "radios", "radios-inline", "range", "reset", "root", "search", "section",
    "select", "selectfieldset", "string", "submit", "tab", "tabarray", "tabs", "tagsinput", "tel",
    "template", "text", "textarea", "time", "updown", "url", "week", "wizard",
];

#[derive(Debug, Clone, Default)]
pub struct StandardWidgets {
    extra: Vec<String>,
}

impl StandardWidgets {
    pub fn with(mut self, widget_type: &str) -> Self {
        self.extra.push(widget_type.to_string());
        self
    }
}

impl WidgetLibrary for StandardWidgets {
    fn has_widget(&self, widget_type: &str) -> bool {
        STANDARD_WIDGETS.contains(&widget_type) || self.extra.iter().any(|w| w == widget_type)
    }
}

// ------------------------------ Input type ------------------------------- //

/// Most inclusive single type of a possibly multi-typed schema.
pub(crate) fn primary_type(schema: &Value) -> Option<String> {
    match schema.get("type")? {
        Value::String(t) => Some(t.clone()),
        Value::Array(ts) => {
            let listed = |t: &str| ts.iter().any(|x| x == t);
            let has = |k: &str| schema.get(k).is_some();
            let t = if listed("object") && has("properties") {
                "object"
            } else if listed("array") && (has("items") || has("additionalItems")) {
                "array"
            } else if let Some(t) = ["string", "number", "integer", "boolean"].into_iter().find(|&t| listed(t)) {
                t
            } else {
                "unknown"
            };
            Some(t.to_string())
        }
        _ => None,
    }
}

/// Pick the input widget for a schema, honoring explicit widget hints.
pub fn get_input_type(schema: &Value, layout_node: Option<&Value>) -> String {
    let hint = pointer::get_first(&[
        (schema, "/x-schema-form/type"),
        (schema, "/x-schema-form/widget/component"),
        (schema, "/x-schema-form/widget"),
        (schema, "/widget/component"),
        (schema, "/widget"),
    ]);
    if let Some(Value::String(hint)) = hint {
        return check_inline_type(hint, schema, layout_node);
    }
    if let Some(ty) = primary_type(schema) {
        match ty.as_str() {
            "boolean" => return "checkbox".into(),
            "object" if schema.get("properties").is_some() || schema.get("additionalProperties").is_some() => {
                return "section".into();
            }
            "object" if schema.get("$ref").is_some() => return "$ref".into(),
            "array" => {
                let items = pointer::get_first(&[(schema, "/items"), (schema, "/additionalItems")]);
                let enumerated = items.is_some_and(|i| i.get("enum").is_some());
                return if enumerated && schema.get("maxItems") != Some(&json!(1)) {
                    check_inline_type("checkboxes", schema, layout_node)
                } else {
                    "array".into()
                };
            }
            "null" => return "none".into(),
            _ => {}
        }
        let has_title_map = layout_node.is_some_and(|n| pointer::has(n, "/options/titleMap"));
        if has_title_map || schema.get("enum").is_some() || has_one_of_title_map(schema) {
            return "select".into();
        }
        match ty.as_str() {
            "number" | "integer" => {
                let stepped = ty == "integer" || schema.get("multipleOf").is_some();
                let bounded = schema.get("minimum").is_some() && schema.get("maximum").is_some();
                return if stepped && bounded { "range".into() } else { ty.clone() };
            }
            "string" => {
                let by_format = match schema.get("format").and_then(Value::as_str) {
                    Some("color") => "color",
                    Some("date") => "date",
                    Some("date-time") => "datetime-local",
                    Some("email") => "email",
                    Some("uri") => "url",
                    _ => "text",
                };
                return by_format.into();
            }
            _ => {}
        }
    }
    if schema.get("$ref").is_some() {
        return "$ref".into();
    }
    if schema.get("oneOf").is_some_and(Value::is_array) || schema.get("anyOf").is_some_and(Value::is_array) {
        return "one-of".into();
    }
    tracing::error!(schema = %schema, "unable to determine input type");
    "none".into()
}

/// Switch checkbox / radio widgets to their inline variant when asked to.
pub fn check_inline_type(control_type: &str, schema: &Value, layout_node: Option<&Value>) -> String {
    if !control_type.starts_with("checkbox") && !control_type.starts_with("radio") {
        return control_type.to_string();
    }
    let empty = Value::Null;
    let node = layout_node.unwrap_or(&empty);
    let inline = pointer::get_first(&[
        (node, "/inline"),
        (node, "/options/inline"),
        (schema, "/inline"),
        (schema, "/x-schema-form/inline"),
        (schema, "/x-schema-form/options/inline"),
        (schema, "/x-schema-form/widget/inline"),
        (schema, "/x-schema-form/widget/component/inline"),
        (schema, "/x-schema-form/widget/component/options/inline"),
        (schema, "/widget/inline"),
        (schema, "/widget/component/inline"),
        (schema, "/widget/component/options/inline"),
    ]);
    match inline {
        Some(Value::Bool(true)) if control_type.starts_with("radio") => "radios-inline".into(),
        Some(Value::Bool(true)) => "checkboxes-inline".into(),
        _ => control_type.to_string(),
    }
}

// -------------------------------- Titles --------------------------------- //

static CAMEL_BOUNDARY: Lazy<Regex> = Lazy::new(|| Regex::new(r"([a-z])([A-Z])").expect("static camel regex"));

const MINOR_WORDS: &[&str] = &[
    "a", "an", "and", "as", "at", "but", "by", "en", "for", "if", "in", "nor", "of", "on", "or", "per",
    "the", "to", "v", "v.", "vs", "vs.", "via",
];

/// `firstName` / `first_name` → `First Name`.
pub fn fix_title(name: &str) -> String {
    let spaced = CAMEL_BOUNDARY.replace_all(name, "$1 $2").replace('_', " ");
    to_title_case(&spaced)
}

fn to_title_case(s: &str) -> String {
    s.split(' ')
        .enumerate()
        .map(|(i, word)| {
            if i > 0 && MINOR_WORDS.contains(&word.to_lowercase().as_str()) {
                return word.to_lowercase();
            }
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

// ------------------------------ Title maps ------------------------------- //

/// True when `oneOf`/`anyOf` alone can produce a title map.
pub fn has_one_of_title_map(schema: &Value) -> bool {
    one_of_entries(schema).is_some()
}

fn one_of_entries(schema: &Value) -> Option<Vec<Value>> {
    let list = schema.get("oneOf").or_else(|| schema.get("anyOf"))?.as_array()?;
    let titles: Vec<&str> = list.iter().map(|i| i.get("title").and_then(Value::as_str)).collect::<Option<_>>()?;
    let single_enum = |i: &Value| i.get("enum").and_then(Value::as_array).filter(|e| e.len() == 1).map(|e| e[0].clone());
    let values: Vec<Value> = if list.iter().all(|i| single_enum(i).is_some()) {
        list.iter().filter_map(single_enum).collect()
    } else if list.iter().all(|i| i.get("const").is_some_and(has_value)) {
        list.iter().filter_map(|i| i.get("const").cloned()).collect()
    } else {
        return None;
    };
    Some(titles.into_iter().zip(values).map(|(name, value)| json!({"name": name, "value": value})).collect())
}

/// `{name, value}` list from `oneOf`/`anyOf` entries carrying a `title` and
/// a single `enum` value or a `const`. Names shaped `group: name` are split
/// into groups when `flat_list` is `Some(true)`, or when it is unset and
/// some group holds more than one entry.
pub fn get_title_map_from_one_of(schema: &Value, flat_list: Option<bool>) -> Option<Vec<Value>> {
    let title_map = one_of_entries(schema)?;
    if flat_list == Some(false) {
        return Some(title_map);
    }
    let grouped_names = title_map
        .iter()
        .filter(|t| t.get("name").and_then(Value::as_str).is_some_and(|n| n.contains(": ")))
        .count();
    if grouped_names <= 1 {
        return Some(title_map);
    }
    let grouped: Vec<Value> = title_map
        .iter()
        .map(|t| {
            let name = t.get("name").and_then(Value::as_str).unwrap_or_default();
            match name.split_once(": ") {
                Some((group, rest)) if !group.is_empty() && !rest.is_empty() => {
                    let mut t = t.clone();
                    t["group"] = json!(group);
                    t["name"] = json!(rest);
                    t
                }
                _ => t.clone(),
            }
        })
        .collect();
    let shared_group = grouped
        .windows(2)
        .any(|w| w[1].get("group").is_some() && w[1].get("group") == w[0].get("group"));
    if flat_list == Some(true) || shared_group { Some(grouped) } else { Some(title_map) }
}

// ------------------------------- Options --------------------------------- //

const SCHEMA_STRUCTURAL: &[&str] = &[
    "additionalProperties", "additionalItems", "properties", "items", "required", "type", "x-schema-form", "$ref",
];

fn strip_ui(key: &str) -> &str {
    match key.get(..3) {
        Some(prefix) if prefix.eq_ignore_ascii_case("ui:") => &key[3..],
        _ => key,
    }
}

/// Merge `source` into `target` skipping `exclude`; nested objects merge,
/// everything else overwrites.
fn merge_filtered(target: &mut Map<String, Value>, source: Option<&Value>, exclude: &[&str]) {
    let Some(source) = source.and_then(Value::as_object) else { return };
    for (key, value) in source {
        if exclude.contains(&key.as_str()) {
            continue;
        }
        let key = strip_ui(key).to_string();
        match (target.get_mut(&key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                existing.extend(incoming.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
            _ => {
                target.insert(key, value.clone());
            }
        }
    }
}

/// Final option set of a layout node: widget defaults, then schema hints,
/// then the node's own options, later sources winning.
pub fn update_input_options(node_options: &Map<String, Value>, schema: &Value, defaults: &Map<String, Value>) -> Map<String, Value> {
    let mut options = Map::new();
    merge_filtered(&mut options, Some(&Value::Object(defaults.clone())), &[]);
    merge_filtered(&mut options, pointer::get(schema, "/ui:widget/options"), &[]);
    merge_filtered(&mut options, schema.get("ui:widget"), &[]);
    merge_filtered(&mut options, Some(schema), SCHEMA_STRUCTURAL);
    merge_filtered(&mut options, pointer::get(schema, "/x-schema-form/options"), &[]);
    merge_filtered(&mut options, schema.get("x-schema-form"), &["items", "options"]);
    merge_filtered(&mut options, Some(&Value::Object(node_options.clone())), &[]);

    let flat_list = options.get("flatList").and_then(Value::as_bool);
    if !options.contains_key("titleMap") {
        if let Some(map) = get_title_map_from_one_of(schema, flat_list) {
            options.insert("titleMap".into(), Value::Array(map));
        } else if !options.contains_key("enum") {
            if let Some(items) = schema.get("items") {
                if let Some(tm) = items.get("titleMap") {
                    options.insert("titleMap".into(), tm.clone());
                } else if let Some(e) = items.get("enum") {
                    options.insert("enum".into(), e.clone());
                    if let (false, Some(names)) = (options.contains_key("enumNames"), items.get("enumNames")) {
                        options.insert("enumNames".into(), names.clone());
                    }
                } else if let Some(map) = get_title_map_from_one_of(items, flat_list) {
                    options.insert("titleMap".into(), Value::Array(map));
                }
            }
        }
    }

    if schema.get("type").is_some_and(|t| t == "integer") && !options.get("multipleOf").is_some_and(has_value) {
        options.insert("multipleOf".into(), json!(1));
    }

    if let Some(t) = typeahead_source(&options) {
        options.insert("typeahead".into(), t);
    }
    options
}

fn typeahead_source(options: &Map<String, Value>) -> Option<Value> {
    let options = Value::Object(options.clone());
    if pointer::has(&options, "/autocomplete/source") {
        return options.get("autocomplete").cloned();
    }
    if pointer::has(&options, "/tagsinput/source") {
        return options.get("tagsinput").cloned();
    }
    pointer::get(&options, "/tagsinput/typeahead").filter(|t| t.get("source").is_some()).cloned()
}

// ------------------------------- Tests ------------------------------------ //
