//! Render layout builder.
//!
//! Turns a declarative layout (shorthand keys, pointers, or full node
//! objects) into resolved [`LayoutNode`]s bound to canonical data pointers.
//! Layout elements that are just `"*"` expand into nodes synthesized from
//! the schema ([`build_layout_from_schema`]).
//!
//! The layout walk runs before the template walk of the same pass: it
//! records array bounds in [`PointerMetadata`](crate::context::PointerMetadata)
//! and the template walk reads them back. Array list items and `$ref`
//! targets are memoized in [`CompileContext::layout_refs`] under the same
//! canonical pointers the template builder uses.
pub mod from_schema;
pub mod map;
pub mod title_map;

use serde::Serialize;
use serde_json::{Map, Value, json};

use crate::coerce::is_empty;
use crate::context::{CompileContext, RefState};
use crate::pointer;
use crate::schema::{is_input_required, to_schema_pointer};
use crate::widgets::{
    WidgetLibrary, check_inline_type, fix_title, get_input_type, primary_type, update_input_options,
};

pub use from_schema::{SchemaLayout, build_layout_from_schema};
pub use map::{LayoutItem, Mapped, map_layout};
pub use title_map::build_title_map;

pub(crate) const MAX_ITEMS_DEFAULT: usize = 1000;

// -------------------------------- Nodes ---------------------------------- //

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArrayItemType {
    Tuple,
    List,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArrayBounds {
    pub min_items: usize,
    pub max_items: usize,
    pub tuple_items: usize,
    pub list_items: usize,
}

impl ArrayBounds {
    /// Clamp the tuple and list counts into `[min_items, max_items]`.
    fn settle(mut self) -> Self {
        if self.max_items <= self.tuple_items {
            self.tuple_items = self.max_items;
            self.list_items = 0;
        } else if self.max_items < self.tuple_items + self.list_items {
            self.list_items = self.max_items - self.tuple_items;
        } else if self.min_items > self.tuple_items + self.list_items {
            self.list_items = self.min_items - self.tuple_items;
        }
        self
    }

    fn write_options(&self, options: &mut Map<String, Value>) {
        options.insert("minItems".into(), json!(self.min_items));
        options.insert("maxItems".into(), json!(self.max_items));
        options.insert("tupleItems".into(), json!(self.tuple_items));
        options.insert("listItems".into(), json!(self.list_items));
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum LayoutKind {
    Input,
    Container,
    Array(ArrayBounds),
    /// Placeholder resolved later through the layout ref library.
    Reference {
        #[serde(rename = "$ref")]
        target: String,
    },
    Submit,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutNode {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(rename = "type")]
    pub widget_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_pointer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_pointer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,
    pub options: Map<String, Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<LayoutNode>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub array_item: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub array_item_type: Option<ArrayItemType>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub recursive_reference: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub required: bool,
    #[serde(flatten)]
    pub kind: LayoutKind,
}

impl LayoutNode {
    pub fn new(widget_type: &str) -> Self {
        Self {
            id: None,
            widget_type: widget_type.to_string(),
            name: None,
            data_pointer: None,
            schema_pointer: None,
            data_type: None,
            options: Map::new(),
            items: Vec::new(),
            array_item: false,
            array_item_type: None,
            recursive_reference: false,
            required: false,
            kind: match widget_type {
                "submit" => LayoutKind::Submit,
                "$ref" => LayoutKind::Reference { target: String::new() },
                _ => LayoutKind::Input,
            },
        }
    }

    /// A `$ref` placeholder pointing at `target` in the layout ref library.
    pub fn reference(target: &str, data_pointer: &str, recursive: bool) -> Self {
        let mut node = Self::new("$ref");
        node.kind = LayoutKind::Reference { target: target.to_string() };
        node.data_pointer = Some(data_pointer.to_string());
        node.recursive_reference = recursive;
        node
    }

    pub fn target(&self) -> Option<&str> {
        match &self.kind {
            LayoutKind::Reference { target } => Some(target),
            _ => None,
        }
    }

    pub fn is_reference(&self) -> bool {
        self.widget_type == "$ref"
    }

    /// Pre-order walk, the node itself first.
    pub fn for_each(&self, f: &mut impl FnMut(&LayoutNode)) {
        f(self);
        for item in &self.items {
            item.for_each(f);
        }
    }

    pub fn for_each_mut(&mut self, f: &mut impl FnMut(&mut LayoutNode)) {
        f(self);
        for item in &mut self.items {
            item.for_each_mut(f);
        }
    }

    fn option_bool(&self, key: &str) -> Option<bool> {
        self.options.get(key).and_then(Value::as_bool)
    }

    fn option_usize(&self, key: &str) -> Option<usize> {
        self.options.get(key).and_then(Value::as_u64).map(|n| n as usize)
    }

    fn title(&self) -> Option<&str> {
        self.options.get("title").and_then(Value::as_str).filter(|t| !t.is_empty())
    }
}

/// What [`build_layout_from_schema`] produced: one node, or the children of
/// the root object section spliced in its place.
#[derive(Debug, Clone, PartialEq)]
pub enum LayoutFragment {
    One(LayoutNode),
    Many(Vec<LayoutNode>),
}

impl LayoutFragment {
    pub fn into_nodes(self) -> Vec<LayoutNode> {
        match self {
            LayoutFragment::One(node) => vec![node],
            LayoutFragment::Many(nodes) => nodes,
        }
    }

    /// Collapse to a single node, wrapping spliced children in a section.
    pub fn into_node(self) -> LayoutNode {
        match self {
            LayoutFragment::One(node) => node,
            LayoutFragment::Many(items) => {
                let mut section = LayoutNode::new("section");
                section.kind = LayoutKind::Container;
                section.items = items;
                section
            }
        }
    }
}

// ------------------------------ Utilities -------------------------------- //

fn is_numeric(name: &str) -> bool {
    pointer::is_index(name)
}

fn starts_with_add(text: &str) -> bool {
    let lower = text.to_lowercase();
    lower == "add" || lower.starts_with("add ")
}

/// Title for the stub a recursive reference resolves to: its own name, else
/// the nearest named key of its data pointer.
fn stub_title(ref_node: &LayoutNode) -> String {
    if let Some(name) = ref_node.name.as_deref().filter(|n| !n.is_empty() && !is_numeric(n)) {
        return format!("Add {}", fix_title(name));
    }
    let keys = ref_node.data_pointer.as_deref().and_then(pointer::parse).unwrap_or_default();
    match keys.iter().rev().find(|k| *k != "-" && !is_numeric(k)) {
        Some(key) => format!("Add to {}", fix_title(key)),
        None => "Add".to_string(),
    }
}

fn add_button(
    ctx: &mut CompileContext,
    data_pointer: &str,
    target: &str,
    recursive: bool,
    bounds: &ArrayBounds,
    title: String,
) -> LayoutNode {
    let mut button = LayoutNode::reference(target, &format!("{data_pointer}/-"), recursive);
    button.id = Some(ctx.fresh_id());
    button.array_item = true;
    button.array_item_type = Some(ArrayItemType::List);
    bounds.write_options(&mut button.options);
    button.options.insert("removable".into(), json!(false));
    button.options.insert("title".into(), json!(title));
    button
}

fn usize_at(schema: &Value, key: &str) -> Option<usize> {
    schema.get(key).and_then(Value::as_u64).map(|n| n as usize)
}

/// Numeric `validationMessage` codes → validator names.
fn validation_code_name(code: &str) -> &str {
    match code {
        "0" => "type",
        "1" => "enum",
        "100" => "multipleOf",
        "101" => "minimum",
        "102" => "exclusiveMinimum",
        "103" => "maximum",
        "104" => "exclusiveMaximum",
        "200" => "minLength",
        "201" => "maxLength",
        "202" => "pattern",
        "300" => "minProperties",
        "301" => "maxProperties",
        "302" => "required",
        "304" => "dependencies",
        "400" => "minItems",
        "401" => "maxItems",
        "402" => "uniqueItems",
        "500" => "format",
        other => other,
    }
}

const STRUCTURAL_KEYS: &[&str] = &[
    "_id", "$ref", "arrayItem", "arrayItemType", "dataPointer", "dataType", "items", "key", "name",
    "options", "recursiveReference", "type", "widget",
];

const SELECT_WIDGETS: &[&str] = &[
    "select", "radios", "radios-inline", "radiobuttons", "checkboxes", "checkboxes-inline", "checkboxbuttons",
];

/// The parts of a raw layout object the builder reads.
#[derive(Debug, Default)]
struct RawNode {
    key: Option<String>,
    data_pointer: Option<String>,
    widget_type: Option<String>,
    name: Option<String>,
    options: Map<String, Value>,
    recursive_reference: bool,
}

fn normalize_raw(node: Value) -> Option<RawNode> {
    match node {
        Value::String(s) if pointer::is_json_pointer(&s) => Some(RawNode { data_pointer: Some(s), ..RawNode::default() }),
        Value::String(s) => Some(RawNode { key: Some(s), ..RawNode::default() }),
        Value::Object(map) => {
            let mut raw = RawNode::default();
            if let Some(Value::Object(options)) = map.get("options") {
                raw.options = options.clone();
            }
            for (key, value) in &map {
                if !STRUCTURAL_KEYS.contains(&key.as_str()) {
                    raw.options.insert(key.clone(), value.clone());
                }
            }
            let text = |k: &str| map.get(k).and_then(Value::as_str).map(String::from);
            raw.key = text("key");
            raw.data_pointer = text("dataPointer");
            raw.name = text("name");
            raw.widget_type = text("type").or_else(|| text("widget"));
            raw.recursive_reference = map.get("recursiveReference").and_then(Value::as_bool).unwrap_or(false);

            if !raw.options.contains_key("title") {
                if let Some(legend) = raw.options.shift_remove("legend") {
                    raw.options.insert("title".into(), legend);
                }
            }
            if !raw.options.contains_key("validationMessages") {
                if let Some(messages) = raw.options.shift_remove("errorMessages") {
                    raw.options.insert("validationMessages".into(), messages);
                } else if let Some(message) = raw.options.shift_remove("validationMessage") {
                    let messages = match message {
                        Value::Object(codes) => Value::Object(
                            codes.into_iter().map(|(code, m)| (validation_code_name(&code).to_string(), m)).collect(),
                        ),
                        other => other,
                    };
                    raw.options.insert("validationMessages".into(), messages);
                }
            }
            Some(raw)
        }
        other => {
            tracing::error!(element = %other, "layout element is neither an object nor a string");
            None
        }
    }
}

/// First concrete list pointer among already-built children, trimmed to
/// the array it belongs to.
fn find_array_pointer(items: &[LayoutNode]) -> Option<String> {
    for item in items {
        if let Some(dp) = item.data_pointer.as_deref() {
            if let Some(at) = dp.rfind("/-") {
                return Some(dp[..at].to_string());
            }
        }
        if let Some(found) = find_array_pointer(&item.items) {
            return Some(found);
        }
    }
    None
}

fn normalize_copy_value_to(options: &mut Map<String, Value>) {
    let Some(copy) = options.get("copyValueTo") else { return };
    let targets: Vec<String> = match copy {
        Value::String(s) => vec![s.clone()],
        Value::Array(xs) => xs.iter().filter_map(Value::as_str).map(String::from).collect(),
        _ => Vec::new(),
    };
    let pointers: Vec<Value> = targets
        .iter()
        .filter_map(|t| pointer::parse(t))
        .map(|keys| Value::String(pointer::compile_with_array_marker(&keys, "-")))
        .collect();
    options.insert("copyValueTo".into(), Value::Array(pointers));
}

/// Normalize the option's title map for select-like widgets.
fn settle_title_map(node: &mut LayoutNode) {
    if !SELECT_WIDGETS.contains(&node.widget_type.as_str()) {
        return;
    }
    let options = &node.options;
    let enum_list = options.get("enum").and_then(Value::as_array).cloned();
    let source = options.get("titleMap").or_else(|| options.get("enumNames")).cloned();
    if source.is_none() && enum_list.is_none() {
        return;
    }
    let field_required = node.widget_type != "select" || node.required;
    let flat_list = node.option_bool("flatList").unwrap_or(false);
    let title_map = build_title_map(source.as_ref(), enum_list.as_deref(), field_required, flat_list);
    node.options.insert("titleMap".into(), Value::Array(title_map));
}

// ------------------------------ build_layout ----------------------------- //

/// Resolve a declarative layout. An empty layout means `["*"]`.
pub fn build_layout(ctx: &mut CompileContext, layout: &[Value], widgets: &dyn WidgetLibrary) -> Vec<LayoutNode> {
    let wildcard = [json!("*")];
    let layout = if layout.is_empty() { &wildcard[..] } else { layout };

    let mut nodes = map_layout(layout, &mut |item: LayoutItem<LayoutNode>, _, _: &str| {
        build_layout_item(ctx, widgets, item)
    });

    let mut has_submit = false;
    for node in &nodes {
        node.for_each(&mut |n| has_submit |= n.widget_type == "submit");
    }
    if ctx.options.add_submit.resolve(!has_submit) {
        let mut submit = LayoutNode::new("submit");
        submit.id = Some(ctx.fresh_id());
        submit.options.insert("title".into(), json!("Submit"));
        nodes.push(submit);
    }

    if ctx.has_root_reference {
        let mut root = LayoutNode::new("section");
        root.kind = LayoutKind::Container;
        root.name = Some(String::new());
        root.data_pointer = Some(String::new());
        root.data_type = Some("object".into());
        root.items = nodes.iter().filter(|n| n.widget_type != "submit").cloned().collect();
        root.options = ctx.options.default_widget_options.clone();
        root.recursive_reference = true;
        ctx.layout_refs.insert("", root);
    }
    nodes
}

fn build_layout_item(
    ctx: &mut CompileContext,
    widgets: &dyn WidgetLibrary,
    item: LayoutItem<LayoutNode>,
) -> Mapped<LayoutNode> {
    let LayoutItem { node, items, has_items, parent_type } = item;
    let Some(raw) = normalize_raw(node) else { return Mapped::Skip };

    let mut data_pointer = raw.data_pointer.clone();
    if data_pointer.is_none() {
        if let Some(key) = raw.key.as_deref() {
            data_pointer = if key == "*" {
                Some("*".into())
            } else {
                pointer::parse(key).map(|keys| pointer::compile_with_array_marker(&keys, "-"))
            };
        } else if raw.widget_type.as_deref().is_some_and(|t| t.ends_with("array")) {
            data_pointer = find_array_pointer(&items);
        }
    }

    let mut node = LayoutNode::new(raw.widget_type.as_deref().unwrap_or(""));
    node.id = Some(ctx.fresh_id());
    node.name = raw.name.clone();
    node.options = raw.options;
    node.items = items;
    node.recursive_reference = raw.recursive_reference;

    match data_pointer {
        Some(dp) if dp == "*" => {
            let values = ctx.form_values.clone();
            let args = SchemaLayout { node_value: values, ..SchemaLayout::default() };
            match build_layout_from_schema(ctx, Some(widgets), args) {
                Some(LayoutFragment::One(n)) => Mapped::One(n),
                Some(LayoutFragment::Many(ns)) => Mapped::Many(ns),
                None => Mapped::Skip,
            }
        }
        Some(dp) => {
            bind_node(ctx, widgets, &mut node, raw.widget_type.is_some(), &dp, has_items);
            Mapped::One(node)
        }
        None if raw.widget_type.is_some() || has_items => {
            let inside_tabs = matches!(parent_type.as_deref(), Some("tabs" | "tabarray"));
            if raw.widget_type.is_none() {
                node = LayoutNode { widget_type: if inside_tabs { "tab" } else { "array" }.into(), ..node };
            }
            node.array_item = parent_type.as_deref() == Some("array");
            node.options = update_input_options(&node.options, &Value::Object(Map::new()), &ctx.options.default_widget_options);
            if !node.items.is_empty() && matches!(node.kind, LayoutKind::Input) {
                node.kind = LayoutKind::Container;
            }
            Mapped::One(node)
        }
        None => Mapped::One(node),
    }
}

/// Attach a layout node to its data pointer: metadata, widget type,
/// options, and array chrome.
fn bind_node(
    ctx: &mut CompileContext,
    widgets: &dyn WidgetLibrary,
    node: &mut LayoutNode,
    explicit_type: bool,
    data_pointer: &str,
    has_items: bool,
) {
    let node_value = match (ctx.form_values.as_ref(), pointer::parse(data_pointer)) {
        (Some(values), Some(keys)) => {
            let first: Vec<&str> = keys.iter().map(|k| if k == "-" { "0" } else { k.as_str() }).collect();
            pointer::get_keys(values, &first).cloned()
        }
        _ => None,
    };
    let dp = ctx.generic(data_pointer);
    if node.name.is_none() {
        node.name = pointer::to_key(&dp).filter(|k| k != "-");
    }
    let short = ctx.canonical(&dp);
    let recursive = short.is_empty() || short != dp;
    node.data_pointer = Some(dp.clone());

    let known_schema_pointer = ctx.metadata.get(&short).and_then(|m| m.schema_pointer.clone());
    let schema_pointer = known_schema_pointer.or_else(|| to_schema_pointer(&short, &ctx.schema));
    let disabled = node.option_bool("disabled").unwrap_or(false);
    {
        let meta = ctx.meta_mut(&short);
        if meta.schema_pointer.is_none() {
            meta.schema_pointer = schema_pointer.clone();
        }
        meta.disabled = disabled;
    }

    let node_schema = schema_pointer.as_deref().and_then(|sp| pointer::get(&ctx.schema, sp)).cloned();
    let mut bounds = None;
    match &node_schema {
        Some(schema) => {
            node.schema_pointer = schema_pointer.clone();
            let view = json!({"options": node.options});
            node.widget_type = if !explicit_type {
                get_input_type(schema, Some(&view))
            } else if !widgets.has_widget(&node.widget_type) {
                let replacement = get_input_type(schema, Some(&view));
                tracing::error!(
                    widget = %node.widget_type,
                    replacement = %replacement,
                    pointer = %dp,
                    "unknown widget type, using the schema's input type"
                );
                replacement
            } else {
                check_inline_type(&node.widget_type, schema, Some(&view))
            };

            if primary_type(schema).as_deref() == Some("object") {
                if let Some(required) = schema.get("required").and_then(Value::as_array) {
                    let names = required.iter().filter_map(Value::as_str).map(String::from).collect();
                    ctx.meta_mut(&short).required = Some(names);
                }
            }
            node.data_type = primary_type(schema).or_else(|| schema.get("$ref").map(|_| "$ref".to_string()));
            let defaults = ctx.options.default_widget_options.clone();
            node.options = update_input_options(&node.options, schema, &defaults);

            if node.widget_type == "checkboxes" && schema.get("items").is_some() {
                node.options = update_input_options(&node.options, &schema["items"], &defaults);
            } else if node.data_type.as_deref() == Some("array") {
                let settled = ArrayBounds {
                    max_items: usize_at(schema, "maxItems")
                        .unwrap_or(MAX_ITEMS_DEFAULT)
                        .min(node.option_usize("maxItems").unwrap_or(MAX_ITEMS_DEFAULT)),
                    min_items: usize_at(schema, "minItems").unwrap_or(0).max(node.option_usize("minItems").unwrap_or(0)),
                    list_items: node
                        .option_usize("listItems")
                        .unwrap_or(0)
                        .max(node_value.as_ref().and_then(Value::as_array).map_or(0, Vec::len)),
                    tuple_items: schema.get("items").and_then(Value::as_array).map_or(0, Vec::len),
                }
                .settle();
                settled.write_options(&mut node.options);
                let meta = ctx.meta_mut(&short);
                if meta.max_items.is_none() {
                    meta.max_items = Some(settled.max_items);
                    meta.min_items = Some(settled.min_items);
                    meta.tuple_items = Some(settled.tuple_items);
                    meta.list_items = Some(settled.list_items);
                }
                ctx.array_map.entry(short.clone()).or_insert(settled.tuple_items);
                bounds = Some(settled);
            }

            if schema_pointer.as_deref().is_some_and(|sp| is_input_required(&ctx.schema, sp)) {
                node.options.insert("required".into(), json!(true));
                node.required = true;
                ctx.fields_required = true;
            }
        }
        None => {
            if !explicit_type {
                node.widget_type = "none".into();
            }
            node.options = update_input_options(&node.options, &Value::Object(Map::new()), &ctx.options.default_widget_options);
        }
    }

    if node.title().is_none() {
        if let Some(name) = node.name.as_deref().filter(|n| !is_numeric(n)) {
            node.options.insert("title".into(), json!(fix_title(name)));
        }
    }
    normalize_copy_value_to(&mut node.options);
    let meta = ctx.meta_mut(&short);
    meta.input_type = Some(node.widget_type.clone());
    meta.widget_type = Some(node.widget_type.clone());
    settle_title_map(node);

    node.kind = match (&node.kind, bounds) {
        (LayoutKind::Submit, _) => LayoutKind::Submit,
        (_, Some(b)) => LayoutKind::Array(b),
        _ if !node.items.is_empty() => LayoutKind::Container,
        _ => LayoutKind::Input,
    };

    match bounds {
        Some(bounds) if has_items && !node.items.is_empty() => {
            bind_array_items(ctx, widgets, node, &dp, recursive, bounds, node_value.as_ref());
        }
        _ => node.array_item = false,
    }
}

/// Array chrome for a layout-declared array: regroup stray item fields,
/// memoize the item layout, pad default items, append the add button.
fn bind_array_items(
    ctx: &mut CompileContext,
    widgets: &dyn WidgetLibrary,
    node: &mut LayoutNode,
    dp: &str,
    recursive: bool,
    mut bounds: ArrayBounds,
    node_value: Option<&Value>,
) {
    let item_ref = ctx.canonical(&format!("{dp}/-"));
    ctx.meta_mut(&item_ref).input_type = Some("section".into());
    let removable = node.option_bool("removable") != Some(false);

    if node.items.len() > 1 {
        let mut group = Vec::new();
        let mut kept = Vec::new();
        for mut sub in std::mem::take(&mut node.items) {
            let belongs = sub.data_pointer.as_deref().is_some_and(|p| p.starts_with(&item_ref) && !item_ref.is_empty());
            if belongs {
                let rest = sub.data_pointer.as_deref().map(|p| p[item_ref.len()..].to_string()).unwrap_or_default();
                sub.data_pointer = Some(format!("{dp}/-{rest}"));
                group.push(sub);
            } else {
                sub.array_item = true;
                sub.array_item_type = Some(ArrayItemType::List);
                sub.options.insert("removable".into(), json!(removable));
                kept.push(sub);
            }
        }
        node.items = kept;
        if !group.is_empty() {
            let mut section = LayoutNode::new("section");
            section.kind = LayoutKind::Container;
            section.id = Some(ctx.fresh_id());
            section.array_item = true;
            section.array_item_type =
                Some(if bounds.tuple_items > node.items.len() { ArrayItemType::Tuple } else { ArrayItemType::List });
            section.items = group;
            section.options.insert("removable".into(), json!(removable));
            section.data_pointer = Some(format!("{dp}/-"));
            node.items.push(section);
        }
    } else if let Some(first) = node.items.first_mut() {
        first.array_item = true;
        if first.data_pointer.is_none() {
            first.data_pointer = Some(ctx.generic(&item_ref));
        }
        first.options.entry("removable").or_insert(json!(true));
        if node.options.get("orderable") == Some(&json!(false)) {
            first.options.insert("orderable".into(), json!(false));
        }
        first.array_item_type = Some(if bounds.tuple_items > 0 { ArrayItemType::Tuple } else { ArrayItemType::List });
    }

    let list_count = node.items.iter().filter(|i| !i.is_reference()).count().saturating_sub(bounds.tuple_items);
    if list_count > bounds.list_items {
        bounds.list_items = list_count;
        node.options.insert("listItems".into(), json!(list_count));
        let short = ctx.canonical(dp);
        ctx.meta_mut(&short).list_items = Some(list_count);
        node.kind = LayoutKind::Array(bounds);
    }

    if matches!(ctx.layout_refs.state(&item_ref), RefState::NotStarted) {
        if let Some(last) = node.items.last() {
            let mut template = last.clone();
            if recursive {
                template.recursive_reference = true;
            }
            template.for_each_mut(&mut |n| {
                n.id = None;
                if recursive {
                    if let Some(p) = n.data_pointer.as_mut() {
                        if let Some(rest) = p.strip_prefix(dp) {
                            *p = rest.to_string();
                        }
                    }
                }
            });
            ctx.layout_refs.insert(&item_ref, template);
        }
    }

    if !node.recursive_reference || node.required {
        let known = node_value.and_then(Value::as_array).map_or(0, Vec::len);
        let length = (bounds.tuple_items + bounds.list_items).max(known).min(bounds.max_items);
        let ref_node = LayoutNode::reference(&item_ref, dp, node.recursive_reference);
        for _ in node.items.len()..length {
            if let Some(item) = get_layout_node(ctx, &ref_node, Some(widgets), None) {
                node.items.push(item);
            }
        }
    }

    let extensible = node.option_bool("addable") != Some(false) && bounds.min_items < bounds.max_items;
    if extensible && !node.items.last().is_some_and(LayoutNode::is_reference) {
        let title = match (node.title(), node.name.as_deref().filter(|n| !is_numeric(n))) {
            (Some(title), _) if starts_with_add(title) => title.to_string(),
            (Some(title), _) => format!("Add {title}"),
            (None, Some(name)) => format!("Add {}", fix_title(name)),
            (None, None) => {
                let parent_title = pointer::parent(dp, 1)
                    .and_then(|p| to_schema_pointer(&ctx.canonical(&p), &ctx.schema))
                    .and_then(|sp| pointer::get(&ctx.schema, &sp))
                    .and_then(|s| s.get("title"))
                    .and_then(Value::as_str)
                    .map(String::from);
                let parent_key = pointer::parse(dp).and_then(|keys| keys.iter().rev().nth(1).cloned());
                match (parent_title, parent_key) {
                    (Some(t), _) => format!("Add to {t}"),
                    (None, Some(k)) => format!("Add to {}", fix_title(&k)),
                    (None, None) => "Add".to_string(),
                }
            }
        };
        let mut button = add_button(ctx, dp, &item_ref, recursive, &bounds, title);
        let style_add = node.options.get_mut("style").and_then(Value::as_object_mut).and_then(|s| s.shift_remove("add"));
        if let Some(style) = style_add {
            if style.is_string() {
                button.options.insert("fieldStyle".into(), style);
            }
            if node.options.get("style").is_some_and(is_empty) {
                node.options.shift_remove("style");
            }
        }
        node.items.push(button);
    }
}

// ---------------------------- get_layout_node ---------------------------- //

/// Resolve a `$ref` layout node into a concrete subtree.
///
/// Recursive references with a widget library give a cheap "Add" stub.
/// Otherwise the memoized entry is cloned with fresh ids (and, when
/// recursive, the reference's pointer prefixed onto every descendant), or
/// rebuilt from the schema when a concrete value fixes array lengths. An
/// entry still being built resolves to the reference node itself.
pub fn get_layout_node(
    ctx: &mut CompileContext,
    ref_node: &LayoutNode,
    widgets: Option<&dyn WidgetLibrary>,
    node_value: Option<&Value>,
) -> Option<LayoutNode> {
    let target = ref_node.target()?.to_string();
    if ref_node.recursive_reference && widgets.is_some() {
        let mut stub = ref_node.clone();
        stub.recursive_reference = true;
        stub.options.insert("removable".into(), json!(false));
        stub.options.insert("title".into(), json!(stub_title(ref_node)));
        return Some(stub);
    }
    let cached = match ctx.layout_refs.state(&target) {
        RefState::Ready(node) => node.clone(),
        RefState::Building | RefState::NotStarted => return Some(ref_node.clone()),
    };

    if let Some(value) = node_value {
        let schema_pointer = to_schema_pointer(&target, &ctx.schema)?;
        let args = SchemaLayout {
            node_value: Some(value.clone()),
            schema_pointer,
            data_pointer: target.clone(),
            array_item: cached.array_item,
            array_item_type: cached.array_item_type,
            removable: cached.option_bool("removable"),
            for_ref_library: true,
            data_pointer_prefix: String::new(),
        };
        return build_layout_from_schema(ctx, widgets, args).map(LayoutFragment::into_node);
    }

    let mut node = cached;
    let prefix = ref_node.data_pointer.clone().unwrap_or_default();
    node.for_each_mut(&mut |n| {
        n.id = Some(ctx.fresh_id());
        if ref_node.recursive_reference {
            if let Some(p) = n.data_pointer.as_mut() {
                *p = format!("{prefix}{p}");
            }
        }
    });
    Some(node)
}

// ------------------------------- Tests ------------------------------------ //

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{FormOptions, Switch};
    use crate::widgets::StandardWidgets;

    fn build(schema: Value, layout: Value, data: Option<Value>) -> (CompileContext, Vec<LayoutNode>) {
        let mut ctx = CompileContext::new(&schema, data, FormOptions::default());
        let layout = layout.as_array().cloned().unwrap_or_default();
        let nodes = build_layout(&mut ctx, &layout, &StandardWidgets::default());
        (ctx, nodes)
    }

    fn find<'a>(nodes: &'a [LayoutNode], dp: &str) -> Option<&'a LayoutNode> {
        nodes.iter().find_map(|n| {
            if n.data_pointer.as_deref() == Some(dp) && !n.is_reference() { Some(n) } else { find(&n.items, dp) }
        })
    }

    #[test]
    fn empty_layout_expands_the_schema() {
        let (ctx, nodes) = build(
            json!({
                "type": "object",
                "required": ["firstName"],
                "properties": {
                    "firstName": {"type": "string"},
                    "age": {"type": "integer"},
                    "subscribed": {"type": "boolean"}
                }
            }),
            json!([]),
            None,
        );
        let types: Vec<&str> = nodes.iter().map(|n| n.widget_type.as_str()).collect();
        assert_eq!(types, vec!["text", "integer", "checkbox", "submit"]);
        assert_eq!(nodes[0].options["title"], json!("First Name"));
        assert!(nodes[0].required);
        assert!(!nodes[1].required);
        assert_eq!(nodes[1].options["multipleOf"], json!(1));
        assert!(matches!(nodes[3].kind, LayoutKind::Submit));
        assert!(ctx.fields_required);
        assert_eq!(ctx.metadata["/age"].input_type.as_deref(), Some("integer"));
    }

    #[test]
    fn explicit_layout_normalizes_aliases() {
        let (_, nodes) = build(
            json!({"type": "object", "properties": {"email": {"type": "string", "format": "email"}}}),
            json!([
                {
                    "key": "email",
                    "type": "no-such-widget",
                    "legend": "Contact",
                    "validationMessage": {"202": "bad pattern", "0": "wrong type"}
                },
                {"type": "submit", "title": "Send"}
            ]),
            None,
        );
        assert_eq!(nodes.len(), 2);
        let email = &nodes[0];
        assert_eq!(email.widget_type, "email");
        assert_eq!(email.data_pointer.as_deref(), Some("/email"));
        assert_eq!(email.schema_pointer.as_deref(), Some("/properties/email"));
        assert_eq!(email.options["title"], json!("Contact"));
        assert_eq!(email.options["validationMessages"], json!({"pattern": "bad pattern", "type": "wrong type"}));
        assert_eq!(nodes[1].options["title"], json!("Send"));
    }

    #[test]
    fn submit_switch_is_honored() {
        let schema = json!({"type": "object", "properties": {"a": {"type": "string"}}});
        let mut options = FormOptions::default();
        options.add_submit = Switch::Never;
        let mut ctx = CompileContext::new(&schema, None, options);
        let nodes = build_layout(&mut ctx, &[], &StandardWidgets::default());
        assert_eq!(nodes.len(), 1);
    }

    #[test]
    fn list_arrays_get_items_and_an_add_button() {
        let (ctx, nodes) = build(
            json!({
                "type": "object",
                "properties": {
                    "tags": {"type": "array", "title": "Tags", "maxItems": 4, "items": {"type": "string"}}
                }
            }),
            json!([]),
            Some(json!({"tags": ["a", "b"]})),
        );
        let tags = &nodes[0];
        let LayoutKind::Array(bounds) = &tags.kind else { panic!("expected array, got {:?}", tags.kind) };
        assert_eq!(bounds.max_items, 4);
        assert_eq!(bounds.list_items, 1);
        assert_eq!(tags.items.len(), 3);
        assert_eq!(tags.items[1].data_pointer.as_deref(), Some("/tags/-"));
        let button = tags.items.last().unwrap();
        assert_eq!(button.target(), Some("/tags/-"));
        assert_eq!(button.options["title"], json!("Add to Tags"));
        assert_eq!(ctx.metadata["/tags"].max_items, Some(4));
        assert!(matches!(ctx.layout_refs.state("/tags/-"), RefState::Ready(_)));
    }

    #[test]
    fn keys_starting_with_a_dash_read_their_own_data() {
        let (_, nodes) = build(
            json!({
                "type": "object",
                "properties": {"-tags": {"type": "array", "items": {"type": "string"}}}
            }),
            json!([{"key": "-tags"}]),
            Some(json!({"-tags": ["a", "b", "c"], "0tags": ["x"]})),
        );
        let tags = find(&nodes, "/-tags").expect("bound node");
        assert_eq!(tags.options["listItems"], json!(3));
    }

    #[test]
    fn layout_declared_array_finds_its_pointer() {
        let (_, nodes) = build(
            json!({
                "type": "object",
                "properties": {
                    "people": {
                        "type": "array",
                        "items": {"type": "object", "properties": {"name": {"type": "string"}}}
                    }
                }
            }),
            json!([{"type": "array", "items": [{"key": "people[].name"}]}]),
            None,
        );
        let people = &nodes[0];
        assert_eq!(people.data_pointer.as_deref(), Some("/people"));
        assert!(people.items[0].array_item);
        assert_eq!(people.items[0].data_pointer.as_deref(), Some("/people/-/name"));
        assert!(people.items.last().unwrap().is_reference());
    }

    #[test]
    fn self_referential_schema_yields_lazy_reference() {
        let (ctx, nodes) = build(
            json!({
                "definitions": {
                    "node": {
                        "type": "object",
                        "properties": {
                            "label": {"type": "string"},
                            "children": {"type": "array", "items": {"$ref": "#/definitions/node"}}
                        }
                    }
                },
                "type": "object",
                "properties": {"tree": {"$ref": "#/definitions/node"}}
            }),
            json!([]),
            None,
        );
        let children = find(&nodes, "/tree/children").expect("children array");
        let reference = children.items.last().expect("add button");
        assert_eq!(reference.target(), Some("/tree"));
        assert!(reference.recursive_reference);
        assert_eq!(reference.options["title"], json!("Add to Children"));
        assert!(children.items.iter().all(LayoutNode::is_reference));
        assert!(ctx.layout_refs.get("/tree").is_some_and(|n| n.recursive_reference));
    }

    #[test]
    fn root_reference_registers_the_whole_layout() {
        let (ctx, nodes) = build(
            json!({"type": "object", "properties": {"name": {"type": "string"}, "next": {"$ref": "#"}}}),
            json!([]),
            None,
        );
        let root = ctx.layout_refs.get("").expect("root entry");
        assert_eq!(root.items.len(), nodes.len() - 1);
        assert!(root.recursive_reference);
        assert!(nodes.iter().any(|n| n.target() == Some("")));
    }

    #[test]
    fn get_layout_node_clones_with_fresh_ids_and_prefix() {
        let mut ctx = CompileContext::new(&json!({"type": "object"}), None, FormOptions::default());
        let mut entry = LayoutNode::new("section");
        entry.data_pointer = Some("/name".into());
        ctx.layout_refs.insert("/x", entry);

        let plain = get_layout_node(&mut ctx, &LayoutNode::reference("/x", "/a/-", false), None, None).unwrap();
        assert_eq!(plain.data_pointer.as_deref(), Some("/name"));
        assert!(plain.id.is_some());

        let prefixed = get_layout_node(&mut ctx, &LayoutNode::reference("/x", "/a/-", true), None, None).unwrap();
        assert_eq!(prefixed.data_pointer.as_deref(), Some("/a/-/name"));
        assert_ne!(plain.id, prefixed.id);

        let widgets = StandardWidgets::default();
        let stub = get_layout_node(&mut ctx, &LayoutNode::reference("/x", "/a/-", true), Some(&widgets as &dyn WidgetLibrary), None).unwrap();
        assert_eq!(stub.options["title"], json!("Add to A"));
        let mut named = LayoutNode::reference("/x", "/a/-/subItems", true);
        named.name = Some("subItems".into());
        let stub = get_layout_node(&mut ctx, &named, Some(&widgets as &dyn WidgetLibrary), None).unwrap();
        assert_eq!(stub.options["title"], json!("Add Sub Items"));
        let bare = get_layout_node(&mut ctx, &LayoutNode::reference("/x", "/-", true), Some(&widgets as &dyn WidgetLibrary), None).unwrap();
        assert_eq!(bare.options["title"], json!("Add"));

        let pending = LayoutNode::reference("/missing", "/b", false);
        assert_eq!(get_layout_node(&mut ctx, &pending, None, None), Some(pending.clone()));
    }

    #[test]
    fn select_title_map_is_normalized() {
        let (_, nodes) = build(
            json!({"type": "object", "properties": {"color": {"type": "string", "enum": ["r", "g"]}}}),
            json!(["color"]),
            None,
        );
        assert_eq!(nodes[0].widget_type, "select");
        assert_eq!(
            nodes[0].options["titleMap"],
            json!([
                {"name": "<em>None</em>", "value": null},
                {"name": "r", "value": "r"},
                {"name": "g", "value": "g"}
            ])
        );
    }
}
