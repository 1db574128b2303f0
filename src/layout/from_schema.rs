//! Layout synthesized from the schema alone.

use serde_json::{Value, json};

use super::{
    ArrayBounds, ArrayItemType, LayoutFragment, LayoutKind, LayoutNode, MAX_ITEMS_DEFAULT, add_button, get_layout_node,
    is_numeric, settle_title_map, starts_with_add, usize_at,
};
use crate::context::CompileContext;
use crate::pointer;
use crate::schema::{is_input_required, to_data_pointer};
use crate::template::ordered_keys;
use crate::widgets::{WidgetLibrary, fix_title, get_input_type, primary_type, update_input_options};

/// Arguments of one [`build_layout_from_schema`] call.
#[derive(Debug, Clone, Default)]
pub struct SchemaLayout {
    pub node_value: Option<Value>,
    pub schema_pointer: String,
    pub data_pointer: String,
    pub array_item: bool,
    pub array_item_type: Option<ArrayItemType>,
    pub removable: Option<bool>,
    /// Building a ref library entry: no ids, and the root object stays a
    /// single section.
    pub for_ref_library: bool,
    /// Data location the entry is built for, when `data_pointer` is
    /// relative to a recursive reference.
    pub data_pointer_prefix: String,
}

/// Synthesize layout for the schema at `args.schema_pointer`.
///
/// `None` for schemas with no `type`, `$ref` or `x-schema-form`. The root
/// object (outside the ref library) yields its children spliced.
pub fn build_layout_from_schema(
    ctx: &mut CompileContext,
    widgets: Option<&dyn WidgetLibrary>,
    args: SchemaLayout,
) -> Option<LayoutFragment> {
    let SchemaLayout {
        mut node_value,
        schema_pointer,
        data_pointer,
        array_item,
        array_item_type,
        removable,
        for_ref_library,
        data_pointer_prefix,
    } = args;
    let schema = pointer::get(&ctx.schema, &schema_pointer)?.clone();
    if ["type", "$ref", "x-schema-form"].iter().all(|k| schema.get(*k).is_none()) {
        return None;
    }
    let input_type = get_input_type(&schema, None);
    if node_value.is_none() && ctx.use_schema_defaults() {
        node_value = schema.get("default").cloned();
    }

    let mut node = LayoutNode::new(&input_type);
    if !for_ref_library {
        node.id = Some(ctx.fresh_id());
    }
    let dp = ctx.generic(&data_pointer);
    node.name = pointer::to_key(&dp).filter(|k| k != "-");
    node.data_pointer = Some(dp.clone());
    node.schema_pointer = Some(schema_pointer.clone());
    node.data_type = primary_type(&schema).or_else(|| schema.get("$ref").map(|_| "$ref".to_string()));
    node.required = is_input_required(&ctx.schema, &schema_pointer);
    node.array_item = array_item;
    if array_item {
        node.array_item_type = array_item_type;
        node.options.insert("removable".into(), json!(removable != Some(false)));
    }

    let short = ctx.canonical(&format!("{data_pointer_prefix}{dp}"));
    let disabled = node.option_bool("disabled").unwrap_or(false);
    let meta = ctx.meta_mut(&short);
    if meta.input_type.is_none() {
        meta.schema_pointer = Some(schema_pointer.clone());
        meta.input_type = Some(input_type.clone());
        meta.widget_type = Some(input_type.clone());
        meta.disabled = disabled;
    }

    let defaults = ctx.options.default_widget_options.clone();
    node.options = update_input_options(&node.options, &schema, &defaults);
    if node.title().is_none() {
        if let Some(name) = node.name.as_deref().filter(|n| !is_numeric(n)) {
            node.options.insert("title".into(), json!(fix_title(name)));
        }
    }

    match node.data_type.as_deref() {
        Some("object") => {
            let required: Vec<String> = schema
                .get("required")
                .and_then(Value::as_array)
                .map(|r| r.iter().filter_map(Value::as_str).map(String::from).collect())
                .unwrap_or_default();
            if !required.is_empty() {
                ctx.meta_mut(&short).required.get_or_insert_with(|| required.clone());
            }
            if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
                let open = schema.get("additionalProperties").is_some_and(Value::is_object);
                let mut section = Vec::new();
                for key in ordered_keys(&schema) {
                    let declared = properties.contains_key(&key);
                    if !declared && !open {
                        continue;
                    }
                    let seg = pointer::escape(&key);
                    let child_schema = if declared {
                        format!("{schema_pointer}/properties/{seg}")
                    } else {
                        format!("{schema_pointer}/additionalProperties")
                    };
                    let child = build_layout_from_schema(ctx, widgets, SchemaLayout {
                        node_value: node_value.as_ref().and_then(|v| v.get(key.as_str())).cloned(),
                        schema_pointer: child_schema,
                        data_pointer: format!("{data_pointer}/{seg}"),
                        for_ref_library,
                        data_pointer_prefix: data_pointer_prefix.clone(),
                        ..SchemaLayout::default()
                    });
                    let Some(child) = child else { continue };
                    let mut child = child.into_node();
                    if required.contains(&key) {
                        child.required = true;
                        ctx.fields_required = true;
                    }
                    section.push(child);
                }
                if data_pointer.is_empty() && !for_ref_library {
                    return Some(LayoutFragment::Many(section));
                }
                node.items = section;
                node.kind = LayoutKind::Container;
            }
        }
        Some("array") => {
            let bounds = array_items(
                ctx,
                widgets,
                &mut node,
                &schema,
                node_value.as_ref(),
                &schema_pointer,
                &data_pointer,
                &short,
            );
            node.kind = LayoutKind::Array(bounds);
        }
        Some("$ref") => reference(ctx, widgets, &mut node, &schema, &schema_pointer, &data_pointer)?,
        _ => {}
    }

    if !node.items.is_empty() && matches!(node.kind, LayoutKind::Input) {
        node.kind = LayoutKind::Container;
    }
    settle_title_map(&mut node);
    Some(LayoutFragment::One(node))
}

#[allow(clippy::too_many_arguments)]
fn array_items(
    ctx: &mut CompileContext,
    widgets: Option<&dyn WidgetLibrary>,
    node: &mut LayoutNode,
    schema: &Value,
    node_value: Option<&Value>,
    schema_pointer: &str,
    data_pointer: &str,
    short: &str,
) -> ArrayBounds {
    let mut bounds = ArrayBounds {
        max_items: usize_at(schema, "maxItems")
            .unwrap_or(MAX_ITEMS_DEFAULT)
            .min(node.option_usize("maxItems").unwrap_or(MAX_ITEMS_DEFAULT)),
        min_items: usize_at(schema, "minItems").unwrap_or(0).max(node.option_usize("minItems").unwrap_or(0)),
        list_items: node.option_usize("listItems").unwrap_or(1),
        tuple_items: schema.get("items").and_then(Value::as_array).map_or(0, Vec::len),
    };
    if bounds.min_items == 0 && is_input_required(&ctx.schema, schema_pointer) {
        bounds.min_items = 1;
    }
    let bounds = bounds.settle();
    bounds.write_options(&mut node.options);
    let meta = ctx.meta_mut(short);
    if meta.max_items.is_none() {
        meta.max_items = Some(bounds.max_items);
        meta.min_items = Some(bounds.min_items);
        meta.tuple_items = Some(bounds.tuple_items);
        meta.list_items = Some(bounds.list_items);
    }
    ctx.array_map.entry(short.to_string()).or_insert(bounds.tuple_items);

    let removable = node.option_bool("removable") != Some(false);
    let values = node_value.and_then(Value::as_array);
    let mut list_schema = None;

    match schema.get("items") {
        Some(Value::Array(_)) => {
            for i in 0..bounds.tuple_items {
                let item_value = values.and_then(|xs| xs.get(i));
                let item_data = format!("{short}/{i}");
                let item_ref = ctx.canonical(&item_data);
                let item_recursive = item_ref.is_empty() || item_ref != item_data;
                let item_schema = format!("{schema_pointer}/items/{i}");
                let item = if removable && i >= bounds.min_items {
                    if ctx.layout_refs.begin(&item_ref) {
                        let built = build_layout_from_schema(ctx, widgets, SchemaLayout {
                            node_value: item_value.cloned(),
                            schema_pointer: item_schema,
                            data_pointer: if item_recursive { String::new() } else { format!("{data_pointer}/{i}") },
                            array_item: true,
                            array_item_type: Some(ArrayItemType::Tuple),
                            removable: Some(true),
                            for_ref_library: true,
                            data_pointer_prefix: if item_recursive { format!("{data_pointer}/{i}") } else { String::new() },
                        });
                        let built = built.map(LayoutFragment::into_node).map(|mut n| {
                            n.recursive_reference |= item_recursive;
                            n
                        });
                        ctx.layout_refs.finish(&item_ref, built);
                    }
                    let recursive = ctx.layout_refs.get(&item_ref).is_some_and(|n| n.recursive_reference);
                    let ref_node = LayoutNode::reference(&item_ref, &format!("{data_pointer}/{i}"), recursive);
                    get_layout_node(ctx, &ref_node, widgets, item_value)
                } else {
                    build_layout_from_schema(ctx, widgets, SchemaLayout {
                        node_value: item_value.cloned(),
                        schema_pointer: item_schema,
                        data_pointer: format!("{data_pointer}/{i}"),
                        array_item: true,
                        array_item_type: Some(ArrayItemType::Tuple),
                        removable: Some(false),
                        for_ref_library: false,
                        data_pointer_prefix: String::new(),
                    })
                    .map(LayoutFragment::into_node)
                };
                node.items.extend(item);
            }
            if schema.get("additionalItems").is_some_and(Value::is_object) {
                list_schema = Some(format!("{schema_pointer}/additionalItems"));
            }
        }
        Some(Value::Object(_)) => list_schema = Some(format!("{schema_pointer}/items")),
        _ => {}
    }

    let Some(list_schema) = list_schema else { return bounds };
    let item_data = format!("{short}/-");
    let item_ref = ctx.canonical(&item_data);
    let item_recursive = item_ref.is_empty() || item_ref != item_data;
    let item_schema = ctx.canonical_schema(&list_schema);

    if node.items.len() < bounds.max_items && ctx.layout_refs.begin(&item_ref) {
        let built = build_layout_from_schema(ctx, widgets, SchemaLayout {
            node_value: None,
            schema_pointer: item_schema,
            data_pointer: if item_recursive { String::new() } else { format!("{data_pointer}/-") },
            array_item: true,
            array_item_type: Some(ArrayItemType::List),
            removable: Some(removable),
            for_ref_library: true,
            data_pointer_prefix: if item_recursive { format!("{data_pointer}/-") } else { String::new() },
        });
        let built = built.map(LayoutFragment::into_node).map(|mut n| {
            n.recursive_reference |= item_recursive;
            n
        });
        ctx.layout_refs.finish(&item_ref, built);
    }

    if !item_recursive || node.required {
        let known = if item_recursive { 0 } else { bounds.tuple_items + bounds.list_items };
        let length = known.max(values.map_or(0, Vec::len)).min(bounds.max_items);
        let recursive = ctx.layout_refs.get(&item_ref).is_some_and(|n| n.recursive_reference);
        let ref_node = LayoutNode::reference(&item_ref, &format!("{data_pointer}/-"), recursive);
        for i in node.items.len()..length {
            let item = get_layout_node(ctx, &ref_node, widgets, values.and_then(|xs| xs.get(i)));
            node.items.extend(item);
        }
    }

    let extensible = node.option_bool("addable") != Some(false) && bounds.min_items < bounds.max_items;
    if extensible && !node.items.last().is_some_and(LayoutNode::is_reference) {
        let library_title = ctx.layout_refs.get(&item_ref).and_then(LayoutNode::title).map(String::from);
        let prefix = if library_title.is_some() { "Add " } else { "Add to " };
        let text = library_title
            .or_else(|| schema.get("title").and_then(Value::as_str).map(String::from))
            .unwrap_or_else(|| fix_title(&pointer::to_key(data_pointer).unwrap_or_default()));
        let title = if starts_with_add(&text) { text } else { format!("{prefix}{text}") };
        let dp = node.data_pointer.clone().unwrap_or_default();
        let button = add_button(ctx, &dp, &item_ref, item_recursive, &bounds, title);
        node.items.push(button);
    }
    bounds
}

/// Turn `node` into a lazy reference and make sure its target is in the
/// layout ref library. `None` when the target has no data location.
fn reference(
    ctx: &mut CompileContext,
    widgets: Option<&dyn WidgetLibrary>,
    node: &mut LayoutNode,
    schema: &Value,
    schema_pointer: &str,
    data_pointer: &str,
) -> Option<()> {
    let schema_ref = schema.get("$ref").and_then(Value::as_str).and_then(pointer::normalize)?;
    let Some(data_ref) = to_data_pointer(&schema_ref, &ctx.schema) else {
        tracing::warn!(reference = %schema_ref, "$ref target has no data location");
        return None;
    };
    let data_ref = ctx.canonical(&data_ref);

    let parent_schema = pointer::parent(schema_pointer, 1).and_then(|p| pointer::get(&ctx.schema, &p)).cloned();
    let title = if let Some(add) = node.options.get("add").and_then(Value::as_str) {
        add.to_string()
    } else if let Some(name) = node.name.as_deref().filter(|n| !is_numeric(n)) {
        if starts_with_add(name) { fix_title(name) } else { format!("Add {}", fix_title(name)) }
    } else if let Some(title) = parent_schema.as_ref().and_then(|p| p.get("title")).and_then(Value::as_str) {
        format!("Add to {title}")
    } else {
        pointer::parse(data_pointer)
            .and_then(|keys| keys.iter().rev().nth(1).cloned())
            .map(|k| format!("Add to {}", fix_title(&k)))
            .unwrap_or_default()
    };

    node.recursive_reference = true;
    node.kind = LayoutKind::Reference { target: data_ref.clone() };
    node.options.insert("removable".into(), json!(false));
    node.options.insert("title".into(), json!(title));
    if let Some(max) = parent_schema.as_ref().and_then(|p| p.get("maxItems")).filter(|m| m.is_number()) {
        node.options.insert("maxItems".into(), max.clone());
    }

    if !data_ref.is_empty() {
        if ctx.layout_refs.begin(&data_ref) {
            let built = build_layout_from_schema(ctx, widgets, SchemaLayout {
                node_value: None,
                schema_pointer: schema_ref,
                data_pointer: String::new(),
                array_item: node.array_item,
                array_item_type: node.array_item_type,
                removable: Some(true),
                for_ref_library: true,
                data_pointer_prefix: data_pointer.to_string(),
            });
            let built = built.map(LayoutFragment::into_node).map(|mut n| {
                n.recursive_reference = true;
                n
            });
            ctx.layout_refs.finish(&data_ref, built);
        } else if let Some(entry) = ctx.layout_refs.get_mut(&data_ref) {
            entry.recursive_reference = true;
        }
    }
    Some(())
}

// ------------------------------- Tests ------------------------------------ //
