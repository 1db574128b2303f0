//! Control template builder.
//!
//! Walks the compiled schema and produces the tree later instantiated into
//! live controls. Shared list items and recursive references are memoized
//! through [`CompileContext::template_refs`], keyed by canonical data
//! pointer, with the entry marked `Building` before descent.

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;

use crate::coerce::is_primitive;
use crate::context::{CompileContext, RefState, TemplateKind};
use crate::layout::MAX_ITEMS_DEFAULT;
use crate::pointer;
use crate::schema::{Validators, get_control_validators, schema_types, to_data_pointer};

/// A child slot. `None` defers to a subtree that lives in the ref library.
pub type Slot = Option<ControlTemplate>;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "controlType")]
pub enum ControlTemplate {
    #[serde(rename = "FormGroup")]
    Group {
        controls: IndexMap<String, Slot>,
        #[serde(skip_serializing_if = "IndexMap::is_empty")]
        validators: Validators,
    },
    #[serde(rename = "FormArray")]
    Array {
        controls: Vec<Slot>,
        #[serde(skip_serializing_if = "IndexMap::is_empty")]
        validators: Validators,
    },
    #[serde(rename = "FormControl")]
    Leaf {
        value: Value,
        disabled: bool,
        #[serde(skip_serializing_if = "IndexMap::is_empty")]
        validators: Validators,
    },
}

impl ControlTemplate {
    pub fn validators(&self) -> &Validators {
        match self {
            ControlTemplate::Group { validators, .. }
            | ControlTemplate::Array { validators, .. }
            | ControlTemplate::Leaf { validators, .. } => validators,
        }
    }

    pub fn validators_mut(&mut self) -> &mut Validators {
        match self {
            ControlTemplate::Group { validators, .. }
            | ControlTemplate::Array { validators, .. }
            | ControlTemplate::Leaf { validators, .. } => validators,
        }
    }
}

fn kind_of(schema: &Value, types: &[String]) -> TemplateKind {
    let has = |k: &str| schema.get(k).is_some();
    let typed = |t: &str| types.iter().any(|x| x == t);
    if (has("properties") || has("additionalProperties")) && typed("object") {
        TemplateKind::Group
    } else if (has("items") || has("additionalItems")) && typed("array") {
        TemplateKind::Array
    } else if types.is_empty() && has("$ref") {
        TemplateKind::Ref
    } else {
        TemplateKind::Leaf
    }
}

/// Build the template for the schema at `schema_pointer`, bound to
/// `data_pointer`. `None` for `$ref` sites and unresolvable pointers.
pub fn build_control_template(
    ctx: &mut CompileContext,
    node_value: Option<&Value>,
    set_values: bool,
    schema_pointer: &str,
    data_pointer: &str,
    template_pointer: &str,
) -> Option<ControlTemplate> {
    let Some(schema) = pointer::get(&ctx.schema, schema_pointer).cloned() else {
        tracing::warn!(schema_pointer = %schema_pointer, "no schema at pointer");
        return None;
    };
    let mut node_value = node_value.cloned();
    if set_values && node_value.is_none() && ctx.use_schema_defaults() {
        node_value = schema.get("default").cloned();
    }

    let types = schema_types(&schema);
    let kind = kind_of(&schema, &types);

    let short = ctx.canonical(data_pointer);
    let meta = ctx.meta_mut(&short);
    if meta.schema_type.is_none() {
        meta.schema_pointer = Some(schema_pointer.to_string());
        if !types.is_empty() {
            meta.schema_type = Some(types.clone());
        }
        meta.schema_format = schema.get("format").and_then(Value::as_str).map(String::from);
    }
    if meta.template_pointer.is_none() {
        meta.template_pointer = Some(template_pointer.to_string());
        meta.template_type = Some(kind);
    }
    let disabled = meta.disabled;

    match kind {
        TemplateKind::Group => {
            let controls = build_group(ctx, &schema, node_value.as_ref(), set_values, schema_pointer, data_pointer, template_pointer);
            Some(ControlTemplate::Group { controls, validators: get_control_validators(&schema) })
        }
        TemplateKind::Array => {
            let controls = build_array(ctx, &schema, node_value.as_ref(), set_values, schema_pointer, data_pointer, template_pointer);
            Some(ControlTemplate::Array { controls, validators: get_control_validators(&schema) })
        }
        TemplateKind::Ref => {
            build_reference(ctx, &schema, set_values, template_pointer);
            None
        }
        TemplateKind::Leaf => Some(ControlTemplate::Leaf {
            value: node_value.filter(|v| set_values && is_primitive(v)).unwrap_or(Value::Null),
            disabled,
            validators: get_control_validators(&schema),
        }),
    }
}

/// Property keys in display order: `ui:order` when given, a `*` entry
/// standing for every key it does not name.
pub fn ordered_keys(schema: &Value) -> Vec<String> {
    let property_keys: Vec<String> = schema
        .get("properties")
        .and_then(Value::as_object)
        .map(|m| m.keys().cloned().collect())
        .unwrap_or_default();
    let Some(order) = schema.get("ui:order").and_then(Value::as_array) else { return property_keys };
    let order: Vec<String> = order.iter().filter_map(Value::as_str).map(String::from).collect();
    if !order.iter().any(|k| k == "*") || property_keys.iter().any(|k| k == "*") {
        return order;
    }
    let mut keys = Vec::with_capacity(property_keys.len());
    for key in &order {
        if key == "*" {
            keys.extend(property_keys.iter().filter(|k| !order.contains(k)).cloned());
        } else {
            keys.push(key.clone());
        }
    }
    keys
}

fn build_group(
    ctx: &mut CompileContext,
    schema: &Value,
    node_value: Option<&Value>,
    set_values: bool,
    schema_pointer: &str,
    data_pointer: &str,
    template_pointer: &str,
) -> IndexMap<String, Slot> {
    let properties = schema.get("properties").and_then(Value::as_object);
    let open = schema.get("additionalProperties").is_some_and(Value::is_object);
    let has_prop = |k: &str| properties.is_some_and(|p| p.contains_key(k));

    let mut keys: Vec<String> = ordered_keys(schema).into_iter().filter(|k| has_prop(k) || open).collect();
    if open {
        if let Some(values) = node_value.and_then(Value::as_object) {
            keys.extend(values.keys().filter(|k| !has_prop(k) && !keys.contains(k)).cloned().collect::<Vec<_>>());
        }
    }

    let mut controls = IndexMap::new();
    for key in keys {
        let seg = pointer::escape(&key);
        let child_schema = if has_prop(&key) {
            format!("{schema_pointer}/properties/{seg}")
        } else {
            format!("{schema_pointer}/additionalProperties")
        };
        let child_value = node_value.and_then(|v| v.get(key.as_str()));
        let child = build_control_template(
            ctx,
            child_value,
            set_values,
            &child_schema,
            &format!("{data_pointer}/{seg}"),
            &format!("{template_pointer}/controls/{seg}"),
        );
        controls.insert(key, child);
    }

    let required = required_names(schema);
    if !required.is_empty() {
        let short = ctx.canonical(data_pointer);
        ctx.meta_mut(&short).required.get_or_insert_with(|| required.clone());
    }
    if set_required_fields(schema, &mut controls) {
        ctx.fields_required = true;
    }
    controls
}

fn build_array(
    ctx: &mut CompileContext,
    schema: &Value,
    node_value: Option<&Value>,
    set_values: bool,
    schema_pointer: &str,
    data_pointer: &str,
    template_pointer: &str,
) -> Vec<Slot> {
    let meta = ctx.meta(data_pointer).cloned().unwrap_or_default();
    let schema_usize = |k: &str| schema.get(k).and_then(Value::as_u64).map(|n| n as usize);
    let min_items = schema_usize("minItems").unwrap_or(0).max(meta.min_items.unwrap_or(0));
    let max_items = schema_usize("maxItems")
        .unwrap_or(MAX_ITEMS_DEFAULT)
        .min(meta.max_items.unwrap_or(MAX_ITEMS_DEFAULT));
    let values = node_value.and_then(Value::as_array);

    let mut controls: Vec<Slot> = Vec::new();
    let mut list_schema_pointer = None;
    let mut tuple_items = 0;

    match schema.get("items") {
        Some(Value::Array(items)) => {
            tuple_items = meta.tuple_items.unwrap_or_else(|| items.len().min(max_items));
            for i in 0..tuple_items {
                let item_value = values.and_then(|xs| xs.get(i));
                let item_schema = format!("{schema_pointer}/items/{i}");
                let item_data = format!("{data_pointer}/{i}");
                let item_template = format!("{template_pointer}/controls/{i}");
                if i < min_items {
                    controls.push(build_control_template(ctx, item_value, set_values, &item_schema, &item_data, &item_template));
                    continue;
                }
                let item_ref = ctx.canonical(&item_data);
                let recursive = item_ref != ctx.generic(&item_data);
                let schema_ref = ctx.canonical_schema(&item_schema);
                memoize(ctx, set_values, &schema_ref, &item_ref, &item_template);
                controls.push(if recursive {
                    None
                } else if item_value.is_some() {
                    build_control_template(ctx, item_value, set_values, &item_schema, &item_data, &item_template)
                } else {
                    ctx.template_refs.get(&item_ref).cloned()
                });
            }
            if items.len() < max_items && schema.get("additionalItems").is_some_and(Value::is_object) {
                list_schema_pointer = Some(format!("{schema_pointer}/additionalItems"));
            }
        }
        Some(Value::Object(_)) => list_schema_pointer = Some(format!("{schema_pointer}/items")),
        _ => {}
    }

    if let Some(list_schema) = list_schema_pointer {
        let generic_item = format!("{}/-", ctx.generic(data_pointer));
        let item_ref = ctx.canonical(&generic_item);
        let recursive = item_ref != generic_item;
        let schema_ref = ctx.canonical_schema(&list_schema);
        memoize(ctx, set_values, &schema_ref, &item_ref, &format!("{template_pointer}/controls/-"));
        if !recursive || min_items > 0 {
            let known = if recursive { 0 } else { meta.tuple_items.unwrap_or(tuple_items) + meta.list_items.unwrap_or(0) };
            let length = known.max(min_items).max(values.map_or(0, Vec::len)).min(max_items);
            for i in controls.len()..length {
                let slot = match values.and_then(|xs| xs.get(i)) {
                    Some(v) => build_control_template(
                        ctx,
                        Some(v),
                        set_values,
                        &list_schema,
                        &format!("{data_pointer}/{i}"),
                        &format!("{template_pointer}/controls/{i}"),
                    ),
                    None if recursive => None,
                    None => ctx.template_refs.get(&item_ref).cloned(),
                };
                controls.push(slot);
            }
        }
    }
    controls
}

/// Build the shared subtree for `ref_pointer` once; later and reentrant
/// visits see the entry and stop.
fn memoize(ctx: &mut CompileContext, set_values: bool, schema_pointer: &str, ref_pointer: &str, template_pointer: &str) {
    if !ctx.template_refs.begin(ref_pointer) {
        return;
    }
    let built = build_control_template(ctx, None, set_values, schema_pointer, ref_pointer, template_pointer);
    ctx.template_refs.finish(ref_pointer, built);
}

fn build_reference(ctx: &mut CompileContext, schema: &Value, set_values: bool, template_pointer: &str) {
    let Some(target) = schema.get("$ref").and_then(Value::as_str).and_then(pointer::normalize) else { return };
    let Some(data_ref) = to_data_pointer(&target, &ctx.schema) else {
        tracing::warn!(reference = %target, "$ref target has no data location");
        return;
    };
    let ref_pointer = ctx.canonical(&data_ref);
    if matches!(ctx.template_refs.state(&ref_pointer), RefState::NotStarted) {
        memoize(ctx, set_values, &target, &ref_pointer, template_pointer);
    }
}

fn required_names(schema: &Value) -> Vec<String> {
    match schema.get("required") {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(xs)) => xs.iter().filter_map(Value::as_str).map(String::from).collect(),
        _ => Vec::new(),
    }
}

/// Mark each child named in `schema.required` with an empty `required`
/// validator. True when at least one child was marked.
pub fn set_required_fields(schema: &Value, controls: &mut IndexMap<String, Slot>) -> bool {
    let mut found = false;
    for name in required_names(schema) {
        if let Some(Some(child)) = controls.get_mut(&name) {
            child.validators_mut().insert("required".into(), Vec::new());
            found = true;
        }
    }
    found
}

// ------------------------------- Tests ------------------------------------ //
