//! Compile a JSON Schema, plus an optional layout and prior data, into the
//! structures a form renderer consumes: a [`ControlTemplate`] tree that is
//! later instantiated into live controls, and a [`LayoutNode`] tree that
//! says what to draw and where each widget binds.
//!
//! [`compile_form`] runs one full pass. The individual builders are public
//! for callers that need a single piece.
pub mod algebra;
pub mod coerce;
pub mod context;
pub mod control;
pub mod error;
pub mod layout;
pub mod marshal;
pub mod options;
pub mod path_de;
pub mod pointer;
pub mod schema;
pub mod template;
pub mod widgets;

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;

pub use algebra::merge_schemas;
pub use context::{CompileContext, PointerMetadata};
pub use control::{ControlNode, ValidatorRegistry, build_control, get_control};
pub use error::FormError;
pub use layout::{LayoutNode, build_layout};
pub use marshal::{format_form_data, merge_values};
pub use options::{FormOptions, Switch};
pub use template::{ControlTemplate, build_control_template};
pub use widgets::{StandardWidgets, WidgetLibrary};

// ————————————————————————————————————————————————————————————————————————————
// PIPELINE
// ————————————————————————————————————————————————————————————————————————————

/// Everything one compile pass produced.
#[derive(Debug)]
pub struct CompiledForm {
    pub layout: Vec<LayoutNode>,
    /// `None` when the schema root itself is a reference or unresolvable.
    pub template: Option<ControlTemplate>,
    pub context: CompileContext,
}

/// Serializable view of a [`CompiledForm`].
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormReport<'a> {
    pub layout: &'a [LayoutNode],
    pub template: Option<&'a ControlTemplate>,
    pub metadata: &'a IndexMap<String, PointerMetadata>,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub layout_refs: IndexMap<&'a str, &'a LayoutNode>,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub template_refs: IndexMap<&'a str, &'a ControlTemplate>,
}

/// Run a full pass: the layout walk first (it records array bounds), then
/// the template walk seeded with `data`.
pub fn compile_form(
    schema: &Value,
    layout: &[Value],
    data: Option<Value>,
    options: FormOptions,
    widgets: &dyn WidgetLibrary,
) -> CompiledForm {
    let mut context = CompileContext::new(schema, data, options);
    let layout = build_layout(&mut context, layout, widgets);
    let form_values = context.form_values.clone();
    let template = build_control_template(&mut context, form_values.as_ref(), true, "", "", "");
    tracing::debug!(
        layout_nodes = layout.len(),
        metadata_entries = context.metadata.len(),
        "compiled form"
    );
    CompiledForm { layout, template, context }
}

impl CompiledForm {
    /// Format raw control values with the pass's own options.
    pub fn format(&self, raw: &Value) -> Value {
        let options = &self.context.options;
        format_form_data(raw, &self.context, options.return_empty_fields, options.fix_errors)
    }

    pub fn instantiate(&self, registry: &ValidatorRegistry) -> Option<ControlNode> {
        self.template.as_ref().map(|t| build_control(t, registry))
    }

    pub fn report(&self) -> FormReport<'_> {
        FormReport {
            layout: &self.layout,
            template: self.template.as_ref(),
            metadata: &self.context.metadata,
            layout_refs: self.context.layout_refs.ready().collect(),
            template_refs: self.context.template_refs.ready().collect(),
        }
    }
}

// ------------------------------- Tests ------------------------------------ //

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RefState;
    use serde_json::json;

    fn person() -> Value {
        json!({
            "type": "object",
            "required": ["name"],
            "properties": {
                "name": {"type": "string"},
                "age": {"type": "integer", "default": 30},
                "tags": {"type": "array", "items": {"type": "string"}}
            }
        })
    }

    #[test]
    fn full_pass_binds_layout_and_template() {
        let form = compile_form(&person(), &[], None, FormOptions::default(), &StandardWidgets::default());

        let pointers: Vec<_> = form.layout.iter().filter_map(|n| n.data_pointer.as_deref()).collect();
        assert_eq!(pointers, vec!["/name", "/age", "/tags"]);
        assert_eq!(form.layout.last().map(|n| n.widget_type.as_str()), Some("submit"));

        let Some(ControlTemplate::Group { controls, validators }) = &form.template else {
            panic!("expected a group template, got {:?}", form.template);
        };
        assert!(validators.is_empty());
        assert!(matches!(
            controls.get("name"),
            Some(Some(ControlTemplate::Leaf { validators, .. })) if validators.contains_key("required")
        ));
        assert!(matches!(
            controls.get("age"),
            Some(Some(ControlTemplate::Leaf { value, .. })) if *value == json!(30)
        ));

        let tags = form.context.meta("/tags/0").map(|m| m.schema_type.clone());
        assert_eq!(tags, Some(Some(vec!["string".to_string()])));
        assert_eq!(form.context.meta("/tags").and_then(|m| m.list_items), Some(1));
    }

    #[test]
    fn prior_data_suppresses_schema_defaults() {
        let data = json!({"name": "Ada"});
        let form = compile_form(&person(), &[], Some(data), FormOptions::default(), &StandardWidgets::default());
        let Some(ControlTemplate::Group { controls, .. }) = &form.template else {
            panic!("expected a group template");
        };
        assert!(matches!(
            controls.get("name"),
            Some(Some(ControlTemplate::Leaf { value, .. })) if *value == json!("Ada")
        ));
        assert!(matches!(
            controls.get("age"),
            Some(Some(ControlTemplate::Leaf { value, .. })) if value.is_null()
        ));
    }

    #[test]
    fn instantiated_form_formats_its_own_values() {
        let options = FormOptions { return_empty_fields: false, ..FormOptions::default() };
        let data = json!({"name": "Ada", "age": "36", "tags": ["x"]});
        let form = compile_form(&person(), &[], Some(data), options, &StandardWidgets::default());
        let control = form.instantiate(&ValidatorRegistry::new());
        let raw = control.map(|c| c.value()).unwrap_or_default();
        assert_eq!(form.format(&raw), json!({"name": "Ada", "age": 36, "tags": ["x"]}));
    }

    #[test]
    fn root_ref_to_self_referencing_definition_terminates() {
        let schema = json!({
            "$ref": "#/definitions/node",
            "definitions": {
                "node": {
                    "type": "object",
                    "properties": {
                        "label": {"type": "string"},
                        "children": {"type": "array", "items": {"$ref": "#/definitions/node"}}
                    }
                }
            }
        });
        let data = json!({"label": "root", "children": [{"label": "leaf"}]});
        let form = compile_form(&schema, &[], Some(data.clone()), FormOptions::default(), &StandardWidgets::default());

        assert!(form.context.has_root_reference);
        assert_eq!(form.context.canonical("/children/0/children/3/label"), "/label");
        assert!(matches!(form.context.layout_refs.state(""), RefState::Ready(_)));

        let Some(ControlTemplate::Group { controls, .. }) = &form.template else {
            panic!("expected a group template, got {:?}", form.template);
        };
        assert!(matches!(controls.get("label"), Some(Some(ControlTemplate::Leaf { .. }))));
        assert!(matches!(controls.get("children"), Some(Some(ControlTemplate::Array { .. }))));

        let mut references = 0;
        for node in &form.layout {
            node.for_each(&mut |n| references += usize::from(n.is_reference()));
        }
        assert!(references > 0);
        assert!(serde_json::to_value(form.report()).is_ok());
        assert_eq!(form.format(&data), data);
    }

    #[test]
    fn report_serializes_every_part() {
        let form = compile_form(&person(), &[], None, FormOptions::default(), &StandardWidgets::default());
        let report = serde_json::to_value(form.report()).unwrap();
        assert!(report["layout"].is_array());
        assert!(report["template"].is_object());
        assert_eq!(report["metadata"]["/name"]["schemaType"], json!(["string"]));
        assert!(report["layoutRefs"].get("/tags/-").is_some());
    }
}
