//! Per-pass compile state.
//!
//! Everything the two tree builders share lives here and is threaded by
//! `&mut` through every recursive call. A context is built for one pass;
//! two passes never share one.

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;

use crate::layout::LayoutNode;
use crate::options::FormOptions;
use crate::pointer::{self, ArrayMap, RecursiveRefMap};
use crate::schema::{self, CompiledSchema};
use crate::template::ControlTemplate;

/// Which template variant was built at a pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TemplateKind {
    #[serde(rename = "FormGroup")]
    Group,
    #[serde(rename = "FormArray")]
    Array,
    #[serde(rename = "$ref")]
    Ref,
    #[serde(rename = "FormControl")]
    Leaf,
}

/// Everything known about one canonical data pointer.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PointerMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_pointer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_type: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_format: Option<String>,
    /// Required child keys (object pointers only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_pointer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_type: Option<TemplateKind>,
    /// Input type derived from the schema alone.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_type: Option<String>,
    /// Widget the layout finally chose.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub widget_type: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub disabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_items: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_items: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tuple_items: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub list_items: Option<usize>,
}

impl PointerMetadata {
    pub fn has_type(&self, ty: &str) -> bool {
        self.schema_type.as_ref().is_some_and(|ts| ts.iter().any(|t| t == ty))
    }
}

// ------------------------------ Ref library ------------------------------ //

/// Build state of one canonical pointer. `NotStarted` is never stored; it is
/// what an absent entry reads as.
#[derive(Debug, Clone, PartialEq)]
pub enum RefState<T> {
    NotStarted,
    Building,
    Ready(T),
}

/// Canonical pointer → shared subtree, doubling as the cycle breaker.
#[derive(Debug, Clone)]
pub struct RefLibrary<T> {
    entries: IndexMap<String, RefState<T>>,
}

impl<T> Default for RefLibrary<T> {
    fn default() -> Self {
        Self { entries: IndexMap::new() }
    }
}

impl<T> RefLibrary<T> {
    pub fn state(&self, key: &str) -> RefState<&T> {
        match self.entries.get(key) {
            None | Some(RefState::NotStarted) => RefState::NotStarted,
            Some(RefState::Building) => RefState::Building,
            Some(RefState::Ready(t)) => RefState::Ready(t),
        }
    }

    /// Mark `key` as building. False when it was already visited, in which
    /// case the caller must not descend.
    pub fn begin(&mut self, key: &str) -> bool {
        if matches!(self.state(key), RefState::NotStarted) {
            self.entries.insert(key.to_string(), RefState::Building);
            true
        } else {
            false
        }
    }

    /// Close a `begin`: store the subtree, or forget the key when the descent
    /// produced nothing.
    pub fn finish(&mut self, key: &str, built: Option<T>) {
        match built {
            Some(t) => {
                self.entries.insert(key.to_string(), RefState::Ready(t));
            }
            None => {
                self.entries.shift_remove(key);
            }
        }
    }

    pub fn insert(&mut self, key: &str, value: T) {
        self.entries.insert(key.to_string(), RefState::Ready(value));
    }

    pub fn get(&self, key: &str) -> Option<&T> {
        match self.entries.get(key) {
            Some(RefState::Ready(t)) => Some(t),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut T> {
        match self.entries.get_mut(key) {
            Some(RefState::Ready(t)) => Some(t),
            _ => None,
        }
    }

    pub fn ready(&self) -> impl Iterator<Item = (&str, &T)> {
        self.entries.iter().filter_map(|(k, s)| match s {
            RefState::Ready(t) => Some((k.as_str(), t)),
            _ => None,
        })
    }
}

// ------------------------------- Context --------------------------------- //

#[derive(Debug)]
pub struct CompileContext {
    /// Compiled schema: local refs inlined, recursive refs rewritten.
    pub schema: Value,
    pub schema_recursive_refs: RecursiveRefMap,
    pub data_recursive_refs: RecursiveRefMap,
    pub array_map: ArrayMap,
    pub has_root_reference: bool,
    /// Prior data supplied with the pass.
    pub form_values: Option<Value>,
    pub options: FormOptions,
    pub metadata: IndexMap<String, PointerMetadata>,
    pub template_refs: RefLibrary<ControlTemplate>,
    pub layout_refs: RefLibrary<LayoutNode>,
    /// Some object in the form declares required children.
    pub fields_required: bool,
    next_id: u64,
}

impl CompileContext {
    pub fn new(schema: &Value, form_values: Option<Value>, options: FormOptions) -> Self {
        let CompiledSchema { schema, schema_recursive_refs, data_recursive_refs, array_map, has_root_reference } =
            schema::compile_schema(schema);
        Self {
            schema,
            schema_recursive_refs,
            data_recursive_refs,
            array_map,
            has_root_reference,
            form_values: form_values.filter(|v| !crate::coerce::is_empty(v)),
            options,
            metadata: IndexMap::new(),
            template_refs: RefLibrary::default(),
            layout_refs: RefLibrary::default(),
            fields_required: false,
            next_id: 0,
        }
    }

    /// Generic form of a data pointer (list indices → `-`).
    pub fn generic(&self, data_pointer: &str) -> String {
        pointer::to_generic_pointer(data_pointer, &self.array_map)
    }

    /// Canonical form of a data pointer: the memoization key.
    pub fn canonical(&self, data_pointer: &str) -> String {
        pointer::remove_recursive_references(data_pointer, &self.data_recursive_refs, &self.array_map)
    }

    /// Canonical form of a schema pointer.
    pub fn canonical_schema(&self, schema_pointer: &str) -> String {
        pointer::remove_recursive_references(schema_pointer, &self.schema_recursive_refs, &ArrayMap::new())
    }

    /// Metadata for any concrete, generic or canonical data pointer.
    /// Both tree walks key `metadata` by canonical pointer only.
    pub fn meta(&self, data_pointer: &str) -> Option<&PointerMetadata> {
        self.metadata.get(&self.canonical(data_pointer))
    }

    pub fn meta_mut(&mut self, canonical_pointer: &str) -> &mut PointerMetadata {
        self.metadata.entry(canonical_pointer.to_string()).or_default()
    }

    pub fn fresh_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Whether schema `default`s seed values this pass.
    pub fn use_schema_defaults(&self) -> bool {
        self.options.set_schema_defaults.resolve(self.form_values.is_none())
    }
}

// ------------------------------- Tests ------------------------------------ //

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ref_library_tracks_three_states() {
        let mut lib: RefLibrary<u32> = RefLibrary::default();
        assert_eq!(lib.state("/a"), RefState::NotStarted);
        assert!(lib.begin("/a"));
        assert_eq!(lib.state("/a"), RefState::Building);
        assert!(!lib.begin("/a"));
        lib.finish("/a", Some(7));
        assert_eq!(lib.state("/a"), RefState::Ready(&7));

        assert!(lib.begin("/b"));
        lib.finish("/b", None);
        assert_eq!(lib.state("/b"), RefState::NotStarted);
    }

    #[test]
    fn canonical_folds_recursive_paths() {
        let ctx = CompileContext::new(
            &json!({
                "type": "object",
                "properties": {
                    "name": {"type": "string"},
                    "children": {"type": "array", "items": {"$ref": "#"}}
                }
            }),
            None,
            FormOptions::default(),
        );
        assert!(ctx.has_root_reference);
        assert_eq!(ctx.generic("/children/3/name"), "/children/-/name");
        assert_eq!(ctx.canonical("/children/3/children/0/name"), "/name");
        assert_eq!(ctx.canonical("/children/-"), "");
    }

    #[test]
    fn every_pointer_form_reaches_one_entry() {
        let mut ctx = CompileContext::new(
            &json!({
                "type": "object",
                "properties": {
                    "name": {"type": "string"},
                    "children": {"type": "array", "items": {"$ref": "#"}}
                }
            }),
            None,
            FormOptions::default(),
        );
        let short = ctx.canonical("/children/2/name");
        ctx.meta_mut(&short).schema_format = Some("email".into());
        for form in ["/name", "/children/-/name", "/children/2/name", "/children/0/children/5/name"] {
            assert_eq!(ctx.meta(form).and_then(|m| m.schema_format.as_deref()), Some("email"), "{form}");
        }
        assert_eq!(ctx.metadata.len(), 1);
    }
}
