//! Live control trees.
//!
//! [`build_control`] instantiates a [`ControlTemplate`] into [`ControlNode`]s,
//! turning each declarative validator entry into a function through a
//! [`ValidatorRegistry`]. The registry only wires names to factories; what a
//! validator checks is up to whoever registers it.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::pointer;
use crate::schema::Validators;
use crate::template::ControlTemplate;

/// Returns an error object, or `None` when the value passes.
pub type ValidatorFn = Arc<dyn Fn(&Value) -> Option<Value> + Send + Sync>;

type Factory = Arc<dyn Fn(&[Value]) -> Option<ValidatorFn> + Send + Sync>;

/// Validator name → factory taking the declared argument list.
#[derive(Clone, Default)]
pub struct ValidatorRegistry {
    factories: IndexMap<String, Factory>,
}

impl ValidatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: &str, factory: F) -> &mut Self
    where
        F: Fn(&[Value]) -> Option<ValidatorFn> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_string(), Arc::new(factory));
        self
    }

    /// Instantiate every declared validator the registry knows.
    pub fn resolve(&self, validators: &Validators) -> Vec<ValidatorFn> {
        validators
            .iter()
            .filter_map(|(name, args)| match self.factories.get(name) {
                Some(factory) => factory(args.as_slice()),
                None => {
                    tracing::debug!(validator = %name, "no factory registered, skipping");
                    None
                }
            })
            .collect()
    }
}

/// Run every validator, merging the error objects they return.
pub fn compose(validators: Vec<ValidatorFn>) -> Option<ValidatorFn> {
    if validators.is_empty() {
        return None;
    }
    Some(Arc::new(move |value: &Value| {
        let mut errors = Map::new();
        for validator in &validators {
            match validator(value) {
                Some(Value::Object(m)) => errors.extend(m),
                Some(other) => {
                    errors.insert(format!("error{}", errors.len()), other);
                }
                None => {}
            }
        }
        if errors.is_empty() { None } else { Some(Value::Object(errors)) }
    }))
}

pub enum ControlNode {
    Group { controls: IndexMap<String, ControlNode>, validator: Option<ValidatorFn> },
    Array { controls: Vec<ControlNode>, validator: Option<ValidatorFn> },
    Leaf { value: Value, disabled: bool, validators: Vec<ValidatorFn> },
}

impl fmt::Debug for ControlNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlNode::Group { controls, .. } => f.debug_map().entries(controls.iter()).finish(),
            ControlNode::Array { controls, .. } => f.debug_list().entries(controls.iter()).finish(),
            ControlNode::Leaf { value, disabled, .. } => {
                f.debug_struct("Leaf").field("value", value).field("disabled", disabled).finish()
            }
        }
    }
}

/// Instantiate a template. Slots that defer to the ref library are omitted.
pub fn build_control(template: &ControlTemplate, registry: &ValidatorRegistry) -> ControlNode {
    match template {
        ControlTemplate::Group { controls, validators } => ControlNode::Group {
            controls: controls
                .iter()
                .filter_map(|(k, slot)| slot.as_ref().map(|t| (k.clone(), build_control(t, registry))))
                .collect(),
            validator: compose(registry.resolve(validators)),
        },
        ControlTemplate::Array { controls, validators } => ControlNode::Array {
            controls: controls.iter().flatten().map(|t| build_control(t, registry)).collect(),
            validator: compose(registry.resolve(validators)),
        },
        ControlTemplate::Leaf { value, disabled, validators } => ControlNode::Leaf {
            value: value.clone(),
            disabled: *disabled,
            validators: registry.resolve(validators),
        },
    }
}

impl ControlNode {
    /// Raw value of the subtree.
    pub fn value(&self) -> Value {
        match self {
            ControlNode::Group { controls, .. } => {
                Value::Object(controls.iter().map(|(k, c)| (k.clone(), c.value())).collect())
            }
            ControlNode::Array { controls, .. } => Value::Array(controls.iter().map(ControlNode::value).collect()),
            ControlNode::Leaf { value, .. } => value.clone(),
        }
    }

    /// Overwrite a leaf's value. False for containers.
    pub fn set_value(&mut self, new_value: Value) -> bool {
        match self {
            ControlNode::Leaf { value, .. } => {
                *value = new_value;
                true
            }
            _ => false,
        }
    }

    /// Run validators over the subtree. Errors are keyed by data pointer.
    pub fn validate(&self) -> IndexMap<String, Value> {
        let mut errors = IndexMap::new();
        self.validate_into("", &mut errors);
        errors
    }

    fn validate_into(&self, at: &str, errors: &mut IndexMap<String, Value>) {
        match self {
            ControlNode::Group { controls, validator } => {
                if let Some(e) = validator.as_ref().and_then(|v| v(&self.value())) {
                    errors.insert(at.to_string(), e);
                }
                for (k, c) in controls {
                    c.validate_into(&format!("{at}/{}", pointer::escape(k)), errors);
                }
            }
            ControlNode::Array { controls, validator } => {
                if let Some(e) = validator.as_ref().and_then(|v| v(&self.value())) {
                    errors.insert(at.to_string(), e);
                }
                for (i, c) in controls.iter().enumerate() {
                    c.validate_into(&format!("{at}/{i}"), errors);
                }
            }
            ControlNode::Leaf { value, disabled, validators } => {
                if *disabled {
                    return;
                }
                if let Some(e) = compose(validators.clone()).and_then(|v| v(value)) {
                    errors.insert(at.to_string(), e);
                }
            }
        }
    }
}

// ------------------------------- Lookup ---------------------------------- //

/// A tree addressable by data pointer segments.
pub trait ControlTree {
    fn child(&self, key: &str) -> Option<&Self>;
}

impl ControlTree for ControlNode {
    fn child(&self, key: &str) -> Option<&Self> {
        match self {
            ControlNode::Group { controls, .. } => controls.get(key),
            ControlNode::Array { controls, .. } if key == "-" => controls.last(),
            ControlNode::Array { controls, .. } => controls.get(key.parse::<usize>().ok()?),
            ControlNode::Leaf { .. } => None,
        }
    }
}

impl ControlTree for ControlTemplate {
    fn child(&self, key: &str) -> Option<&Self> {
        match self {
            ControlTemplate::Group { controls, .. } => controls.get(key)?.as_ref(),
            ControlTemplate::Array { controls, .. } if key == "-" => controls.last()?.as_ref(),
            ControlTemplate::Array { controls, .. } => controls.get(key.parse::<usize>().ok()?)?.as_ref(),
            ControlTemplate::Leaf { .. } => None,
        }
    }
}

/// Resolve a JSON Pointer or dot path. With `return_group` the container
/// holding the addressed node is returned instead.
pub fn get_control<'a, N: ControlTree>(root: &'a N, data_pointer: &str, return_group: bool) -> Option<&'a N> {
    let Some(mut keys) = pointer::parse(data_pointer) else {
        tracing::warn!(pointer = %data_pointer, "not a pointer or object path");
        return None;
    };
    if return_group {
        keys.pop();
    }
    let mut cur = root;
    for key in &keys {
        match cur.child(key) {
            Some(next) => cur = next,
            None => {
                tracing::warn!(pointer = %data_pointer, key = %key, "unable to find control");
                return None;
            }
        }
    }
    Some(cur)
}

// ------------------------------- Tests ------------------------------------ //
