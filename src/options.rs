//! Compile-pass configuration.
//!
//! Every field has a default so an options file only needs the keys it
//! changes. Tri-state switches accept either `"auto"` or a boolean.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value, json};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FormOptions {
    /// Append a submit node to the layout.
    pub add_submit: Switch,
    /// Seed values from schema `default` keywords.
    pub set_schema_defaults: Switch,
    /// Keep empty containers and unset leaves when formatting data.
    pub return_empty_fields: bool,
    /// Coerce with the lenient ladder instead of canonical conversion.
    pub fix_errors: bool,
    /// Options every layout node starts from.
    pub default_widget_options: Map<String, Value>,
}

impl Default for FormOptions {
    fn default() -> Self {
        let defaults = json!({
            "addable": true,
            "orderable": true,
            "removable": true,
            "enableErrorState": true,
            "enableSuccessState": true,
            "feedback": false,
            "feedbackOnRender": false,
            "notitle": false,
            "disabled": false,
            "readonly": false,
            "returnEmptyFields": true
        });
        Self {
            add_submit: Switch::Auto,
            set_schema_defaults: Switch::Auto,
            return_empty_fields: true,
            fix_errors: false,
            default_widget_options: defaults.as_object().cloned().unwrap_or_default(),
        }
    }
}

/// `"auto"`, `true` or `false`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Switch {
    #[default]
    Auto,
    Always,
    Never,
}

impl Switch {
    /// Resolve `Auto` with the caller's fallback.
    pub fn resolve(self, auto: bool) -> bool {
        match self {
            Switch::Auto => auto,
            Switch::Always => true,
            Switch::Never => false,
        }
    }
}

impl<'de> Deserialize<'de> for Switch {
    fn deserialize<D: Deserializer<'de>>(de: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Flag(bool),
            Word(String),
        }
        match Raw::deserialize(de)? {
            Raw::Flag(true) => Ok(Switch::Always),
            Raw::Flag(false) => Ok(Switch::Never),
            Raw::Word(w) => match w.as_str() {
                "auto" => Ok(Switch::Auto),
                "always" | "true" => Ok(Switch::Always),
                "never" | "false" => Ok(Switch::Never),
                other => Err(serde::de::Error::custom(format!("expected \"auto\" or a boolean, got {other:?}"))),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_options_keep_defaults() {
        let opts: FormOptions = serde_json::from_value(json!({"addSubmit": false, "fixErrors": true})).unwrap();
        assert_eq!(opts.add_submit, Switch::Never);
        assert_eq!(opts.set_schema_defaults, Switch::Auto);
        assert!(opts.fix_errors);
        assert!(opts.return_empty_fields);
        assert_eq!(opts.default_widget_options["addable"], json!(true));
    }

    #[test]
    fn switch_rejects_garbage() {
        assert!(serde_json::from_value::<FormOptions>(json!({"addSubmit": "sometimes"})).is_err());
    }
}
