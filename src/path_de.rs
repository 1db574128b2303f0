use std::path::Path;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::FormError;
use crate::options::FormOptions;

/// Deserialize with JSON-path context in error messages.
pub fn from_str_with_path<T: DeserializeOwned>(src: &str) -> Result<T, String> {
    let de = &mut serde_json::Deserializer::from_str(src);
    match serde_path_to_error::deserialize::<_, T>(de) {
        Ok(v) => Ok(v),
        Err(err) => {
            let path = err.path().to_string();
            Err(format!("at JSON path {path} → {}", err.into_inner()))
        }
    }
}

fn read(path: &Path) -> Result<String, FormError> {
    std::fs::read_to_string(path).map_err(|source| FormError::Io { path: path.to_path_buf(), source })
}

/// Read any JSON document.
pub fn read_json(path: &Path) -> Result<Value, FormError> {
    let src = read(path)?;
    serde_json::from_str(&src).map_err(|error| FormError::Json { path: path.to_path_buf(), message: error.to_string() })
}

/// Read a JSON document that must be an object or array of layout elements.
pub fn read_layout(path: &Path) -> Result<Vec<Value>, FormError> {
    match read_json(path)? {
        Value::Array(items) => Ok(items),
        Value::Object(mut map) => match map.remove("layout").or_else(|| map.remove("form")) {
            Some(Value::Array(items)) => Ok(items),
            _ => Err(FormError::Json {
                path: path.to_path_buf(),
                message: "expected an array, or an object with a `layout` or `form` array".into(),
            }),
        },
        _ => Err(FormError::Json { path: path.to_path_buf(), message: "expected a layout array".into() }),
    }
}

/// Read a [`FormOptions`] file, naming the offending key on failure.
pub fn read_options(path: &Path) -> Result<FormOptions, FormError> {
    let src = read(path)?;
    from_str_with_path(&src).map_err(|message| FormError::Options { path: path.to_path_buf(), message })
}

// ------------------------------- Tests ------------------------------------ //

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::Switch;

    #[test]
    fn options_errors_name_the_path() {
        let err = from_str_with_path::<FormOptions>(r#"{"fixErrors": "yes"}"#).unwrap_err();
        assert!(err.starts_with("at JSON path fixErrors"), "{err}");

        let options: FormOptions = from_str_with_path(r#"{"addSubmit": false}"#).unwrap();
        assert_eq!(options.add_submit, Switch::Never);
        assert!(options.return_empty_fields);
    }

    #[test]
    fn missing_files_are_io_errors() {
        let err = read_json(Path::new("/nonexistent/form.json")).unwrap_err();
        assert!(matches!(err, FormError::Io { .. }));
    }
}
