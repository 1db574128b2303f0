//! Schema algebra: fold N schema fragments into one.
//!
//! The fold works key by key onto an accumulator. Identical values, and keys
//! seen for the first time, are taken as-is; conflicting values go through
//! the keyword's combinator in [`keywords`]. A combinator that cannot
//! reconcile its two sides aborts the *whole* merge, which then degrades to
//! `{"allOf": [...inputs]}` rather than returning partial output.
//!
//! Laws the fold keeps:
//! - idempotent: `merge([A, A]) == A`;
//! - never panics, never errors: unmergeable input is an `allOf` wrapper;
//! - the only `None` result is a non-object entry among the inputs.
pub mod keywords;

use serde_json::{Map, Value};

use crate::coerce::is_empty;

/// Result of combining one keyword's two conflicting values.
pub(crate) enum Combine {
    /// Store this value under the key.
    Set(Value),
    /// Write nothing (keep the accumulator's value).
    Keep,
    /// Abandon the merge.
    Abort,
}

/// Merge schema fragments left to right.
///
/// Empty fragments (`null`, `{}`, `[]`, `""`) are ignored. Returns `None` if
/// any remaining fragment is not an object.
pub fn merge_schemas(schemas: &[Value]) -> Option<Value> {
    let schemas: Vec<&Value> = schemas.iter().filter(|s| !is_empty(s)).collect();
    if schemas.iter().any(|s| !s.is_object()) {
        return None;
    }
    Some(fold(&schemas).unwrap_or_else(|| all_of(&schemas)))
}

/// Convenience over two fragments.
pub fn merge_pair(a: &Value, b: &Value) -> Option<Value> {
    merge_schemas(&[a.clone(), b.clone()])
}

/// `true` when the value is the fallback shape produced by an aborted merge.
pub fn is_all_of_wrapper(v: &Value) -> bool {
    v.as_object().is_some_and(|m| m.len() == 1 && m.get("allOf").is_some_and(Value::is_array))
}

fn all_of(schemas: &[&Value]) -> Value {
    let mut out = Map::new();
    out.insert("allOf".into(), Value::Array(schemas.iter().map(|s| (*s).clone()).collect()));
    Value::Object(out)
}

fn fold(schemas: &[&Value]) -> Option<Value> {
    let mut combined = Map::new();
    for schema in schemas {
        let Some(map) = schema.as_object() else { continue };
        let prior_additional = combined.get("additionalProperties").cloned();
        for (key, incoming) in map {
            let existing = match combined.get(key) {
                None => {
                    combined.insert(key.clone(), incoming.clone());
                    continue;
                }
                Some(existing) if existing == incoming => continue,
                Some(existing) => existing.clone(),
            };
            let siblings = keywords::Siblings {
                prior_additional: prior_additional.as_ref(),
                incoming_additional: map.get("additionalProperties"),
                required: combined.get("required"),
            };
            match keywords::combine(key, &existing, incoming, &siblings) {
                Combine::Set(v) => {
                    combined.insert(key.clone(), v);
                }
                Combine::Keep => {}
                Combine::Abort => {
                    tracing::debug!(keyword = %key, "schema merge aborted, falling back to allOf");
                    return None;
                }
            }
        }
    }
    Some(Value::Object(combined))
}

// ------------------------------- Tests ------------------------------------ //

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn merge2(a: Value, b: Value) -> Value {
        merge_schemas(&[a, b]).unwrap()
    }

    #[test]
    fn idempotent() {
        let a = json!({
            "type": "object",
            "title": "Person",
            "properties": {"name": {"type": "string", "maxLength": 10}},
            "required": ["name"],
            "items": [{"type": "string"}],
            "enum": [1, 2]
        });
        assert_eq!(merge2(a.clone(), a.clone()), a);
    }

    #[test]
    fn numeric_bounds_fold_to_the_tighter_side() {
        assert_eq!(
            merge2(json!({"type": "string", "maximum": 5}), json!({"type": "string", "maximum": 3})),
            json!({"type": "string", "maximum": 3})
        );
        assert_eq!(
            merge2(json!({"type": "string", "minimum": 5}), json!({"type": "string", "minimum": 3})),
            json!({"type": "string", "minimum": 5})
        );
    }

    #[test]
    fn disjoint_types_abort_to_all_of() {
        let a = json!({"type": "string"});
        let b = json!({"type": "number"});
        assert_eq!(merge2(a.clone(), b.clone()), json!({"allOf": [a, b]}));
    }

    #[test]
    fn type_lists_intersect() {
        assert_eq!(
            merge2(json!({"type": ["string", "null"]}), json!({"type": ["null", "integer", "string"]})),
            json!({"type": ["string", "null"]})
        );
        assert_eq!(merge2(json!({"type": ["string", "null"]}), json!({"type": "string"})), json!({"type": "string"}));
    }

    #[test]
    fn non_objects_fail_and_empties_are_skipped() {
        assert!(merge_schemas(&[json!({"type": "string"}), json!(3)]).is_none());
        assert_eq!(merge_schemas(&[json!({}), json!(null), json!({"a": 1})]), Some(json!({"a": 1})));
    }

    #[test]
    fn set_keywords_intersect() {
        assert_eq!(merge2(json!({"enum": [1, 2, 3]}), json!({"enum": [3, 2, 9]})), json!({"enum": [2, 3]}));
        let a = json!({"enum": [1]});
        let b = json!({"enum": [2]});
        assert_eq!(merge2(a.clone(), b.clone()), json!({"allOf": [a, b]}));
    }

    #[test]
    fn required_and_unique_items_union() {
        assert_eq!(
            merge2(json!({"required": ["a", "b"]}), json!({"required": ["b", "c"]})),
            json!({"required": ["a", "b", "c"]})
        );
        assert_eq!(merge2(json!({"uniqueItems": false}), json!({"uniqueItems": true})), json!({"uniqueItems": true}));
    }

    #[test]
    fn multiple_of_takes_lcm() {
        assert_eq!(merge2(json!({"multipleOf": 4}), json!({"multipleOf": 6})), json!({"multipleOf": 12}));
        assert_eq!(merge2(json!({"multipleOf": 0.5}), json!({"multipleOf": 0.2})), json!({"multipleOf": 1}));
    }

    #[test]
    fn huge_multiple_of_falls_back_to_all_of() {
        let a = json!({"multipleOf": 1e30});
        let b = json!({"multipleOf": 1.00000000000000014e30});
        let merged = merge2(a.clone(), b.clone());
        assert!(is_all_of_wrapper(&merged));
        assert_eq!(merged["allOf"], json!([a, b]));
    }

    #[test]
    fn properties_merge_recursively() {
        let merged = merge2(
            json!({"properties": {"a": {"type": "string"}, "b": {"type": "integer"}}}),
            json!({"properties": {"a": {"maxLength": 3}, "c": {"type": "boolean"}}}),
        );
        assert_eq!(
            merged,
            json!({"properties": {
                "a": {"type": "string", "maxLength": 3},
                "b": {"type": "integer"},
                "c": {"type": "boolean"}
            }})
        );
    }

    #[test]
    fn items_object_distributes_over_tuple() {
        let merged = merge2(
            json!({"items": [{"type": "string"}, {"type": "string", "maxLength": 9}]}),
            json!({"items": {"maxLength": 4}}),
        );
        assert_eq!(
            merged,
            json!({"items": [{"type": "string", "maxLength": 4}, {"type": "string", "maxLength": 4}]})
        );
    }

    #[test]
    fn not_folds_into_any_of() {
        assert_eq!(
            merge2(json!({"not": {"type": "string"}}), json!({"not": {"type": "null"}})),
            json!({"not": {"anyOf": [{"type": "string"}, {"type": "null"}]}})
        );
    }

    #[test]
    fn additional_properties_false_wins() {
        assert_eq!(
            merge2(json!({"additionalProperties": {"type": "string"}}), json!({"additionalProperties": false})),
            json!({"additionalProperties": false})
        );
    }

    #[test]
    fn annotations_last_writer_and_ids_dropped() {
        assert_eq!(
            merge2(json!({"title": "A", "$id": "one"}), json!({"title": "B", "$id": "two"})),
            json!({"title": "B", "$id": "one"})
        );
    }

    #[test]
    fn unknown_conflicts_abort_whole_merge() {
        let a = json!({"type": "string", "pattern": "^a"});
        let b = json!({"type": "string", "pattern": "^b"});
        assert!(is_all_of_wrapper(&merge2(a, b)));
    }
}
