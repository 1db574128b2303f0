//! Bottom-up mapping over a raw layout array.

use serde_json::Value;

/// What a mapping callback produced for one element.
#[derive(Debug, Clone, PartialEq)]
pub enum Mapped<T> {
    /// Drop the element.
    Skip,
    One(T),
    /// Splice several results in place of the element.
    Many(Vec<T>),
}

/// One raw element handed to the callback, its children already mapped.
#[derive(Debug, Clone)]
pub struct LayoutItem<T> {
    /// The element with `items` (or `tabs`) taken out.
    pub node: Value,
    pub items: Vec<T>,
    /// Whether the raw element carried an `items`/`tabs` list at all.
    pub has_items: bool,
    /// `type` of the enclosing element, if any.
    pub parent_type: Option<String>,
}

/// Map every element of `layout`, children before parents. The callback
/// gets the element, its index among its siblings and its layout pointer.
pub fn map_layout<T, F>(layout: &[Value], f: &mut F) -> Vec<T>
where
    F: FnMut(LayoutItem<T>, usize, &str) -> Mapped<T>,
{
    map_level(layout, f, "", None)
}

fn map_level<T, F>(layout: &[Value], f: &mut F, at: &str, parent_type: Option<&str>) -> Vec<T>
where
    F: FnMut(LayoutItem<T>, usize, &str) -> Mapped<T>,
{
    let mut out = Vec::with_capacity(layout.len());
    for (index, element) in layout.iter().enumerate() {
        let here = format!("{at}/{index}");
        let mut node = element.clone();
        let mut items = Vec::new();
        let mut has_items = false;
        if let Value::Object(map) = &mut node {
            let children = match map.shift_remove("items") {
                Some(items) => Some(items),
                None => map.shift_remove("tabs"),
            };
            if let Some(Value::Array(children)) = children {
                has_items = true;
                let own_type = map.get("type").and_then(Value::as_str).map(String::from);
                items = map_level(&children, f, &format!("{here}/items"), own_type.as_deref());
            }
        }
        let item = LayoutItem { node, items, has_items, parent_type: parent_type.map(String::from) };
        match f(item, index, &here) {
            Mapped::Skip => {}
            Mapped::One(t) => out.push(t),
            Mapped::Many(ts) => out.extend(ts),
        }
    }
    out
}

// ------------------------------- Tests ------------------------------------ //

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn children_map_first_and_results_splice() {
        let layout = vec![
            json!({"type": "tabs", "tabs": [{"key": "a"}, {"key": "skip"}]}),
            json!("*"),
            json!("b"),
        ];
        let mut seen = Vec::new();
        let out: Vec<String> = map_layout(&layout, &mut |item: LayoutItem<String>, index, at: &str| {
            seen.push(at.to_string());
            match &item.node {
                Value::String(s) if s == "*" => Mapped::Many(vec!["x".into(), "y".into()]),
                Value::String(s) => Mapped::One(s.clone()),
                Value::Object(m) => match m.get("key").and_then(Value::as_str) {
                    Some("skip") => Mapped::Skip,
                    Some(k) => {
                        assert_eq!(item.parent_type.as_deref(), Some("tabs"));
                        assert_eq!(index, 0);
                        Mapped::One(k.to_string())
                    }
                    None => {
                        assert!(item.has_items);
                        Mapped::One(format!("tabs({})", item.items.join(",")))
                    }
                },
                _ => Mapped::Skip,
            }
        });
        assert_eq!(out, vec!["tabs(a)", "x", "y", "b"]);
        assert_eq!(seen, vec!["/0/items/0", "/0/items/1", "/0", "/1", "/2"]);
    }
}
