//! JSON value helpers shared by the filter DSL and the metadata matcher.
//!
//! The comparison rules here mirror how the relational backend treats JSONB:
//! numbers compare numerically (`1 == 1.0`), strings compare bytewise
//! (`COLLATE "C"`), and ordering between unrelated types is undefined.

use core::cmp::Ordering;

use serde_json::Value as JsonValue;

/// JSON equality with numeric comparison for numbers (recursive).
pub fn json_eq(a: &JsonValue, b: &JsonValue) -> bool {
    match (a, b) {
        (JsonValue::Number(x), JsonValue::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        (JsonValue::Array(xs), JsonValue::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| json_eq(x, y))
        }
        (JsonValue::Object(xs), JsonValue::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k).is_some_and(|y| json_eq(x, y)))
        }
        _ => a == b,
    }
}

/// Compare two scalars of the same kind (number/number or string/string).
///
/// Returns `None` for any other pairing; range predicates treat that as false.
pub fn compare_scalars(a: &JsonValue, b: &JsonValue) -> Option<Ordering> {
    match (a, b) {
        (JsonValue::Number(x), JsonValue::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (JsonValue::String(x), JsonValue::String(y)) => Some(x.as_bytes().cmp(y.as_bytes())),
        _ => None,
    }
}

/// Total order used for sorting documents.
///
/// Follows the JSONB sort order: `null < string < number < bool < array < object`,
/// with longer arrays and objects sorting after shorter ones.
/// Strings sort bytewise here; the relational backend sorts them by the
/// database collation.
pub fn sort_order(a: &JsonValue, b: &JsonValue) -> Ordering {
    fn rank(v: &JsonValue) -> u8 {
        match v {
            JsonValue::Null => 0,
            JsonValue::String(_) => 1,
            JsonValue::Number(_) => 2,
            JsonValue::Bool(_) => 3,
            JsonValue::Array(_) => 4,
            JsonValue::Object(_) => 5,
        }
    }

    match (a, b) {
        (JsonValue::Bool(x), JsonValue::Bool(y)) => x.cmp(y),
        (JsonValue::Array(xs), JsonValue::Array(ys)) => xs.len().cmp(&ys.len()).then_with(|| {
            xs.iter()
                .zip(ys)
                .map(|(x, y)| sort_order(x, y))
                .find(|o| o.is_ne())
                .unwrap_or(Ordering::Equal)
        }),
        (JsonValue::Object(xs), JsonValue::Object(ys)) => xs.len().cmp(&ys.len()),
        _ => compare_scalars(a, b).unwrap_or_else(|| rank(a).cmp(&rank(b))),
    }
}

/// Split a dotted path (`"address.city"`) into its segments.
pub fn path_segments(path: &str) -> Vec<String> {
    path.split('.').map(str::to_string).collect()
}

/// Resolve a dotted path inside a JSON value.
///
/// Numeric segments index into arrays (`"items.0.sku"`). Returns `None` when any
/// segment is missing; a present JSON `null` resolves to `Some(Null)`.
pub fn resolve_path<'a>(value: &'a JsonValue, path: &str) -> Option<&'a JsonValue> {
    let mut current = value;
    for segment in path.split('.') {
        current = match current {
            JsonValue::Object(map) => map.get(segment)?,
            JsonValue::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Set a value at a dotted path, creating intermediate objects as needed.
///
/// Non-object intermediates are replaced by objects.
pub fn set_path(target: &mut JsonValue, path: &str, value: JsonValue) {
    let mut segments = path.split('.').peekable();
    let mut current = target;
    while let Some(segment) = segments.next() {
        if !current.is_object() {
            *current = JsonValue::Object(serde_json::Map::new());
        }
        let JsonValue::Object(map) = current else {
            return;
        };
        if segments.peek().is_none() {
            map.insert(segment.to_string(), value);
            return;
        }
        current = map
            .entry(segment.to_string())
            .or_insert_with(|| JsonValue::Object(serde_json::Map::new()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numbers_compare_numerically() {
        assert!(json_eq(&json!(1), &json!(1.0)));
        assert!(json_eq(&json!({"a": [1, 2]}), &json!({"a": [1.0, 2]})));
        assert!(!json_eq(&json!("1"), &json!(1)));
    }

    #[test]
    fn scalars_of_different_kinds_do_not_compare() {
        assert_eq!(compare_scalars(&json!(2), &json!(10)), Some(Ordering::Less));
        assert_eq!(compare_scalars(&json!("b"), &json!("a")), Some(Ordering::Greater));
        assert_eq!(compare_scalars(&json!("2"), &json!(1)), None);
        assert_eq!(compare_scalars(&json!(true), &json!(false)), None);
    }

    #[test]
    fn sort_order_ranks_types_like_jsonb() {
        assert_eq!(sort_order(&json!(null), &json!("a")), Ordering::Less);
        assert_eq!(sort_order(&json!("z"), &json!(1)), Ordering::Less);
        assert_eq!(sort_order(&json!(1), &json!(true)), Ordering::Less);
        assert_eq!(sort_order(&json!(false), &json!(true)), Ordering::Less);
    }

    #[test]
    fn resolves_nested_paths_and_array_indexes() {
        let doc = json!({"address": {"city": "Berlin"}, "items": [{"sku": "a"}], "gone": null});
        assert_eq!(resolve_path(&doc, "address.city"), Some(&json!("Berlin")));
        assert_eq!(resolve_path(&doc, "items.0.sku"), Some(&json!("a")));
        assert_eq!(resolve_path(&doc, "gone"), Some(&JsonValue::Null));
        assert_eq!(resolve_path(&doc, "address.zip"), None);
        assert_eq!(resolve_path(&doc, "items.x"), None);
    }

    #[test]
    fn set_path_creates_intermediate_objects() {
        let mut doc = json!({"a": 1});
        set_path(&mut doc, "b.c", json!(2));
        set_path(&mut doc, "a.d", json!(3));
        assert_eq!(doc, json!({"a": {"d": 3}, "b": {"c": 2}}));
    }
}
