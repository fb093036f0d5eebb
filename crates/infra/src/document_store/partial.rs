//! Partial-document projections.
//!
//! A projection maps result keys (aliases) to dotted source paths. The special
//! alias `$merge` splices the keys of the object found at its path into the
//! root of the result. Projections are applied in Rust after the body is
//! fetched, so both backends share one implementation.

use eventmill_core::value::{resolve_path, set_path};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

pub const MERGE_ALIAS: &str = "$merge";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Projection {
    entries: Vec<(String, String)>,
}

impl Projection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy the value at `path` to `alias` (a dotted alias nests the result).
    pub fn field(mut self, alias: impl Into<String>, path: impl Into<String>) -> Self {
        self.entries.push((alias.into(), path.into()));
        self
    }

    /// Splice the keys of the object at `path` into the result root.
    pub fn merge(mut self, path: impl Into<String>) -> Self {
        self.entries.push((MERGE_ALIAS.to_string(), path.into()));
        self
    }

    pub fn entries(&self) -> &[(String, String)] {
        &self.entries
    }

    /// Project `body`.
    ///
    /// Entries apply in declaration order, later entries overwrite earlier
    /// keys. Missing paths project to `null`; a `$merge` of a missing or
    /// non-object value contributes nothing.
    pub fn apply(&self, body: &JsonValue) -> JsonValue {
        let mut out = JsonValue::Object(Map::new());
        for (alias, path) in &self.entries {
            let value = resolve_path(body, path);
            if alias == MERGE_ALIAS {
                if let (Some(JsonValue::Object(source)), JsonValue::Object(target)) = (value, &mut out) {
                    for (k, v) in source {
                        target.insert(k.clone(), v.clone());
                    }
                }
                continue;
            }
            set_path(&mut out, alias, value.cloned().unwrap_or(JsonValue::Null));
        }
        out
    }
}

impl<A, P> FromIterator<(A, P)> for Projection
where
    A: Into<String>,
    P: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (A, P)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().map(|(a, p)| (a.into(), p.into())).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn aliases_dotted_paths() {
        let body = json!({"customer": {"name": "Ada", "address": {"city": "London"}}, "total": 3});
        let projection = Projection::new()
            .field("name", "customer.name")
            .field("shipping.city", "customer.address.city")
            .field("zip", "customer.address.zip");

        assert_eq!(
            projection.apply(&body),
            json!({"name": "Ada", "shipping": {"city": "London"}, "zip": null})
        );
    }

    #[test]
    fn merge_splices_sub_object_keys_into_root() {
        let body = json!({"id": "1", "details": {"status": "paid", "total": 10}});
        let projection = Projection::new()
            .field("status", "id")
            .merge("details")
            .merge("missing");

        assert_eq!(projection.apply(&body), json!({"status": "paid", "total": 10}));
    }

    #[test]
    fn builds_from_pairs() {
        let projection: Projection = [("a", "x"), (MERGE_ALIAS, "y")].into_iter().collect();
        assert_eq!(projection.entries().len(), 2);
        assert_eq!(projection.apply(&json!({"x": 1, "y": {"b": 2}})), json!({"a": 1, "b": 2}));
    }
}
