//! Backend-agnostic filter DSL.
//!
//! A [`Filter`] is a closed predicate tree evaluated against a document's id
//! and body. Every backend interprets every variant:
//! - the in-memory store evaluates a [`CompiledFilter`] per query
//! - the Postgres store compiles the tree to SQL (`document_store::sql`)
//!
//! Both interpretations follow the same rules:
//! - paths are dotted (`"address.city"`); numeric segments index arrays
//! - a predicate on a missing path is false, never unknown, so `Not` flips it
//! - equality is JSON equality with numeric comparison (`1 == 1.0`)
//! - range predicates compare number/number numerically and string/string
//!   bytewise; other pairings are false
//! - `Like` is case-insensitive SQL `LIKE` on string values (`%`, `_`, `\` escape)

use core::cmp::Ordering;
use std::collections::HashMap;

use eventmill_core::value::{compare_scalars, json_eq, resolve_path};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Filter {
    /// All sub-filters hold (empty: true).
    And(Vec<Filter>),
    /// At least one sub-filter holds (empty: false).
    Or(Vec<Filter>),
    Not(Box<Filter>),
    /// Matches every document.
    Any,
    DocId(String),
    AnyOfDocId(Vec<String>),
    Eq { path: String, value: JsonValue },
    Gt { path: String, value: JsonValue },
    Gte { path: String, value: JsonValue },
    Lt { path: String, value: JsonValue },
    Lte { path: String, value: JsonValue },
    /// The path resolves, including to JSON `null`.
    Exists(String),
    /// The value at `path` is an array containing `value`.
    InArray { path: String, value: JsonValue },
    Like { path: String, pattern: String },
    /// The value at `path` equals one of `values` (empty: false).
    AnyOf { path: String, values: Vec<JsonValue> },
}

/// Range operators, shared by both backends.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum RangeOp {
    Gt,
    Gte,
    Lt,
    Lte,
}

impl RangeOp {
    pub(crate) fn holds(self, ordering: Ordering) -> bool {
        match self {
            RangeOp::Gt => ordering == Ordering::Greater,
            RangeOp::Gte => ordering != Ordering::Less,
            RangeOp::Lt => ordering == Ordering::Less,
            RangeOp::Lte => ordering != Ordering::Greater,
        }
    }

    pub(crate) fn sql(self) -> &'static str {
        match self {
            RangeOp::Gt => ">",
            RangeOp::Gte => ">=",
            RangeOp::Lt => "<",
            RangeOp::Lte => "<=",
        }
    }
}

impl Filter {
    pub fn and(filters: impl IntoIterator<Item = Filter>) -> Self {
        Filter::And(filters.into_iter().collect())
    }

    pub fn or(filters: impl IntoIterator<Item = Filter>) -> Self {
        Filter::Or(filters.into_iter().collect())
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(filter: Filter) -> Self {
        Filter::Not(Box::new(filter))
    }

    pub fn doc_id(id: impl Into<String>) -> Self {
        Filter::DocId(id.into())
    }

    pub fn any_of_doc_id<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Filter::AnyOfDocId(ids.into_iter().map(Into::into).collect())
    }

    pub fn eq(path: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        Filter::Eq { path: path.into(), value: value.into() }
    }

    pub fn gt(path: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        Filter::Gt { path: path.into(), value: value.into() }
    }

    pub fn gte(path: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        Filter::Gte { path: path.into(), value: value.into() }
    }

    pub fn lt(path: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        Filter::Lt { path: path.into(), value: value.into() }
    }

    pub fn lte(path: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        Filter::Lte { path: path.into(), value: value.into() }
    }

    pub fn exists(path: impl Into<String>) -> Self {
        Filter::Exists(path.into())
    }

    pub fn in_array(path: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        Filter::InArray { path: path.into(), value: value.into() }
    }

    pub fn like(path: impl Into<String>, pattern: impl Into<String>) -> Self {
        Filter::Like { path: path.into(), pattern: pattern.into() }
    }

    pub fn any_of<I, V>(path: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<JsonValue>,
    {
        Filter::AnyOf {
            path: path.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Evaluate against a single document.
    ///
    /// Builds the `Like` regexes on every call; scans go through
    /// [`Filter::compile`].
    pub fn matches(&self, id: &str, body: &JsonValue) -> bool {
        self.compile().matches(id, body)
    }

    /// The filter with its `Like` patterns translated once.
    pub fn compile(&self) -> CompiledFilter<'_> {
        let mut like = HashMap::new();
        self.collect_like(&mut like);
        CompiledFilter { filter: self, like }
    }

    fn collect_like<'a>(&'a self, like: &mut HashMap<&'a str, Option<regex::Regex>>) {
        match self {
            Filter::And(filters) | Filter::Or(filters) => filters.iter().for_each(|f| f.collect_like(like)),
            Filter::Not(filter) => filter.collect_like(like),
            Filter::Like { pattern, .. } => {
                like.entry(pattern.as_str()).or_insert_with(|| like_regex(pattern));
            }
            _ => {}
        }
    }

    fn eval(&self, id: &str, body: &JsonValue, like: &HashMap<&str, Option<regex::Regex>>) -> bool {
        match self {
            Filter::And(filters) => filters.iter().all(|f| f.eval(id, body, like)),
            Filter::Or(filters) => filters.iter().any(|f| f.eval(id, body, like)),
            Filter::Not(filter) => !filter.eval(id, body, like),
            Filter::Any => true,
            Filter::DocId(expected) => id == expected,
            Filter::AnyOfDocId(ids) => ids.iter().any(|i| i == id),
            Filter::Eq { path, value } => {
                resolve_path(body, path).is_some_and(|actual| json_eq(actual, value))
            }
            Filter::Gt { path, value } => range(body, path, value, RangeOp::Gt),
            Filter::Gte { path, value } => range(body, path, value, RangeOp::Gte),
            Filter::Lt { path, value } => range(body, path, value, RangeOp::Lt),
            Filter::Lte { path, value } => range(body, path, value, RangeOp::Lte),
            Filter::Exists(path) => resolve_path(body, path).is_some(),
            Filter::InArray { path, value } => match resolve_path(body, path) {
                Some(JsonValue::Array(items)) => items.iter().any(|item| json_eq(item, value)),
                _ => false,
            },
            Filter::Like { path, pattern } => match resolve_path(body, path) {
                Some(JsonValue::String(s)) => like
                    .get(pattern.as_str())
                    .and_then(Option::as_ref)
                    .is_some_and(|re| re.is_match(s)),
                _ => false,
            },
            Filter::AnyOf { path, values } => resolve_path(body, path)
                .is_some_and(|actual| values.iter().any(|v| json_eq(actual, v))),
        }
    }
}

/// A [`Filter`] ready to be evaluated against many documents.
#[derive(Debug)]
pub struct CompiledFilter<'a> {
    filter: &'a Filter,
    /// `Like` pattern → regex; `None` for a pattern that does not translate.
    like: HashMap<&'a str, Option<regex::Regex>>,
}

impl CompiledFilter<'_> {
    pub fn matches(&self, id: &str, body: &JsonValue) -> bool {
        self.filter.eval(id, body, &self.like)
    }
}

fn range(body: &JsonValue, path: &str, value: &JsonValue, op: RangeOp) -> bool {
    resolve_path(body, path)
        .and_then(|actual| compare_scalars(actual, value))
        .is_some_and(|ordering| op.holds(ordering))
}

/// Translate a `LIKE` pattern into an anchored, case-insensitive regex.
fn like_regex(pattern: &str) -> Option<regex::Regex> {
    let mut out = String::from("(?is)^");
    let mut chars = pattern.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '%' => out.push_str(".*"),
            '_' => out.push('.'),
            '\\' => {
                let literal = chars.next().unwrap_or('\\');
                out.push_str(&regex::escape(literal.encode_utf8(&mut [0; 4])));
            }
            other => out.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
        }
    }
    out.push('$');
    regex::Regex::new(&out).ok()
}

/// A `LIKE` pattern both backends read the same way.
///
/// A trailing lone escape character is a literal backslash in memory; Postgres
/// rejects it, so it is doubled before binding.
pub(crate) fn normalize_like(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 1);
    let mut chars = pattern.chars();
    while let Some(ch) = chars.next() {
        out.push(ch);
        if ch == '\\' {
            match chars.next() {
                Some(next) => out.push(next),
                None => out.push('\\'),
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn order() -> JsonValue {
        json!({
            "status": "paid",
            "total": 150,
            "customer": {"name": "Ada Lovelace", "vip": true},
            "tags": ["rush", "gift"],
            "note": null
        })
    }

    #[test]
    fn scenario_d_and_of_eq_and_gt() {
        let filter = Filter::and([Filter::eq("status", "paid"), Filter::gt("total", 100)]);
        assert!(filter.matches("1", &order()));
        assert!(!filter.matches("2", &json!({"status": "paid", "total": 100})));
        assert!(!filter.matches("3", &json!({"status": "new", "total": 500})));
    }

    #[test]
    fn empty_combinators() {
        assert!(Filter::and([]).matches("1", &order()));
        assert!(!Filter::or([]).matches("1", &order()));
        assert!(!Filter::any_of("status", Vec::<JsonValue>::new()).matches("1", &order()));
    }

    #[test]
    fn ids_and_paths() {
        let doc = order();
        assert!(Filter::doc_id("1").matches("1", &doc));
        assert!(Filter::any_of_doc_id(["9", "1"]).matches("1", &doc));
        assert!(Filter::eq("customer.vip", true).matches("1", &doc));
        assert!(Filter::eq("tags.1", "gift").matches("1", &doc));
        assert!(Filter::eq("total", 150.0).matches("1", &doc));
    }

    #[test]
    fn missing_paths_are_false_and_negation_flips_them() {
        let doc = order();
        assert!(!Filter::eq("missing", 1).matches("1", &doc));
        assert!(!Filter::lt("missing", 1).matches("1", &doc));
        assert!(Filter::not(Filter::eq("missing", 1)).matches("1", &doc));
        assert!(Filter::exists("note").matches("1", &doc));
        assert!(!Filter::exists("customer.email").matches("1", &doc));
    }

    #[test]
    fn ranges_only_compare_like_kinds() {
        let doc = order();
        assert!(Filter::gte("total", 150).matches("1", &doc));
        assert!(Filter::lte("status", "paid").matches("1", &doc));
        assert!(Filter::gt("status", "p").matches("1", &doc));
        assert!(!Filter::gt("total", "100").matches("1", &doc));
        assert!(!Filter::gt("customer.vip", false).matches("1", &doc));
    }

    #[test]
    fn array_membership_and_any_of() {
        let doc = order();
        assert!(Filter::in_array("tags", "rush").matches("1", &doc));
        assert!(!Filter::in_array("status", "paid").matches("1", &doc));
        assert!(Filter::any_of("status", ["new", "paid"]).matches("1", &doc));
    }

    #[test]
    fn like_is_case_insensitive_with_wildcards_and_escapes() {
        let doc = json!({"name": "Ada Lovelace", "code": "50%_off", "n": 5});
        assert!(Filter::like("name", "ada%").matches("1", &doc));
        assert!(Filter::like("name", "%LOVE%").matches("1", &doc));
        assert!(Filter::like("name", "Ad_ Lovelace").matches("1", &doc));
        assert!(!Filter::like("name", "Ada").matches("1", &doc));
        assert!(Filter::like("code", "50\\%\\_off").matches("1", &doc));
        assert!(!Filter::like("code", "50\\%x_off").matches("1", &doc));
        assert!(!Filter::like("n", "5").matches("1", &doc));
    }

    #[test]
    fn trailing_escape_is_doubled_for_sql() {
        assert_eq!(normalize_like("a\\"), "a\\\\");
        assert_eq!(normalize_like("a\\%b"), "a\\%b");
        assert!(Filter::like("p", "c:\\").matches("1", &json!({"p": "c:\\"})));
    }
    #[test]
    fn compiled_filter_translates_each_like_pattern_once() {
        let filter = Filter::or([
            Filter::like("customer.name", "ada%"),
            Filter::and([Filter::like("status", "PA%"), Filter::not(Filter::like("customer.name", "ada%"))]),
            Filter::like("status", "PA%"),
        ]);
        let compiled = filter.compile();
        assert_eq!(compiled.like.len(), 2);

        let docs = [
            order(),
            json!({"status": "paid", "customer": {"name": "Grace Hopper"}}),
            json!({"status": "new", "customer": {"name": "Grace Hopper"}}),
            json!({"status": 7}),
        ];
        let hits: Vec<bool> = docs.iter().map(|d| compiled.matches("1", d)).collect();
        assert_eq!(hits, [true, true, false, false]);
        for doc in &docs {
            assert_eq!(compiled.matches("1", doc), filter.matches("1", doc));
        }
    }
}
