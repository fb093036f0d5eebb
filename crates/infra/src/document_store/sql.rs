//! Filter compilation to Postgres SQL.
//!
//! Every predicate is emitted as a boolean expression over the `doc` (JSONB)
//! and `id` columns. Leaves are wrapped in `COALESCE(.., FALSE)` so a missing
//! path is false rather than NULL; `NOT` then agrees with the in-memory
//! evaluation. Casts sit behind `CASE` guards because Postgres does not
//! promise left-to-right evaluation of `AND`.

use serde_json::Value as JsonValue;
use sqlx::types::Json;
use sqlx::{Postgres, QueryBuilder};

use eventmill_core::value::path_segments;

use super::filter::{Filter, RangeOp, normalize_like};
use super::{OrderBy, SortDirection};

pub(crate) type Sql<'args> = QueryBuilder<'args, Postgres>;

/// Pushes a JSONB-valued expression.
pub(crate) type Operand<'a> = &'a dyn Fn(&mut Sql<'_>);

/// `(doc #> '{a,b}')` with the path bound as `text[]`.
pub(crate) fn push_doc_path(qb: &mut Sql<'_>, path: &str) {
    qb.push("(doc #> ");
    qb.push_bind(path_segments(path));
    qb.push("::text[])");
}

fn leaf(qb: &mut Sql<'_>, body: impl FnOnce(&mut Sql<'_>)) {
    qb.push("COALESCE((");
    body(qb);
    qb.push("), FALSE)");
}

fn push_joined(qb: &mut Sql<'_>, filters: &[Filter], separator: &str, empty: &str) {
    if filters.is_empty() {
        qb.push(empty);
        return;
    }
    qb.push("(");
    for (i, filter) in filters.iter().enumerate() {
        if i > 0 {
            qb.push(separator);
        }
        push_filter(qb, filter);
    }
    qb.push(")");
}

pub(crate) fn push_filter(qb: &mut Sql<'_>, filter: &Filter) {
    match filter {
        Filter::And(filters) => push_joined(qb, filters, " AND ", "TRUE"),
        Filter::Or(filters) => push_joined(qb, filters, " OR ", "FALSE"),
        Filter::Not(inner) => {
            qb.push("(NOT ");
            push_filter(qb, inner);
            qb.push(")");
        }
        Filter::Any => {
            qb.push("TRUE");
        }
        Filter::DocId(id) => {
            qb.push("(id = ");
            qb.push_bind(id.clone());
            qb.push(")");
        }
        Filter::AnyOfDocId(ids) => {
            qb.push("(id = ANY(");
            qb.push_bind(ids.clone());
            qb.push("::text[]))");
        }
        Filter::Eq { path, value } => push_json_eq(qb, &|qb| push_doc_path(qb, path), value),
        Filter::Gt { path, value } => push_range(qb, &|qb| push_doc_path(qb, path), RangeOp::Gt, value),
        Filter::Gte { path, value } => push_range(qb, &|qb| push_doc_path(qb, path), RangeOp::Gte, value),
        Filter::Lt { path, value } => push_range(qb, &|qb| push_doc_path(qb, path), RangeOp::Lt, value),
        Filter::Lte { path, value } => push_range(qb, &|qb| push_doc_path(qb, path), RangeOp::Lte, value),
        Filter::Exists(path) => {
            qb.push("(");
            push_doc_path(qb, path);
            qb.push(" IS NOT NULL)");
        }
        Filter::InArray { path, value } => {
            qb.push("EXISTS (SELECT 1 FROM jsonb_array_elements(CASE WHEN jsonb_typeof(");
            push_doc_path(qb, path);
            qb.push(") = 'array' THEN ");
            push_doc_path(qb, path);
            qb.push(" ELSE '[]'::jsonb END) AS e(v) WHERE e.v = ");
            qb.push_bind(Json(value.clone()));
            qb.push("::jsonb)");
        }
        Filter::Like { path, pattern } => leaf(qb, |qb| {
            qb.push("CASE WHEN jsonb_typeof(");
            push_doc_path(qb, path);
            qb.push(") = 'string' THEN (");
            push_doc_path(qb, path);
            qb.push(" #>> '{}') ILIKE ");
            qb.push_bind(normalize_like(pattern));
            qb.push(" ELSE FALSE END");
        }),
        Filter::AnyOf { path, values } => {
            if values.is_empty() {
                qb.push("FALSE");
                return;
            }
            qb.push("(");
            for (i, value) in values.iter().enumerate() {
                if i > 0 {
                    qb.push(" OR ");
                }
                push_json_eq(qb, &|qb| push_doc_path(qb, path), value);
            }
            qb.push(")");
        }
    }
}

/// JSONB equality (numbers compare numerically).
pub(crate) fn push_json_eq(qb: &mut Sql<'_>, lhs: Operand<'_>, value: &JsonValue) {
    leaf(qb, |qb| {
        lhs(qb);
        qb.push(" = ");
        qb.push_bind(Json(value.clone()));
        qb.push("::jsonb");
    });
}

/// Numeric comparison for numbers, `COLLATE "C"` comparison for strings,
/// false for everything else.
pub(crate) fn push_range(qb: &mut Sql<'_>, lhs: Operand<'_>, op: RangeOp, value: &JsonValue) {
    let (kind, cast, bound, collate) = match value {
        JsonValue::Number(n) => ("number", "::numeric", n.to_string(), ""),
        JsonValue::String(s) => ("string", "", s.clone(), " COLLATE \"C\""),
        _ => {
            qb.push("FALSE");
            return;
        }
    };
    leaf(qb, |qb| {
        qb.push("CASE WHEN jsonb_typeof(");
        lhs(qb);
        qb.push(format!(") = '{kind}' THEN ("));
        lhs(qb);
        qb.push(format!(" #>> '{{}}'){cast}{collate} {} ", op.sql()));
        qb.push_bind(bound);
        qb.push(format!("{cast}{collate} ELSE FALSE END"));
    });
}

/// `ORDER BY` with `id` as the final tie-break.
pub(crate) fn push_order_by(qb: &mut Sql<'_>, order_by: &[OrderBy]) {
    qb.push(" ORDER BY ");
    for order in order_by {
        push_doc_path(qb, &order.path);
        qb.push(match order.direction {
            SortDirection::Asc => " ASC, ",
            SortDirection::Desc => " DESC, ",
        });
    }
    qb.push("id COLLATE \"C\" ASC");
}

/// A path as a `text[]` literal for DDL, where binds are not allowed.
pub(crate) fn path_literal(path: &str) -> String {
    let segments: Vec<String> = path_segments(path)
        .into_iter()
        .map(|s| format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\"")))
        .collect();
    format!("'{{{}}}'", segments.join(",").replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(filter: &Filter) -> String {
        let mut qb = Sql::new("SELECT id FROM t WHERE ");
        push_filter(&mut qb, filter);
        qb.sql().to_string()
    }

    #[test]
    fn combinators_and_empty_lists() {
        assert_eq!(compile(&Filter::and([])), "SELECT id FROM t WHERE TRUE");
        assert_eq!(compile(&Filter::or([])), "SELECT id FROM t WHERE FALSE");
        assert_eq!(compile(&Filter::any_of("a", Vec::<JsonValue>::new())), "SELECT id FROM t WHERE FALSE");
        assert_eq!(
            compile(&Filter::not(Filter::doc_id("1"))),
            "SELECT id FROM t WHERE (NOT (id = $1))"
        );
    }

    #[test]
    fn leaves_never_yield_null() {
        let sql = compile(&Filter::eq("status", "paid"));
        assert_eq!(sql, "SELECT id FROM t WHERE COALESCE(((doc #> $1::text[]) = $2::jsonb), FALSE)");
    }

    #[test]
    fn ranges_guard_their_casts() {
        let sql = compile(&Filter::gt("total", 100));
        assert!(sql.contains("CASE WHEN jsonb_typeof((doc #> $1::text[])) = 'number'"));
        assert!(sql.contains("#>> '{}')::numeric > $3::numeric ELSE FALSE END"));

        let sql = compile(&Filter::lte("name", "m"));
        assert!(sql.contains("COLLATE \"C\" <= $3 COLLATE \"C\""));

        assert_eq!(compile(&Filter::gt("flag", true)), "SELECT id FROM t WHERE FALSE");
    }

    #[test]
    fn order_by_ends_with_id() {
        let mut qb = Sql::new("SELECT id FROM t");
        push_order_by(&mut qb, &[OrderBy::desc("total")]);
        assert_eq!(qb.sql(), "SELECT id FROM t ORDER BY (doc #> $1::text[]) DESC, id COLLATE \"C\" ASC");
    }

    #[test]
    fn ddl_path_literals_are_quoted() {
        assert_eq!(path_literal("a.b"), "'{\"a\",\"b\"}'");
        assert_eq!(path_literal("it's"), "'{\"it''s\"}'");
    }
}
