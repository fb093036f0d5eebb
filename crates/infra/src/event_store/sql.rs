//! Metadata matcher compilation to Postgres SQL over the `events` table.
//!
//! Metadata values are read as `meta -> 'key'` and event properties are lifted
//! to JSONB (`to_jsonb(name)`), so both go through the same JSON comparison
//! code as document filters. `createdAt` is compared as a real timestamp.
//! A missing key behaves exactly as in [`MatchCondition::matches`]: only
//! `NotEq` and `NotIn` hold.

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use eventmill_events::matcher::{PROPERTY_CREATED_AT, PROPERTY_NAME, PROPERTY_UUID};
use eventmill_events::{FieldType, MatchCondition, MatchOp, MetadataMatcher};

use crate::document_store::filter::RangeOp;
use crate::document_store::sql::{Sql, push_json_eq, push_range};

pub(crate) fn push_matcher(qb: &mut Sql<'_>, matcher: Option<&MetadataMatcher>) {
    let conditions = matcher.map(MetadataMatcher::conditions).unwrap_or_default();
    if conditions.is_empty() {
        qb.push("TRUE");
        return;
    }
    qb.push("(");
    for (i, condition) in conditions.iter().enumerate() {
        if i > 0 {
            qb.push(" AND ");
        }
        push_condition(qb, condition);
    }
    qb.push(")");
}

fn range_op(op: MatchOp) -> Option<RangeOp> {
    match op {
        MatchOp::Gt => Some(RangeOp::Gt),
        MatchOp::Gte => Some(RangeOp::Gte),
        MatchOp::Lt => Some(RangeOp::Lt),
        MatchOp::Lte => Some(RangeOp::Lte),
        _ => None,
    }
}

fn push_condition(qb: &mut Sql<'_>, condition: &MatchCondition) {
    let field = condition.field.clone();
    match (condition.field_type, condition.field.as_str()) {
        (FieldType::Metadata, _) => push_json_condition(qb, &move |qb| {
            qb.push("(meta -> ");
            qb.push_bind(field.clone());
            qb.push(")");
        }, condition),
        (FieldType::MessageProperty, PROPERTY_UUID) => {
            push_json_condition(qb, &|qb| {
                qb.push("to_jsonb(uuid::text)");
            }, condition)
        }
        (FieldType::MessageProperty, PROPERTY_NAME) => {
            push_json_condition(qb, &|qb| {
                qb.push("to_jsonb(name)");
            }, condition)
        }
        (FieldType::MessageProperty, PROPERTY_CREATED_AT) => push_timestamp_condition(qb, condition),
        (FieldType::MessageProperty, _) => {
            qb.push(if matches!(condition.op, MatchOp::NotEq | MatchOp::NotIn) { "TRUE" } else { "FALSE" });
        }
    }
}

fn push_json_condition(qb: &mut Sql<'_>, lhs: &dyn Fn(&mut Sql<'_>), condition: &MatchCondition) {
    let push_in = |qb: &mut Sql<'_>| match condition.value.as_array().filter(|v| !v.is_empty()) {
        Some(values) => {
            qb.push("(");
            for (i, value) in values.iter().enumerate() {
                if i > 0 {
                    qb.push(" OR ");
                }
                push_json_eq(qb, lhs, value);
            }
            qb.push(")");
        }
        None => {
            qb.push("FALSE");
        }
    };

    match condition.op {
        MatchOp::Eq => push_json_eq(qb, lhs, &condition.value),
        MatchOp::NotEq => {
            qb.push("(NOT ");
            push_json_eq(qb, lhs, &condition.value);
            qb.push(")");
        }
        MatchOp::In => push_in(qb),
        MatchOp::NotIn => {
            qb.push("(NOT ");
            push_in(qb);
            qb.push(")");
        }
        MatchOp::Regex => match condition.value.as_str() {
            Some(pattern) => {
                qb.push("COALESCE((CASE WHEN jsonb_typeof(");
                lhs(qb);
                qb.push(") = 'string' THEN (");
                lhs(qb);
                qb.push(" #>> '{}') ~ ");
                qb.push_bind(pattern.to_string());
                qb.push(" ELSE FALSE END), FALSE)");
            }
            None => {
                qb.push("FALSE");
            }
        },
        op => {
            if let Some(range) = range_op(op) {
                push_range(qb, lhs, range, &condition.value);
            }
        }
    }
}

fn parse_timestamp(value: &JsonValue) -> Option<DateTime<Utc>> {
    value
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|d| d.with_timezone(&Utc))
}

fn push_timestamp_condition(qb: &mut Sql<'_>, condition: &MatchCondition) {
    let push_in = |qb: &mut Sql<'_>| {
        let bounds: Vec<DateTime<Utc>> = condition
            .value
            .as_array()
            .map(|vs| vs.iter().filter_map(parse_timestamp).collect())
            .unwrap_or_default();
        if bounds.is_empty() {
            qb.push("FALSE");
        } else {
            qb.push("(created_at = ANY(");
            qb.push_bind(bounds);
            qb.push("))");
        }
    };

    match condition.op {
        MatchOp::In => push_in(qb),
        MatchOp::NotIn => {
            qb.push("(NOT ");
            push_in(qb);
            qb.push(")");
        }
        MatchOp::Regex => {
            qb.push("FALSE");
        }
        op => match parse_timestamp(&condition.value) {
            None => {
                qb.push(if op == MatchOp::NotEq { "TRUE" } else { "FALSE" });
            }
            Some(bound) => {
                let operator = match op {
                    MatchOp::Eq => "=",
                    MatchOp::NotEq => "<>",
                    MatchOp::Gt => ">",
                    MatchOp::Gte => ">=",
                    MatchOp::Lt => "<",
                    _ => "<=",
                };
                qb.push(format!("(created_at {operator} "));
                qb.push_bind(bound);
                qb.push(")");
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eventmill_events::meta;

    fn compile(matcher: &MetadataMatcher) -> String {
        let mut qb = Sql::new("SELECT no FROM events WHERE ");
        push_matcher(&mut qb, Some(matcher));
        qb.sql().to_string()
    }

    #[test]
    fn empty_matchers_select_everything() {
        let mut qb = Sql::new("");
        push_matcher(&mut qb, None);
        assert_eq!(qb.sql(), "TRUE");
        assert_eq!(compile(&MetadataMatcher::new()), "SELECT no FROM events WHERE TRUE");
    }

    #[test]
    fn aggregate_partitions_compile_to_a_conjunction() {
        let sql = compile(&MetadataMatcher::for_aggregate("Order", "1"));
        assert_eq!(
            sql,
            "SELECT no FROM events WHERE (COALESCE(((meta -> $1) = $2::jsonb), FALSE) \
             AND COALESCE(((meta -> $3) = $4::jsonb), FALSE))"
        );
    }

    #[test]
    fn negations_hold_for_missing_keys() {
        let sql = compile(&MetadataMatcher::new().with(meta::VISIBILITY, MatchOp::NotEq, "public"));
        assert!(sql.starts_with("SELECT no FROM events WHERE ((NOT COALESCE("));

        let sql = compile(&MetadataMatcher::new().with("tag", MatchOp::NotIn, serde_json::json!([])));
        assert_eq!(sql, "SELECT no FROM events WHERE ((NOT FALSE))");
    }

    #[test]
    fn properties_and_timestamps() {
        let sql = compile(&MetadataMatcher::new().with_property(PROPERTY_NAME, MatchOp::Regex, "^Order"));
        assert!(sql.contains("to_jsonb(name) #>> '{}') ~ $1"));

        let sql = compile(&MetadataMatcher::new().with_property(
            PROPERTY_CREATED_AT,
            MatchOp::Gte,
            "2024-01-01T00:00:00Z",
        ));
        assert_eq!(sql, "SELECT no FROM events WHERE ((created_at >= $1))");

        let sql = compile(&MetadataMatcher::new().with_property(PROPERTY_CREATED_AT, MatchOp::Eq, "yesterday"));
        assert_eq!(sql, "SELECT no FROM events WHERE (FALSE)");
    }
}
