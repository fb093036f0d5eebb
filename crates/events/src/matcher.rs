//! Metadata matchers: conjunctive predicates selecting a partition of a stream.
//!
//! A matcher is used for three things:
//! - partitioning a stream for conditional appends (`aggregateType` + `aggregateId`)
//! - narrowing `load`/`delete`/`republish`
//! - the per-stream subscription position
//!
//! Each backend evaluates the same conditions: the in-memory stores call
//! [`MetadataMatcher::matches`], the relational store compiles the conditions
//! to SQL.

use core::cmp::Ordering;

use chrono::{DateTime, Utc};
use eventmill_core::value::{compare_scalars, json_eq};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::Event;
use crate::meta;

/// Where a condition looks up its value.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    /// A key of the event's `meta` map.
    Metadata,
    /// One of the event's own properties: `uuid`, `name` or `createdAt`.
    MessageProperty,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchOp {
    Eq,
    NotEq,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    NotIn,
    Regex,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchCondition {
    pub field: String,
    pub op: MatchOp,
    pub value: JsonValue,
    pub field_type: FieldType,
}

/// Event properties addressable with [`FieldType::MessageProperty`].
pub const PROPERTY_UUID: &str = "uuid";
pub const PROPERTY_NAME: &str = "name";
pub const PROPERTY_CREATED_AT: &str = "createdAt";

/// Conjunction of conditions; the empty matcher matches every event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataMatcher {
    conditions: Vec<MatchCondition>,
}

impl MetadataMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// The partition of one aggregate instance.
    pub fn for_aggregate(aggregate_type: &str, aggregate_id: &str) -> Self {
        Self::new()
            .with(meta::AGGREGATE_TYPE, MatchOp::Eq, aggregate_type)
            .with(meta::AGGREGATE_ID, MatchOp::Eq, aggregate_id)
    }

    /// Add a condition on a metadata key.
    pub fn with(mut self, field: impl Into<String>, op: MatchOp, value: impl Into<JsonValue>) -> Self {
        self.conditions.push(MatchCondition {
            field: field.into(),
            op,
            value: value.into(),
            field_type: FieldType::Metadata,
        });
        self
    }

    /// Add a condition on an event property (`uuid`, `name`, `createdAt`).
    pub fn with_property(
        mut self,
        property: impl Into<String>,
        op: MatchOp,
        value: impl Into<JsonValue>,
    ) -> Self {
        self.conditions.push(MatchCondition {
            field: property.into(),
            op,
            value: value.into(),
            field_type: FieldType::MessageProperty,
        });
        self
    }

    pub fn conditions(&self) -> &[MatchCondition] {
        &self.conditions
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn matches(&self, event: &Event) -> bool {
        self.conditions.iter().all(|c| c.matches(event))
    }
}

impl MatchCondition {
    pub fn matches(&self, event: &Event) -> bool {
        if self.field_type == FieldType::MessageProperty && self.field == PROPERTY_CREATED_AT {
            return self.matches_timestamp(event.created_at);
        }

        let actual = match self.field_type {
            FieldType::Metadata => event.meta.get(&self.field).cloned(),
            FieldType::MessageProperty => match self.field.as_str() {
                PROPERTY_UUID => Some(JsonValue::String(event.uuid.to_string())),
                PROPERTY_NAME => Some(JsonValue::String(event.name.clone())),
                _ => None,
            },
        };

        match (self.op, actual) {
            (MatchOp::NotEq, None) | (MatchOp::NotIn, None) => true,
            (_, None) => false,
            (MatchOp::Eq, Some(v)) => json_eq(&v, &self.value),
            (MatchOp::NotEq, Some(v)) => !json_eq(&v, &self.value),
            (MatchOp::In, Some(v)) => self.in_values(&v),
            (MatchOp::NotIn, Some(v)) => !self.in_values(&v),
            (MatchOp::Gt, Some(v)) => compare_scalars(&v, &self.value) == Some(Ordering::Greater),
            (MatchOp::Gte, Some(v)) => compare_scalars(&v, &self.value)
                .is_some_and(|o| o != Ordering::Less),
            (MatchOp::Lt, Some(v)) => compare_scalars(&v, &self.value) == Some(Ordering::Less),
            (MatchOp::Lte, Some(v)) => compare_scalars(&v, &self.value)
                .is_some_and(|o| o != Ordering::Greater),
            (MatchOp::Regex, Some(JsonValue::String(s))) => self
                .value
                .as_str()
                .and_then(|p| regex::Regex::new(p).ok())
                .is_some_and(|re| re.is_match(&s)),
            (MatchOp::Regex, Some(_)) => false,
        }
    }

    fn in_values(&self, actual: &JsonValue) -> bool {
        self.value
            .as_array()
            .is_some_and(|values| values.iter().any(|v| json_eq(actual, v)))
    }

    fn matches_timestamp(&self, created_at: DateTime<Utc>) -> bool {
        let parse = |v: &JsonValue| {
            v.as_str()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|d| d.with_timezone(&Utc))
        };
        let one = || parse(&self.value);
        let any = || {
            self.value
                .as_array()
                .is_some_and(|vs| vs.iter().filter_map(parse).any(|d| d == created_at))
        };

        match self.op {
            MatchOp::Eq => one() == Some(created_at),
            MatchOp::NotEq => one() != Some(created_at),
            MatchOp::Gt => one().is_some_and(|d| created_at > d),
            MatchOp::Gte => one().is_some_and(|d| created_at >= d),
            MatchOp::Lt => one().is_some_and(|d| created_at < d),
            MatchOp::Lte => one().is_some_and(|d| created_at <= d),
            MatchOp::In => any(),
            MatchOp::NotIn => !any(),
            MatchOp::Regex => false,
        }
    }
}
