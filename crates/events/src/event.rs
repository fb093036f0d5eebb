use chrono::{DateTime, SubsecRound, Utc};
use eventmill_core::EventId;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::meta::{self, Visibility};

/// Event metadata: reserved keys plus user-defined keys.
pub type Metadata = serde_json::Map<String, JsonValue>;

/// An immutable fact appended to a stream.
///
/// Serializes to the wire shape `{uuid, name, payload, meta, createdAt}`; this
/// is the unit persisted to streams and handed to listeners and queue
/// consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub uuid: EventId,
    pub name: String,
    #[serde(default)]
    pub payload: JsonValue,
    #[serde(default)]
    pub meta: Metadata,
    pub created_at: DateTime<Utc>,
}

impl Event {
    /// A new service event with a fresh id and the current timestamp.
    ///
    /// The timestamp is truncated to microseconds, the precision every backend stores.
    pub fn new(name: impl Into<String>, payload: JsonValue) -> Self {
        Self {
            uuid: EventId::new(),
            name: name.into(),
            payload,
            meta: Metadata::new(),
            created_at: Utc::now().trunc_subsecs(6),
        }
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    pub fn with_visibility(self, visibility: Visibility) -> Self {
        self.with_meta(meta::VISIBILITY, visibility.as_str())
    }

    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.meta.get(key).and_then(JsonValue::as_str)
    }

    pub fn aggregate_id(&self) -> Option<&str> {
        self.meta_str(meta::AGGREGATE_ID)
    }

    pub fn aggregate_type(&self) -> Option<&str> {
        self.meta_str(meta::AGGREGATE_TYPE)
    }

    pub fn aggregate_version(&self) -> Option<u64> {
        self.meta.get(meta::AGGREGATE_VERSION).and_then(JsonValue::as_u64)
    }

    /// Events without an explicit (or with an unknown) visibility are service events.
    pub fn visibility(&self) -> Visibility {
        self.meta_str(meta::VISIBILITY)
            .and_then(|v| v.parse().ok())
            .unwrap_or_default()
    }

    pub fn deletes_state(&self) -> bool {
        self.flag(meta::DELETE_STATE)
    }

    pub fn deletes_history(&self) -> bool {
        self.flag(meta::DELETE_HISTORY)
    }

    fn flag(&self, key: &str) -> bool {
        self.meta.get(key).and_then(JsonValue::as_bool).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn serializes_to_camel_case_wire_shape() {
        let event = Event::new("OrderPlaced", json!({"total": 10})).with_meta("tenant", "acme");
        let wire = serde_json::to_value(&event).unwrap();

        assert_eq!(wire["name"], "OrderPlaced");
        assert_eq!(wire["meta"]["tenant"], "acme");
        assert!(wire["createdAt"].is_string());
        assert_eq!(wire["uuid"], event.uuid.to_string());

        let back: Event = serde_json::from_value(wire).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn reads_reserved_metadata() {
        let event = Event::new("OrderPaid", json!({}))
            .with_meta(meta::AGGREGATE_ID, "1")
            .with_meta(meta::AGGREGATE_TYPE, "Order")
            .with_meta(meta::AGGREGATE_VERSION, 3)
            .with_meta(meta::DELETE_STATE, true);

        assert_eq!(event.aggregate_id(), Some("1"));
        assert_eq!(event.aggregate_type(), Some("Order"));
        assert_eq!(event.aggregate_version(), Some(3));
        assert!(event.deletes_state());
        assert!(!event.deletes_history());
        assert_eq!(event.visibility(), Visibility::Service);
    }

    #[test]
    fn public_visibility_is_read_from_meta() {
        let event = Event::new("OrderShipped", json!({})).with_visibility(Visibility::Public);
        assert_eq!(event.visibility(), Visibility::Public);
    }
}
