use eventmill_core::CommandId;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::Metadata;

/// The command that caused a save.
///
/// Commands are **intent**; they are never persisted. The repository copies
/// their id and name onto the resulting events as causation metadata and
/// forwards every non-reserved metadata key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    pub uuid: CommandId,
    pub name: String,
    #[serde(default)]
    pub payload: JsonValue,
    #[serde(default)]
    pub meta: Metadata,
}

impl Command {
    pub fn new(name: impl Into<String>, payload: JsonValue) -> Self {
        Self {
            uuid: CommandId::new(),
            name: name.into(),
            payload,
            meta: Metadata::new(),
        }
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }
}
