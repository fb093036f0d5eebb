//! Reserved event metadata keys and event visibility.
//!
//! The engine owns a small set of metadata keys. Everything else in an event's
//! `meta` map is user data forwarded from the originating command.

use core::str::FromStr;

use serde::{Deserialize, Serialize};

pub const AGGREGATE_ID: &str = "aggregateId";
pub const AGGREGATE_TYPE: &str = "aggregateType";
pub const AGGREGATE_VERSION: &str = "aggregateVersion";
pub const CAUSATION_ID: &str = "causationId";
pub const CAUSATION_NAME: &str = "causationName";
pub const VISIBILITY: &str = "visibility";
pub const DELETE_STATE: &str = "ceDeleteState";
pub const DELETE_HISTORY: &str = "ceDeleteHistory";

/// Flattened to the plain user id when stamped on events.
pub const USER: &str = "user";
pub const USER_ID: &str = "userId";

/// Keys the engine stamps itself; command metadata never overrides them.
pub const RESERVED: [&str; 8] = [
    AGGREGATE_ID,
    AGGREGATE_TYPE,
    AGGREGATE_VERSION,
    CAUSATION_ID,
    CAUSATION_NAME,
    VISIBILITY,
    DELETE_STATE,
    DELETE_HISTORY,
];

pub fn is_reserved(key: &str) -> bool {
    RESERVED.contains(&key)
}

/// Who may observe an event.
///
/// - `Service` events belong to the write model and rebuild aggregate state.
/// - `Public` events are visible to external consumers on the public stream.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Service,
    Public,
}

impl Visibility {
    pub fn as_str(self) -> &'static str {
        match self {
            Visibility::Service => "service",
            Visibility::Public => "public",
        }
    }
}

impl core::fmt::Display for Visibility {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown visibility: {0}")]
pub struct UnknownVisibility(pub String);

impl FromStr for Visibility {
    type Err = UnknownVisibility;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "service" => Ok(Visibility::Service),
            "public" => Ok(Visibility::Public),
            other => Err(UnknownVisibility(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_keys_are_recognised() {
        assert!(is_reserved("aggregateVersion"));
        assert!(is_reserved("ceDeleteHistory"));
        assert!(!is_reserved("user"));
        assert!(!is_reserved("tenant"));
    }

    #[test]
    fn visibility_parses_wire_values() {
        assert_eq!("public".parse::<Visibility>().unwrap(), Visibility::Public);
        assert_eq!(Visibility::default(), Visibility::Service);
        assert!("internal".parse::<Visibility>().is_err());
    }
}
