//! Strongly-typed identifiers.
//!
//! Both ids are UUIDv7, so ids minted by one process sort by creation time.
//! On the wire they are plain hyphenated UUID strings.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A string that is not a UUID, tagged with the id it was parsed as.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {kind} {input:?}: {reason}")]
pub struct InvalidId {
    pub kind: &'static str,
    pub input: String,
    pub reason: String,
}

macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Fresh time-ordered id.
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0.hyphenated(), f)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl FromStr for $name {
            type Err = InvalidId;

            fn from_str(input: &str) -> Result<Self, Self::Err> {
                Uuid::try_parse(input).map(Self).map_err(|e| InvalidId {
                    kind: stringify!($name),
                    input: input.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    };
}

uuid_id! {
    /// Identifier of an appended event (`uuid` on the wire).
    EventId
}

uuid_id! {
    /// Identifier of a command; becomes `causationId` on the events it causes.
    CommandId
}
