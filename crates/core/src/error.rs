//! Error taxonomy shared by every storage component.

use serde::{Deserialize, Serialize};

/// Classification of a storage failure.
///
/// Every error type in the engine maps onto exactly one kind, so callers can
/// decide how to react without matching on backend-specific variants:
///
/// - `NotFound`: the requested document/aggregate/version does not exist.
///   Expected and recoverable by the caller.
/// - `Conflict`: optimistic concurrency mismatch. Reload and retry, never merge.
/// - `Configuration`: programmer error (missing apply function, missing
///   identifier field). Fail fast, do not retry.
/// - `Backend`: I/O or transport failure of the underlying technology. The
///   original error is carried unchanged.
/// - `Validation`: malformed input handed to a store operation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Conflict,
    Configuration,
    Backend,
    Validation,
}

impl ErrorKind {
    /// Whether re-running the same operation after re-reading state can succeed.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Conflict | ErrorKind::Backend)
    }
}

impl core::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Backend => "backend",
            ErrorKind::Validation => "validation",
        };
        f.write_str(s)
    }
}

/// Implemented by every subsystem error so callers can classify failures.
pub trait Classify {
    fn kind(&self) -> ErrorKind;

    fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    fn is_conflict(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }
}
