//! Engine configuration.
//!
//! Read from the environment:
//!
//! | variable | default |
//! |---|---|
//! | `EVENTMILL_BACKEND` (`memory` \| `postgres`) | `memory` |
//! | `EVENTMILL_DATABASE_URL`, falling back to `DATABASE_URL` | required for `postgres` |
//! | `EVENTMILL_MAX_CONNECTIONS` | `10` |
//! | `EVENTMILL_SNAPSHOT_PATH` (directory for in-memory snapshots) | unset |
//! | `EVENTMILL_WRITE_MODEL_STREAM` | `write_model_stream` |
//! | `EVENTMILL_PUBLIC_STREAM` | `public_stream` |
//! | `EVENTMILL_QUEUE_CAPACITY` | `64` |
//! | `EVENTMILL_MAX_DELIVERY_ATTEMPTS` | `5` |

use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;

use eventmill_core::{Classify, ErrorKind};

pub const DEFAULT_WRITE_MODEL_STREAM: &str = "write_model_stream";
pub const DEFAULT_PUBLIC_STREAM: &str = "public_stream";
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;
pub const DEFAULT_MAX_DELIVERY_ATTEMPTS: u32 = 5;
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set for the postgres backend")]
    Missing(&'static str),

    #[error("invalid value '{value}' for {variable}: {reason}")]
    Invalid {
        variable: &'static str,
        value: String,
        reason: String,
    },
}

impl Classify for ConfigError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Configuration
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    #[default]
    Memory,
    Postgres,
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" | "in-memory" | "in_memory" => Ok(Backend::Memory),
            "postgres" | "postgresql" => Ok(Backend::Postgres),
            other => Err(format!("unknown backend '{other}' (expected memory or postgres)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub backend: Backend,
    pub database_url: Option<String>,
    pub max_connections: u32,
    /// In-memory backend only: snapshot files are written below this directory.
    pub snapshot_path: Option<PathBuf>,
    pub write_model_stream: String,
    pub public_stream: String,
    pub queue_capacity: usize,
    pub max_delivery_attempts: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Memory,
            database_url: None,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            snapshot_path: None,
            write_model_stream: DEFAULT_WRITE_MODEL_STREAM.to_string(),
            public_stream: DEFAULT_PUBLIC_STREAM.to_string(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_delivery_attempts: DEFAULT_MAX_DELIVERY_ATTEMPTS,
        }
    }
}

fn parse<T>(variable: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            variable,
            reason: e.to_string(),
            value,
        }),
    }
}

fn positive<T: PartialEq + Default>(variable: &'static str, value: T, raw: impl Fn() -> String) -> Result<T, ConfigError> {
    if value == T::default() {
        Err(ConfigError::Invalid { variable, value: raw(), reason: "must be greater than zero".to_string() })
    } else {
        Ok(value)
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source (tests pass a map).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let backend = parse("EVENTMILL_BACKEND", non_empty("EVENTMILL_BACKEND"), Backend::Memory)?;
        let database_url = non_empty("EVENTMILL_DATABASE_URL").or_else(|| non_empty("DATABASE_URL"));
        if backend == Backend::Postgres && database_url.is_none() {
            return Err(ConfigError::Missing("EVENTMILL_DATABASE_URL or DATABASE_URL"));
        }

        let max_connections = parse(
            "EVENTMILL_MAX_CONNECTIONS",
            non_empty("EVENTMILL_MAX_CONNECTIONS"),
            DEFAULT_MAX_CONNECTIONS,
        )?;
        let queue_capacity = parse(
            "EVENTMILL_QUEUE_CAPACITY",
            non_empty("EVENTMILL_QUEUE_CAPACITY"),
            DEFAULT_QUEUE_CAPACITY,
        )?;
        let max_delivery_attempts = parse(
            "EVENTMILL_MAX_DELIVERY_ATTEMPTS",
            non_empty("EVENTMILL_MAX_DELIVERY_ATTEMPTS"),
            DEFAULT_MAX_DELIVERY_ATTEMPTS,
        )?;

        Ok(Self {
            backend,
            database_url,
            max_connections: positive("EVENTMILL_MAX_CONNECTIONS", max_connections, || max_connections.to_string())?,
            snapshot_path: non_empty("EVENTMILL_SNAPSHOT_PATH").map(PathBuf::from),
            write_model_stream: non_empty("EVENTMILL_WRITE_MODEL_STREAM")
                .unwrap_or_else(|| DEFAULT_WRITE_MODEL_STREAM.to_string()),
            public_stream: non_empty("EVENTMILL_PUBLIC_STREAM").unwrap_or_else(|| DEFAULT_PUBLIC_STREAM.to_string()),
            queue_capacity: positive("EVENTMILL_QUEUE_CAPACITY", queue_capacity, || queue_capacity.to_string())?,
            max_delivery_attempts: positive("EVENTMILL_MAX_DELIVERY_ATTEMPTS", max_delivery_attempts, || {
                max_delivery_attempts.to_string()
            })?,
        })
    }
}
