//! Explicit repository configuration.
//!
//! Everything the repository dispatches on is handed to its constructor:
//! the aggregate description, the apply function of every event name, the
//! public counterparts and the live projections.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde_json::Value as JsonValue;

use eventmill_core::EventId;
use eventmill_events::{Event, Visibility};

use crate::config::{DEFAULT_PUBLIC_STREAM, DEFAULT_WRITE_MODEL_STREAM, EngineConfig};

use super::{LiveProjection, RepositoryError};

/// Pure state transition: `(state, event) -> state`.
pub type ApplyFn = Arc<dyn Fn(JsonValue, &Event) -> JsonValue + Send + Sync>;

/// Derives the public form of a service event.
pub type PublicFn = Arc<dyn Fn(&Event) -> Event + Send + Sync>;

/// Static shape of one aggregate type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateDescription {
    /// Stamped as `aggregateType` on every service event.
    pub aggregate_type: String,
    /// Document collection holding the snapshots.
    pub collection: String,
    /// State field holding the aggregate id.
    pub identifier: String,
    /// Every service event name this aggregate emits.
    pub events: BTreeSet<String>,
}

impl AggregateDescription {
    pub fn new(
        aggregate_type: impl Into<String>,
        collection: impl Into<String>,
        identifier: impl Into<String>,
    ) -> Self {
        Self {
            aggregate_type: aggregate_type.into(),
            collection: collection.into(),
            identifier: identifier.into(),
            events: BTreeSet::new(),
        }
    }

    pub fn event(mut self, name: impl Into<String>) -> Self {
        self.events.insert(name.into());
        self
    }

    pub fn events<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.events.extend(names.into_iter().map(Into::into));
        self
    }
}

/// Event name to apply function. Registering a name twice is a
/// configuration error reported when the repository is built.
#[derive(Clone, Default)]
pub struct ApplyFunctions {
    functions: BTreeMap<String, ApplyFn>,
    duplicates: BTreeSet<String>,
}

impl std::fmt::Debug for ApplyFunctions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApplyFunctions")
            .field("events", &self.functions.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl ApplyFunctions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(mut self, name: impl Into<String>, apply: F) -> Self
    where
        F: Fn(JsonValue, &Event) -> JsonValue + Send + Sync + 'static,
    {
        let name = name.into();
        if self.functions.insert(name.clone(), Arc::new(apply)).is_some() {
            self.duplicates.insert(name);
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&ApplyFn> {
        self.functions.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }

    /// Exactly one function per declared event, none for undeclared ones.
    pub fn validate(&self, description: &AggregateDescription) -> Result<(), RepositoryError> {
        let configuration = |message: String| {
            Err(RepositoryError::Configuration { aggregate_type: description.aggregate_type.clone(), message })
        };
        if let Some(name) = self.duplicates.iter().next() {
            return configuration(format!("event {name} has more than one apply function"));
        }
        if let Some(name) = description.events.iter().find(|n| !self.functions.contains_key(*n)) {
            return configuration(format!("event {name} has no apply function"));
        }
        if let Some(name) = self.functions.keys().find(|n| !description.events.contains(*n)) {
            return configuration(format!("apply function registered for undeclared event {name}"));
        }
        Ok(())
    }
}

/// The public copy of a service event: fresh id, same name, payload and
/// metadata, `visibility = public`.
pub fn public_copy(event: &Event) -> Event {
    let mut public = event.clone().with_visibility(Visibility::Public);
    public.uuid = EventId::new();
    public
}

#[derive(Clone)]
pub struct RepositoryConfig {
    pub description: AggregateDescription,
    pub apply: ApplyFunctions,
    pub write_model_stream: String,
    pub public_stream: String,
    /// Service event name to public form.
    pub public_counterparts: BTreeMap<String, PublicFn>,
    pub live_projections: Vec<Arc<dyn LiveProjection>>,
}

impl std::fmt::Debug for RepositoryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositoryConfig")
            .field("description", &self.description)
            .field("apply", &self.apply)
            .field("write_model_stream", &self.write_model_stream)
            .field("public_stream", &self.public_stream)
            .field("public_counterparts", &self.public_counterparts.keys().collect::<Vec<_>>())
            .field("live_projections", &self.live_projections.len())
            .finish()
    }
}

impl RepositoryConfig {
    pub fn new(description: AggregateDescription, apply: ApplyFunctions) -> Self {
        Self {
            description,
            apply,
            write_model_stream: DEFAULT_WRITE_MODEL_STREAM.to_string(),
            public_stream: DEFAULT_PUBLIC_STREAM.to_string(),
            public_counterparts: BTreeMap::new(),
            live_projections: Vec::new(),
        }
    }

    /// Take the stream names from the engine configuration.
    pub fn streams_from(mut self, config: &EngineConfig) -> Self {
        self.write_model_stream = config.write_model_stream.clone();
        self.public_stream = config.public_stream.clone();
        self
    }

    /// Also publish `event` to the public stream, as a [`public_copy`].
    pub fn expose_public(self, event: impl Into<String>) -> Self {
        self.expose_public_with(event, public_copy)
    }

    pub fn expose_public_with<F>(mut self, event: impl Into<String>, public: F) -> Self
    where
        F: Fn(&Event) -> Event + Send + Sync + 'static,
    {
        self.public_counterparts.insert(event.into(), Arc::new(public));
        self
    }

    pub fn live_projection(mut self, projection: Arc<dyn LiveProjection>) -> Self {
        self.live_projections.push(projection);
        self
    }

    pub fn validate(&self) -> Result<(), RepositoryError> {
        self.apply.validate(&self.description)?;
        if let Some(name) = self.public_counterparts.keys().find(|n| !self.description.events.contains(*n)) {
            return Err(RepositoryError::Configuration {
                aggregate_type: self.description.aggregate_type.clone(),
                message: format!("public counterpart configured for undeclared event {name}"),
            });
        }
        Ok(())
    }
}
