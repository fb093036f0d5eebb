use futures::TryStreamExt;
use serde_json::{Map, Value as JsonValue, json};
use tracing::{Span, debug, instrument};

use eventmill_core::{Classify, ExpectedVersion};
use eventmill_events::{Command, Event, MatchOp, MetadataMatcher, Visibility, meta};

use crate::event_store::LoadQuery;
use crate::storage::{Storage, WriteBatch};

use super::{AggregateDescription, RepositoryConfig, RepositoryError};

fn empty_state() -> JsonValue {
    JsonValue::Object(Map::new())
}

/// Loads and saves the aggregates of one [`AggregateDescription`].
///
/// State is a JSON value folded from the aggregate's service events on the
/// write-model stream, starting from the snapshot document when there is one.
/// The version of an aggregate is the `aggregateVersion` of its last event;
/// it equals the number of its events on the write-model stream.
#[derive(Debug, Clone)]
pub struct AggregateRepository {
    config: RepositoryConfig,
    storage: Storage,
}

impl AggregateRepository {
    /// Validates the configuration and creates the snapshot collection and
    /// both streams when missing.
    pub async fn new(config: RepositoryConfig, storage: Storage) -> Result<Self, RepositoryError> {
        config.validate()?;
        storage.documents.add_collection(&config.description.collection, None).await?;
        storage.events.create_stream(&config.write_model_stream).await?;
        storage.events.create_stream(&config.public_stream).await?;
        Ok(Self { config, storage })
    }

    pub fn description(&self) -> &AggregateDescription {
        &self.config.description
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    fn configuration(&self, message: String) -> RepositoryError {
        RepositoryError::Configuration { aggregate_type: self.description().aggregate_type.clone(), message }
    }

    fn partition(&self, aggregate_id: &str) -> MetadataMatcher {
        MetadataMatcher::for_aggregate(&self.description().aggregate_type, aggregate_id)
    }

    /// Current state and version of an aggregate.
    ///
    /// With `until_version` the snapshot is ignored and only events up to
    /// that version are folded. Fails with `NotFound` when the resulting
    /// version is 0, which includes aggregates whose last event deleted the
    /// state.
    #[instrument(skip(self), fields(aggregate_type = %self.config.description.aggregate_type, replayed), err)]
    pub async fn load_state(
        &self,
        aggregate_id: &str,
        until_version: Option<u64>,
    ) -> Result<(JsonValue, u64), RepositoryError> {
        let description = self.description();
        let (mut state, mut version) = match until_version {
            Some(_) => (empty_state(), 0),
            None => match self.storage.documents.get_doc_and_version(&description.collection, aggregate_id).await? {
                Some(snapshot) => (snapshot.body, snapshot.version),
                None => (empty_state(), 0),
            },
        };

        let mut matcher = self.partition(aggregate_id);
        if version > 0 {
            matcher = matcher.with(meta::AGGREGATE_VERSION, MatchOp::Gt, version);
        }
        if let Some(until) = until_version {
            matcher = matcher.with(meta::AGGREGATE_VERSION, MatchOp::Lte, until);
        }

        let mut replayed = 0u64;
        let mut events = self
            .storage
            .events
            .load(&self.config.write_model_stream, LoadQuery::all().matching(matcher));
        while let Some(event) = events.try_next().await? {
            let apply = self
                .config
                .apply
                .get(&event.name)
                .ok_or_else(|| self.configuration(format!("event {} has no apply function", event.name)))?;
            if event.deletes_state() || event.deletes_history() {
                state = empty_state();
                version = 0;
            } else {
                state = apply(state, &event);
                version = event.aggregate_version().unwrap_or(version + 1);
            }
            replayed += 1;
        }
        Span::current().record("replayed", replayed);

        if version == 0 {
            return Err(RepositoryError::NotFound {
                aggregate_type: description.aggregate_type.clone(),
                aggregate_id: aggregate_id.to_string(),
            });
        }
        Ok((state, version))
    }

    /// Persist the events produced by `command` together with the new state.
    ///
    /// Service events are stamped with the aggregate id, type and versions
    /// `expected_version + 1 ..`, plus the command's causation and
    /// non-reserved metadata. Returns `false` when there is nothing to save.
    /// A writer that saved the aggregate in the meantime makes this fail with
    /// [`RepositoryError::Conflict`]; nothing is written then.
    ///
    /// `expected_version` counts every event of the aggregate on the
    /// write-model stream. A `ceDeleteState` save keeps those events, so the
    /// id answers `NotFound` afterwards but cannot be created again from
    /// version 0; only a `ceDeleteHistory` save frees the id for re-creation.
    #[instrument(
        skip(self, events, state, command),
        fields(
            aggregate_type = %self.config.description.aggregate_type,
            aggregate_id,
            command = %command.name,
            service_events,
            public_events,
        ),
        err
    )]
    pub async fn save(
        &self,
        events: Vec<Event>,
        state: &JsonValue,
        expected_version: u64,
        command: &Command,
    ) -> Result<bool, RepositoryError> {
        if events.is_empty() {
            return Ok(false);
        }
        let description = self.description();
        let aggregate_id = match state.get(&description.identifier) {
            Some(JsonValue::String(id)) => id.clone(),
            Some(JsonValue::Number(id)) => id.to_string(),
            _ => {
                return Err(self.configuration(format!(
                    "state has no identifier field {}",
                    description.identifier
                )));
            }
        };
        Span::current().record("aggregate_id", aggregate_id.as_str());

        let mut service = Vec::new();
        let mut public = Vec::new();
        let mut delete_state = false;
        let mut delete_history = false;
        let mut version = expected_version;

        for mut event in events {
            delete_state |= event.deletes_state();
            delete_history |= event.deletes_history();
            match event.visibility() {
                Visibility::Public => public.push(event),
                Visibility::Service => {
                    if self.config.apply.get(&event.name).is_none() {
                        return Err(self.configuration(format!("event {} is not declared", event.name)));
                    }
                    version += 1;
                    stamp(&mut event, description, &aggregate_id, version, command);
                    if let Some(public_form) = self.config.public_counterparts.get(&event.name) {
                        public.push(public_form(&event));
                    }
                    service.push(event);
                }
            }
        }
        Span::current().record("service_events", service.len());
        Span::current().record("public_events", public.len());

        let mut batch = WriteBatch::new();
        let partition = self.partition(&aggregate_id);
        if delete_history {
            batch.delete_events(&self.config.write_model_stream, partition);
        } else if !service.is_empty() {
            batch.append_to(
                &self.config.write_model_stream,
                service,
                Some(partition),
                ExpectedVersion::Exact(expected_version),
            );
        }
        if !public.is_empty() {
            batch.append_to(&self.config.public_stream, public, None, ExpectedVersion::Any);
        }
        if delete_state || delete_history {
            batch.delete_doc(&description.collection, &aggregate_id);
        } else if version > expected_version {
            batch.set_doc(&description.collection, &aggregate_id, state.clone(), version);
        }

        self.project(&mut batch).await?;

        match self.storage.unit_of_work.commit(batch).await {
            Ok(()) => {
                debug!(aggregate_id = %aggregate_id, version, "aggregate saved");
                Ok(true)
            }
            Err(source) if source.is_conflict() => Err(RepositoryError::Conflict {
                aggregate_type: description.aggregate_type.clone(),
                aggregate_id,
                expected_version,
                source,
            }),
            Err(source) => Err(RepositoryError::Commit(source)),
        }
    }

    async fn project(&self, batch: &mut WriteBatch) -> Result<(), RepositoryError> {
        if self.config.live_projections.is_empty() {
            return Ok(());
        }
        let appended: Vec<(String, Vec<Event>)> = batch
            .appended()
            .map(|(stream, events)| (stream.to_string(), events.to_vec()))
            .collect();
        for projection in &self.config.live_projections {
            for (stream, events) in &appended {
                projection
                    .project(stream, events, batch)
                    .await
                    .map_err(|source| RepositoryError::Projection { projection: projection.name().to_string(), source })?;
            }
        }
        Ok(())
    }
}

/// Aggregate identity, version, causation and forwarded command metadata.
/// Metadata already present on the event wins over the command's.
fn stamp(event: &mut Event, description: &AggregateDescription, aggregate_id: &str, version: u64, command: &Command) {
    event.meta.insert(meta::AGGREGATE_ID.into(), json!(aggregate_id));
    event.meta.insert(meta::AGGREGATE_TYPE.into(), json!(description.aggregate_type));
    event.meta.insert(meta::AGGREGATE_VERSION.into(), json!(version));
    event.meta.insert(meta::CAUSATION_ID.into(), json!(command.uuid.to_string()));
    event.meta.insert(meta::CAUSATION_NAME.into(), json!(command.name));

    for (key, value) in &command.meta {
        if !meta::is_reserved(key) && !event.meta.contains_key(key) {
            event.meta.insert(key.clone(), value.clone());
        }
    }
    let user_id = event.meta.get(meta::USER).and_then(|u| u.get(meta::USER_ID)).cloned();
    if let Some(user_id) = user_id {
        event.meta.insert(meta::USER.into(), user_id);
    }
}
