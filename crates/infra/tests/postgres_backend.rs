//! Postgres backend tests.
//!
//! Skipped unless `EVENTMILL_TEST_DATABASE_URL` points at a database the tests
//! may create tables in. Every test works on freshly named collections and
//! streams, so runs do not interfere.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::TryStreamExt;
use proptest::prelude::*;
use proptest::test_runner::{Config, TestRunner};
use serde_json::{Value as JsonValue, json};
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

use eventmill_core::{Classify, ExpectedVersion};
use eventmill_events::{Command, Event, MetadataMatcher};
use eventmill_infra::document_store::{
    DocumentStore, DocumentStoreError, Filter, FindOptions, InMemoryDocumentStore, OrderBy, WriteOptions,
};
use eventmill_infra::event_store::{EventStore, EventStoreError, LoadQuery};
use eventmill_infra::repository::{
    AggregateDescription, AggregateRepository, ApplyFunctions, LiveProjection, RepositoryConfig, RepositoryError,
};
use eventmill_infra::storage::{Storage, WriteBatch};

const DATABASE_URL: &str = "EVENTMILL_TEST_DATABASE_URL";

static SCHEMA: Mutex<()> = Mutex::new(());

async fn storage() -> Option<Storage> {
    let url = std::env::var(DATABASE_URL).ok().filter(|u| !u.is_empty())?;
    eventmill_observability::init_for_tests();
    let pool = PgPoolOptions::new().max_connections(5).connect(&url).await.unwrap();
    // Concurrent CREATE TABLE IF NOT EXISTS can still collide in the catalog.
    let _guard = SCHEMA.lock().unwrap_or_else(|e| e.into_inner());
    Some(Storage::postgres(pool).await.unwrap())
}

macro_rules! storage_or_skip {
    () => {
        match storage().await {
            Some(storage) => storage,
            None => {
                eprintln!("{DATABASE_URL} not set, skipping");
                return;
            }
        }
    };
}

fn unique(prefix: &str) -> String {
    format!("{prefix}_{}", Uuid::now_v7().simple())
}

#[tokio::test]
async fn documents_round_trip_merge_and_conflicts() {
    let storage = storage_or_skip!();
    let docs = &storage.documents;
    let orders = unique("orders");
    docs.add_collection(&orders, None).await.unwrap();
    assert!(docs.has_collection(&orders).await.unwrap());

    docs.add_doc(&orders, "1", json!({"status": "new", "total": 10}), WriteOptions::default())
        .await
        .unwrap();
    docs.update_doc(&orders, "1", json!({"status": "paid"}), WriteOptions::default())
        .await
        .unwrap();
    let doc = docs.get_doc_and_version(&orders, "1").await.unwrap().unwrap();
    assert_eq!(doc.body, json!({"status": "paid", "total": 10}));
    assert_eq!(doc.version, 2);

    let err = docs
        .add_doc(&orders, "1", json!({}), WriteOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, DocumentStoreError::AlreadyExists { .. }));
    assert!(err.is_conflict());
    assert!(docs.get_doc(&orders, "missing").await.unwrap().is_none());

    let err = docs.get_doc(&unique("absent"), "1").await.unwrap_err();
    assert!(err.is_not_found());

    docs.drop_collection(&orders).await.unwrap();
    assert!(!docs.has_collection(&orders).await.unwrap());
}

#[tokio::test]
async fn paged_find_docs_is_ordered_and_bounded() {
    let storage = storage_or_skip!();
    let docs = &storage.documents;
    let numbers = unique("numbers");
    docs.add_collection(&numbers, None).await.unwrap();
    for i in 0..600 {
        docs.add_doc(&numbers, &format!("{i:04}"), json!({"n": i, "even": i % 2 == 0}), WriteOptions::default())
            .await
            .unwrap();
    }

    let ids: Vec<String> = docs
        .find_doc_ids(
            &numbers,
            &Filter::eq("even", true),
            FindOptions::default().order_by(OrderBy::desc("n")).skip(10).limit(270),
        )
        .try_collect()
        .await
        .unwrap();
    assert_eq!(ids.len(), 270);
    assert_eq!(ids[0], "0578");
    assert_eq!(ids[269], "0040");
    assert_eq!(docs.count_docs(&numbers, &Filter::Any).await.unwrap(), 600);
    docs.drop_collection(&numbers).await.unwrap();
}

#[tokio::test]
async fn paged_find_docs_reads_one_snapshot() {
    let storage = storage_or_skip!();
    let docs = &storage.documents;
    let numbers = unique("snapshot");
    docs.add_collection(&numbers, None).await.unwrap();
    for i in 0..600 {
        docs.add_doc(&numbers, &format!("{i:04}"), json!({"n": i}), WriteOptions::default())
            .await
            .unwrap();
    }

    let mut stream = docs.find_doc_ids(&numbers, &Filter::Any, FindOptions::default().order_by(OrderBy::asc("n")));
    let mut ids = Vec::new();
    for _ in 0..10 {
        ids.push(stream.try_next().await.unwrap().unwrap());
    }

    // Between pages: drop the first half and add rows sorting before the cursor.
    docs.delete_many(&numbers, &Filter::lt("n", 300)).await.unwrap();
    docs.add_doc(&numbers, "new", json!({"n": -1}), WriteOptions::default()).await.unwrap();

    while let Some(id) = stream.try_next().await.unwrap() {
        ids.push(id);
    }
    drop(stream);
    let expected: Vec<String> = (0..600).map(|i| format!("{i:04}")).collect();
    assert_eq!(ids, expected);
    assert_eq!(docs.count_docs(&numbers, &Filter::Any).await.unwrap(), 301);
    docs.drop_collection(&numbers).await.unwrap();
}

fn seed_documents() -> Vec<(&'static str, JsonValue)> {
    vec![
        ("a", json!({"status": "paid", "total": 150, "tags": ["x", "y"], "address": {"city": "Berlin"}, "name": "Bob"})),
        ("b", json!({"status": "paid", "total": 50.5, "tags": ["y"], "address": {"city": "Paris"}, "name": "bobby"})),
        ("c", json!({"status": "new", "total": 100, "tags": [], "address": {"city": "berlin"}, "name": "Alice"})),
        ("d", json!({"status": "new", "total": 100.0, "name": null})),
        ("e", json!({"status": "cancelled", "total": "100", "tags": ["x"], "address": {"city": null}})),
        ("f", json!({"total": -3, "tags": ["z", 1], "address": "Berlin", "name": "A_b%"})),
        ("g", json!({"status": "paid", "address": {"city": "Rome", "zip": 10}, "name": "Zed"})),
        ("h", json!({})),
    ]
}

fn leaf() -> impl Strategy<Value = Filter> {
    let path = prop_oneof![
        Just("status"),
        Just("total"),
        Just("tags"),
        Just("address.city"),
        Just("address.zip"),
        Just("name"),
        Just("missing"),
    ];
    let value = prop_oneof![
        Just(json!("paid")),
        Just(json!("new")),
        Just(json!("Berlin")),
        Just(json!("x")),
        Just(json!("100")),
        Just(json!(100)),
        Just(json!(100.0)),
        Just(json!(50)),
        Just(json!(-3)),
        Just(json!(1)),
        Just(json!(null)),
        Just(json!(true)),
    ];
    let pattern = prop_oneof![Just("%b%"), Just("bob%"), Just("_ed"), Just("A\\_b\\%"), Just("%")];
    let ids = prop::collection::vec(prop_oneof![Just("a"), Just("c"), Just("f"), Just("zz")], 0..3);

    prop_oneof![
        Just(Filter::Any),
        prop_oneof![Just("a"), Just("d"), Just("nope")].prop_map(Filter::doc_id),
        ids.prop_map(|ids| Filter::any_of_doc_id(ids)),
        (path.clone(), value.clone()).prop_map(|(p, v)| Filter::eq(p, v)),
        (path.clone(), value.clone()).prop_map(|(p, v)| Filter::gt(p, v)),
        (path.clone(), value.clone()).prop_map(|(p, v)| Filter::gte(p, v)),
        (path.clone(), value.clone()).prop_map(|(p, v)| Filter::lt(p, v)),
        (path.clone(), value.clone()).prop_map(|(p, v)| Filter::lte(p, v)),
        path.clone().prop_map(Filter::exists),
        (path.clone(), value.clone()).prop_map(|(p, v)| Filter::in_array(p, v)),
        (path.clone(), pattern).prop_map(|(p, pat)| Filter::like(p, pat)),
        (path, prop::collection::vec(value, 0..3)).prop_map(|(p, vs)| Filter::any_of(p, vs)),
    ]
}

fn filter_tree() -> impl Strategy<Value = Filter> {
    leaf().prop_recursive(3, 16, 3, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..3).prop_map(Filter::and),
            prop::collection::vec(inner.clone(), 0..3).prop_map(Filter::or),
            inner.prop_map(Filter::not),
        ]
    })
}

async fn matching_ids(docs: &dyn DocumentStore, collection: &str, filter: &Filter) -> BTreeSet<String> {
    docs.find_doc_ids(collection, filter, FindOptions::default())
        .try_collect()
        .await
        .unwrap()
}

#[test]
fn filters_select_the_same_documents_on_both_backends() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let Some(storage) = rt.block_on(storage()) else {
        eprintln!("{DATABASE_URL} not set, skipping");
        return;
    };
    let memory = InMemoryDocumentStore::new();
    let collection = unique("equivalence");
    rt.block_on(async {
        for store in [&memory as &dyn DocumentStore, storage.documents.as_ref()] {
            store.add_collection(&collection, None).await.unwrap();
            for (id, body) in seed_documents() {
                store.add_doc(&collection, id, body, WriteOptions::default()).await.unwrap();
            }
        }
    });

    let mut runner = TestRunner::new(Config::with_cases(256));
    runner
        .run(&filter_tree(), |filter| {
            let (in_memory, postgres) = rt.block_on(async {
                (
                    matching_ids(&memory, &collection, &filter).await,
                    matching_ids(storage.documents.as_ref(), &collection, &filter).await,
                )
            });
            prop_assert_eq!(in_memory, postgres, "filter: {:?}", filter);
            Ok(())
        })
        .unwrap();

    rt.block_on(storage.documents.drop_collection(&collection)).unwrap();
}

fn order_event(id: &str, version: u64) -> Event {
    Event::new("OrderPlaced", json!({"v": version}))
        .with_meta("aggregateType", "Order")
        .with_meta("aggregateId", id)
        .with_meta("aggregateVersion", version)
}

#[tokio::test]
async fn event_store_appends_conditionally_and_loads_in_order() {
    let storage = storage_or_skip!();
    let events = &storage.events;
    let stream = unique("stream");
    events.create_stream(&stream).await.unwrap();

    let order_1 = MetadataMatcher::for_aggregate("Order", "1");
    let batch = vec![order_event("1", 1), order_event("1", 2), order_event("1", 3)];
    events
        .append_to(&stream, batch.clone(), Some(&order_1), ExpectedVersion::Exact(0))
        .await
        .unwrap();
    events
        .append_to(&stream, vec![order_event("2", 1)], Some(&MetadataMatcher::for_aggregate("Order", "2")), ExpectedVersion::Exact(0))
        .await
        .unwrap();

    let err = events
        .append_to(&stream, vec![order_event("1", 4)], Some(&order_1), ExpectedVersion::Exact(2))
        .await
        .unwrap_err();
    assert!(matches!(err, EventStoreError::Concurrency(_)));

    let err = events
        .append_to(&stream, vec![order_event("1", 3)], None, ExpectedVersion::Any)
        .await
        .unwrap_err();
    assert!(err.is_conflict());

    let loaded: Vec<Event> = events
        .load(&stream, LoadQuery::all().matching(order_1.clone()))
        .try_collect()
        .await
        .unwrap();
    assert_eq!(loaded, batch);

    let after_first: Vec<Event> = events
        .load(&stream, LoadQuery::all().matching(order_1.clone()).after(batch[0].uuid).limit(1))
        .try_collect()
        .await
        .unwrap();
    assert_eq!(after_first, vec![batch[1].clone()]);

    let newest_first: Vec<Event> = events
        .load(&stream, LoadQuery::all().matching(order_1.clone()).after(batch[2].uuid).reversed())
        .try_collect()
        .await
        .unwrap();
    assert_eq!(newest_first, vec![batch[1].clone(), batch[0].clone()]);

    assert_eq!(events.delete(&stream, &order_1).await.unwrap(), 3);
    let err = events
        .append_to(&unique("unknown"), vec![order_event("1", 1)], None, ExpectedVersion::Any)
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    events.delete_stream(&stream).await.unwrap();
}

fn orders(stream_suffix: &str) -> RepositoryConfig {
    let description = AggregateDescription::new("Order", unique("orders"), "orderId").events(["OrderPlaced", "OrderPaid"]);
    let apply = ApplyFunctions::new()
        .on("OrderPlaced", |mut state, _| {
            state["status"] = json!("new");
            state
        })
        .on("OrderPaid", |mut state, _| {
            state["status"] = json!("paid");
            state
        });
    let mut config = RepositoryConfig::new(description, apply).expose_public("OrderPaid");
    config.write_model_stream = format!("write_model_{stream_suffix}");
    config.public_stream = format!("public_{stream_suffix}");
    config
}

#[tokio::test]
async fn repository_saves_and_loads_on_postgres() {
    let storage = storage_or_skip!();
    let suffix = Uuid::now_v7().simple().to_string();
    let repo = AggregateRepository::new(orders(&suffix), storage.clone()).await.unwrap();
    let cmd = Command::new("Order", json!({}));

    repo.save(vec![Event::new("OrderPlaced", json!({}))], &json!({"orderId": "1", "status": "new"}), 0, &cmd)
        .await
        .unwrap();
    repo.save(vec![Event::new("OrderPaid", json!({}))], &json!({"orderId": "1", "status": "paid"}), 1, &cmd)
        .await
        .unwrap();

    let (state, version) = repo.load_state("1", None).await.unwrap();
    assert_eq!(state["status"], "paid");
    assert_eq!(version, 2);
    let (state, version) = repo.load_state("1", Some(1)).await.unwrap();
    assert_eq!(state, json!({"status": "new"}));
    assert_eq!(version, 1);

    let public: Vec<Event> = storage
        .events
        .load(&format!("public_{suffix}"), LoadQuery::all())
        .try_collect()
        .await
        .unwrap();
    assert_eq!(public.len(), 1);
    assert_eq!(public[0].aggregate_version(), Some(2));
}

#[tokio::test]
async fn concurrent_saves_admit_one_writer_on_postgres() {
    let storage = storage_or_skip!();
    let suffix = Uuid::now_v7().simple().to_string();
    let repo = Arc::new(AggregateRepository::new(orders(&suffix), storage).await.unwrap());

    let mut handles = Vec::new();
    for i in 0..6 {
        let repo = Arc::clone(&repo);
        handles.push(tokio::spawn(async move {
            let cmd = Command::new(format!("Place{i}"), json!({}));
            repo.save(vec![Event::new("OrderPlaced", json!({}))], &json!({"orderId": "c"}), 0, &cmd).await
        }));
    }
    let mut won = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => won += 1,
            Err(err) => assert!(matches!(err, RepositoryError::Conflict { .. }), "unexpected error: {err}"),
        }
    }
    assert_eq!(won, 1);
    assert_eq!(repo.load_state("c", None).await.unwrap().1, 1);
}

struct Rejecting;

#[async_trait]
impl LiveProjection for Rejecting {
    fn name(&self) -> &str {
        "rejecting"
    }

    async fn project(&self, _stream: &str, _events: &[Event], batch: &mut WriteBatch) -> anyhow::Result<()> {
        anyhow::ensure!(batch.len() < 2, "refusing {} staged writes", batch.len());
        Ok(())
    }
}

#[tokio::test]
async fn failing_live_projection_rolls_back_the_save() {
    let storage = storage_or_skip!();
    let suffix = Uuid::now_v7().simple().to_string();
    let config = orders(&suffix).live_projection(Arc::new(Rejecting));
    let collection = config.description.collection.clone();
    let repo = AggregateRepository::new(config, storage.clone()).await.unwrap();

    let err = repo
        .save(vec![Event::new("OrderPlaced", json!({}))], &json!({"orderId": "1"}), 0, &Command::new("Place", json!({})))
        .await
        .unwrap_err();
    assert!(matches!(err, RepositoryError::Projection { .. }));

    let written: Vec<Event> = storage
        .events
        .load(&format!("write_model_{suffix}"), LoadQuery::all())
        .try_collect()
        .await
        .unwrap();
    assert!(written.is_empty());
    assert!(storage.documents.get_doc(&collection, "1").await.unwrap().is_none());
}
