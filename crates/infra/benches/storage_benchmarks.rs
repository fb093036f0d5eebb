use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use futures::TryStreamExt;
use serde_json::{Value as JsonValue, json};
use tokio::runtime::Runtime;

use eventmill_core::ExpectedVersion;
use eventmill_events::{Command, Event};
use eventmill_infra::document_store::{DocumentStore, Filter, FindOptions, InMemoryDocumentStore, OrderBy, WriteOptions};
use eventmill_infra::event_store::{EventStore, InMemoryEventStore, LoadQuery};
use eventmill_infra::repository::{AggregateDescription, AggregateRepository, ApplyFunctions, RepositoryConfig};
use eventmill_infra::storage::Storage;

fn document(i: usize) -> JsonValue {
    json!({
        "status": if i % 3 == 0 { "paid" } else { "new" },
        "total": i % 500,
        "customer": {"name": format!("customer-{}", i % 97), "city": if i % 2 == 0 { "Berlin" } else { "Paris" }},
        "tags": [format!("t{}", i % 7)],
    })
}

fn search_filter() -> Filter {
    Filter::and([
        Filter::eq("status", "paid"),
        Filter::gt("total", 100),
        Filter::or([Filter::like("customer.name", "%-1%"), Filter::in_array("tags", "t3")]),
        Filter::not(Filter::eq("customer.city", "Paris")),
    ])
}

fn bench_filter_evaluation(c: &mut Criterion) {
    let mut group = c.benchmark_group("filter_evaluation");
    let filter = search_filter();

    for size in [100usize, 1_000, 10_000] {
        let docs: Vec<(String, JsonValue)> = (0..size).map(|i| (i.to_string(), document(i))).collect();
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("matches", size), &docs, |b, docs| {
            b.iter(|| {
                let filter = filter.compile();
                docs.iter().filter(|(id, body)| filter.matches(id, black_box(body))).count()
            });
        });
    }

    group.finish();
}

fn bench_find_docs(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let store = InMemoryDocumentStore::new();
    rt.block_on(async {
        store.add_collection("orders", None).await.unwrap();
        for i in 0..5_000 {
            store.add_doc("orders", &i.to_string(), document(i), WriteOptions::default()).await.unwrap();
        }
    });
    let filter = search_filter();

    c.bench_function("find_docs_sorted_page", |b| {
        b.iter(|| {
            rt.block_on(async {
                let page: Vec<_> = store
                    .find_docs("orders", &filter, FindOptions::default().order_by(OrderBy::desc("total")).limit(50))
                    .try_collect()
                    .await
                    .unwrap();
                black_box(page)
            })
        });
    });
}

fn bench_event_append_throughput(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("event_append_throughput");

    for batch_size in [1usize, 10, 100] {
        group.throughput(Throughput::Elements(batch_size as u64));
        group.bench_with_input(BenchmarkId::new("batch_append", batch_size), &batch_size, |b, &size| {
            let store = InMemoryEventStore::new();
            rt.block_on(store.create_stream("bench")).unwrap();
            b.iter(|| {
                let events = (0..size).map(|i| Event::new("Ticked", json!({"i": i}))).collect();
                rt.block_on(store.append_to("bench", events, None, ExpectedVersion::Any)).unwrap();
            });
        });
    }

    group.finish();
}

fn counter_repository(rt: &Runtime) -> AggregateRepository {
    let description = AggregateDescription::new("Counter", "counters", "counterId").event("Incremented");
    let apply = ApplyFunctions::new().on("Incremented", |mut state, event| {
        let by = event.payload["by"].as_i64().unwrap_or(1);
        state["value"] = json!(state["value"].as_i64().unwrap_or(0) + by);
        state
    });
    rt.block_on(AggregateRepository::new(RepositoryConfig::new(description, apply), Storage::in_memory()))
        .unwrap()
}

fn bench_repository(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("aggregate_repository");
    let command = Command::new("Increment", json!({}));

    group.bench_function("save_fresh_aggregate", |b| {
        let repo = counter_repository(&rt);
        let mut n = 0u64;
        b.iter(|| {
            n += 1;
            let state = json!({"counterId": n.to_string(), "value": 1});
            rt.block_on(repo.save(vec![Event::new("Incremented", json!({"by": 1}))], &state, 0, &command))
                .unwrap();
        });
    });

    for history in [10u64, 100, 1_000] {
        group.bench_with_input(BenchmarkId::new("load_state_full_replay", history), &history, |b, &history| {
            let repo = counter_repository(&rt);
            for v in 0..history {
                let state = json!({"counterId": "c", "value": v + 1});
                rt.block_on(repo.save(vec![Event::new("Incremented", json!({"by": 1}))], &state, v, &command))
                    .unwrap();
            }
            b.iter(|| black_box(rt.block_on(repo.load_state("c", Some(history))).unwrap()));
        });
    }

    group.finish();
}

fn bench_event_load(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let store = InMemoryEventStore::new();
    rt.block_on(async {
        store.create_stream("bench").await.unwrap();
        let events = (0..10_000).map(|i| Event::new("Ticked", json!({"i": i}))).collect();
        store.append_to("bench", events, None, ExpectedVersion::Any).await.unwrap();
    });

    c.bench_function("load_10k_events", |b| {
        b.iter(|| {
            rt.block_on(async {
                let events: Vec<Event> = store.load("bench", LoadQuery::all()).try_collect().await.unwrap();
                black_box(events.len())
            })
        });
    });
}

criterion_group!(
    benches,
    bench_filter_evaluation,
    bench_find_docs,
    bench_event_append_throughput,
    bench_repository,
    bench_event_load
);
criterion_main!(benches);
