//! Whole-stack behaviour through a `Store`.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use kstore_client::{
    CreateOptions, DeleteOptions, GetOptions, ListOptions, PatchOptions, UpdateOptions,
};
use kstore_events::{Broadcaster, BroadcasterConfig, Event, EventType, InMemorySink, SinkOptions};
use kstore_registry::{RegistryError, TypeRegistry};
use kstore_sdk::{
    CollectionIdentity, Context, ObjectKey, ObjectMeta, Patch, PatchOutcome, Resource,
    ResourceDescriptor, Store, StoreConfig, TypeIdentity,
};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
struct Counter {
    #[serde(default)]
    metadata: ObjectMeta,
    #[serde(default)]
    spec: CounterSpec,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
struct CounterSpec {
    #[serde(default)]
    count: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    owner: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    note: String,
}

impl Resource for Counter {
    fn type_identity() -> TypeIdentity {
        TypeIdentity::new("demo.kstore.io", "v1", "Counter")
    }
    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }
    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

fn counters() -> CollectionIdentity {
    CollectionIdentity::new("demo.kstore.io", "v1", "counters")
}

fn counter(name: &str, count: i64) -> Counter {
    Counter {
        metadata: ObjectMeta::named("default", name),
        spec: CounterSpec {
            count,
            ..CounterSpec::default()
        },
    }
}

fn store() -> Store {
    let store = Store::open(StoreConfig::default()).unwrap();
    store
        .register::<Counter>(
            counters(),
            ResourceDescriptor::new("counter", "counters", "Counter")
                .namespaced(true)
                .short_names(["cnt"]),
        )
        .unwrap();
    store
}

fn version(obj: &Counter) -> u64 {
    obj.metadata.resource_version.parse().unwrap()
}

// ---- Test 1: concurrent writers from the same version both land ----

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_writers_lose_nothing() {
    let store = store();
    let ctx = Context::background();
    let client = store.client().clone();
    client.create(&ctx, &counter("c", 0), &CreateOptions::default()).await.unwrap();

    let key = ObjectKey::new("default", "c");
    let a = {
        let client = client.clone();
        let key = key.clone();
        tokio::spawn(async move {
            let ctx = Context::background();
            let patch = Patch::Merge(serde_json::json!({"spec": {"owner": "alice"}}));
            client.patch::<Counter>(&ctx, &key, &patch, &PatchOptions::default()).await
        })
    };
    let b = {
        let client = client.clone();
        let key = key.clone();
        tokio::spawn(async move {
            let ctx = Context::background();
            let patch = Patch::Merge(serde_json::json!({"spec": {"note": "hello"}}));
            client.patch::<Counter>(&ctx, &key, &patch, &PatchOptions::default()).await
        })
    };
    a.await.unwrap().unwrap();
    b.await.unwrap().unwrap();

    let got: Counter = client.get(&ctx, &key, &GetOptions::default()).await.unwrap();
    assert_eq!(got.spec.owner, "alice");
    assert_eq!(got.spec.note, "hello");
    store.shutdown();
}

// ---- Test 2: versions strictly increase ----

#[tokio::test]
async fn versions_increase_with_every_write() {
    let store = store();
    let ctx = Context::background();
    let client = store.client();
    let mut obj = client.create(&ctx, &counter("v", 0), &CreateOptions::default()).await.unwrap();
    let mut last = version(&obj);
    for i in 1..=5 {
        obj.spec.count = i;
        obj = client.update(&ctx, &obj, &UpdateOptions::default()).await.unwrap();
        let read: Counter = client.get(&ctx, &obj.object_key(), &GetOptions::default()).await.unwrap();
        assert_eq!(version(&read), version(&obj));
        assert!(version(&obj) > last);
        last = version(&obj);
    }
}

// ---- Test 3: create then get round-trips ----

#[tokio::test]
async fn create_get_round_trip() {
    let store = store();
    let ctx = Context::background();
    let mut want = counter("", 3);
    want.metadata.generate_name = "rt-".into();
    let created = store
        .client()
        .create(&ctx, &want, &CreateOptions::default())
        .await
        .unwrap();
    assert!(created.metadata.name.starts_with("rt-"));
    let got: Counter = store
        .client()
        .get(&ctx, &created.object_key(), &GetOptions::default())
        .await
        .unwrap();
    assert_eq!(got, created);
    assert_eq!(got.spec, want.spec);
}

// ---- Test 4: apply is idempotent ----

#[tokio::test]
async fn apply_twice_is_unchanged() {
    let store = store();
    let ctx = Context::background();
    let key = ObjectKey::new("default", "applied");
    let desired = Patch::Apply(serde_json::json!({
        "apiVersion": "demo.kstore.io/v1",
        "kind": "Counter",
        "metadata": {"name": "applied", "namespace": "default"},
        "spec": {"count": 7}
    }));
    let opts = PatchOptions::apply("deployer");
    let first = store.client().patch::<Counter>(&ctx, &key, &desired, &opts).await.unwrap();
    assert_eq!(first.outcome, PatchOutcome::Created);
    let second = store.client().patch::<Counter>(&ctx, &key, &desired, &opts).await.unwrap();
    assert_eq!(second.outcome, PatchOutcome::Unchanged);
    assert_eq!(second.object.metadata.resource_version, first.object.metadata.resource_version);
}

// ---- Test 5: short names are unique until unregistered ----

#[tokio::test]
async fn short_name_conflicts_until_unregistered() {
    let store = store();
    let registry = store.registry();
    let clash = CollectionIdentity::new("other.kstore.io", "v1", "tallies");
    let err = registry
        .register_resource(
            clash.clone(),
            ResourceDescriptor::new("tally", "tallies", "Tally").short_names(["cnt"]),
        )
        .unwrap_err();
    assert!(matches!(err, RegistryError::ShortNameConflict { .. }));

    registry.unregister_resource(&counters()).unwrap();
    registry
        .register_resource(
            clash.clone(),
            ResourceDescriptor::new("tally", "tallies", "Tally").short_names(["cnt"]),
        )
        .unwrap();
    assert_eq!(registry.get_collection_for_short_name("cnt").unwrap(), clash);
}

// ---- Test 6: repeated events are aggregated in storage ----

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn repeated_events_aggregate() {
    let store = store();
    let ctx = Context::background();
    let obj = store
        .client()
        .create(&ctx, &counter("noisy", 0), &CreateOptions::default())
        .await
        .unwrap();
    for _ in 0..3 {
        store.recorder().event(&obj, EventType::Warning, "Overflow", "count overflowed");
    }

    let mut stored = Vec::new();
    for _ in 0..400 {
        stored = store
            .client()
            .list::<Event>(&ctx, &ListOptions::default())
            .await
            .unwrap()
            .items;
        if stored.len() == 1 && stored[0].count == 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].count, 3);
    assert_eq!(stored[0].source.component, "kstore");
    assert_eq!(stored[0].involved_object.name, "noisy");
    store.shutdown();
}

// ---- Test 7: a full queue drops instead of blocking ----

#[test]
fn full_queue_drops() {
    let broadcaster = Broadcaster::new(BroadcasterConfig { queue_capacity: 3 });
    let recorder = broadcaster.new_recorder("test");
    let target = counter("x", 0);
    for _ in 0..4 {
        recorder.event(&target, EventType::Normal, "Tick", "tick");
    }
    assert!(broadcaster.dropped_count() >= 1);
    assert_eq!(broadcaster.recorded_count(), 3);
}

#[tokio::test]
async fn queued_events_reach_the_first_sink() {
    let broadcaster = Broadcaster::new(BroadcasterConfig { queue_capacity: 2 });
    let recorder = broadcaster.new_recorder("test");
    for i in 0..3 {
        recorder.event(&counter(&format!("x{i}"), 0), EventType::Normal, "Tick", "tick");
    }
    let sink = Arc::new(InMemorySink::new());
    let _sub = broadcaster
        .start_recording_to_sink(sink.clone(), SinkOptions::default())
        .unwrap();
    for _ in 0..200 {
        if sink.len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(sink.len(), 2);
    assert_eq!(broadcaster.dropped_count(), 1);
}

// ---- Test 8: defaulting and not-found handling ----

#[tokio::test]
async fn defaulter_and_not_found() {
    let store = store();
    let ctx = Context::background();
    store
        .client()
        .admission()
        .default_with::<Counter, _>(|c: &mut Counter| {
            if c.spec.count == 0 {
                c.spec.count = 1;
            }
            Ok(())
        })
        .unwrap();
    store
        .client()
        .create(&ctx, &counter("a", 0), &CreateOptions::default())
        .await
        .unwrap();
    let got: Counter = store
        .client()
        .get(&ctx, &ObjectKey::new("default", "a"), &GetOptions::default())
        .await
        .unwrap();
    assert_eq!(got.spec.count, 1);

    let missing = ObjectKey::new("default", "nope");
    let err = store
        .client()
        .delete_by_key::<Counter>(&ctx, &missing, &DeleteOptions::default())
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    let zero: Counter = store
        .client()
        .get(&ctx, &missing, &GetOptions { ignore_not_found: true })
        .await
        .unwrap();
    assert_eq!(zero, Counter::default());
}

// ---- Store lifecycle ----

#[tokio::test]
async fn tenants_are_isolated() {
    let storage: Arc<dyn kstore_sdk::Storage> = Arc::new(kstore_storage::InMemoryStorage::new());
    let open = |tenant: &str| {
        let mut config = StoreConfig::default();
        config.keys.tenant = Some(tenant.to_string());
        config.events.enabled = false;
        let store = Store::open_with(config, storage.clone(), Arc::new(TypeRegistry::new())).unwrap();
        store
            .register::<Counter>(counters(), ResourceDescriptor::new("counter", "counters", "Counter").namespaced(true))
            .unwrap();
        store
    };
    let a = open("a");
    let b = open("b");
    let ctx = Context::background();
    a.client().create(&ctx, &counter("shared", 1), &CreateOptions::default()).await.unwrap();
    b.client().create(&ctx, &counter("shared", 2), &CreateOptions::default()).await.unwrap();

    let in_a = a.client().list::<Counter>(&ctx, &ListOptions::default()).await.unwrap();
    assert_eq!(in_a.items.len(), 1);
    assert_eq!(in_a.items[0].spec.count, 1);
    assert_eq!(b.broadcaster().sink_count(), 0);
}

#[tokio::test]
async fn shutdown_stops_event_delivery() {
    let store = store();
    assert_eq!(store.broadcaster().sink_count(), 1);
    store.shutdown();
    store.shutdown();
    assert!(store.broadcaster().is_shut_down());
    store.recorder().event(&counter("late", 0), EventType::Normal, "Late", "late");
    assert_eq!(store.broadcaster().dropped_count(), 1);
}

#[tokio::test]
async fn open_default_shares_the_default_registry() {
    let first = Store::open_default().unwrap();
    let second = Store::open_default().unwrap();
    assert!(Arc::ptr_eq(first.registry(), second.registry()));
    assert!(Arc::ptr_eq(first.registry(), &kstore_sdk::default_registry()));
    first.shutdown();
    second.shutdown();
}

#[test]
fn open_without_runtime_fails_only_with_events() {
    let err = Store::open(StoreConfig::default()).unwrap_err();
    assert_eq!(err.kind(), kstore_types::ErrorKind::Internal);

    let mut config = StoreConfig::default();
    config.events.enabled = false;
    assert!(Store::open(config).is_ok());
}
