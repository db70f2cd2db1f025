#![forbid(unsafe_code)]

//! End-to-end behavior of persisted values.
//!
//! # Invariants
//!
//! 1. **Round trip**: `decode(encode(v)) == v` for every encodable value.
//! 2. **Write visibility**: a write is readable immediately, even when the
//!    store rejects it.
//! 3. **Single publication**: a local write publishes exactly once.
//! 4. **Adoption**: an external change is adopted and published once.
//! 5. **Absence**: a removed key resets the value to its default.
//! 6. **Identity**: handles for the same key share one value.
//! 7. **Type consistency**: reusing a key with another type panics.
//! 8. **Resilience**: an undecodable change leaves the value untouched.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::Arc;
use std::thread;

use proptest::prelude::*;
use serde::{Deserialize, Serialize};
use simloc_store::{
    ChangeHandler, FileStore, MemoryStore, Observation, Persisted, PropertyValue, Registry, Store,
    StoreError, StoreId, decode, encode,
};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct Place {
    address: String,
    latitude: f64,
    longitude: f64,
}

fn home() -> Place {
    Place {
        address: "Home".into(),
        latitude: 37.0,
        longitude: -122.0,
    }
}

fn memory() -> Arc<dyn Store> {
    Arc::new(MemoryStore::new())
}

fn count_changes<V: simloc_store::Persistable + Clone + 'static>(
    handle: &Persisted<V>,
) -> (simloc_store::Subscription, Rc<Cell<usize>>) {
    let hits = Rc::new(Cell::new(0));
    let h = Rc::clone(&hits);
    let sub = handle.subscribe(move |_| h.set(h.get() + 1));
    (sub, hits)
}

/// Store that accepts observers but fails every write.
struct ReadOnlyStore {
    inner: MemoryStore,
}

impl Store for ReadOnlyStore {
    fn id(&self) -> StoreId {
        self.inner.id()
    }
    fn get(&self, key: &str) -> Option<PropertyValue> {
        self.inner.get(key)
    }
    fn set(&self, _key: &str, _value: PropertyValue) -> Result<(), StoreError> {
        Err(StoreError::PoisonedLock)
    }
    fn remove(&self, _key: &str) -> Result<(), StoreError> {
        Err(StoreError::PoisonedLock)
    }
    fn observe(&self, key: &str, handler: ChangeHandler) -> Observation {
        self.inner.observe(key, handler)
    }
}

// ---------------------------------------------------------------------------
// Round trip
// ---------------------------------------------------------------------------

fn place_strategy() -> impl Strategy<Value = Place> {
    ("[a-zA-Z0-9 ,.]{0,24}", -90.0_f64..=90.0, -180.0_f64..=180.0).prop_map(
        |(address, latitude, longitude)| Place {
            address,
            latitude,
            longitude,
        },
    )
}

proptest! {
    #[test]
    fn round_trip_law_for_place_lists(places in prop::collection::vec(place_strategy(), 0..8)) {
        let native = encode(&places).unwrap();
        let back: Vec<Place> = decode(&native).unwrap();
        prop_assert_eq!(back, places);
    }

    #[test]
    fn round_trip_law_for_scalars(n in any::<i64>(), flag in any::<bool>(), text in ".{0,16}") {
        prop_assert_eq!(decode::<i64>(&encode(&n).unwrap()).unwrap(), n);
        prop_assert_eq!(decode::<bool>(&encode(&flag).unwrap()).unwrap(), flag);
        prop_assert_eq!(decode::<String>(&encode(&text).unwrap()).unwrap(), text);
    }

    #[test]
    fn round_trip_law_for_maps(map in prop::collection::btree_map("[a-z]{1,6}", any::<i32>(), 0..6)) {
        let back: BTreeMap<String, i32> = decode(&encode(&map).unwrap()).unwrap();
        prop_assert_eq!(back, map);
    }
}

// ---------------------------------------------------------------------------
// Writer behavior through the facade
// ---------------------------------------------------------------------------

#[test]
fn write_is_visible_immediately() {
    let registry = Registry::new();
    let store = memory();
    let places = Persisted::new(&registry, &store, "places", Vec::<Place>::new());
    places.set(vec![home()]);
    assert_eq!(places.get(), vec![home()]);
}

#[test]
fn write_is_visible_even_when_store_rejects_it() {
    let registry = Registry::new();
    let store: Arc<dyn Store> = Arc::new(ReadOnlyStore {
        inner: MemoryStore::new(),
    });
    let n = Persisted::new(&registry, &store, "n", 0_i64);
    n.set(12);
    assert_eq!(n.get(), 12);
    assert_eq!(store.get("n"), None);
}

#[test]
fn self_write_publishes_once() {
    let registry = Registry::new();
    let store = memory();
    let n = Persisted::new(&registry, &store, "n", 0_i64);
    let (_sub, hits) = count_changes(&n);

    n.set(1);
    assert_eq!(registry.pump(), 0, "echo must not reach the mailbox");
    assert_eq!(hits.get(), 1);
}

#[test]
fn external_change_is_adopted_once() {
    let registry = Registry::new();
    let store = memory();
    let places = Persisted::new(&registry, &store, "places", Vec::<Place>::new());
    let (_sub, hits) = count_changes(&places);

    store.set("places", encode(&vec![home()]).unwrap()).unwrap();
    registry.pump();
    assert_eq!(places.get(), vec![home()]);
    assert_eq!(hits.get(), 1);
    assert_eq!(registry.pump(), 0);
}

#[test]
fn absent_key_resets_to_default() {
    let registry = Registry::new();
    let store = memory();
    let n = Persisted::new(&registry, &store, "n", 5_i64);
    n.set(50);
    store.remove("n").unwrap();
    registry.pump();
    assert_eq!(n.get(), 5);
    // Reset is in memory only.
    assert_eq!(store.get("n"), None);
}

#[test]
fn same_key_handles_share_value() {
    let registry = Registry::new();
    let store = memory();
    let a = Persisted::new(&registry, &store, "theme", String::from("light"));
    let b = Persisted::new(&registry, &store, "theme", String::from("ignored"));
    a.set("dark".into());
    assert_eq!(b.get(), "dark");
    assert_eq!(registry.len(), 1);
}

#[test]
#[should_panic(expected = "must remain consistent")]
fn type_mismatch_is_fatal() {
    let registry = Registry::new();
    let store = memory();
    let _a = Persisted::new(&registry, &store, "k", 0_i64);
    let _b = Persisted::new(&registry, &store, "k", Vec::<Place>::new());
}

#[test]
fn malformed_external_change_is_ignored() {
    let registry = Registry::new();
    let store = memory();
    let places = Persisted::new(&registry, &store, "places", vec![home()]);
    let (_sub, hits) = count_changes(&places);

    store
        .set("places", PropertyValue::Array(vec![PropertyValue::Bool(true)]))
        .unwrap();
    assert_eq!(registry.pump(), 1);
    assert_eq!(places.get(), vec![home()]);
    assert_eq!(hits.get(), 0);
}

#[test]
fn location_list_scenario() {
    let registry = Registry::new();
    let store = memory();
    let places = Persisted::new(&registry, &store, "device-locations", Vec::<Place>::new());
    assert!(places.get().is_empty());

    places.set(vec![home()]);
    assert_eq!(places.get(), vec![home()]);

    store.remove("device-locations").unwrap();
    registry.pump();
    assert!(places.get().is_empty());
}

// ---------------------------------------------------------------------------
// Cross-thread and cross-process delivery
// ---------------------------------------------------------------------------

#[test]
fn changes_from_other_threads_apply_on_pump() {
    let registry = Registry::new();
    let store = memory();
    let n = Persisted::new(&registry, &store, "n", 0_i64);
    let seen = Rc::new(RefCell::new(Vec::new()));
    let s = Rc::clone(&seen);
    let _sub = n.subscribe(move |v| s.borrow_mut().push(*v));

    let remote = Arc::clone(&store);
    thread::spawn(move || {
        for i in 1..=10_i64 {
            remote.set("n", i.into()).unwrap();
        }
    })
    .join()
    .unwrap();

    assert_eq!(n.get(), 0, "nothing applied before pump");
    assert_eq!(registry.pump(), 10);
    assert_eq!(n.get(), 10);
    assert_eq!(*seen.borrow(), vec![10]);
}

#[test]
fn file_store_reload_reaches_bound_values() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("preferences.json");

    let file = Arc::new(FileStore::open(&path).unwrap());
    let store: Arc<dyn Store> = file.clone();
    let registry = Registry::new();
    let places = Persisted::new(&registry, &store, "device-locations", Vec::<Place>::new());
    places.set(vec![home()]);

    // A second process appends a location.
    let other = FileStore::open(&path).unwrap();
    let mut list: Vec<Place> = decode(&other.get("device-locations").unwrap()).unwrap();
    list.push(Place {
        address: "Work".into(),
        latitude: 37.4,
        longitude: -122.1,
    });
    other.set("device-locations", encode(&list).unwrap()).unwrap();

    assert_eq!(file.reload().unwrap(), 1);
    registry.pump();
    assert_eq!(places.get(), list);
}

#[test]
fn values_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("preferences.json");
    {
        let store: Arc<dyn Store> = Arc::new(FileStore::open(&path).unwrap());
        let registry = Registry::new();
        Persisted::new(&registry, &store, "device-locations", Vec::<Place>::new()).set(vec![home()]);
    }
    let store: Arc<dyn Store> = Arc::new(FileStore::open(&path).unwrap());
    let registry = Registry::new();
    let places = Persisted::new(&registry, &store, "device-locations", Vec::<Place>::new());
    assert_eq!(places.get(), vec![home()]);
}
