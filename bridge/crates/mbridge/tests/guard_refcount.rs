//! Reference Guard integration tests
//!
//! Pins must keep objects alive across collections and be released exactly
//! when the last copy of a guard goes away.

mod common;

use common::BridgeFixture;
use mbridge::host::ClassDefinition;
use mbridge::{BridgeError, ManagedObjectHandle, ManagedRuntime, ReferenceGuard, Value};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::thread;

fn node(fixture: &BridgeFixture) -> ManagedObjectHandle {
    let class = fixture
        .runtime
        .find_class("Test", "Node")
        .unwrap_or_else(|| {
            fixture
                .runtime
                .define_class(ClassDefinition::new("Test", "Node").field("next", "object", Value::Null))
                .unwrap()
        });
    fixture.runtime.allocate(class).unwrap()
}

#[test]
fn test_pinned_object_survives_collection() {
    let fixture = BridgeFixture::new();
    let handle = node(&fixture);

    let guard = fixture.bridge.acquire(handle).unwrap();
    for _ in 0..3 {
        fixture.runtime.collect();
        assert!(fixture.runtime.is_live(handle));
    }

    drop(guard);
    fixture.runtime.collect();
    assert!(fixture.runtime.is_freed(handle));
}

#[test]
fn test_copies_share_one_root() {
    let fixture = BridgeFixture::new();
    let handle = node(&fixture);

    let a = fixture.bridge.acquire(handle).unwrap();
    let b = a.clone();
    let c = b.clone();
    assert_eq!(fixture.runtime.root_count(), 1);
    assert_eq!(fixture.bridge.roots().pin_count(handle), 3);

    drop(a);
    drop(c);
    fixture.runtime.collect();
    assert!(fixture.runtime.is_live(handle));
    assert_eq!(fixture.bridge.roots().pin_count(handle), 1);

    drop(b);
    assert_eq!(fixture.runtime.root_count(), 0);
    assert!(fixture.bridge.roots().is_empty());
}

#[test]
fn test_independent_acquires_share_entry() {
    let fixture = BridgeFixture::new();
    let handle = node(&fixture);

    let first = fixture.bridge.acquire(handle).unwrap();
    let second = fixture.bridge.acquire(handle).unwrap();
    let stats = fixture.bridge.roots().stats();
    assert_eq!(stats.registrations, 1);
    assert_eq!(stats.total_pins, 2);
    assert_eq!(stats.peak_handles, 1);

    first.release();
    second.release();
    let stats = fixture.bridge.roots().stats();
    assert_eq!(stats.unregistrations, 1);
    assert_eq!(stats.pinned_handles, 0);
}

#[test]
fn test_null_guard_is_inert() {
    let fixture = BridgeFixture::new();
    let guard = fixture.bridge.acquire(ManagedObjectHandle::NULL).unwrap();
    assert!(guard.is_empty());

    let copy = guard.clone();
    assert!(copy.handle().is_null());
    assert_eq!(fixture.runtime.root_count(), 0);

    let default = ReferenceGuard::empty();
    assert!(default.is_empty());
}

#[test]
fn test_acquire_after_collection_reported() {
    let fixture = BridgeFixture::new();
    let handle = node(&fixture);
    fixture.runtime.collect();

    assert!(matches!(
        fixture.bridge.acquire(handle),
        Err(BridgeError::UseAfterFree { .. })
    ));
    assert!(fixture.bridge.roots().is_empty());
}

#[test]
fn test_reachable_through_pinned_object() {
    let fixture = BridgeFixture::new();
    let head = node(&fixture);
    let tail = node(&fixture);
    fixture
        .runtime
        .write_field(head, 0, Value::Object(tail))
        .unwrap();

    let _guard = fixture.bridge.acquire(head).unwrap();
    fixture.runtime.collect();
    assert!(fixture.runtime.is_live(tail));
}

#[test]
fn test_copies_across_threads() {
    let fixture = BridgeFixture::new();
    let handle = node(&fixture);
    let guard = fixture.bridge.acquire(handle).unwrap();

    let workers: Vec<_> = (0..8)
        .map(|_| {
            let local = guard.clone();
            thread::spawn(move || {
                let mut copies = Vec::new();
                for _ in 0..100 {
                    copies.push(local.clone());
                }
                assert!(copies.iter().all(|g| g.handle() == local.handle()));
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(fixture.bridge.roots().pin_count(handle), 1);
    assert_eq!(fixture.runtime.root_count(), 1);
    drop(guard);
    assert_eq!(fixture.runtime.root_count(), 0);
}

#[test]
fn test_churn_from_many_threads() {
    let fixture = BridgeFixture::new();
    let handles: Vec<_> = (0..16).map(|_| node(&fixture)).collect();
    let roots = fixture.bridge.roots().clone();

    thread::scope(|scope| {
        for chunk in handles.chunks(4) {
            let roots = roots.clone();
            scope.spawn(move || {
                for _ in 0..50 {
                    let guards: Vec<_> = chunk.iter().map(|h| roots.acquire(*h).unwrap()).collect();
                    drop(guards);
                }
            });
        }
    });

    assert!(roots.is_empty());
    assert_eq!(fixture.runtime.root_count(), 0);
    let stats = roots.stats();
    assert_eq!(stats.registrations, stats.unregistrations);
}

#[test]
fn test_random_operations_match_model() {
    let fixture = BridgeFixture::new();
    let handles: Vec<_> = (0..8).map(|_| node(&fixture)).collect();
    let mut rng = StdRng::seed_from_u64(0x6d62);
    let mut live: Vec<ReferenceGuard> = Vec::new();
    let mut model: HashMap<ManagedObjectHandle, usize> = HashMap::new();

    for _ in 0..2_000 {
        match rng.gen_range(0..3) {
            0 => {
                let handle = handles[rng.gen_range(0..handles.len())];
                live.push(fixture.bridge.acquire(handle).unwrap());
                *model.entry(handle).or_default() += 1;
            },
            1 if !live.is_empty() => {
                let copy = live[rng.gen_range(0..live.len())].clone();
                *model.entry(copy.handle()).or_default() += 1;
                live.push(copy);
            },
            _ if !live.is_empty() => {
                let guard = live.swap_remove(rng.gen_range(0..live.len()));
                *model.get_mut(&guard.handle()).unwrap() -= 1;
            },
            _ => {},
        }

        for handle in &handles {
            let expected = model.get(handle).copied().unwrap_or(0);
            assert_eq!(fixture.bridge.roots().pin_count(*handle), expected);
        }
        let rooted = model.values().filter(|pins| **pins > 0).count();
        assert_eq!(fixture.runtime.root_count(), rooted);
    }

    live.clear();
    assert_eq!(fixture.runtime.root_count(), 0);
    fixture.runtime.collect();
    assert!(handles.iter().all(|h| fixture.runtime.is_freed(*h)));
}
