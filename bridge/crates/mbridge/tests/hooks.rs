//! Hook Table integration tests
//!
//! Every test installs its hooks on its own local host, and every
//! replacement has its own trampoline slot, so tests stay independent when
//! run in parallel.

mod common;

use common::BridgeFixture;
use mbridge::host::{CallFrame, ManagedException, MethodDefinition, MethodResult};
use mbridge::types::{Instance, TypeBuilder};
use mbridge::{BridgeError, ManagedObjectHandle, OriginalTrampoline, Value};
use std::sync::OnceLock;
use std::thread;

fn missing_trampoline() -> ManagedException {
    ManagedException::new("System.InvalidOperationException", "trampoline not installed")
}

fn forward(
    slot: &OnceLock<OriginalTrampoline>,
    frame: &CallFrame<'_>,
    args: &[Value],
) -> MethodResult {
    slot.get().ok_or_else(missing_trampoline)?.call(frame, args)
}

static DOUBLED: OnceLock<OriginalTrampoline> = OnceLock::new();

fn doubled_baz(frame: &CallFrame<'_>, args: &[Value]) -> MethodResult {
    let value = forward(&DOUBLED, frame, args)?;
    Ok(Value::Int(value.as_int().unwrap_or_default() * 2))
}

#[test]
fn test_hook_doubles_return_value() {
    let fixture = BridgeFixture::new();
    fixture.define_foo();

    let original = fixture.bridge.hook("", "Foo", "Baz", 1, doubled_baz).unwrap();
    DOUBLED.set(original).unwrap();

    assert_eq!(fixture.call_baz(Value::Int(21)).unwrap(), Value::Int(42));

    // The trampoline still reaches the unmodified body
    assert_eq!(
        original
            .call_with(fixture.bridge.runtime().as_ref(), ManagedObjectHandle::NULL, &[Value::Int(21)])
            .unwrap(),
        Value::Int(21)
    );

    // Bar shares the class but not the hook
    let bar = fixture.bridge.resolve("", "Foo", "Bar", 1).unwrap();
    assert_eq!(
        fixture
            .bridge
            .call(bar.address(), ManagedObjectHandle::NULL, &[Value::Int(21)])
            .unwrap(),
        Value::Int(21)
    );
}

static PASSTHROUGH: OnceLock<OriginalTrampoline> = OnceLock::new();

fn passthrough_baz(frame: &CallFrame<'_>, args: &[Value]) -> MethodResult {
    forward(&PASSTHROUGH, frame, args)
}

#[test]
fn test_passthrough_hook_is_transparent() {
    let fixture = BridgeFixture::new();
    fixture.define_foo();

    let inputs = [
        Value::Int(0),
        Value::Int(-17),
        Value::Int(i64::MAX),
        Value::Bool(false),
        Value::Null,
        Value::Object(ManagedObjectHandle::NULL),
    ];
    let before: Vec<_> = inputs
        .iter()
        .map(|v| fixture.call_baz(*v).unwrap())
        .collect();

    let original = fixture
        .bridge
        .hook("", "Foo", "Baz", 1, passthrough_baz)
        .unwrap();
    PASSTHROUGH.set(original).unwrap();

    let after: Vec<_> = inputs
        .iter()
        .map(|v| fixture.call_baz(*v).unwrap())
        .collect();
    assert_eq!(before, after);
}

fn never_called(_: &CallFrame<'_>, _: &[Value]) -> MethodResult {
    Err(ManagedException::new("System.InvalidOperationException", "hook ran"))
}

#[test]
fn test_too_small_body_left_untouched() {
    let fixture = BridgeFixture::new();
    fixture.define_foo_with_baz_size(Some(8));

    let baz = fixture.bridge.resolve("", "Foo", "Baz", 1).unwrap();
    let bar = fixture.bridge.resolve("", "Foo", "Bar", 1).unwrap();
    assert_eq!(baz.body_len(), 8);

    // Baz, its padding and whatever follows it
    let canary = fixture.runtime.read_code(baz.address(), 64).unwrap();
    let neighbour = fixture.runtime.read_code(bar.address(), 32).unwrap();

    match fixture.bridge.install_hook(&baz, never_called) {
        Err(BridgeError::HookTooSmall(err)) => {
            assert_eq!(err.body_len, 8);
            assert_eq!(err.required, 16);
            assert_eq!(err.address, baz.address().as_raw());
        },
        other => panic!("expected HookTooSmall, got {:?}", other),
    }

    assert_eq!(fixture.runtime.read_code(baz.address(), 64).unwrap(), canary);
    assert_eq!(fixture.runtime.read_code(bar.address(), 32).unwrap(), neighbour);
    assert!(fixture.bridge.hooks().is_empty());
    assert_eq!(fixture.bridge.hooks().trampoline_bytes(), 0);
    assert_eq!(fixture.call_baz(Value::Int(7)).unwrap(), Value::Int(7));
}

#[test]
fn test_minimum_patch_size_is_configurable() {
    let fixture = BridgeFixture::with_config(mbridge::BridgeConfig {
        min_patch_size: 64,
        ..common::report_config()
    });
    fixture.define_foo();

    // Default body length of the local host is 32 bytes
    assert!(matches!(
        fixture.bridge.hook("", "Foo", "Baz", 1, never_called),
        Err(BridgeError::HookTooSmall(_))
    ));
}

static REPEATED: OnceLock<OriginalTrampoline> = OnceLock::new();

fn incremented_baz(frame: &CallFrame<'_>, args: &[Value]) -> MethodResult {
    let value = forward(&REPEATED, frame, args)?;
    Ok(Value::Int(value.as_int().unwrap_or_default() + 1))
}

#[test]
fn test_trampoline_survives_many_calls() {
    let fixture = BridgeFixture::new();
    fixture.define_foo();
    let original = fixture
        .bridge
        .hook("", "Foo", "Baz", 1, incremented_baz)
        .unwrap();
    REPEATED.set(original).unwrap();
    fixture.bridge.finish_initialization();

    for i in 0..10_000 {
        assert_eq!(fixture.call_baz(Value::Int(i)).unwrap(), Value::Int(i + 1));
    }

    let bridge = &fixture.bridge;
    let baz = bridge.resolve("", "Foo", "Baz", 1).unwrap().address();
    thread::scope(|scope| {
        for t in 0..4i64 {
            scope.spawn(move || {
                for i in 0..1_000 {
                    let arg = Value::Int(t * 1_000 + i);
                    let out = bridge
                        .call(baz, ManagedObjectHandle::NULL, &[arg])
                        .unwrap();
                    assert_eq!(out, Value::Int(t * 1_000 + i + 1));
                }
            });
        }
    });
}

#[test]
fn test_sealed_table_rejects_install() {
    let fixture = BridgeFixture::new();
    fixture.define_foo();
    let before = fixture.runtime.read_code(
        fixture.bridge.resolve("", "Foo", "Baz", 1).unwrap().address(),
        32,
    );

    fixture.bridge.finish_initialization();
    assert!(fixture.bridge.hooks().is_sealed());
    assert!(matches!(
        fixture.bridge.hook("", "Foo", "Baz", 1, never_called),
        Err(BridgeError::HookPhaseClosed)
    ));

    let baz = fixture.bridge.resolve("", "Foo", "Baz", 1).unwrap();
    assert_eq!(fixture.runtime.read_code(baz.address(), 32).unwrap(), before.unwrap());
}

static FIRST: OnceLock<OriginalTrampoline> = OnceLock::new();

fn first_hook(frame: &CallFrame<'_>, args: &[Value]) -> MethodResult {
    forward(&FIRST, frame, args)
}

#[test]
fn test_second_install_rejected() {
    let fixture = BridgeFixture::new();
    fixture.define_foo();
    let baz = fixture.bridge.resolve("", "Foo", "Baz", 1).unwrap();

    let original = fixture.bridge.install_hook(&baz, first_hook).unwrap();
    FIRST.set(original).unwrap();
    assert!(matches!(
        fixture.bridge.install_hook(&baz, never_called),
        Err(BridgeError::AlreadyHooked { .. })
    ));

    let entry = fixture.bridge.hooks().get(baz.address()).unwrap();
    assert_eq!(entry.trampoline, original);
    assert_eq!(entry.signature, "Foo::Baz(int)");
    assert_eq!(entry.target, baz.address());
    assert_eq!(fixture.bridge.hooks().len(), 1);
    assert_eq!(fixture.call_baz(Value::Int(3)).unwrap(), Value::Int(3));
}

fn speak(frame: &CallFrame<'_>, _: &[Value]) -> MethodResult {
    Ok(Value::Int(Instance::from_frame(frame).get_int("volume")?))
}

static LOUDER: OnceLock<OriginalTrampoline> = OnceLock::new();

fn louder_speak(frame: &CallFrame<'_>, args: &[Value]) -> MethodResult {
    let value = forward(&LOUDER, frame, args)?;
    Ok(Value::Int(value.as_int().unwrap_or_default() * 10))
}

#[test]
fn test_hooked_bridged_method_keeps_receiver() {
    let fixture = BridgeFixture::new();
    let ty = fixture
        .bridge
        .define_type(
            TypeBuilder::new("Game", "Speaker")
                .field_int("volume", 3)
                .method(MethodDefinition::new("Speak", &[], "int", speak).virtual_method()),
        )
        .unwrap();
    let original = fixture
        .bridge
        .hook("Game", "Speaker", "Speak", 0, louder_speak)
        .unwrap();
    LOUDER.set(original).unwrap();

    let guard = fixture.bridge.instantiate(&ty, &[]).unwrap();
    assert_eq!(
        fixture.bridge.call_virtual(guard.handle(), "Speak", &[]).unwrap(),
        Value::Int(30)
    );
}

fn throwing_baz(_: &CallFrame<'_>, _: &[Value]) -> MethodResult {
    Err(ManagedException::new("System.NullReferenceException", "boom"))
}

#[test]
fn test_escaping_exception_reported() {
    let fixture = BridgeFixture::new();
    fixture.define_foo();
    fixture.bridge.hook("", "Foo", "Baz", 1, throwing_baz).unwrap();

    match fixture.call_baz(Value::Int(1)) {
        Err(BridgeError::UnhandledManagedException(exc)) => {
            assert_eq!(exc.class_name, "System.NullReferenceException");
            assert_eq!(exc.message, "boom");
        },
        other => panic!("expected an unhandled exception, got {:?}", other),
    }
}
