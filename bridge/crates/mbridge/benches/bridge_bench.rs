//! mbridge benchmarks
//!
//! Run with: `cargo bench --package mbridge`

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use mbridge::host::local::LocalRuntime;
use mbridge::host::{CallFrame, ClassDefinition, ManagedException, MethodDefinition, MethodResult};
use mbridge::{
    Bridge, BridgeConfig, ManagedObjectHandle, ManagedRuntime, MethodSignature, OriginalTrampoline,
    Value,
};
use std::sync::{Arc, OnceLock};

static ORIGINAL: OnceLock<OriginalTrampoline> = OnceLock::new();

fn identity(_: &CallFrame<'_>, args: &[Value]) -> MethodResult {
    Ok(args.first().copied().unwrap_or(Value::Void))
}

fn passthrough(frame: &CallFrame<'_>, args: &[Value]) -> MethodResult {
    ORIGINAL
        .get()
        .ok_or_else(|| ManagedException::new("System.InvalidOperationException", "no trampoline"))?
        .call(frame, args)
}

fn setup() -> (Arc<LocalRuntime>, Bridge) {
    let runtime = Arc::new(LocalRuntime::with_defaults().unwrap());
    let bridge = Bridge::new(runtime.clone(), BridgeConfig::default()).unwrap();
    runtime
        .define_class(
            ClassDefinition::new("Bench", "Target")
                .method(MethodDefinition::new("Plain", &["int"], "int", identity))
                .method(MethodDefinition::new("Hooked", &["int"], "int", identity)),
        )
        .unwrap();
    (runtime, bridge)
}

fn bench_guards(c: &mut Criterion) {
    let mut group = c.benchmark_group("reference_guard");
    let (runtime, bridge) = setup();
    let class = runtime.define_class(ClassDefinition::new("Bench", "Obj")).unwrap();
    let handle = runtime.allocate(class).unwrap();

    group.bench_function("acquire_release", |b| {
        b.iter(|| {
            let guard = bridge.acquire(black_box(handle)).unwrap();
            drop(black_box(guard));
        })
    });

    let held = bridge.acquire(handle).unwrap();
    group.bench_function("clone_drop", |b| {
        b.iter(|| {
            let copy = held.clone();
            drop(black_box(copy));
        })
    });

    group.finish();
}

fn bench_resolution(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolution");
    let (_runtime, bridge) = setup();
    let signature = MethodSignature::parse("Bench.Target::Plain(int)").unwrap();

    group.bench_function("cached", |b| {
        b.iter(|| black_box(bridge.resolve_signature(&signature).unwrap()))
    });

    group.bench_function("parse", |b| {
        b.iter(|| black_box(MethodSignature::parse(black_box("Bench.Target::Plain(int)")).unwrap()))
    });

    group.finish();
}

fn bench_calls(c: &mut Criterion) {
    let mut group = c.benchmark_group("call_through");
    let (_runtime, bridge) = setup();

    let plain = bridge.resolve("Bench", "Target", "Plain", 1).unwrap().address();
    let hooked = bridge.resolve("Bench", "Target", "Hooked", 1).unwrap();
    let original = bridge.install_hook(&hooked, passthrough).unwrap();
    let _ = ORIGINAL.set(original);
    bridge.finish_initialization();

    group.bench_function("unhooked", |b| {
        b.iter(|| {
            black_box(
                bridge
                    .call(plain, ManagedObjectHandle::NULL, &[Value::Int(1)])
                    .unwrap(),
            )
        })
    });

    group.bench_function("hooked_passthrough", |b| {
        b.iter(|| {
            black_box(
                bridge
                    .call(hooked.address(), ManagedObjectHandle::NULL, &[Value::Int(1)])
                    .unwrap(),
            )
        })
    });

    group.finish();
}

criterion_group!(benches, bench_guards, bench_resolution, bench_calls);
criterion_main!(benches);
