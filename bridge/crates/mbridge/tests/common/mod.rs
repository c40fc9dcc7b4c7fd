//! Test utilities for the mbridge integration suite
//!
//! Every fixture owns its own [`LocalRuntime`], so tests in one binary can
//! run in parallel without sharing roots, classes or hooks.

#![allow(dead_code)]

use mbridge::host::local::LocalRuntime;
use mbridge::host::{CallFrame, ClassDefinition, ClassHandle, MethodDefinition, MethodResult};
use mbridge::{Bridge, BridgeConfig, HazardPolicy, ManagedRuntime, Value};
use std::sync::Arc;

/// Bridge on a fresh local host
///
/// Both fatal policies are `Report` so defects surface as errors the test
/// can assert on instead of aborting the test process.
pub struct BridgeFixture {
    pub runtime: Arc<LocalRuntime>,
    pub bridge: Bridge,
}

impl BridgeFixture {
    pub fn new() -> Self {
        Self::with_config(report_config())
    }

    pub fn with_config(config: BridgeConfig) -> Self {
        let runtime = Arc::new(LocalRuntime::with_defaults().expect("local host should start"));
        let bridge = Bridge::new(runtime.clone(), config).expect("bridge should attach");
        Self { runtime, bridge }
    }

    /// Define `Foo` with `Bar(int)` and `Baz(int)`; `Baz` returns its argument
    pub fn define_foo(&self) -> ClassHandle {
        self.define_foo_with_baz_size(None)
    }

    /// Same as [`define_foo`](Self::define_foo) with an explicit `Baz` body size
    pub fn define_foo_with_baz_size(&self, size: Option<usize>) -> ClassHandle {
        let mut baz = MethodDefinition::new("Baz", &["int"], "int", identity);
        if let Some(size) = size {
            baz = baz.with_code_size(size);
        }
        self.runtime
            .define_class(
                ClassDefinition::new("", "Foo")
                    .method(MethodDefinition::new("Bar", &["int"], "int", identity))
                    .method(baz),
            )
            .expect("Foo should define")
    }

    /// Call `Foo.Baz(x)` through its compiled entry
    pub fn call_baz(&self, arg: Value) -> mbridge::Result<Value> {
        let baz = self.bridge.resolve("", "Foo", "Baz", 1)?;
        self.bridge
            .call(baz.address(), mbridge::ManagedObjectHandle::NULL, &[arg])
    }
}

impl Default for BridgeFixture {
    fn default() -> Self {
        Self::new()
    }
}

pub fn report_config() -> BridgeConfig {
    BridgeConfig {
        lifecycle_policy: HazardPolicy::Report,
        exception_policy: HazardPolicy::Report,
        ..Default::default()
    }
}

pub fn identity(_: &CallFrame<'_>, args: &[Value]) -> MethodResult {
    Ok(args.first().copied().unwrap_or(Value::Void))
}
