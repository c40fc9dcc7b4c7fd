//! Default hazard policy: defects abort the process
//!
//! Each test re-runs itself in a child process with `FATAL_CASE` set. The
//! child performs the defect under `BridgeConfig::default()` and must not
//! exit normally.

mod common;

use common::BridgeFixture;
use mbridge::host::{CallFrame, ClassDefinition, ManagedException, MethodDefinition, MethodResult};
use mbridge::types::TypeBuilder;
use mbridge::{BridgeConfig, HazardPolicy, ManagedObjectHandle, ManagedRuntime, Value};
use std::process::{Command, Output};

const CASE_VAR: &str = "FATAL_CASE";

/// Mirrors `log` records onto stderr so the parent can see them
struct StderrLog;

impl log::Log for StderrLog {
    fn enabled(&self, _: &log::Metadata<'_>) -> bool {
        true
    }

    fn log(&self, record: &log::Record<'_>) {
        eprintln!("[{}] {}", record.level(), record.args());
    }

    fn flush(&self) {}
}

static STDERR_LOG: StderrLog = StderrLog;

fn in_child(case: &str) -> bool {
    if std::env::var(CASE_VAR).as_deref() != Ok(case) {
        return false;
    }
    let _ = log::set_logger(&STDERR_LOG);
    log::set_max_level(log::LevelFilter::Error);
    true
}

fn run_child(test: &str, case: &str) -> Output {
    Command::new(std::env::current_exe().expect("test binary path"))
        .args([test, "--exact", "--nocapture", "--test-threads", "1"])
        .env(CASE_VAR, case)
        .output()
        .expect("child test process should start")
}

fn assert_aborted(output: &Output, reason: &str) {
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        !output.status.success(),
        "child exited normally: {:?}\n{}",
        output.status,
        stderr
    );
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        assert_eq!(output.status.signal(), Some(libc::SIGABRT), "{}", stderr);
    }
    assert!(stderr.contains("mbridge: fatal"), "{}", stderr);
    assert!(stderr.contains(reason), "{}", stderr);
    assert!(
        stderr.contains(&format!("[ERROR] fatal: {}", reason)),
        "{}",
        stderr
    );
}

fn throws(_: &CallFrame<'_>, _: &[Value]) -> MethodResult {
    Err(ManagedException::new("System.InvalidOperationException", "boom"))
}

#[test]
fn test_default_policies_terminate() {
    let config = BridgeConfig::default();
    assert_eq!(config.lifecycle_policy, HazardPolicy::Terminate);
    assert_eq!(config.exception_policy, HazardPolicy::Terminate);
}

#[test]
fn test_double_destruct_aborts_by_default() {
    if in_child("double_destruct") {
        let fixture = BridgeFixture::with_config(BridgeConfig::default());
        let ty = fixture
            .bridge
            .define_type(TypeBuilder::new("", "Once").field_int("a", 0))
            .unwrap();
        let guard = fixture.bridge.instantiate(&ty, &[]).unwrap();

        fixture.bridge.invoke_native_destructor(guard.handle()).unwrap();
        let _ = fixture.bridge.invoke_native_destructor(guard.handle());
        return;
    }

    let output = run_child("test_double_destruct_aborts_by_default", "double_destruct");
    assert_aborted(&output, "native destructor invoked twice");
}

#[test]
fn test_escaped_exception_aborts_by_default() {
    if in_child("escaped_exception") {
        let fixture = BridgeFixture::with_config(BridgeConfig::default());
        fixture
            .runtime
            .define_class(
                ClassDefinition::new("", "Thrower")
                    .method(MethodDefinition::new("Throw", &[], "void", throws)),
            )
            .unwrap();
        let method = fixture.bridge.resolve("", "Thrower", "Throw", 0).unwrap();
        let _ = fixture
            .bridge
            .call(method.address(), ManagedObjectHandle::NULL, &[]);
        return;
    }

    let output = run_child("test_escaped_exception_aborts_by_default", "escaped_exception");
    assert_aborted(&output, "unhandled managed exception");
}
