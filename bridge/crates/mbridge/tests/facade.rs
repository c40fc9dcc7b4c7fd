//! Bridge facade, configuration and event log tests

mod common;

use common::{report_config, BridgeFixture};
use mbridge::host::local::{LocalRuntime, LocalRuntimeConfig};
use mbridge::logging::{recent_events, BridgeEvent};
use mbridge::{Bridge, BridgeConfig, BridgeError, HazardPolicy};
use std::io::Write;
use std::sync::Arc;

#[test]
fn test_config_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"{{ "min_patch_size": 32, "exception_policy": "report", "supported_runtime_versions": ["local-1.0"] }}"#
    )
    .unwrap();

    let config = BridgeConfig::from_file(file.path()).unwrap();
    assert_eq!(config.min_patch_size, 32);
    assert_eq!(config.exception_policy, HazardPolicy::Report);
    assert_eq!(config.lifecycle_policy, HazardPolicy::Terminate);

    let runtime = Arc::new(LocalRuntime::with_defaults().unwrap());
    let bridge = Bridge::new(runtime, config).unwrap();
    assert_eq!(bridge.hooks().required_body_len(), 32);
}

#[test]
fn test_version_gate() {
    let runtime = Arc::new(
        LocalRuntime::new(LocalRuntimeConfig {
            version: "2021.3.0".to_string(),
            ..Default::default()
        })
        .unwrap(),
    );
    let config = BridgeConfig {
        supported_runtime_versions: vec!["2022.3.1".to_string(), "2022.3.2".to_string()],
        ..report_config()
    };

    match Bridge::new(runtime, config) {
        Err(BridgeError::UnsupportedRuntime { found, supported }) => {
            assert_eq!(found, "2021.3.0");
            assert_eq!(supported.len(), 2);
        },
        Err(other) => panic!("expected UnsupportedRuntime, got {}", other),
        Ok(_) => panic!("expected UnsupportedRuntime"),
    }
}

#[test]
fn test_events_recorded() {
    let fixture = BridgeFixture::new();
    fixture.define_foo();
    fixture.bridge.resolve("", "Foo", "Baz", 1).unwrap();

    let events = recent_events(1024);
    assert!(events.iter().any(|e| matches!(
        e,
        BridgeEvent::MethodResolved { signature, cached: false, .. } if signature == "Foo::Baz/1"
    )));
}

#[test]
fn test_global_install_once() {
    let runtime = Arc::new(LocalRuntime::with_defaults().unwrap());
    let first = Bridge::new(runtime.clone(), report_config()).unwrap();
    let second = Bridge::new(runtime, report_config()).unwrap();

    let installed = mbridge::install_global(first).unwrap();
    assert!(std::ptr::eq(installed, mbridge::global().unwrap()));
    assert!(matches!(
        mbridge::install_global(second),
        Err(BridgeError::Configuration(_))
    ));
}
