//! Bridge facade
//!
//! [`Bridge`] ties the four components to one host runtime and applies the
//! configured fatal policy at the boundary where managed exceptions would
//! otherwise reach native callers.

use crate::config::{BridgeConfig, HazardPolicy};
use crate::error::{BridgeError, Result};
use crate::fatal;
use crate::guard::{ReferenceGuard, RootTable};
use crate::hook::{HookTable, OriginalTrampoline};
use crate::host::{ManagedException, ManagedObjectHandle, ManagedRuntime, MethodAddress, MethodFn, Value};
use crate::logging::{configure_logger, log_event, BridgeEvent, BridgeLoggerConfig};
use crate::resolver::{MethodResolver, MethodSignature, ResolvedMethod};
use crate::types::{TypeBridge, TypeBuilder, TypeDescriptor};
use std::sync::{Arc, OnceLock};

static GLOBAL: OnceLock<Bridge> = OnceLock::new();

pub struct Bridge {
    runtime: Arc<dyn ManagedRuntime>,
    config: BridgeConfig,
    roots: Arc<RootTable>,
    resolver: MethodResolver,
    types: TypeBridge,
    hooks: HookTable,
}

impl Bridge {
    /// Bind a bridge to `runtime`
    ///
    /// Fails if the configuration is invalid or the host version is not in
    /// `supported_runtime_versions`.
    pub fn new<R: ManagedRuntime + 'static>(runtime: Arc<R>, config: BridgeConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| BridgeError::Configuration(e.to_string()))?;

        let version = runtime.runtime_version();
        if !config.accepts_runtime(&version) {
            return Err(BridgeError::UnsupportedRuntime {
                found: version,
                supported: config.supported_runtime_versions.clone(),
            });
        }

        if config.verbose {
            configure_logger(BridgeLoggerConfig {
                console: true,
                ..Default::default()
            });
        }

        let roots = RootTable::new(runtime.clone());
        let resolver = MethodResolver::new(runtime.clone(), config.resolution_cache);
        let hooks = HookTable::new(
            runtime.clone(),
            config.min_patch_size,
            config.trampoline_arena_size,
        );
        let types = TypeBridge::new(runtime.clone(), roots.clone(), config.lifecycle_policy);

        log::info!("mbridge {} attached to host runtime {}", crate::VERSION, version);

        Ok(Self {
            runtime,
            config,
            roots,
            resolver,
            types,
            hooks,
        })
    }

    /// Pin `handle` for the lifetime of the returned guard
    pub fn acquire(&self, handle: ManagedObjectHandle) -> Result<ReferenceGuard> {
        self.roots.acquire(handle)
    }

    pub fn define_type(&self, builder: TypeBuilder) -> Result<Arc<TypeDescriptor>> {
        self.types.define_type(builder)
    }

    pub fn instantiate(&self, descriptor: &TypeDescriptor, args: &[Value]) -> Result<ReferenceGuard> {
        self.types.instantiate(descriptor, args)
    }

    pub fn invoke_native_constructor(&self, handle: ManagedObjectHandle, args: &[Value]) -> Result<()> {
        self.types.invoke_native_constructor(handle, args)
    }

    pub fn invoke_native_destructor(&self, handle: ManagedObjectHandle) -> Result<()> {
        self.types.invoke_native_destructor(handle)
    }

    pub fn resolve(
        &self,
        namespace: &str,
        class: &str,
        method: &str,
        arity: usize,
    ) -> Result<ResolvedMethod> {
        self.resolver.resolve(namespace, class, method, arity)
    }

    pub fn resolve_signature(&self, signature: &MethodSignature) -> Result<ResolvedMethod> {
        self.resolver.resolve_signature(signature)
    }

    pub fn install_hook(&self, method: &ResolvedMethod, replacement: MethodFn) -> Result<OriginalTrampoline> {
        self.hooks.install(method, replacement)
    }

    /// Resolve by name and arity, then hook
    pub fn hook(
        &self,
        namespace: &str,
        class: &str,
        method: &str,
        arity: usize,
        replacement: MethodFn,
    ) -> Result<OriginalTrampoline> {
        let resolved = self.resolve(namespace, class, method, arity)?;
        self.install_hook(&resolved, replacement)
    }

    /// End the initialization phase; no hooks can be installed afterwards
    pub fn finish_initialization(&self) {
        self.hooks.seal();
    }

    /// Call a compiled entry from native code
    ///
    /// A managed exception escaping the call is handled per
    /// `exception_policy`.
    pub fn call(&self, address: MethodAddress, this: ManagedObjectHandle, args: &[Value]) -> Result<Value> {
        self.runtime
            .invoke(address, this, args)
            .or_else(|e| self.escaped(e))
    }

    /// Virtual call from native code
    pub fn call_virtual(&self, this: ManagedObjectHandle, method: &str, args: &[Value]) -> Result<Value> {
        self.runtime
            .invoke_virtual(this, method, args)
            .or_else(|e| self.escaped(e))
    }

    fn escaped(&self, error: BridgeError) -> Result<Value> {
        match error {
            BridgeError::Exception(exc) => self.unhandled(exc),
            other => Err(other),
        }
    }

    fn unhandled(&self, exc: ManagedException) -> Result<Value> {
        log_event(BridgeEvent::ManagedException {
            class_name: exc.class_name.clone(),
            message: exc.message.clone(),
        });
        match self.config.exception_policy {
            HazardPolicy::Terminate => {
                fatal::terminate(&format!("unhandled managed exception {}", exc))
            },
            HazardPolicy::Report => Err(BridgeError::UnhandledManagedException(exc)),
        }
    }

    pub fn runtime(&self) -> &Arc<dyn ManagedRuntime> {
        &self.runtime
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn roots(&self) -> &Arc<RootTable> {
        &self.roots
    }

    pub fn resolver(&self) -> &MethodResolver {
        &self.resolver
    }

    pub fn types(&self) -> &TypeBridge {
        &self.types
    }

    pub fn hooks(&self) -> &HookTable {
        &self.hooks
    }
}

/// Install the process-wide bridge
pub fn install_global(bridge: Bridge) -> Result<&'static Bridge> {
    GLOBAL
        .set(bridge)
        .map_err(|_| BridgeError::Configuration("global bridge already installed".to_string()))?;
    global().ok_or_else(|| BridgeError::Internal("global bridge missing after install".to_string()))
}

/// The process-wide bridge, if installed
pub fn global() -> Option<&'static Bridge> {
    GLOBAL.get()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::local::{LocalRuntime, LocalRuntimeConfig};

    #[test]
    fn test_unsupported_runtime_rejected() {
        let runtime = Arc::new(
            LocalRuntime::new(LocalRuntimeConfig {
                version: "2023.1.0".to_string(),
                ..Default::default()
            })
            .unwrap(),
        );
        let config = BridgeConfig {
            supported_runtime_versions: vec!["2022.3.1".to_string()],
            ..Default::default()
        };
        assert!(matches!(
            Bridge::new(runtime, config),
            Err(BridgeError::UnsupportedRuntime { .. })
        ));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let runtime = Arc::new(LocalRuntime::with_defaults().unwrap());
        let config = BridgeConfig {
            min_patch_size: 1,
            ..Default::default()
        };
        assert!(matches!(
            Bridge::new(runtime, config),
            Err(BridgeError::Configuration(_))
        ));
    }
}
