//! Local Host - in-process managed runtime
//!
//! A small but complete implementation of the host primitives, used by the
//! test suite, benches and demos:
//!
//! - Heap with per-object headers and flat slot layout ([`heap`])
//! - Class table with single inheritance and virtual dispatch ([`metadata`])
//! - Code image holding real, patchable method bodies ([`image`])
//! - Root set and stop-the-world mark-sweep with finalizers ([`collector`])
//!
//! Unlike production hosts it tracks freed addresses, so access to a
//! collected object is reported as `UseAfterFree` instead of being undefined.
//!
//! # Example
//!
//! ```rust
//! use mbridge::host::local::LocalRuntime;
//! use mbridge::host::{ClassDefinition, ManagedRuntime, RootRegistry, Value};
//!
//! let runtime = LocalRuntime::with_defaults().unwrap();
//! let class = runtime
//!     .define_class(ClassDefinition::new("Game", "Point").field("x", "int", Value::Int(0)))
//!     .unwrap();
//! let obj = runtime.allocate(class).unwrap();
//! let token = runtime.register_root(obj).unwrap();
//!
//! assert_eq!(runtime.collect().swept, 0);
//! runtime.unregister_root(token).unwrap();
//! assert_eq!(runtime.collect().swept, 1);
//! ```

pub mod collector;
pub mod heap;
pub mod image;
pub mod metadata;

pub use collector::CollectionStats;

use crate::config::KB;
use crate::error::{BridgeError, ResolutionError, Result};
use crate::host::{
    ClassDefinition, ClassHandle, CodeProtection, FinalizerFn, ManagedObjectHandle,
    ManagedRuntime, MetadataSource, MethodAddress, MethodMetadata, RootRegistry, RootToken, Value,
};
use heap::Heap;
use image::{CodeImage, Executor};
use metadata::{ClassRecord, ClassTable};
use parking_lot::{Mutex, RwLock};
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::atomic::{AtomicU64, Ordering};

/// Local host configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalRuntimeConfig {
    /// Reported by `runtime_version()`
    pub version: String,
    /// Code image capacity in bytes
    pub image_size: usize,
    /// Body size for methods that do not request one
    pub default_body_len: usize,
}

impl Default for LocalRuntimeConfig {
    fn default() -> Self {
        Self {
            version: "local-1.0".to_string(),
            image_size: 256 * KB,
            default_body_len: 32,
        }
    }
}

pub struct LocalRuntime {
    config: LocalRuntimeConfig,
    classes: RwLock<ClassTable>,
    heap: Mutex<Heap>,
    roots: Mutex<FxHashMap<u64, ManagedObjectHandle>>,
    next_token: AtomicU64,
    image: CodeImage,
    regions: RwLock<Vec<(usize, usize)>>,
    cycles: AtomicU64,
}

impl LocalRuntime {
    pub fn new(config: LocalRuntimeConfig) -> Result<Self> {
        if config.default_body_len == 0 {
            return Err(BridgeError::Configuration(
                "default_body_len must be > 0".to_string(),
            ));
        }
        let image = CodeImage::new(config.image_size)?;

        Ok(Self {
            config,
            classes: RwLock::new(ClassTable::new()),
            heap: Mutex::new(Heap::new()),
            roots: Mutex::new(FxHashMap::default()),
            next_token: AtomicU64::new(1),
            image,
            regions: RwLock::new(Vec::new()),
            cycles: AtomicU64::new(0),
        })
    }

    pub fn with_defaults() -> Result<Self> {
        Self::new(LocalRuntimeConfig::default())
    }

    pub fn config(&self) -> &LocalRuntimeConfig {
        &self.config
    }

    /// Run a full collection cycle
    pub fn collect(&self) -> CollectionStats {
        let cycle = self.cycles.fetch_add(1, Ordering::Relaxed) + 1;
        collector::collect(self, cycle)
    }

    pub fn object_count(&self) -> usize {
        self.heap.lock().len()
    }

    pub fn is_live(&self, handle: ManagedObjectHandle) -> bool {
        self.heap.lock().is_live(handle)
    }

    pub fn is_freed(&self, handle: ManagedObjectHandle) -> bool {
        self.heap.lock().is_freed(handle)
    }

    /// Registered roots, counting duplicates
    pub fn root_count(&self) -> usize {
        self.roots.lock().len()
    }

    /// Bytes of the code image handed out to method bodies
    pub fn code_bytes_used(&self) -> usize {
        self.image.used()
    }

    /// Copy `len` bytes of compiled code at `address`
    pub fn read_code(&self, address: MethodAddress, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.image.read(address.as_raw(), &mut buf)?;
        Ok(buf)
    }

    fn root_handles(&self) -> Vec<ManagedObjectHandle> {
        let unique: FxHashSet<_> = self.roots.lock().values().copied().collect();
        unique.into_iter().collect()
    }
}

impl RootRegistry for LocalRuntime {
    fn register_root(&self, handle: ManagedObjectHandle) -> Result<RootToken> {
        if handle.is_null() {
            return Err(BridgeError::InvalidArgument(
                "cannot root the null handle".to_string(),
            ));
        }
        self.heap.lock().get(handle)?;

        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        self.roots.lock().insert(token, handle);
        Ok(RootToken(token))
    }

    fn unregister_root(&self, token: RootToken) -> Result<()> {
        self.roots
            .lock()
            .remove(&token.0)
            .map(|_| ())
            .ok_or_else(|| BridgeError::Host(format!("unknown root token {}", token.0)))
    }
}

// SAFETY: addresses come from `CodeImage::emit_all`, which hands out
// disjoint ranges of a mapping owned by the runtime.
unsafe impl MetadataSource for LocalRuntime {
    fn runtime_version(&self) -> String {
        self.config.version.clone()
    }

    fn find_methods(
        &self,
        namespace: &str,
        class: &str,
        method: &str,
        arity: usize,
    ) -> Vec<MethodMetadata> {
        self.classes
            .read()
            .find_methods(namespace, class, method, arity)
    }

    fn code_protection(&self, _address: MethodAddress) -> CodeProtection {
        CodeProtection::ReadWrite
    }

    unsafe fn register_code_region(&self, base: usize, len: usize) {
        log::debug!("local host: code region {:#x}+{:#x}", base, len);
        self.regions.write().push((base, len));
    }
}

impl ManagedRuntime for LocalRuntime {
    fn define_class(&self, definition: ClassDefinition) -> Result<ClassHandle> {
        let mut classes = self.classes.write();

        let name = definition.full_name();
        if classes.contains_name(&name) {
            return Err(BridgeError::TypeAlreadyDefined { name });
        }

        let slot_base = match definition.parent {
            Some(parent) => classes.get(parent)?.field_count(),
            None => 0,
        };

        let mut seen = FxHashSet::default();
        for field in &definition.fields {
            if !seen.insert(field.name.as_str()) {
                return Err(BridgeError::InvalidArgument(format!(
                    "duplicate field {} on {}",
                    field.name, name
                )));
            }
        }

        if let Some(field) = definition.fields.iter().find(|f| matches!(f.default, Value::Native(_))) {
            return Err(BridgeError::InvalidArgument(format!(
                "field {} on {} cannot default to a native cell",
                field.name, name
            )));
        }

        let bodies: Vec<_> = definition
            .methods
            .iter()
            .map(|m| (m.code_size.unwrap_or(self.config.default_body_len), m.body))
            .collect();
        let addresses = self.image.emit_all(&bodies)?;

        let methods: Vec<MethodMetadata> = definition
            .methods
            .iter()
            .zip(addresses)
            .zip(&bodies)
            .map(|((method, address), &(body_len, _))| MethodMetadata {
                namespace: definition.namespace.clone(),
                class: definition.name.clone(),
                name: method.name.clone(),
                params: method.params.clone(),
                return_type: method.return_type.clone(),
                address,
                body_len,
                is_virtual: method.is_virtual,
            })
            .collect();

        let handle = classes.next_handle();
        let handle = classes.insert(ClassRecord {
            handle,
            namespace: definition.namespace,
            name: definition.name,
            parent: definition.parent,
            fields: definition.fields,
            slot_base,
            methods,
            finalizer: None,
        })?;

        log::debug!("local host: class {} defined as #{}", name, handle.0);
        Ok(handle)
    }

    fn find_class(&self, namespace: &str, name: &str) -> Option<ClassHandle> {
        self.classes.read().find(namespace, name)
    }

    fn class_name(&self, class: ClassHandle) -> Result<String> {
        Ok(self.classes.read().get(class)?.full_name())
    }

    fn class_of(&self, object: ManagedObjectHandle) -> Result<ClassHandle> {
        Ok(self.heap.lock().get(object)?.header.class)
    }

    fn field_slot(&self, class: ClassHandle, name: &str) -> Option<usize> {
        self.classes.read().field_slot(class, name)
    }

    fn field_count(&self, class: ClassHandle) -> Result<usize> {
        Ok(self.classes.read().get(class)?.field_count())
    }

    fn class_methods(&self, class: ClassHandle) -> Result<Vec<MethodMetadata>> {
        Ok(self.classes.read().get(class)?.methods.clone())
    }

    fn allocate(&self, class: ClassHandle) -> Result<ManagedObjectHandle> {
        let fields = self.classes.read().defaults(class)?;
        Ok(self.heap.lock().allocate(class, fields))
    }

    fn read_field(&self, object: ManagedObjectHandle, slot: usize) -> Result<Value> {
        let heap = self.heap.lock();
        let obj = heap.get(object)?;
        obj.fields.get(slot).copied().ok_or_else(|| {
            BridgeError::InvalidArgument(format!(
                "slot {} out of range for {} ({} slots)",
                slot, object, obj.header.size
            ))
        })
    }

    fn write_field(&self, object: ManagedObjectHandle, slot: usize, value: Value) -> Result<()> {
        let mut heap = self.heap.lock();
        let obj = heap.get_mut(object)?;
        let size = obj.header.size;
        let cell = obj.fields.get_mut(slot).ok_or_else(|| {
            BridgeError::InvalidArgument(format!(
                "slot {} out of range for {} ({} slots)",
                slot, object, size
            ))
        })?;
        *cell = value;
        Ok(())
    }

    fn invoke(
        &self,
        address: MethodAddress,
        this: ManagedObjectHandle,
        args: &[Value],
    ) -> Result<Value> {
        let regions = self.regions.read().clone();
        Executor {
            image: &self.image,
            regions: &regions,
            runtime: self,
        }
        .run(address, this, args)
    }

    fn invoke_virtual(
        &self,
        this: ManagedObjectHandle,
        method: &str,
        args: &[Value],
    ) -> Result<Value> {
        let class = self.class_of(this)?;
        let target = {
            let classes = self.classes.read();
            classes.find_virtual(class, method, args.len()).ok_or_else(|| {
                let owner = classes
                    .get(class)
                    .map(|c| c.full_name())
                    .unwrap_or_else(|_| "?".to_string());
                ResolutionError::NotFound {
                    signature: format!("{}::{}/{}", owner, method, args.len()),
                }
            })?
        };
        self.invoke(target.address, this, args)
    }

    fn set_finalizer(&self, class: ClassHandle, finalizer: FinalizerFn) -> Result<()> {
        self.classes.write().get_mut(class)?.finalizer = Some(finalizer);
        Ok(())
    }
}
