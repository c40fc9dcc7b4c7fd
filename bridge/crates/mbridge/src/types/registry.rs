//! Type Bridge registry and instance lifecycle

use super::descriptor::{
    BridgedMethod, FieldInit, FieldSlot, ParentSpec, ParentType, TypeBuilder, TypeDescriptor,
};
use super::instance::Instance;
use super::native::{self, NativeCell};
use crate::config::HazardPolicy;
use crate::error::{BridgeError, LifecycleHazard, Result};
use crate::fatal;
use crate::guard::{ReferenceGuard, RootTable};
use crate::host::{
    ClassDefinition, ClassHandle, FieldLayout, ManagedObjectHandle, ManagedRuntime, NativePtr,
    Value,
};
use crate::logging::{log_event, BridgeEvent};
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::{Arc, Weak};

/// Native lifecycle state of an instance
///
/// Instances with no entry have not been constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Constructed,
    Destroyed,
}

struct BridgeShared {
    runtime: Arc<dyn ManagedRuntime>,
    roots: Arc<RootTable>,
    types: RwLock<IndexMap<String, Arc<TypeDescriptor>>>,
    by_class: RwLock<FxHashMap<ClassHandle, Arc<TypeDescriptor>>>,
    lifecycle: Mutex<FxHashMap<ManagedObjectHandle, Lifecycle>>,
    /// Cells allocated by this bridge and not yet released
    cells: Mutex<FxHashSet<NativePtr>>,
    policy: HazardPolicy,
}

/// Registers native-defined types and runs their native lifecycle
#[derive(Clone)]
pub struct TypeBridge {
    shared: Arc<BridgeShared>,
}

impl TypeBridge {
    pub fn new(
        runtime: Arc<dyn ManagedRuntime>,
        roots: Arc<RootTable>,
        policy: HazardPolicy,
    ) -> Self {
        Self {
            shared: Arc::new(BridgeShared {
                runtime,
                roots,
                types: RwLock::new(IndexMap::new()),
                by_class: RwLock::new(FxHashMap::default()),
                lifecycle: Mutex::new(FxHashMap::default()),
                cells: Mutex::new(FxHashSet::default()),
                policy,
            }),
        }
    }

    /// Register a type with the host; each full name can be defined once
    pub fn define_type(&self, builder: TypeBuilder) -> Result<Arc<TypeDescriptor>> {
        let shared = &self.shared;
        let full_name = builder.full_name();
        if shared.types.read().contains_key(&full_name) {
            return Err(BridgeError::TypeAlreadyDefined { name: full_name });
        }

        let parent = match builder.parent {
            ParentSpec::None => None,
            ParentSpec::Bridged(ref name) => Some(ParentType::Bridged(
                shared
                    .types
                    .read()
                    .get(name)
                    .cloned()
                    .ok_or_else(|| BridgeError::UnknownType { name: name.clone() })?,
            )),
            ParentSpec::Host(class) => {
                shared.runtime.class_name(class)?;
                Some(ParentType::Host(class))
            },
        };

        let mut definition = ClassDefinition::new(builder.namespace.clone(), builder.name.clone());
        definition.parent = match &parent {
            Some(ParentType::Bridged(p)) => Some(p.class),
            Some(ParentType::Host(c)) => Some(*c),
            None => None,
        };
        definition.fields = builder
            .fields
            .iter()
            .map(|f| FieldLayout {
                name: f.name.clone(),
                type_name: f.kind.type_name().to_string(),
                default: match &f.default {
                    FieldInit::Value(v) if f.kind.is_trivial() => *v,
                    _ => Value::Undefined,
                },
            })
            .collect();
        definition.methods = builder.methods;

        let class = shared.runtime.define_class(definition)?;

        let mut fields = Vec::with_capacity(builder.fields.len());
        for decl in builder.fields {
            let offset = shared.runtime.field_slot(class, &decl.name).ok_or_else(|| {
                BridgeError::Internal(format!("host lost field {} of {}", decl.name, full_name))
            })?;
            fields.push(FieldSlot {
                name: decl.name,
                kind: decl.kind,
                offset,
                default: decl.default,
            });
        }

        let methods = shared
            .runtime
            .class_methods(class)?
            .into_iter()
            .map(|m| BridgedMethod {
                name: m.name,
                params: m.params,
                return_type: m.return_type,
                address: m.address,
                body_len: m.body_len,
                is_virtual: m.is_virtual,
            })
            .collect();

        let descriptor = Arc::new(TypeDescriptor {
            namespace: builder.namespace,
            name: builder.name,
            parent,
            class,
            fields,
            methods,
            constructor: builder.constructor,
            destructor: builder.destructor,
        });

        // Managed destruction path -> native destructor
        let weak: Weak<BridgeShared> = Arc::downgrade(&self.shared);
        shared.runtime.set_finalizer(
            class,
            Arc::new(move |_: &dyn ManagedRuntime, handle: ManagedObjectHandle| {
                if let Some(shared) = weak.upgrade() {
                    shared.finalize(handle);
                }
            }),
        )?;

        shared
            .types
            .write()
            .insert(full_name.clone(), descriptor.clone());
        shared.by_class.write().insert(class, descriptor.clone());

        log_event(BridgeEvent::TypeDefined {
            name: full_name,
            fields: descriptor.fields.len(),
            methods: descriptor.methods.len(),
        });
        Ok(descriptor)
    }

    /// Allocate, pin and construct an instance
    ///
    /// The returned guard is acquired before the constructor runs, so the
    /// instance is never unreachable between allocation and first use.
    pub fn instantiate(
        &self,
        descriptor: &TypeDescriptor,
        args: &[Value],
    ) -> Result<ReferenceGuard> {
        let shared = &self.shared;
        let handle = shared.runtime.allocate(descriptor.class)?;
        let guard = shared.roots.acquire(handle)?;
        shared.construct(handle, descriptor, args)?;
        Ok(guard)
    }

    /// Instantiate by full type name
    pub fn instantiate_named(&self, full_name: &str, args: &[Value]) -> Result<ReferenceGuard> {
        let descriptor = self
            .descriptor(full_name)
            .ok_or_else(|| BridgeError::UnknownType {
                name: full_name.to_string(),
            })?;
        self.instantiate(&descriptor, args)
    }

    /// Run the constructor path on an instance the host allocated itself
    pub fn invoke_native_constructor(&self, handle: ManagedObjectHandle, args: &[Value]) -> Result<()> {
        let descriptor = self.descriptor_of(handle)?;
        self.shared.construct(handle, &descriptor, args)
    }

    /// Run the destructor path ahead of collection
    pub fn invoke_native_destructor(&self, handle: ManagedObjectHandle) -> Result<()> {
        let descriptor = self.descriptor_of(handle)?;
        self.shared.destroy(handle, &descriptor)
    }

    pub fn descriptor(&self, full_name: &str) -> Option<Arc<TypeDescriptor>> {
        self.shared.types.read().get(full_name).cloned()
    }

    /// Descriptor of the most-derived bridged type of `handle`
    pub fn descriptor_of(&self, handle: ManagedObjectHandle) -> Result<Arc<TypeDescriptor>> {
        let class = self.shared.runtime.class_of(handle)?;
        self.shared
            .by_class
            .read()
            .get(&class)
            .cloned()
            .ok_or_else(|| BridgeError::UnknownType {
                name: self
                    .shared
                    .runtime
                    .class_name(class)
                    .unwrap_or_else(|_| format!("class#{}", class.0)),
            })
    }

    /// Registered types in registration order
    pub fn types(&self) -> Vec<Arc<TypeDescriptor>> {
        self.shared.types.read().values().cloned().collect()
    }

    pub fn lifecycle(&self, handle: ManagedObjectHandle) -> Option<Lifecycle> {
        self.shared.lifecycle.lock().get(&handle).copied()
    }

    /// Native cells currently allocated for non-trivial fields
    pub fn live_native_cells(&self) -> usize {
        self.shared.cells.lock().len()
    }

    pub fn instance<'a>(&'a self, handle: ManagedObjectHandle) -> Instance<'a> {
        Instance::new(self.shared.runtime.as_ref(), handle)
    }
}

impl BridgeShared {
    fn hazard(&self, hazard: LifecycleHazard) -> Result<()> {
        log_event(BridgeEvent::LifecycleHazard {
            description: hazard.to_string(),
        });
        fatal::escalate(self.policy, hazard.into())
    }

    fn construct(
        &self,
        handle: ManagedObjectHandle,
        descriptor: &TypeDescriptor,
        args: &[Value],
    ) -> Result<()> {
        {
            let mut lifecycle = self.lifecycle.lock();
            match lifecycle.get(&handle) {
                Some(Lifecycle::Constructed) => {
                    drop(lifecycle);
                    return self.hazard(LifecycleHazard::DoubleConstruct { handle });
                },
                Some(Lifecycle::Destroyed) => {
                    drop(lifecycle);
                    return self.hazard(LifecycleHazard::ConstructAfterDestruct { handle });
                },
                None => {
                    lifecycle.insert(handle, Lifecycle::Constructed);
                },
            }
        }

        for field in descriptor.all_fields().into_iter().filter(|f| !f.is_trivial()) {
            let cell = match &field.default {
                FieldInit::Text(s) => NativeCell::Text(s.clone()),
                FieldInit::List(items) => NativeCell::List(items.clone()),
                FieldInit::Value(_) => continue,
            };
            let ptr = native::alloc(cell);
            if let Err(e) = self.runtime.write_field(handle, field.offset, Value::Native(ptr)) {
                native::free(ptr);
                self.release_cells(handle, descriptor);
                self.lifecycle.lock().insert(handle, Lifecycle::Destroyed);
                return Err(e);
            }
            self.cells.lock().insert(ptr);
        }

        let instance = Instance::new(self.runtime.as_ref(), handle);
        let chain = descriptor.ancestry();
        let last = chain.len() - 1;
        for (i, ty) in chain.iter().enumerate() {
            let Some(ctor) = ty.constructor else {
                continue;
            };
            let ctor_args = if i == last { args } else { &[] };
            if let Err(exc) = ctor(&instance, ctor_args) {
                log::warn!("constructor of {} failed: {}", ty.full_name(), exc);
                self.release_cells(handle, descriptor);
                self.lifecycle.lock().insert(handle, Lifecycle::Destroyed);
                return Err(BridgeError::Exception(exc));
            }
        }

        log_event(BridgeEvent::InstanceConstructed {
            type_name: descriptor.full_name(),
            handle: handle.as_raw(),
        });
        Ok(())
    }

    fn destroy(&self, handle: ManagedObjectHandle, descriptor: &TypeDescriptor) -> Result<()> {
        {
            let mut lifecycle = self.lifecycle.lock();
            match lifecycle.get(&handle) {
                Some(Lifecycle::Constructed) => {
                    lifecycle.insert(handle, Lifecycle::Destroyed);
                },
                Some(Lifecycle::Destroyed) => {
                    drop(lifecycle);
                    return self.hazard(LifecycleHazard::DoubleDestruct { handle });
                },
                None => {
                    log::warn!(
                        "destructor of {} invoked on unconstructed {}",
                        descriptor.full_name(),
                        handle
                    );
                    lifecycle.insert(handle, Lifecycle::Destroyed);
                    return Ok(());
                },
            }
        }

        let instance = Instance::new(self.runtime.as_ref(), handle);
        for ty in descriptor.ancestry().into_iter().rev() {
            if let Some(dtor) = ty.destructor {
                dtor(&instance);
            }
        }
        self.release_cells(handle, descriptor);

        log_event(BridgeEvent::InstanceDestroyed {
            type_name: descriptor.full_name(),
            handle: handle.as_raw(),
        });
        Ok(())
    }

    /// Free every native cell of `handle` and reset its slots
    fn release_cells(&self, handle: ManagedObjectHandle, descriptor: &TypeDescriptor) {
        for field in descriptor.all_fields().into_iter().filter(|f| !f.is_trivial()) {
            match self.runtime.read_field(handle, field.offset) {
                Ok(Value::Native(ptr)) => {
                    if let Err(e) = self.runtime.write_field(handle, field.offset, Value::Undefined) {
                        log::error!("cannot reset {} of {}: {}", field.name, handle, e);
                        continue;
                    }
                    // Borrowers still holding the cell keep it alive until they finish
                    if self.cells.lock().remove(&ptr) {
                        native::free(ptr);
                    } else {
                        log::warn!("{} of {} named a cell this bridge does not own", field.name, handle);
                    }
                },
                Ok(_) => {},
                Err(e) => log::error!("cannot read {} of {}: {}", field.name, handle, e),
            }
        }
    }

    /// Managed destruction path
    ///
    /// Instances destroyed explicitly earlier are skipped; the lifecycle
    /// entry is dropped because the host may reuse the address.
    fn finalize(&self, handle: ManagedObjectHandle) {
        let state = self.lifecycle.lock().get(&handle).copied();
        if state == Some(Lifecycle::Constructed) {
            let descriptor = self
                .runtime
                .class_of(handle)
                .ok()
                .and_then(|class| self.by_class.read().get(&class).cloned());
            match descriptor {
                Some(descriptor) => {
                    if let Err(e) = self.destroy(handle, &descriptor) {
                        log::error!("destructor path of {} failed: {}", handle, e);
                    }
                },
                None => log::error!("finalizer for {} without a bridged type", handle),
            }
        }
        self.lifecycle.lock().remove(&handle);
    }
}
