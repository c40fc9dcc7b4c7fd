//! Host Module - the managed runtime boundary
//!
//! mbridge never reimplements the managed runtime. It consumes three
//! primitives from it, split into traits so each component depends only on
//! what it uses:
//!
//! - [`RootRegistry`] - GC root registration returning a de-registration token
//!   (Reference Guard)
//! - [`MetadataSource`] - method metadata queries and code-memory facts
//!   (Method Resolver, Hook Table)
//! - [`ManagedRuntime`] - allocation, class definition, field access and
//!   dispatch (Type Bridge)
//!
//! # Layout contract
//!
//! Method entry addresses, body sizes and object slot layout come from the
//! host and are only meaningful for the host version they were validated
//! against. See `BridgeConfig::supported_runtime_versions`.
//!
//! [`local`] contains an in-process host used by tests and demos.

pub mod local;

use crate::error::Result;
use std::fmt;
use std::sync::Arc;

/// Opaque identity of a GC-owned object
///
/// A handle is only valid while the object is reachable from the GC's point
/// of view. A handle held only by native code is invisible to the collector;
/// pin it with a [`ReferenceGuard`](crate::guard::ReferenceGuard) right after
/// receiving it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[repr(transparent)]
pub struct ManagedObjectHandle(usize);

impl ManagedObjectHandle {
    /// The null handle
    pub const NULL: Self = Self(0);

    pub const fn from_raw(address: usize) -> Self {
        Self(address)
    }

    pub const fn as_raw(self) -> usize {
        self.0
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ManagedObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "object@{:#x}", self.0)
    }
}

/// Host class identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassHandle(pub usize);

/// De-registration token returned by the host's root registration primitive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RootToken(pub u64);

/// Entry address of a compiled method body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct MethodAddress(usize);

impl MethodAddress {
    pub const fn from_raw(address: usize) -> Self {
        Self(address)
    }

    pub const fn as_raw(self) -> usize {
        self.0
    }
}

impl fmt::Display for MethodAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Reference to a native cell owned by a bridged instance
///
/// Only the Type Bridge mints these. The id is looked up in the live-cell
/// registry on every access and is never dereferenced as an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct NativePtr(u64);

impl NativePtr {
    pub(crate) const fn from_id(id: u64) -> Self {
        Self(id)
    }

    pub const fn id(self) -> u64 {
        self.0
    }
}

/// A managed value as seen by native code
///
/// Slots of a managed object hold `Value`s. `Undefined` is what the allocator
/// leaves in slots it does not initialize.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Value {
    #[default]
    Void,
    Null,
    Undefined,
    Bool(bool),
    Int(i64),
    Float(f64),
    Object(ManagedObjectHandle),
    Native(NativePtr),
}

impl Value {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Object handle, with `Null` mapped to [`ManagedObjectHandle::NULL`]
    pub fn as_object(&self) -> Option<ManagedObjectHandle> {
        match self {
            Value::Object(h) => Some(*h),
            Value::Null => Some(ManagedObjectHandle::NULL),
            _ => None,
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// Short variant name for diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Void => "void",
            Value::Null => "null",
            Value::Undefined => "undefined",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Object(_) => "object",
            Value::Native(_) => "native",
        }
    }
}

/// Exception thrown by managed code or by a native method body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedException {
    pub class_name: String,
    pub message: String,
}

impl ManagedException {
    pub fn new(class_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ManagedException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.class_name, self.message)
    }
}

/// Result of a method body
pub type MethodResult = std::result::Result<Value, ManagedException>;

/// Native implementation of a managed method
///
/// Bodies of host methods, bridged methods and hook replacements all share
/// this shape, so an entry point can be redirected from one to another.
pub type MethodFn = fn(&CallFrame<'_>, &[Value]) -> MethodResult;

/// Managed destruction callback, run by the host before an object is freed
pub type FinalizerFn = Arc<dyn Fn(&dyn ManagedRuntime, ManagedObjectHandle) + Send + Sync>;

/// Invocation context passed to every [`MethodFn`]
pub struct CallFrame<'a> {
    runtime: &'a dyn ManagedRuntime,
    this: ManagedObjectHandle,
    method: MethodAddress,
}

impl<'a> CallFrame<'a> {
    pub fn new(
        runtime: &'a dyn ManagedRuntime,
        this: ManagedObjectHandle,
        method: MethodAddress,
    ) -> Self {
        Self {
            runtime,
            this,
            method,
        }
    }

    pub fn runtime(&self) -> &'a dyn ManagedRuntime {
        self.runtime
    }

    /// Receiver; null for static methods
    pub fn this(&self) -> ManagedObjectHandle {
        self.this
    }

    /// Address the call entered through
    pub fn method(&self) -> MethodAddress {
        self.method
    }
}

/// Method metadata as reported by the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodMetadata {
    pub namespace: String,
    pub class: String,
    pub name: String,
    /// Parameter type names, as the host spells them
    pub params: Vec<String>,
    pub return_type: String,
    pub address: MethodAddress,
    /// Size of the compiled body in bytes
    pub body_len: usize,
    pub is_virtual: bool,
}

impl MethodMetadata {
    pub fn arity(&self) -> usize {
        self.params.len()
    }

    /// `Ns.Class::Name(params)`
    pub fn display_signature(&self) -> String {
        let owner = if self.namespace.is_empty() {
            self.class.clone()
        } else {
            format!("{}.{}", self.namespace, self.class)
        };
        format!("{}::{}({})", owner, self.name, self.params.join(", "))
    }
}

/// Protection of compiled code pages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeProtection {
    /// Code pages are already writable; patch in place
    ReadWrite,
    /// Code pages are read+execute; patching toggles protection around the write
    ReadExecute,
}

/// Field layout handed to the host when defining a class
#[derive(Debug, Clone, PartialEq)]
pub struct FieldLayout {
    pub name: String,
    pub type_name: String,
    /// Written by the allocator into fresh instances
    pub default: Value,
}

/// Method handed to the host when defining a class
#[derive(Clone)]
pub struct MethodDefinition {
    pub name: String,
    pub params: Vec<String>,
    pub return_type: String,
    pub body: MethodFn,
    pub is_virtual: bool,
    /// Requested compiled body size; `None` uses the host default
    pub code_size: Option<usize>,
}

impl MethodDefinition {
    pub fn new(
        name: impl Into<String>,
        params: &[&str],
        return_type: impl Into<String>,
        body: MethodFn,
    ) -> Self {
        Self {
            name: name.into(),
            params: params.iter().map(|p| p.to_string()).collect(),
            return_type: return_type.into(),
            body,
            is_virtual: false,
            code_size: None,
        }
    }

    pub fn virtual_method(mut self) -> Self {
        self.is_virtual = true;
        self
    }

    pub fn with_code_size(mut self, size: usize) -> Self {
        self.code_size = Some(size);
        self
    }
}

impl fmt::Debug for MethodDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodDefinition")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("return_type", &self.return_type)
            .field("body", &format!("{:#x}", self.body as usize))
            .field("is_virtual", &self.is_virtual)
            .field("code_size", &self.code_size)
            .finish()
    }
}

/// Class handed to the host's type system
#[derive(Debug, Clone)]
pub struct ClassDefinition {
    pub namespace: String,
    pub name: String,
    pub parent: Option<ClassHandle>,
    /// Own fields; slots follow the parent's slots
    pub fields: Vec<FieldLayout>,
    pub methods: Vec<MethodDefinition>,
}

impl ClassDefinition {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            parent: None,
            fields: Vec::new(),
            methods: Vec::new(),
        }
    }

    pub fn extends(mut self, parent: ClassHandle) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn field(mut self, name: &str, type_name: &str, default: Value) -> Self {
        self.fields.push(FieldLayout {
            name: name.to_string(),
            type_name: type_name.to_string(),
            default,
        });
        self
    }

    pub fn method(mut self, method: MethodDefinition) -> Self {
        self.methods.push(method);
        self
    }

    pub fn full_name(&self) -> String {
        full_name(&self.namespace, &self.name)
    }
}

/// `namespace.name`, or `name` in the global namespace
pub fn full_name(namespace: &str, name: &str) -> String {
    if namespace.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", namespace, name)
    }
}

/// GC root registration primitive
pub trait RootRegistry: Send + Sync {
    /// Add `handle` to the collector's root set
    fn register_root(&self, handle: ManagedObjectHandle) -> Result<RootToken>;

    /// Remove the root identified by `token`
    fn unregister_root(&self, token: RootToken) -> Result<()>;
}

/// Metadata query primitive and code-memory facts
///
/// # Safety
///
/// The Hook Table reads and overwrites code at the addresses reported here.
/// Every [`MethodMetadata`] returned by `find_methods` must describe one
/// compiled body: `body_len` bytes starting at `address`, mapped for the
/// rest of the process. `code_protection` must report the real protection
/// of those pages.
pub unsafe trait MetadataSource: Send + Sync {
    /// Version string of the host runtime build
    fn runtime_version(&self) -> String;

    /// All methods named `method` with `arity` parameters declared on `class`
    fn find_methods(
        &self,
        namespace: &str,
        class: &str,
        method: &str,
        arity: usize,
    ) -> Vec<MethodMetadata>;

    /// Protection of the page holding `address`
    fn code_protection(&self, _address: MethodAddress) -> CodeProtection {
        CodeProtection::ReadExecute
    }

    /// Announce a native code region (trampoline arena) to the host
    ///
    /// # Safety
    ///
    /// `[base, base + len)` must be readable, executable memory that stays
    /// mapped for the rest of the process.
    unsafe fn register_code_region(&self, _base: usize, _len: usize) {}
}

/// The managed runtime's allocator, type system and dispatcher
pub trait ManagedRuntime: RootRegistry + MetadataSource {
    /// Register a class; full names are unique
    fn define_class(&self, definition: ClassDefinition) -> Result<ClassHandle>;

    fn find_class(&self, namespace: &str, name: &str) -> Option<ClassHandle>;

    fn class_name(&self, class: ClassHandle) -> Result<String>;

    fn class_of(&self, object: ManagedObjectHandle) -> Result<ClassHandle>;

    /// Slot index of `name` on `class` or one of its parents
    fn field_slot(&self, class: ClassHandle, name: &str) -> Option<usize>;

    /// Number of slots of an instance of `class`, parents included
    fn field_count(&self, class: ClassHandle) -> Result<usize>;

    /// Methods declared on `class`
    fn class_methods(&self, class: ClassHandle) -> Result<Vec<MethodMetadata>>;

    /// Allocate an instance; declared defaults are written, nothing else runs
    fn allocate(&self, class: ClassHandle) -> Result<ManagedObjectHandle>;

    fn read_field(&self, object: ManagedObjectHandle, slot: usize) -> Result<Value>;

    fn write_field(&self, object: ManagedObjectHandle, slot: usize, value: Value) -> Result<()>;

    /// Call through the compiled entry at `address`
    fn invoke(
        &self,
        address: MethodAddress,
        this: ManagedObjectHandle,
        args: &[Value],
    ) -> Result<Value>;

    /// Virtual dispatch on the receiver's class chain
    fn invoke_virtual(
        &self,
        this: ManagedObjectHandle,
        method: &str,
        args: &[Value],
    ) -> Result<Value>;

    /// Hook the managed destruction path of `class`
    fn set_finalizer(&self, class: ClassHandle, finalizer: FinalizerFn) -> Result<()>;
}
