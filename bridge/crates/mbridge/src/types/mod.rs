//! Type Bridge - native-defined types in the managed type system
//!
//! A bridged type is declared natively with a [`TypeBuilder`] and registered
//! once per process. Its instances are allocated and collected by the host;
//! the bridge runs the native side of their lifecycle.
//!
//! # Lifecycle
//!
//! ```text
//! allocate ──> trivial fields = defaults, non-trivial fields = Undefined
//!    │
//!    ├─ instantiate()                 (automatic path)
//!    └─ invoke_native_constructor()   (host-driven path)
//!          │  native cells allocated, constructors run root-first
//!          ▼
//!     Constructed
//!          │  invoke_native_destructor() or collection (finalizer)
//!          ▼  destructors run most-derived first, cells freed
//!      Destroyed
//! ```
//!
//! Reading a non-trivial field before construction yields `None`/`Undefined`
//! and logs a warning. Constructing or destroying twice is a
//! [`LifecycleHazard`](crate::error::LifecycleHazard), handled per
//! `BridgeConfig::lifecycle_policy`.
//!
//! Registered methods are ordinary host methods: they are resolvable,
//! hookable and take part in virtual dispatch, including overriding
//! virtual methods of a host parent class.

pub mod descriptor;
pub mod instance;
pub mod native;
pub mod registry;

pub use descriptor::{
    BridgedMethod, FieldInit, FieldKind, FieldSlot, NativeConstructor, NativeDestructor,
    ParentType, TypeBuilder, TypeDescriptor,
};
pub use instance::Instance;
pub use native::NativeCell;
pub use registry::{Lifecycle, TypeBridge};
