//! # mbridge - Native Interop for GC-Managed Runtimes
//!
//! mbridge lets native Rust code live safely alongside a managed,
//! garbage-collected runtime that has been compiled ahead of time to native
//! code. It never reimplements the runtime; it consumes the host's root
//! registration, metadata and allocation primitives through the traits in
//! [`host`].
//!
//! ## Overview
//!
//! - **Reference Guard**: pins managed objects held by native code so the
//!   collector neither frees nor moves them ([`guard`])
//! - **Type Bridge**: defines managed types natively, with native
//!   constructors and destructors tied to the managed lifecycle ([`types`])
//! - **Hook Table**: redirects compiled method entries to native
//!   replacements and hands back a trampoline to the original ([`hook`])
//! - **Method Resolver**: turns textual signatures into entry addresses
//!   ([`resolver`])
//!
//! ## Quick Start
//!
//! ```rust
//! use mbridge::host::local::LocalRuntime;
//! use mbridge::host::ClassDefinition;
//! use mbridge::{Bridge, BridgeConfig, ManagedRuntime};
//! use std::sync::Arc;
//!
//! fn main() -> mbridge::Result<()> {
//!     let runtime = Arc::new(LocalRuntime::with_defaults()?);
//!     let bridge = Bridge::new(runtime.clone(), BridgeConfig::default())?;
//!
//!     let class = runtime.define_class(ClassDefinition::new("Demo", "Node"))?;
//!     let node = runtime.allocate(class)?;
//!
//!     // Pinned until the last copy of the guard drops
//!     let guard = bridge.acquire(node)?;
//!     runtime.collect();
//!     assert!(runtime.is_live(guard.handle()));
//!
//!     drop(guard);
//!     runtime.collect();
//!     assert!(!runtime.is_live(node));
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     Native code                          │
//! │   ReferenceGuard    TypeBuilder    MethodFn replacements │
//! └──────┬──────────────────┬────────────────────┬───────────┘
//!        │                  │                    │
//! ┌──────┼──────────────────┼────────────────────┼───────────┐
//! │      ▼                  ▼                    ▼   Bridge  │
//! │  RootTable ◄──────── TypeBridge         HookTable        │
//! │      │                  │                    ▲           │
//! │      │                  │             MethodResolver     │
//! └──────┼──────────────────┼────────────────────┼───────────┘
//!        │ RootRegistry     │ ManagedRuntime     │ MetadataSource
//! ┌──────▼──────────────────▼────────────────────▼───────────┐
//! │                  Host managed runtime                    │
//! │         collector · class table · compiled code          │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Phases
//!
//! Hooks are installed during a single-threaded initialization phase,
//! closed by [`Bridge::finish_initialization`]. After that, guards, type
//! instances and resolution may be used from any thread.
//!
//! ## Safety
//!
//! Hook installation writes to executable memory. [`MetadataSource`](host::MetadataSource) is an
//! `unsafe trait`: implementors vouch for the address and body size of every
//! method they report, and the patched prologue must be position
//! independent. `HookTable::install` only accepts methods the resolver
//! produced; patching an arbitrary address goes through the `unsafe`
//! `HookTable::install_raw`.
//!
//! Non-trivial fields hold ids into a registry of native cells, never raw
//! pointers. A stale or foreign id reads as `DanglingNativeCell`. Layout facts are only trusted for the runtime
//! versions listed in [`BridgeConfig::supported_runtime_versions`].
//!
//! Defects (double construct/destruct, unhandled managed exceptions at a
//! native boundary, a guard copied after its root vanished) terminate the
//! process under the default [`HazardPolicy`].
//!
//! ## Thread Safety
//!
//! [`ReferenceGuard`] is `Send + Sync`; copies on different threads share a
//! single pin count. [`Bridge`], [`MethodResolver`] and [`HookTable`] are
//! `Sync`. Cooperative steps in [`task`] run on whichever thread drives the
//! [`Scheduler`](task::Scheduler).

// Core
pub mod bridge;
pub mod config;
pub mod error;
pub mod fatal;
pub mod host;

// Components
pub mod guard;
pub mod hook;
pub mod resolver;
pub mod types;

// Runtime support
pub mod logging;
pub mod task;

// Utilities
pub mod util;

// Re-export main types for convenience
pub use bridge::{global, install_global, Bridge};
pub use config::{BridgeConfig, HazardPolicy};
pub use error::{BridgeError, HookTooSmallError, LifecycleHazard, ResolutionError, Result};
pub use guard::ReferenceGuard;
pub use hook::{HookTable, OriginalTrampoline};
pub use host::{ManagedObjectHandle, ManagedRuntime, MethodAddress, Value};
pub use resolver::{MethodResolver, MethodSignature, ResolvedMethod};
pub use types::{Instance, TypeBridge, TypeBuilder, TypeDescriptor};

/// mbridge version string from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
