//! Reference Guard - scoped pinning of managed objects
//!
//! A handle held only by native code is invisible to the collector. A
//! [`ReferenceGuard`] keeps its handle in the host's root set for as long as
//! the guard (or any clone of it) is alive.
//!
//! # Ownership
//!
//! - `acquire` pins; acquiring the null handle yields a guard pinning nothing
//! - `clone` adds a pin to the shared entry
//! - drop or `release` removes a pin; the host root is unregistered at zero
//! - moving a guard transfers its pin without touching the table
//!
//! The host root is registered exactly once per handle however many guards
//! pin it, and unregistered exactly once when the last one goes away.
//!
//! # Usage rules
//!
//! Acquire a guard immediately after receiving a fresh handle, before any
//! suspension point. Between allocation and pinning the object is reachable
//! from nowhere and may be collected.
//!
//! Guarding objects whose lifetime is owned by a structural subsystem (a
//! scene graph, a parent container) is allowed but fights that subsystem's
//! destruction timing; prefer a plain handle there.

pub mod reference;
pub mod root_table;

pub use reference::ReferenceGuard;
pub use root_table::{RootTable, RootTableStats};
