//! The guard type

use super::RootTable;
use crate::fatal;
use crate::host::ManagedObjectHandle;
use std::fmt;
use std::sync::Arc;

/// Pins a managed object for as long as it lives
///
/// # Examples
///
/// ```rust
/// use mbridge::guard::RootTable;
/// use mbridge::host::local::LocalRuntime;
/// use mbridge::host::{ClassDefinition, ManagedRuntime};
/// use std::sync::Arc;
///
/// let runtime = Arc::new(LocalRuntime::with_defaults().unwrap());
/// let class = runtime.define_class(ClassDefinition::new("", "Foo")).unwrap();
/// let roots = RootTable::new(runtime.clone());
///
/// let obj = runtime.allocate(class).unwrap();
/// let guard = roots.acquire(obj).unwrap();
///
/// runtime.collect();
/// assert!(runtime.is_live(guard.handle()));
///
/// guard.release();
/// runtime.collect();
/// assert!(!runtime.is_live(obj));
/// ```
pub struct ReferenceGuard {
    table: Option<Arc<RootTable>>,
    handle: ManagedObjectHandle,
}

impl ReferenceGuard {
    /// A guard pinning nothing
    pub fn empty() -> Self {
        Self {
            table: None,
            handle: ManagedObjectHandle::NULL,
        }
    }

    pub(super) fn pinned(table: Arc<RootTable>, handle: ManagedObjectHandle) -> Self {
        Self {
            table: Some(table),
            handle,
        }
    }

    pub fn handle(&self) -> ManagedObjectHandle {
        self.handle
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_none()
    }

    /// Drop this pin now
    pub fn release(self) {
        drop(self);
    }
}

impl Clone for ReferenceGuard {
    fn clone(&self) -> Self {
        match &self.table {
            Some(table) => {
                if !table.pin_existing(self.handle) {
                    fatal::terminate(&format!(
                        "live guard for {} has no root table entry",
                        self.handle
                    ));
                }
                Self::pinned(table.clone(), self.handle)
            },
            None => Self::empty(),
        }
    }
}

impl Drop for ReferenceGuard {
    fn drop(&mut self) {
        if let Some(table) = self.table.take() {
            table.unpin(self.handle);
        }
    }
}

impl fmt::Debug for ReferenceGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReferenceGuard")
            .field("handle", &self.handle)
            .field("pinned", &!self.is_empty())
            .finish()
    }
}
