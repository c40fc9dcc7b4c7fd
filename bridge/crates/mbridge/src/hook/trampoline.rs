//! Trampolines to original method bodies
//!
//! A trampoline is the relocated prologue of a hooked method followed by a
//! redirect back into the original body, just past the patched bytes.
//! Calling it runs the method as it was before the hook.

use crate::error::Result;
use crate::host::{CallFrame, ManagedObjectHandle, ManagedRuntime, MethodAddress, MethodResult, Value};

/// Callable handle to the pre-hook behaviour of a method
///
/// Valid for the rest of the process; cheap to copy into a `static`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OriginalTrampoline {
    address: MethodAddress,
    target: MethodAddress,
}

impl OriginalTrampoline {
    pub(crate) fn new(address: MethodAddress, target: MethodAddress) -> Self {
        Self { address, target }
    }

    /// Address of the relocated code
    pub fn address(&self) -> MethodAddress {
        self.address
    }

    /// Entry point the hook was installed on
    pub fn target(&self) -> MethodAddress {
        self.target
    }

    /// Forward a hooked call to the original body, keeping its receiver
    pub fn call(&self, frame: &CallFrame<'_>, args: &[Value]) -> MethodResult {
        frame
            .runtime()
            .invoke(self.address, frame.this(), args)
            .map_err(Into::into)
    }

    /// Call the original body outside of a hooked frame
    pub fn call_with(
        &self,
        runtime: &dyn ManagedRuntime,
        this: ManagedObjectHandle,
        args: &[Value],
    ) -> Result<Value> {
        runtime.invoke(self.address, this, args)
    }
}
