//! Hook Table - entry-point redirection with callable originals
//!
//! Installing a hook overwrites the first [`REDIRECT_LEN`] bytes of a
//! compiled method with a redirect to a native replacement. The overwritten
//! bytes are relocated into a trampoline ([`OriginalTrampoline`]) so the
//! replacement can still run the original behaviour.
//!
//! # Phases
//!
//! Hooks are installed during initialization only. [`HookTable::seal`]
//! closes the phase; later installs fail with `HookPhaseClosed`. Installed
//! hooks are never removed.
//!
//! # Preconditions
//!
//! Every check runs before the first byte is written, so a failed install
//! leaves the target untouched:
//!
//! - the phase is still open
//! - the entry is not already redirected (by this table or anyone else)
//! - the body is at least `max(min_patch_size, REDIRECT_LEN)` bytes
//!
//! The relocated prologue is copied verbatim. Targets whose first bytes are
//! position-dependent are not supported.

pub mod arena;
pub mod patch;
pub mod trampoline;

pub use patch::REDIRECT_LEN;
pub use trampoline::OriginalTrampoline;

use crate::error::{BridgeError, HookTooSmallError, Result};
use crate::host::{MetadataSource, MethodAddress, MethodFn};
use crate::logging::{log_event, BridgeEvent};
use crate::resolver::ResolvedMethod;
use arena::TrampolineArena;
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// One installed hook
#[derive(Debug, Clone)]
pub struct HookEntry {
    pub signature: String,
    pub target: MethodAddress,
    /// Address of the replacement the entry now redirects to
    pub replacement: usize,
    pub trampoline: OriginalTrampoline,
    /// Bytes that were overwritten at the entry
    pub original_prologue: [u8; REDIRECT_LEN],
    pub installed_at: chrono::DateTime<chrono::Local>,
}

pub struct HookTable {
    source: Arc<dyn MetadataSource>,
    arena: Mutex<Option<TrampolineArena>>,
    entries: RwLock<IndexMap<MethodAddress, Arc<HookEntry>>>,
    sealed: AtomicBool,
    min_patch_size: usize,
    arena_size: usize,
}

impl HookTable {
    pub fn new(source: Arc<dyn MetadataSource>, min_patch_size: usize, arena_size: usize) -> Self {
        Self {
            source,
            arena: Mutex::new(None),
            entries: RwLock::new(IndexMap::new()),
            sealed: AtomicBool::new(false),
            min_patch_size,
            arena_size,
        }
    }

    /// Smallest body that can be patched
    pub fn required_body_len(&self) -> usize {
        self.min_patch_size.max(REDIRECT_LEN)
    }

    /// Redirect a resolved method to `replacement`
    pub fn install(
        &self,
        method: &ResolvedMethod,
        replacement: MethodFn,
    ) -> Result<OriginalTrampoline> {
        // SAFETY: a `ResolvedMethod` is only minted by the resolver from
        // `MetadataSource` output, whose implementors guarantee the body.
        unsafe {
            self.install_raw(
                method.address(),
                method.body_len(),
                replacement as usize,
                method.signature(),
            )
        }
    }

    /// Redirect the body at `target` to the native code at `replacement`
    ///
    /// # Safety
    ///
    /// `target` must be the entry of a compiled body of at least `body_len`
    /// bytes that stays mapped for the rest of the process, and its pages
    /// must have the protection the table's `MetadataSource` reports.
    /// `replacement` must be code the host can enter through a redirect.
    /// No thread may be executing the first bytes of `target` during the
    /// call.
    ///
    /// ```compile_fail
    /// use mbridge::hook::HookTable;
    /// use mbridge::host::local::LocalRuntime;
    /// use mbridge::host::MethodAddress;
    /// use std::sync::Arc;
    ///
    /// let table = HookTable::new(Arc::new(LocalRuntime::with_defaults().unwrap()), 16, 4096);
    /// // Requires an unsafe block
    /// let _ = table.install_raw(MethodAddress::from_raw(0x10), 64, 0x1234, "x".to_string());
    /// ```
    pub unsafe fn install_raw(
        &self,
        target: MethodAddress,
        body_len: usize,
        replacement: usize,
        signature: String,
    ) -> Result<OriginalTrampoline> {
        let mut entries = self.entries.write();

        if self.sealed.load(Ordering::Acquire) {
            return Err(BridgeError::HookPhaseClosed);
        }
        if entries.contains_key(&target) {
            return Err(BridgeError::AlreadyHooked { address: target });
        }
        if replacement == 0 {
            return Err(BridgeError::InvalidArgument(
                "replacement address is null".to_string(),
            ));
        }

        let required = self.required_body_len();
        if body_len < required {
            return Err(HookTooSmallError {
                address: target.as_raw(),
                body_len,
                required,
            }
            .into());
        }

        let mut prologue = [0u8; REDIRECT_LEN];
        // SAFETY: the caller guarantees a body of `body_len >= required` bytes.
        unsafe { patch::read_code(target.as_raw(), &mut prologue) };
        if patch::decode_redirect(&prologue).is_some() {
            return Err(BridgeError::AlreadyHooked { address: target });
        }

        let mut code = Vec::with_capacity(2 * REDIRECT_LEN);
        code.extend_from_slice(&prologue);
        code.extend_from_slice(&patch::encode_redirect(target.as_raw() + REDIRECT_LEN));

        let protection = self.source.code_protection(target);
        let trampoline_address = {
            let mut arena = self.arena.lock();
            let arena = arena.get_or_insert_with(|| TrampolineArena::new(self.arena_size, protection));
            arena.alloc(&code, self.source.as_ref())?
        };

        // SAFETY: body length checked above; the caller guarantees the
        // target is not executing.
        unsafe {
            patch::write_code(target.as_raw(), &patch::encode_redirect(replacement), protection)?;
        }

        let trampoline = OriginalTrampoline::new(MethodAddress::from_raw(trampoline_address), target);
        entries.insert(
            target,
            Arc::new(HookEntry {
                signature: signature.clone(),
                target,
                replacement,
                trampoline,
                original_prologue: prologue,
                installed_at: chrono::Local::now(),
            }),
        );

        log_event(BridgeEvent::HookInstalled {
            signature,
            address: target.as_raw(),
            trampoline: trampoline_address,
        });

        Ok(trampoline)
    }

    /// Close the installation phase
    pub fn seal(&self) {
        let entries = self.entries.write();
        if !self.sealed.swap(true, Ordering::AcqRel) {
            log::info!("hook table sealed with {} hooks", entries.len());
        }
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    pub fn is_hooked(&self, target: MethodAddress) -> bool {
        self.entries.read().contains_key(&target)
    }

    pub fn get(&self, target: MethodAddress) -> Option<Arc<HookEntry>> {
        self.entries.read().get(&target).cloned()
    }

    /// Installed hooks in installation order
    pub fn entries(&self) -> Vec<Arc<HookEntry>> {
        self.entries.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Bytes of trampoline code handed out so far
    pub fn trampoline_bytes(&self) -> usize {
        self.arena.lock().as_ref().map(|a| a.used()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::local::LocalRuntime;
    use crate::host::{
        CallFrame, ClassDefinition, ManagedObjectHandle, ManagedRuntime, MethodDefinition,
        MethodResult, Value,
    };

    fn seven(_: &CallFrame<'_>, _: &[Value]) -> MethodResult {
        Ok(Value::Int(7))
    }

    fn eight(_: &CallFrame<'_>, _: &[Value]) -> MethodResult {
        Ok(Value::Int(8))
    }

    fn setup(code_size: usize) -> (Arc<LocalRuntime>, ResolvedMethod) {
        let rt = Arc::new(LocalRuntime::with_defaults().unwrap());
        let class = rt
            .define_class(
                ClassDefinition::new("", "Foo")
                    .method(MethodDefinition::new("Seven", &[], "int", seven).with_code_size(code_size)),
            )
            .unwrap();
        let meta = rt.class_methods(class).unwrap().remove(0);
        (rt, ResolvedMethod::new(meta))
    }

    #[test]
    fn test_install_patches_entry_and_keeps_original() {
        let (rt, method) = setup(32);
        let table = HookTable::new(rt.clone(), 16, 4096);

        let original = table.install(&method, eight).unwrap();
        let prologue = rt.read_code(method.address(), REDIRECT_LEN).unwrap();

        assert_eq!(patch::decode_redirect(&prologue), Some(eight as MethodFn as usize));
        assert_eq!(
            rt.invoke(method.address(), ManagedObjectHandle::NULL, &[]).unwrap(),
            Value::Int(8)
        );
        assert_eq!(
            original
                .call_with(rt.as_ref(), ManagedObjectHandle::NULL, &[])
                .unwrap(),
            Value::Int(7)
        );
        assert_eq!(table.get(method.address()).unwrap().original_prologue, [0x90; REDIRECT_LEN]);
    }

    #[test]
    fn test_too_small_leaves_code_untouched() {
        let (rt, method) = setup(8);
        let table = HookTable::new(rt.clone(), 16, 4096);
        let before = rt.read_code(method.address(), 8).unwrap();

        match table.install(&method, eight) {
            Err(BridgeError::HookTooSmall(e)) => {
                assert_eq!(e.body_len, 8);
                assert_eq!(e.required, 16);
            },
            other => panic!("expected HookTooSmall, got {:?}", other.map(|_| ())),
        }
        assert_eq!(rt.read_code(method.address(), 8).unwrap(), before);
        assert!(table.is_empty());
        assert_eq!(table.trampoline_bytes(), 0);
    }

    #[test]
    fn test_double_install_rejected() {
        let (rt, method) = setup(32);
        let table = HookTable::new(rt.clone(), 16, 4096);
        table.install(&method, eight).unwrap();

        assert!(matches!(
            table.install(&method, seven),
            Err(BridgeError::AlreadyHooked { .. })
        ));

        // A second table sees the redirect already in place
        let other = HookTable::new(rt, 16, 4096);
        assert!(matches!(
            other.install(&method, seven),
            Err(BridgeError::AlreadyHooked { .. })
        ));
    }

    #[test]
    fn test_sealed_table_rejects_install() {
        let (rt, method) = setup(32);
        let table = HookTable::new(rt, 16, 4096);
        table.seal();
        assert!(table.is_sealed());
        assert!(matches!(
            table.install(&method, eight),
            Err(BridgeError::HookPhaseClosed)
        ));
    }
}
