//! Host primitives supplied through a C vtable

use libc::{c_char, c_void, size_t};
use mbridge::error::{BridgeError, Result};
use mbridge::host::{
    CodeProtection, ManagedObjectHandle, MetadataSource, MethodAddress, MethodMetadata,
    RootRegistry, RootToken,
};
use std::ffi::{CStr, CString};

/// Compiled method as reported by the host
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct MbMethodInfo {
    pub address: usize,
    pub body_len: size_t,
    /// Comma separated parameter type names, or null when unknown
    ///
    /// Generic arguments must not contain commas.
    pub param_types: *const c_char,
}

impl Default for MbMethodInfo {
    fn default() -> Self {
        Self {
            address: 0,
            body_len: 0,
            param_types: std::ptr::null(),
        }
    }
}

/// Callbacks into the managed runtime
///
/// Every callback may be invoked from any thread and must be thread safe.
/// `user` is passed back unchanged.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct MbHostVTable {
    pub user: *mut c_void,

    /// Root `handle`; writes a de-registration token and returns 0 on success
    pub register_root: extern "C" fn(user: *mut c_void, handle: usize, token: *mut u64) -> i32,

    /// Remove a root; returns 0 on success
    pub unregister_root: extern "C" fn(user: *mut c_void, token: u64) -> i32,

    /// Writes up to `cap` matches into `out` and returns the total number
    /// of matches
    pub find_methods: extern "C" fn(
        user: *mut c_void,
        namespace: *const c_char,
        class: *const c_char,
        method: *const c_char,
        arity: size_t,
        out: *mut MbMethodInfo,
        cap: size_t,
    ) -> size_t,

    /// NUL-terminated version string, owned by the host
    pub runtime_version: extern "C" fn(user: *mut c_void) -> *const c_char,

    /// Optional: told about trampoline memory
    pub register_code_region: Option<extern "C" fn(user: *mut c_void, base: usize, len: size_t)>,

    /// Non-zero when compiled code pages are mapped read-execute
    pub code_read_execute: i32,
}

/// [`RootRegistry`] and [`MetadataSource`] over an [`MbHostVTable`]
pub struct FfiHost {
    vtable: MbHostVTable,
}

// SAFETY: the vtable contract requires thread-safe callbacks; `user` is
// never dereferenced on this side.
unsafe impl Send for FfiHost {}
unsafe impl Sync for FfiHost {}

impl FfiHost {
    pub fn new(vtable: MbHostVTable) -> Self {
        Self { vtable }
    }

    fn query(
        &self,
        namespace: &CStr,
        class: &CStr,
        method: &CStr,
        arity: usize,
        cap: usize,
    ) -> (Vec<MbMethodInfo>, usize) {
        let mut out = vec![MbMethodInfo::default(); cap];
        let total = (self.vtable.find_methods)(
            self.vtable.user,
            namespace.as_ptr(),
            class.as_ptr(),
            method.as_ptr(),
            arity,
            out.as_mut_ptr(),
            cap,
        );
        out.truncate(total.min(cap));
        (out, total)
    }
}

impl RootRegistry for FfiHost {
    fn register_root(&self, handle: ManagedObjectHandle) -> Result<RootToken> {
        let mut token = 0u64;
        let status = (self.vtable.register_root)(self.vtable.user, handle.as_raw(), &mut token);
        if status != 0 {
            return Err(BridgeError::Host(format!(
                "register_root({}) failed with status {}",
                handle, status
            )));
        }
        Ok(RootToken(token))
    }

    fn unregister_root(&self, token: RootToken) -> Result<()> {
        match (self.vtable.unregister_root)(self.vtable.user, token.0) {
            0 => Ok(()),
            status => Err(BridgeError::Host(format!(
                "unregister_root({}) failed with status {}",
                token.0, status
            ))),
        }
    }
}

// SAFETY: `mb_init` requires the vtable to report real, mapped bodies
unsafe impl MetadataSource for FfiHost {
    fn runtime_version(&self) -> String {
        let ptr = (self.vtable.runtime_version)(self.vtable.user);
        if ptr.is_null() {
            return String::new();
        }
        // SAFETY: the host returns a NUL-terminated string it keeps alive
        unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
    }

    fn find_methods(
        &self,
        namespace: &str,
        class: &str,
        method: &str,
        arity: usize,
    ) -> Vec<MethodMetadata> {
        let (Ok(c_namespace), Ok(c_class), Ok(c_method)) =
            (CString::new(namespace), CString::new(class), CString::new(method))
        else {
            return Vec::new();
        };

        let (mut found, total) = self.query(&c_namespace, &c_class, &c_method, arity, 8);
        if total > found.len() {
            found = self.query(&c_namespace, &c_class, &c_method, arity, total).0;
        }

        found
            .into_iter()
            .map(|info| MethodMetadata {
                namespace: namespace.to_string(),
                class: class.to_string(),
                name: method.to_string(),
                params: param_types(&info, arity),
                return_type: String::new(),
                address: MethodAddress::from_raw(info.address),
                body_len: info.body_len,
                is_virtual: false,
            })
            .collect()
    }

    fn code_protection(&self, _address: MethodAddress) -> CodeProtection {
        if self.vtable.code_read_execute != 0 {
            CodeProtection::ReadExecute
        } else {
            CodeProtection::ReadWrite
        }
    }

    unsafe fn register_code_region(&self, base: usize, len: usize) {
        if let Some(notify) = self.vtable.register_code_region {
            notify(self.vtable.user, base, len);
        }
    }
}

/// Parameter types of `info`; `?` placeholders when the host gave none
fn param_types(info: &MbMethodInfo, arity: usize) -> Vec<String> {
    if info.param_types.is_null() {
        return vec!["?".to_string(); arity];
    }
    // SAFETY: non-null `param_types` is a NUL-terminated host string
    let text = unsafe { CStr::from_ptr(info.param_types) }.to_string_lossy();
    let params: Vec<String> = text
        .split(',')
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect();
    if params.len() == arity {
        params
    } else {
        log::warn!(
            "host reported {} parameter types for an arity {} method",
            params.len(),
            arity
        );
        vec!["?".to_string(); arity]
    }
}
