//! mbridge C ABI
//!
//! Exposes reference guards, method resolution and hook installation to
//! hosts driven from C or C++. The host supplies its primitives through an
//! [`MbHostVTable`]; mbridge keeps the root table, resolution cache and
//! hook table on its side.
//!
//! Every function returns an `MB_*` status code. Output parameters are only
//! written on `MB_OK`.
//!
//! ```c
//! MbHostVTable host = { ... };
//! mb_init(&host, NULL);
//!
//! uintptr_t trampoline;
//! mb_hook_install("Game.Player::TakeDamage(int)", my_take_damage, &trampoline);
//! mb_hooks_seal();
//! ```

mod host;

pub use host::{FfiHost, MbHostVTable, MbMethodInfo};

use libc::{c_char, c_void, size_t};
use mbridge::error::{BridgeError, ResolutionError};
use mbridge::guard::{ReferenceGuard, RootTable};
use mbridge::host::MetadataSource;
use mbridge::{BridgeConfig, HookTable, ManagedObjectHandle, MethodResolver, MethodSignature};
use std::ffi::CStr;
use std::sync::{Arc, OnceLock};
use thiserror::Error;

pub const MB_OK: i32 = 0;
pub const MB_NOT_FOUND: i32 = 1;
pub const MB_AMBIGUOUS: i32 = 2;
pub const MB_TOO_SMALL: i32 = 3;
pub const MB_PHASE_CLOSED: i32 = 4;
pub const MB_NOT_INITIALIZED: i32 = 5;
pub const MB_INVALID_ARGUMENT: i32 = 6;
pub const MB_ALREADY_HOOKED: i32 = 7;
pub const MB_UNSUPPORTED_RUNTIME: i32 = 8;
pub const MB_ERROR: i32 = -1;

#[derive(Debug, Error)]
enum CapiError {
    #[error("mb_init has not been called")]
    NotInitialized,

    #[error("{0} is null")]
    NullPointer(&'static str),
}

/// Guard owned by C code; release with [`mb_guard_release`]
pub struct MbGuard(ReferenceGuard);

struct State {
    roots: Arc<RootTable>,
    resolver: MethodResolver,
    hooks: HookTable,
}

static STATE: OnceLock<State> = OnceLock::new();

fn state() -> anyhow::Result<&'static State> {
    STATE.get().ok_or_else(|| CapiError::NotInitialized.into())
}

fn classify(err: &anyhow::Error) -> i32 {
    if let Some(err) = err.downcast_ref::<CapiError>() {
        return match err {
            CapiError::NotInitialized => MB_NOT_INITIALIZED,
            CapiError::NullPointer(_) => MB_INVALID_ARGUMENT,
        };
    }
    match err.downcast_ref::<BridgeError>() {
        Some(BridgeError::Resolution(ResolutionError::NotFound { .. })) => MB_NOT_FOUND,
        Some(BridgeError::Resolution(ResolutionError::Ambiguous { .. })) => MB_AMBIGUOUS,
        Some(BridgeError::HookTooSmall(_)) => MB_TOO_SMALL,
        Some(BridgeError::HookPhaseClosed) => MB_PHASE_CLOSED,
        Some(BridgeError::AlreadyHooked { .. }) => MB_ALREADY_HOOKED,
        Some(BridgeError::UnsupportedRuntime { .. }) => MB_UNSUPPORTED_RUNTIME,
        Some(BridgeError::InvalidArgument(_)) | Some(BridgeError::Configuration(_)) => {
            MB_INVALID_ARGUMENT
        },
        _ => MB_ERROR,
    }
}

fn status(result: anyhow::Result<()>) -> i32 {
    match result {
        Ok(()) => MB_OK,
        Err(err) => {
            let code = classify(&err);
            if code == MB_ERROR {
                log::error!("mbridge-capi: {:#}", err);
            } else {
                log::debug!("mbridge-capi: status {}: {:#}", code, err);
            }
            code
        },
    }
}

fn ffi(body: impl FnOnce() -> anyhow::Result<()>) -> i32 {
    status(body())
}

/// Borrow a NUL-terminated UTF-8 string from C
unsafe fn c_str<'a>(ptr: *const c_char, what: &'static str) -> anyhow::Result<&'a str> {
    if ptr.is_null() {
        return Err(CapiError::NullPointer(what).into());
    }
    CStr::from_ptr(ptr)
        .to_str()
        .map_err(|_| BridgeError::InvalidArgument(format!("{} is not valid UTF-8", what)).into())
}

/// Write through a C output pointer
unsafe fn put<T>(out: *mut T, value: T, what: &'static str) -> anyhow::Result<()> {
    if out.is_null() {
        return Err(CapiError::NullPointer(what).into());
    }
    out.write(value);
    Ok(())
}

unsafe fn init(vtable: *const MbHostVTable, config_json: *const c_char) -> anyhow::Result<()> {
    if STATE.get().is_some() {
        log::debug!("mbridge-capi: already initialized");
        return Ok(());
    }

    let vtable = vtable.as_ref().ok_or(CapiError::NullPointer("vtable"))?;
    let config = if config_json.is_null() {
        BridgeConfig::default()
    } else {
        BridgeConfig::from_json(c_str(config_json, "config_json")?)
            .map_err(|e| BridgeError::Configuration(e.to_string()))?
    };

    let host = Arc::new(FfiHost::new(*vtable));
    let version = host.runtime_version();
    if !config.accepts_runtime(&version) {
        return Err(BridgeError::UnsupportedRuntime {
            found: version,
            supported: config.supported_runtime_versions.clone(),
        }
        .into());
    }

    let state = State {
        roots: RootTable::new(host.clone()),
        resolver: MethodResolver::new(host.clone(), config.resolution_cache),
        hooks: HookTable::new(host, config.min_patch_size, config.trampoline_arena_size),
    };
    if STATE.set(state).is_err() {
        log::debug!("mbridge-capi: concurrent mb_init, keeping the first");
    }

    log::info!("mbridge-capi {} attached to host runtime {}", mbridge::VERSION, version);
    Ok(())
}

/// Attach to the host described by `vtable`
///
/// `config_json` is an optional `BridgeConfig` in JSON; null uses the
/// defaults. A second call is a no-op.
///
/// # Safety
///
/// `vtable` must point to a valid vtable; `config_json` must be null or a
/// NUL-terminated string. Every method `find_methods` reports must be a
/// compiled body of at least `body_len` bytes at `address` that stays
/// mapped for the rest of the process.
#[no_mangle]
pub unsafe extern "C" fn mb_init(vtable: *const MbHostVTable, config_json: *const c_char) -> i32 {
    status(init(vtable, config_json))
}

/// Pin `handle` and hand out a guard for it
///
/// # Safety
///
/// `out` must be valid for a pointer write.
#[no_mangle]
pub unsafe extern "C" fn mb_guard_acquire(handle: usize, out: *mut *mut MbGuard) -> i32 {
    ffi(|| {
        if out.is_null() {
            return Err(CapiError::NullPointer("out").into());
        }
        let guard = state()?.roots.acquire(ManagedObjectHandle::from_raw(handle))?;
        put(out, Box::into_raw(Box::new(MbGuard(guard))), "out")
    })
}

/// Copy a guard; both copies must be released
///
/// # Safety
///
/// `guard` must come from this library and not be released; `out` must be
/// valid for a pointer write.
#[no_mangle]
pub unsafe extern "C" fn mb_guard_clone(guard: *const MbGuard, out: *mut *mut MbGuard) -> i32 {
    ffi(|| {
        let guard = guard.as_ref().ok_or(CapiError::NullPointer("guard"))?;
        if out.is_null() {
            return Err(CapiError::NullPointer("out").into());
        }
        put(out, Box::into_raw(Box::new(MbGuard(guard.0.clone()))), "out")
    })
}

/// Release a guard; releasing null is a no-op
///
/// # Safety
///
/// `guard` must be null or come from this library, and is invalid after
/// this call.
#[no_mangle]
pub unsafe extern "C" fn mb_guard_release(guard: *mut MbGuard) -> i32 {
    if !guard.is_null() {
        drop(Box::from_raw(guard));
    }
    MB_OK
}

/// Handle pinned by `guard`
///
/// # Safety
///
/// `guard` must be a live guard from this library; `out` must be valid for
/// a write.
#[no_mangle]
pub unsafe extern "C" fn mb_guard_handle(guard: *const MbGuard, out: *mut usize) -> i32 {
    ffi(|| {
        let guard = guard.as_ref().ok_or(CapiError::NullPointer("guard"))?;
        put(out, guard.0.handle().as_raw(), "out")
    })
}

/// Number of distinct pinned handles
///
/// # Safety
///
/// `out` must be valid for a write.
#[no_mangle]
pub unsafe extern "C" fn mb_root_count(out: *mut size_t) -> i32 {
    ffi(|| put(out, state()?.roots.len(), "out"))
}

/// Resolve `Ns.Class::Method(types)` or `Ns.Class::Method/arity`
///
/// # Safety
///
/// `signature` must be a NUL-terminated string; the output pointers must be
/// valid for writes.
#[no_mangle]
pub unsafe extern "C" fn mb_resolve(
    signature: *const c_char,
    out_address: *mut usize,
    out_body_len: *mut size_t,
) -> i32 {
    ffi(|| {
        if out_address.is_null() || out_body_len.is_null() {
            return Err(CapiError::NullPointer("out").into());
        }
        let signature = MethodSignature::parse(c_str(signature, "signature")?)?;
        let resolved = state()?.resolver.resolve_signature(&signature)?;
        put(out_address, resolved.address().as_raw(), "out_address")?;
        put(out_body_len, resolved.body_len(), "out_body_len")
    })
}

/// Redirect the method named by `signature` to `replacement`
///
/// On success `out_trampoline` receives the address that runs the original
/// body. Only valid before [`mb_hooks_seal`].
///
/// # Safety
///
/// `replacement` must be native code with the target's calling convention.
/// The target must not be executing concurrently.
#[no_mangle]
pub unsafe extern "C" fn mb_hook_install(
    signature: *const c_char,
    replacement: *const c_void,
    out_trampoline: *mut usize,
) -> i32 {
    ffi(|| {
        if out_trampoline.is_null() {
            return Err(CapiError::NullPointer("out_trampoline").into());
        }
        let state = state()?;
        let signature = MethodSignature::parse(c_str(signature, "signature")?)?;
        let resolved = state.resolver.resolve_signature(&signature)?;
        // SAFETY: the address and body length come from the resolver, backed
        // by the vtable contract of `mb_init`; the caller vouches for
        // `replacement` and for quiescence of the target.
        let trampoline = unsafe {
            state.hooks.install_raw(
                resolved.address(),
                resolved.body_len(),
                replacement as usize,
                resolved.signature(),
            )?
        };
        put(out_trampoline, trampoline.address().as_raw(), "out_trampoline")
    })
}

/// End the hook installation phase
#[no_mangle]
pub extern "C" fn mb_hooks_seal() -> i32 {
    status(state().map(|state| state.hooks.seal()))
}
