//! Code patching primitives
//!
//! Every raw write to executable memory in mbridge goes through this module.
//!
//! The redirect is an absolute indirect jump through an inline literal:
//!
//! ```text
//! FF 25 00 00 00 00    jmp [rip+0]
//! xx xx xx xx xx xx xx xx    u64 target, little endian
//! ```
//!
//! It needs no scratch register and reaches any address, at the cost of
//! [`REDIRECT_LEN`] bytes at the patched entry.

use crate::error::{BridgeError, Result};
use crate::host::CodeProtection;
use crate::util::page_span;

/// Opcode prefix of the redirect sequence
pub const REDIRECT_PREFIX: [u8; 6] = [0xFF, 0x25, 0x00, 0x00, 0x00, 0x00];

/// Total bytes of a redirect sequence
pub const REDIRECT_LEN: usize = REDIRECT_PREFIX.len() + std::mem::size_of::<u64>();

/// Encode a redirect to `target`
pub fn encode_redirect(target: usize) -> [u8; REDIRECT_LEN] {
    let mut out = [0u8; REDIRECT_LEN];
    out[..REDIRECT_PREFIX.len()].copy_from_slice(&REDIRECT_PREFIX);
    out[REDIRECT_PREFIX.len()..].copy_from_slice(&(target as u64).to_le_bytes());
    out
}

/// Target of the redirect at the start of `code`, if there is one
pub fn decode_redirect(code: &[u8]) -> Option<usize> {
    if code.len() < REDIRECT_LEN || code[..REDIRECT_PREFIX.len()] != REDIRECT_PREFIX {
        return None;
    }
    let mut literal = [0u8; 8];
    literal.copy_from_slice(&code[REDIRECT_PREFIX.len()..REDIRECT_LEN]);
    Some(u64::from_le_bytes(literal) as usize)
}

/// Copy `buf.len()` bytes of code starting at `address`
///
/// # Safety
///
/// `[address, address + buf.len())` must be mapped and readable.
pub unsafe fn read_code(address: usize, buf: &mut [u8]) {
    std::ptr::copy_nonoverlapping(address as *const u8, buf.as_mut_ptr(), buf.len());
}

/// Overwrite code at `address`
///
/// With [`CodeProtection::ReadExecute`] the covering pages are made writable
/// for the duration of the copy and restored to read+execute afterwards.
///
/// # Safety
///
/// `[address, address + bytes.len())` must be mapped code that no thread is
/// executing while the write is in progress.
pub unsafe fn write_code(address: usize, bytes: &[u8], protection: CodeProtection) -> Result<()> {
    match protection {
        CodeProtection::ReadWrite => {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), address as *mut u8, bytes.len());
            Ok(())
        },
        CodeProtection::ReadExecute => {
            let (page, len) = page_span(address, bytes.len());
            os::make_writable(page, len)?;
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), address as *mut u8, bytes.len());
            os::restore_executable(page, len)?;
            os::flush_icache(address, bytes.len());
            Ok(())
        },
    }
}

/// Make a freshly mapped region executable while keeping it writable
///
/// # Safety
///
/// `[base, base + len)` must be a page-aligned mapping owned by the caller.
pub unsafe fn make_executable(base: usize, len: usize) -> Result<()> {
    os::make_writable(base, len)
}

#[cfg(unix)]
mod os {
    use super::*;

    unsafe fn protect(page: usize, len: usize, prot: libc::c_int) -> Result<()> {
        if libc::mprotect(page as *mut libc::c_void, len, prot) != 0 {
            let err = std::io::Error::last_os_error();
            return Err(BridgeError::VirtualMemory(format!(
                "mprotect({:#x}, {:#x}) failed: {}",
                page, len, err
            )));
        }
        Ok(())
    }

    pub unsafe fn make_writable(page: usize, len: usize) -> Result<()> {
        protect(page, len, libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC)
    }

    pub unsafe fn restore_executable(page: usize, len: usize) -> Result<()> {
        protect(page, len, libc::PROT_READ | libc::PROT_EXEC)
    }

    pub unsafe fn flush_icache(_address: usize, _len: usize) {}
}

#[cfg(windows)]
mod os {
    use super::*;
    use windows_sys::Win32::System::Diagnostics::Debug::FlushInstructionCache;
    use windows_sys::Win32::System::Memory::{
        VirtualProtect, PAGE_EXECUTE_READ, PAGE_EXECUTE_READWRITE,
    };
    use windows_sys::Win32::System::Threading::GetCurrentProcess;

    unsafe fn protect(page: usize, len: usize, prot: u32) -> Result<()> {
        let mut old = 0u32;
        if VirtualProtect(page as *const _, len, prot, &mut old) == 0 {
            return Err(BridgeError::VirtualMemory(format!(
                "VirtualProtect({:#x}, {:#x}) failed: {}",
                page,
                len,
                std::io::Error::last_os_error()
            )));
        }
        Ok(())
    }

    pub unsafe fn make_writable(page: usize, len: usize) -> Result<()> {
        protect(page, len, PAGE_EXECUTE_READWRITE)
    }

    pub unsafe fn restore_executable(page: usize, len: usize) -> Result<()> {
        protect(page, len, PAGE_EXECUTE_READ)
    }

    pub unsafe fn flush_icache(address: usize, len: usize) {
        FlushInstructionCache(GetCurrentProcess(), address as *const _, len);
    }
}

#[cfg(not(any(unix, windows)))]
mod os {
    use super::*;

    pub unsafe fn make_writable(_page: usize, _len: usize) -> Result<()> {
        Err(BridgeError::VirtualMemory(
            "code protection changes are not supported on this platform".to_string(),
        ))
    }

    pub unsafe fn restore_executable(page: usize, len: usize) -> Result<()> {
        make_writable(page, len)
    }

    pub unsafe fn flush_icache(_address: usize, _len: usize) {}
}
