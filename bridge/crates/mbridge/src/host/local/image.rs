//! Code image of the local host
//!
//! Compiled method bodies live in one anonymous mapping. The encoding is a
//! minimal instruction set, enough to make entry-point patching observable:
//!
//! - `0x90` - no-op, falls through to the next byte
//! - `FF 25 00 00 00 00 <u64 le>` - absolute redirect
//! - `0xC3` - on the last byte of a body, runs that body's native implementation
//! - `0xCC` - padding between bodies; executing it faults
//!
//! A body of length `n` is `n - 1` no-ops followed by `0xC3`, so its first
//! [`REDIRECT_LEN`] bytes are position-independent and can be relocated into
//! a trampoline verbatim.
//!
//! A redirect landing outside the image and every registered code region is
//! treated as a native function entry with the [`MethodFn`] signature.

use crate::error::{BridgeError, Result};
use crate::hook::patch::{decode_redirect, REDIRECT_LEN};
use crate::host::{CallFrame, ManagedObjectHandle, ManagedRuntime, MethodAddress, MethodFn, Value};
use crate::util::{align_to_page, Alignment};
use memmap2::{MmapMut, MmapOptions};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;

pub const NOP: u8 = 0x90;
pub const RET: u8 = 0xC3;
pub const PAD: u8 = 0xCC;

/// Upper bound on decoded instructions per call
const STEP_LIMIT: usize = 1 << 20;

#[derive(Clone)]
struct Body {
    len: usize,
    entry: MethodFn,
}

pub struct CodeImage {
    /// Keeps the mapping alive; accessed through `base` only
    _map: MmapMut,
    base: usize,
    len: usize,
    cursor: Mutex<usize>,
    bodies: RwLock<BTreeMap<usize, Body>>,
}

impl CodeImage {
    pub fn new(size: usize) -> Result<Self> {
        let len = align_to_page(size.max(1));
        let mut map = MmapOptions::new().len(len).map_anon().map_err(|e| {
            BridgeError::VirtualMemory(format!("failed to map code image: {}", e))
        })?;
        map.fill(PAD);
        let base = map.as_mut_ptr() as usize;

        Ok(Self {
            _map: map,
            base,
            len,
            cursor: Mutex::new(0),
            bodies: RwLock::new(BTreeMap::new()),
        })
    }

    pub fn base(&self) -> usize {
        self.base
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        *self.cursor.lock() == 0
    }

    pub fn contains(&self, address: usize) -> bool {
        address >= self.base && address < self.base + self.len
    }

    /// Emit a body of `len` bytes and return its entry address
    pub fn emit(&self, len: usize, entry: MethodFn) -> Result<MethodAddress> {
        let mut addresses = self.emit_all(&[(len, entry)])?;
        addresses
            .pop()
            .ok_or_else(|| BridgeError::Internal("code image emitted no body".to_string()))
    }

    /// Emit several bodies, all or none
    ///
    /// Lengths and capacity are checked before the first byte is written, so
    /// a rejected batch leaves the image unchanged.
    pub fn emit_all(&self, bodies: &[(usize, MethodFn)]) -> Result<Vec<MethodAddress>> {
        if bodies.iter().any(|(len, _)| *len == 0) {
            return Err(BridgeError::InvalidArgument(
                "method body must be at least one byte".to_string(),
            ));
        }

        let mut cursor = self.cursor.lock();
        let mut offsets = Vec::with_capacity(bodies.len());
        let mut end = *cursor;
        for (len, _) in bodies {
            offsets.push(end);
            end = Alignment::align_up(end + len, Alignment::CODE);
        }
        if end > self.len {
            return Err(BridgeError::Host(format!(
                "code image exhausted ({} of {} bytes used, {} requested)",
                *cursor,
                self.len,
                end - *cursor
            )));
        }

        let mut table = self.bodies.write();
        let mut addresses = Vec::with_capacity(bodies.len());
        for (&offset, &(len, entry)) in offsets.iter().zip(bodies) {
            let mut code = vec![NOP; len];
            code[len - 1] = RET;
            // SAFETY: [offset, offset + len) lies inside the mapping and is
            // not yet visible to the executor.
            unsafe {
                std::ptr::copy_nonoverlapping(code.as_ptr(), (self.base + offset) as *mut u8, len);
            }
            let address = self.base + offset;
            table.insert(address, Body { len, entry });
            addresses.push(MethodAddress::from_raw(address));
        }
        *cursor = end;
        Ok(addresses)
    }

    /// Bytes of the image handed out so far
    pub fn used(&self) -> usize {
        *self.cursor.lock()
    }

    /// Body containing `address` as `(entry, len, impl)`
    fn body_at(&self, address: usize) -> Option<(usize, usize, MethodFn)> {
        let bodies = self.bodies.read();
        let (start, body) = bodies.range(..=address).next_back()?;
        (address < start + body.len).then_some((*start, body.len, body.entry))
    }

    /// Copy image bytes starting at `address`
    pub fn read(&self, address: usize, buf: &mut [u8]) -> Result<()> {
        if !self.contains(address) || address + buf.len() > self.base + self.len {
            return Err(BridgeError::InvalidArgument(format!(
                "{:#x}+{} is outside the code image",
                address,
                buf.len()
            )));
        }
        // SAFETY: range checked against the live mapping above.
        unsafe {
            std::ptr::copy_nonoverlapping(address as *const u8, buf.as_mut_ptr(), buf.len());
        }
        Ok(())
    }
}

/// Where the program counter currently points
enum Location {
    Image,
    Region { end: usize },
    Foreign,
}

/// Decodes and runs code starting at a method entry
pub struct Executor<'a> {
    pub image: &'a CodeImage,
    pub regions: &'a [(usize, usize)],
    pub runtime: &'a dyn ManagedRuntime,
}

impl Executor<'_> {
    fn locate(&self, pc: usize) -> Location {
        if self.image.contains(pc) {
            return Location::Image;
        }
        self.regions
            .iter()
            .find(|(base, len)| pc >= *base && pc < base + len)
            .map(|(base, len)| Location::Region { end: base + len })
            .unwrap_or(Location::Foreign)
    }

    /// Fetch up to `REDIRECT_LEN` bytes at `pc`
    fn fetch(&self, pc: usize, end: usize) -> Vec<u8> {
        let n = REDIRECT_LEN.min(end - pc);
        let mut buf = vec![0u8; n];
        // SAFETY: `[pc, pc + n)` lies in the image or in a registered region;
        // regions are leaked arena chunks that are never unmapped.
        unsafe {
            std::ptr::copy_nonoverlapping(pc as *const u8, buf.as_mut_ptr(), n);
        }
        buf
    }

    pub fn run(
        &self,
        entry: MethodAddress,
        this: ManagedObjectHandle,
        args: &[Value],
    ) -> Result<Value> {
        let mut pc = entry.as_raw();
        let image_end = self.image.base() + self.image.len();

        for _ in 0..STEP_LIMIT {
            let end = match self.locate(pc) {
                Location::Image => image_end,
                Location::Region { end } => end,
                Location::Foreign => {
                    if pc == entry.as_raw() {
                        return Err(BridgeError::InvalidArgument(format!(
                            "{:#x} is not a method entry",
                            pc
                        )));
                    }
                    // SAFETY: only redirect targets get here, and redirects
                    // are only written for `MethodFn` addresses.
                    let native: MethodFn = unsafe { std::mem::transmute::<usize, MethodFn>(pc) };
                    let frame = CallFrame::new(self.runtime, this, entry);
                    return native(&frame, args).map_err(BridgeError::Exception);
                },
            };

            let code = self.fetch(pc, end);
            if let Some(target) = decode_redirect(&code) {
                pc = target;
                continue;
            }

            match code.first().copied() {
                Some(NOP) => pc += 1,
                Some(RET) => {
                    let (start, len, body) = self.image.body_at(pc).ok_or_else(|| {
                        BridgeError::Host(format!("return at {:#x} outside any method body", pc))
                    })?;
                    if pc != start + len - 1 {
                        return Err(BridgeError::Host(format!(
                            "return at {:#x} is not the end of body {:#x}",
                            pc, start
                        )));
                    }
                    let frame = CallFrame::new(self.runtime, this, MethodAddress::from_raw(start));
                    return body(&frame, args).map_err(BridgeError::Exception);
                },
                Some(op) => {
                    return Err(BridgeError::Host(format!(
                        "fault: opcode {:#04x} at {:#x}",
                        op, pc
                    )));
                },
                None => {
                    return Err(BridgeError::Host(format!("fault: fell off code at {:#x}", pc)));
                },
            }
        }

        Err(BridgeError::Host(format!(
            "call through {} exceeded the step limit",
            entry
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn forty_two(_: &CallFrame<'_>, _: &[Value]) -> crate::host::MethodResult {
        Ok(Value::Int(42))
    }

    #[test]
    fn test_emit_layout() {
        let image = CodeImage::new(4096).unwrap();
        let a = image.emit(20, forty_two).unwrap();
        let b = image.emit(16, forty_two).unwrap();

        assert_eq!(b.as_raw() - a.as_raw(), 32);

        let mut buf = [0u8; 32];
        image.read(a.as_raw(), &mut buf).unwrap();
        assert!(buf[..19].iter().all(|&b| b == NOP));
        assert_eq!(buf[19], RET);
        assert!(buf[20..].iter().all(|&b| b == PAD));
    }

    #[test]
    fn test_body_lookup() {
        let image = CodeImage::new(4096).unwrap();
        let a = image.emit(20, forty_two).unwrap().as_raw();

        assert_eq!(image.body_at(a + 19).map(|(s, l, _)| (s, l)), Some((a, 20)));
        assert!(image.body_at(a + 20).is_none());
    }

    #[test]
    fn test_image_exhaustion() {
        let image = CodeImage::new(1).unwrap();
        let too_many = image.len() / Alignment::CODE + 1;
        let result = (0..too_many).try_for_each(|_| image.emit(16, forty_two).map(|_| ()));
        assert!(matches!(result, Err(BridgeError::Host(_))));
    }
}
