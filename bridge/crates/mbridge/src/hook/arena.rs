//! Trampoline arena
//!
//! Bump allocator over anonymous mappings. Chunks are leaked: a trampoline
//! may be called by any thread at any time for the rest of the process, so
//! its memory is never unmapped.

use super::patch;
use crate::error::{BridgeError, Result};
use crate::host::{CodeProtection, MetadataSource};
use crate::util::{align_to_page, Alignment};
use memmap2::MmapOptions;

struct Chunk {
    base: usize,
    len: usize,
    used: usize,
}

pub struct TrampolineArena {
    chunk_size: usize,
    protection: CodeProtection,
    chunks: Vec<Chunk>,
}

impl TrampolineArena {
    /// `protection` is the host's code protection; under `ReadExecute`
    /// chunks are made executable when mapped
    pub fn new(chunk_size: usize, protection: CodeProtection) -> Self {
        Self {
            chunk_size,
            protection,
            chunks: Vec::new(),
        }
    }

    fn map_chunk(&mut self, min_len: usize, source: &dyn MetadataSource) -> Result<()> {
        let len = align_to_page(self.chunk_size.max(min_len));
        let mut map = MmapOptions::new().len(len).map_anon().map_err(|e| {
            BridgeError::VirtualMemory(format!("failed to map trampoline arena: {}", e))
        })?;
        let base = map.as_mut_ptr() as usize;
        std::mem::forget(map);

        if self.protection == CodeProtection::ReadExecute {
            // SAFETY: the mapping was just created and is owned by this arena.
            unsafe { patch::make_executable(base, len)? };
        }
        // SAFETY: the chunk is leaked above and never unmapped.
        unsafe { source.register_code_region(base, len) };
        log::debug!("trampoline arena chunk {:#x}+{:#x}", base, len);

        self.chunks.push(Chunk { base, len, used: 0 });
        Ok(())
    }

    /// Copy `code` into the arena and return its address
    pub fn alloc(&mut self, code: &[u8], source: &dyn MetadataSource) -> Result<usize> {
        let size = Alignment::align_up(code.len(), Alignment::TRAMPOLINE);

        let fits = self
            .chunks
            .last()
            .map(|c| c.used + size <= c.len)
            .unwrap_or(false);
        if !fits {
            self.map_chunk(size, source)?;
        }

        let chunk = self
            .chunks
            .last_mut()
            .ok_or_else(|| BridgeError::Internal("no arena chunk".to_string()))?;
        let address = chunk.base + chunk.used;
        chunk.used += size;

        // SAFETY: the range was reserved above inside a live, writable chunk.
        unsafe { patch::write_code(address, code, CodeProtection::ReadWrite)? };
        Ok(address)
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Bytes handed out across all chunks
    pub fn used(&self) -> usize {
        self.chunks.iter().map(|c| c.used).sum()
    }
}
