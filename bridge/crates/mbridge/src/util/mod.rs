//! Util Module - Shared Utilities
//!
//! Alignment and page helpers used by the code image and trampoline arena.

pub mod alignment;

pub use alignment::Alignment;

use std::sync::atomic::{AtomicUsize, Ordering};

/// Cached system page size
static SYSTEM_PAGE_SIZE: AtomicUsize = AtomicUsize::new(0);

/// Get system page size (cached after the first query)
pub fn get_page_size() -> usize {
    let cached = SYSTEM_PAGE_SIZE.load(Ordering::Relaxed);
    if cached != 0 {
        return cached;
    }

    let size = page_size::get();
    SYSTEM_PAGE_SIZE.store(size, Ordering::Relaxed);
    size
}

/// Align size to page boundary (round up)
pub fn align_to_page(size: usize) -> usize {
    Alignment::align_up(size, get_page_size())
}

/// Pages spanned by `[addr, addr + len)` as `(page_base, byte_len)`
pub fn page_span(addr: usize, len: usize) -> (usize, usize) {
    let ps = get_page_size();
    let start = Alignment::align_down(addr, ps);
    let end = Alignment::align_up(addr + len.max(1), ps);
    (start, end - start)
}
