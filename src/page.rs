//! C1 — the raw page source: a thin wrapper over the host's contiguous-pages
//! primitive (`mmap`/`VirtualAlloc`), standing in for the kernel's
//! `__get_free_pages`/`__free_pages`.

use std::ptr::NonNull;
use std::time::Duration;

use crate::config::config;
use crate::constants::PAGE_SIZE;
use crate::stats::order_stats;

/// A source of contiguous, order-sized page runs.
///
/// Implementations may block on allocation failure when retry is enabled
/// (see [`BrickConfig::mem_retry`](crate::config::BrickConfig::mem_retry)) —
/// callers must not invoke this from a context that forbids sleeping.
pub trait PageSource: Send + Sync {
    /// Allocates `PAGE_SIZE << order` contiguous bytes, or `None` on failure
    /// (only possible with retry disabled).
    fn raw_alloc(&self, order: usize) -> Option<NonNull<u8>>;

    /// Frees a buffer previously returned by `raw_alloc` with the same
    /// `order`.
    ///
    /// # Safety
    /// `ptr` must have been obtained from this source at this order and not
    /// already freed.
    unsafe fn raw_free(&self, ptr: NonNull<u8>, order: usize);
}

/// Acquires pages directly from the host via `mmap`/`VirtualAlloc`.
#[derive(Default, Clone, Copy, Debug)]
pub struct SyscallPageSource;

impl PageSource for SyscallPageSource {
    fn raw_alloc(&self, order: usize) -> Option<NonNull<u8>> {
        let size = PAGE_SIZE << order;
        loop {
            // SAFETY: size is a positive multiple of PAGE_SIZE.
            let raw = unsafe { allocate_region(size) };
            if let Some(p) = raw {
                if config().debug_mem() {
                    order_stats().raw_count[order].fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                }
                return NonNull::new(p);
            }
            if !config().mem_retry() {
                tracing::error!(order, size, "raw_alloc: host page allocator out of memory");
                return None;
            }
            tracing::warn!(order, size, "raw_alloc: host out of memory, retrying in 1s");
            std::thread::sleep(Duration::from_secs(1));
        }
    }

    unsafe fn raw_free(&self, ptr: NonNull<u8>, order: usize) {
        let size = PAGE_SIZE << order;
        free_region(ptr.as_ptr(), size);
        if config().debug_mem() {
            order_stats().raw_count[order].fetch_sub(1, std::sync::atomic::Ordering::Relaxed);
        }
    }
}

#[cfg(unix)]
unsafe fn allocate_region(size: usize) -> Option<*mut u8> {
    let ptr = libc::mmap(
        std::ptr::null_mut(),
        size,
        libc::PROT_READ | libc::PROT_WRITE,
        libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
        -1,
        0,
    );
    if ptr == libc::MAP_FAILED {
        None
    } else {
        Some(ptr as *mut u8)
    }
}

#[cfg(unix)]
unsafe fn free_region(ptr: *mut u8, size: usize) {
    libc::munmap(ptr as *mut libc::c_void, size);
}

#[cfg(windows)]
unsafe fn allocate_region(size: usize) -> Option<*mut u8> {
    use windows_sys::Win32::System::Memory::{VirtualAlloc, MEM_COMMIT, MEM_RESERVE, PAGE_READWRITE};
    let ptr = VirtualAlloc(std::ptr::null_mut(), size, MEM_COMMIT | MEM_RESERVE, PAGE_READWRITE);
    if ptr.is_null() {
        None
    } else {
        Some(ptr as *mut u8)
    }
}

#[cfg(windows)]
unsafe fn free_region(ptr: *mut u8, _size: usize) {
    use windows_sys::Win32::System::Memory::{VirtualFree, MEM_RELEASE};
    VirtualFree(ptr as *mut _, 0, MEM_RELEASE);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_free_roundtrip_each_order() {
        let src = SyscallPageSource;
        for order in 0..=3usize {
            let p = src.raw_alloc(order).expect("raw_alloc should succeed");
            unsafe {
                // Touch the whole region to make sure it's really mapped.
                std::ptr::write_bytes(p.as_ptr(), 0xAB, PAGE_SIZE << order);
                src.raw_free(p, order);
            }
        }
    }
}
