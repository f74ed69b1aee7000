//! Shared "host kmalloc" boundary for the small and string allocators.
//!
//! Unlike Rust's `std::alloc::dealloc`, C's `free()` needs no matching size
//! at release time — the host allocator tracks that itself. The small and
//! string allocators rely on exactly that property (release-mode string
//! buffers in particular carry no size prefix of their own), so this module
//! goes through `libc::malloc`/`calloc`/`free` rather than `std::alloc`.

use std::ptr::NonNull;
use std::time::Duration;

use crate::config::config;

/// Allocates `size` uninitialized bytes from the host heap (the
/// `kmalloc`-equivalent path used by the small allocator), retrying with a
/// 1s sleep while `mem_retry` is enabled and the host reports exhaustion.
pub fn host_alloc(size: usize) -> Option<NonNull<u8>> {
    loop {
        // SAFETY: size is a valid allocation request.
        let ptr = unsafe { libc::malloc(size) } as *mut u8;
        if let Some(p) = NonNull::new(ptr) {
            return Some(p);
        }
        if !config().mem_retry() {
            tracing::error!(size, "host_alloc: host heap allocator out of memory");
            return None;
        }
        tracing::warn!(size, "host_alloc: host heap out of memory, retrying in 1s");
        std::thread::sleep(Duration::from_secs(1));
    }
}

/// Allocates `size` zeroed bytes from the host heap (the `kzalloc`-equivalent
/// path used by the string allocator), with the same retry behavior as
/// [`host_alloc`].
pub fn host_zalloc(size: usize) -> Option<NonNull<u8>> {
    loop {
        // SAFETY: size is a valid allocation request; calloc zero-fills.
        let ptr = unsafe { libc::calloc(1, size) } as *mut u8;
        if let Some(p) = NonNull::new(ptr) {
            return Some(p);
        }
        if !config().mem_retry() {
            tracing::error!(size, "host_zalloc: host heap allocator out of memory");
            return None;
        }
        tracing::warn!(size, "host_zalloc: host heap out of memory, retrying in 1s");
        std::thread::sleep(Duration::from_secs(1));
    }
}

/// Frees a buffer obtained from [`host_zalloc`].
///
/// # Safety
/// `ptr` must have come from `host_zalloc` (or another `libc::malloc`-family
/// call) and not already be freed.
pub unsafe fn host_free(ptr: NonNull<u8>) {
    libc::free(ptr.as_ptr() as *mut libc::c_void);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zalloc_is_zeroed_and_freeable() {
        let p = host_zalloc(256).expect("alloc");
        unsafe {
            for i in 0..256 {
                assert_eq!(*p.as_ptr().add(i), 0);
            }
            host_free(p);
        }
    }
}
