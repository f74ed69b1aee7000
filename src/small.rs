//! C4 — the small allocator: the general-purpose `mem_alloc`/`mem_free`
//! entry point for arbitrary-size buffers. Delegates to the block allocator
//! once a request (plus its own guard overhead) would reach a full page,
//! otherwise goes straight to the host heap. Always installs its own
//! header/trailer on top of whatever buffer it gets back — even when that
//! buffer already carries a block-allocator header, since the two guards
//! are nested, not shared.

use std::ptr::NonNull;

use crate::block::{block_alloc, block_free};
use crate::config::config;
use crate::constants::{MAGIC_END, MAGIC_MEM, PAGE_SIZE, POISON};
use crate::guard::{read_i32, write_i32};
use crate::host::{host_alloc, host_free};
use crate::order::{clamp_site, site_in_range};
use crate::stats::MEM_STATS;

/// Header overhead this layer adds on top of the caller's requested length:
/// 3 guard ints + 1 trailer int in debug mode, just the bare length prefix
/// otherwise.
fn plus_size(debug: bool) -> i64 {
    if debug {
        4 * 4
    } else {
        4
    }
}

/// The delegation boundary: block-allocate once the *padded* request would
/// fill a whole page, otherwise use the host heap directly.
fn raw_alloc(padded_len: i64) -> Option<NonNull<u8>> {
    if padded_len >= PAGE_SIZE as i64 {
        // Delegation always uses pos=0, site=0 — the small allocator owns
        // its own per-site accounting and doesn't forward the caller's site
        // tag into the block layer's.
        block_alloc(0, padded_len as i32, 0)
    } else {
        host_alloc(padded_len as usize)
    }
}

fn raw_free(ptr: NonNull<u8>, padded_len: i64) {
    if padded_len >= PAGE_SIZE as i64 {
        block_free(ptr, padded_len as i32, 0);
    } else {
        // SAFETY: ptr came from `raw_alloc`'s host_alloc branch at this size.
        unsafe { host_free(ptr) };
    }
}

/// Allocates `len` bytes, tagged with `site` for debug accounting.
pub fn mem_alloc(len: i32, site: i32) -> Option<NonNull<u8>> {
    let debug = config().debug_mem();
    let padded = len as i64 + plus_size(debug);
    let res = raw_alloc(padded)?;

    if debug {
        let site = clamp_site(site);
        // SAFETY: res is freshly allocated with room for 3 header ints, the
        // payload, and a trailer int.
        unsafe {
            write_i32(res.as_ptr(), 0, MAGIC_MEM);
            write_i32(res.as_ptr(), 4, len);
            write_i32(res.as_ptr(), 8, site as i32);
            let payload = res.as_ptr().add(12);
            write_i32(payload, len as usize, MAGIC_END);
        }
        MEM_STATS.on_alloc(site, len as i64);
        // SAFETY: see above.
        Some(NonNull::new(unsafe { res.as_ptr().add(12) }).unwrap())
    } else {
        // SAFETY: res has room for a 1-int length prefix plus the payload.
        unsafe {
            write_i32(res.as_ptr(), 0, len);
            Some(NonNull::new(res.as_ptr().add(4)).unwrap())
        }
    }
}

/// Frees a buffer obtained from [`mem_alloc`]. On detected corruption, logs
/// and leaks rather than risking a bad free.
pub fn mem_free(ptr: NonNull<u8>, caller_site: i32) {
    let debug = config().debug_mem();
    let (header, len) = if debug {
        // SAFETY: a buffer from the debug branch of mem_alloc always has a
        // 12-byte header immediately before the payload.
        let header = unsafe { ptr.as_ptr().sub(12) };
        let (magic, len, hdr_site) = unsafe {
            (read_i32(header, 0), read_i32(header, 4), read_i32(header, 8))
        };
        if magic != MAGIC_MEM {
            tracing::error!(caller_site, magic, expected = MAGIC_MEM, "mem_free: header corruption");
            return;
        }
        if !site_in_range(hdr_site) {
            tracing::error!(caller_site, hdr_site, "mem_free: corrupted alloc site in header");
            return;
        }
        let trailer = unsafe { read_i32(ptr.as_ptr(), len as usize) };
        if trailer != MAGIC_END {
            tracing::error!(caller_site, trailer, expected = MAGIC_END, "mem_free: trailer corruption");
            return;
        }
        // SAFETY: header and the trailer offset were just read successfully.
        unsafe {
            write_i32(header, 0, POISON);
            write_i32(ptr.as_ptr(), len as usize, POISON);
        }
        MEM_STATS.on_free(hdr_site as usize);
        (header, len)
    } else {
        // SAFETY: a buffer from the non-debug branch has a 4-byte length
        // prefix immediately before the payload.
        let header = unsafe { ptr.as_ptr().sub(4) };
        let len = unsafe { read_i32(header, 0) };
        (header, len)
    };

    let padded = len as i64 + plus_size(debug);
    raw_free(NonNull::new(header).unwrap(), padded);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_roundtrip() {
        let p = mem_alloc(37, 5).expect("alloc");
        unsafe {
            std::ptr::write_bytes(p.as_ptr(), 0x42, 37);
        }
        mem_free(p, 5);
    }

    #[test]
    fn delegates_to_block_allocator_past_page_size() {
        let len = PAGE_SIZE as i32;
        let p = mem_alloc(len, 9).expect("alloc");
        unsafe {
            std::ptr::write_bytes(p.as_ptr(), 0x77, len as usize);
        }
        mem_free(p, 9);
    }

    #[test]
    fn site_is_clamped_not_rejected_on_alloc() {
        let p = mem_alloc(8, -1).expect("alloc");
        mem_free(p, -1);
        let p2 = mem_alloc(8, 1_000_000).expect("alloc");
        mem_free(p2, 1_000_000);
    }
}
