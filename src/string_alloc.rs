//! C5 — the string allocator. Always goes straight to the host heap (no
//! delegation to the block allocator — strings don't grow past a page in
//! practice), and its buffers are always zero-filled. In release builds the
//! payload carries no prefix at all: `string_free` hands the raw pointer
//! straight to the host allocator, which tracks its own size.

use std::ptr::NonNull;

use crate::config::config;
use crate::constants::{BRICK_STRING_LEN, DEBUG_STRING_SLACK, MAGIC_END, MAGIC_STR, POISON};
use crate::guard::{read_i32, write_i32};
use crate::host::{host_free, host_zalloc};
use crate::order::{clamp_site, site_in_range};
use crate::stats::STRING_STATS;

/// Offset from the header's start to the payload: 3 guard ints (magic, len,
/// site).
const HEADER_BYTES: i64 = 3 * 4;

/// Total bytes `len` is padded by before sizing the allocation: 4 ints, not
/// 3 — the trailer gets its own slot past the payload, beyond the 3-int
/// prefix (matches the source's `len += sizeof(int) * 4`).
const PADDING_BYTES: i64 = 4 * 4;

/// Allocates a zero-filled string buffer of `len` bytes (or
/// [`BRICK_STRING_LEN`] if `len <= 0`), tagged with `site` for debug
/// accounting.
pub fn string_alloc(len: i32, site: i32) -> Option<NonNull<u8>> {
    let effective_len: i64 = if len <= 0 { BRICK_STRING_LEN as i64 } else { len as i64 };
    let debug = config().debug_mem();

    if !debug {
        return host_zalloc(effective_len as usize);
    }

    let header_len = effective_len + PADDING_BYTES;
    let alloc_size = header_len + DEBUG_STRING_SLACK as i64;
    let res = host_zalloc(alloc_size as usize)?;

    let site = clamp_site(site);
    // SAFETY: res is freshly zeroed with room for the 3-int header, the
    // payload, and a trailer int before the slack.
    unsafe {
        write_i32(res.as_ptr(), 0, MAGIC_STR);
        write_i32(res.as_ptr(), 4, header_len as i32);
        write_i32(res.as_ptr(), 8, site as i32);
        write_i32(res.as_ptr(), (header_len - 4) as usize, MAGIC_END);
    }
    STRING_STATS.on_alloc(site, header_len);
    // SAFETY: see above.
    NonNull::new(unsafe { res.as_ptr().add(HEADER_BYTES as usize) })
}

/// Frees a buffer obtained from [`string_alloc`]. On detected corruption,
/// logs and leaks rather than risking a bad free.
pub fn string_free(ptr: NonNull<u8>, caller_site: i32) {
    if !config().debug_mem() {
        // SAFETY: a non-debug buffer carries no header — this is the raw
        // host_zalloc pointer.
        unsafe { host_free(ptr) };
        return;
    }

    // SAFETY: a debug-mode buffer always has a 12-byte header immediately
    // before the payload.
    let header = unsafe { ptr.as_ptr().sub(HEADER_BYTES as usize) };
    let magic = unsafe { read_i32(header, 0) };
    if magic != MAGIC_STR {
        tracing::error!(caller_site, magic, expected = MAGIC_STR, "string_free: header corruption");
        return;
    }
    let header_len = unsafe { read_i32(header, 4) };
    let hdr_site = unsafe { read_i32(header, 8) };
    if !site_in_range(hdr_site) {
        tracing::error!(caller_site, hdr_site, "string_free: corrupted alloc site in header");
        return;
    }
    let trailer = unsafe { read_i32(header, (header_len - 4) as usize) };
    if trailer != MAGIC_END {
        tracing::error!(caller_site, trailer, expected = MAGIC_END, "string_free: trailer corruption");
        return;
    }
    unsafe {
        write_i32(header, (header_len - 4) as usize, POISON);
    }
    STRING_STATS.on_free(hdr_site as usize);
    // SAFETY: header is the pointer originally returned by host_zalloc.
    unsafe { host_free(NonNull::new(header).unwrap()) };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_roundtrip_is_zeroed() {
        let p = string_alloc(16, 3).expect("alloc");
        unsafe {
            for i in 0..16 {
                assert_eq!(*p.as_ptr().add(i), 0);
            }
        }
        string_free(p, 3);
    }

    #[test]
    fn nonpositive_len_uses_default() {
        let p = string_alloc(0, 1).expect("alloc");
        string_free(p, 1);
        let p2 = string_alloc(-5, 1).expect("alloc");
        string_free(p2, 1);
    }
}
