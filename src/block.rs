//! C3 — the block allocator: the front door for `len >= PAGE_SIZE`
//! allocations, and the delegate target for small allocations that grow
//! past a page. Installs/validates the debug header+trailer guard and
//! routes through the freelist pool before falling back to the raw page
//! source.

use std::ptr::NonNull;
use std::sync::atomic::Ordering;

use crate::config::config;
use crate::constants::{MAGIC_BEND, MAGIC_BLOCK, PAGE_SIZE, POISON};
use crate::guard::{read_i32, write_i32};
use crate::order::{clamp_site, order_of, site_in_range};
use crate::page::{PageSource, SyscallPageSource};
use crate::pool::FreelistPool;
use crate::stats::{order_stats, BLOCK_STATS};

/// Owns the pool and the raw page source shared by every block (and,
/// through it, small) allocation.
pub struct Brick {
    pool: FreelistPool,
    page_source: SyscallPageSource,
}

impl Brick {
    const fn new() -> Self {
        Self {
            pool: FreelistPool::new(),
            page_source: SyscallPageSource,
        }
    }

    pub fn pool(&self) -> &FreelistPool {
        &self.pool
    }

    pub fn page_source(&self) -> &SyscallPageSource {
        &self.page_source
    }

    /// `len <= PAGE_SIZE` adds no debug slack (order 0 allocations carry no
    /// guard — the payload *is* the whole buffer); longer allocations
    /// reserve a leading and trailing page for the header/trailer.
    fn debug_plus(len: i64) -> i64 {
        if config().debug_mem() && len > PAGE_SIZE as i64 {
            2 * PAGE_SIZE as i64
        } else {
            0
        }
    }

    pub fn block_alloc(&self, pos: i64, len: i32, site: i32) -> Option<NonNull<u8>> {
        if pos < 0 {
            tracing::error!(pos, "block_alloc: negative pos rejected");
            return None;
        }
        let len = len as i64;
        let plus = Self::debug_plus(len);
        let order = match order_of(len + plus) {
            Ok(o) => o,
            Err(_) => {
                tracing::error!(len, "block_alloc: bad size");
                return None;
            }
        };

        let debug = config().debug_mem();
        if debug {
            let stats = order_stats();
            stats.op_count[order].fetch_add(1, Ordering::Relaxed);
            let count = stats.alloc_count[order].fetch_add(1, Ordering::Relaxed) + 1;
            stats.raise_alloc_max(order, count);
            stats.set_alloc_line(order, clamp_site(site));

            if config().mem_prealloc()
                && order > 0
                && count <= config().allow_dynamic_raise()
                && count > self.pool.max(order)
            {
                self.pool.raise_max_if_below(order, count);
            }
        }

        let raw = if config().mem_prealloc() {
            self.pool.get(order).or_else(|| self.page_source.raw_alloc(order))
        } else {
            self.page_source.raw_alloc(order)
        }?;

        if debug && order > 0 {
            let site = clamp_site(site);
            // SAFETY: raw is a freshly obtained buffer of PAGE_SIZE << order
            // bytes, large enough for a leading header page and trailing
            // trailer int past `len`.
            unsafe {
                write_i32(raw.as_ptr(), 0, MAGIC_BLOCK);
                write_i32(raw.as_ptr(), 4, site as i32);
                write_i32(raw.as_ptr(), 8, len as i32);
                let payload = raw.as_ptr().add(PAGE_SIZE);
                write_i32(payload, len as usize, MAGIC_BEND);
            }
            BLOCK_STATS.on_alloc(site, len);
            // SAFETY: see above.
            return NonNull::new(unsafe { raw.as_ptr().add(PAGE_SIZE) });
        }

        Some(raw)
    }

    pub fn block_free(&self, ptr: NonNull<u8>, len: i32, site: i32) {
        let len = len as i64;
        let plus = Self::debug_plus(len);
        let order = match order_of(len + plus) {
            Ok(o) => o,
            Err(_) => return,
        };

        let debug = config().debug_mem();
        let mut raw = ptr;
        if debug && order > 0 {
            // SAFETY: a buffer returned by block_alloc at order > 0 has a
            // header page immediately preceding the payload.
            let header = unsafe { ptr.as_ptr().sub(PAGE_SIZE) };
            let (magic, hdr_site, hdr_len, trailer) = unsafe {
                (
                    read_i32(header, 0),
                    read_i32(header, 4),
                    read_i32(header, 8),
                    read_i32(ptr.as_ptr(), len as usize),
                )
            };
            if magic != MAGIC_BLOCK {
                tracing::error!(site, magic, expected = MAGIC_BLOCK, "block_free: header corruption");
                return;
            }
            if !site_in_range(hdr_site) {
                tracing::error!(site, hdr_site, "block_free: corrupted alloc site in header");
                return;
            }
            let hdr_site = hdr_site as usize;
            if hdr_len != len as i32 {
                tracing::error!(site, len, hdr_len, "block_free: length mismatch");
                return;
            }
            if trailer != MAGIC_BEND {
                tracing::error!(site, trailer, expected = MAGIC_BEND, "block_free: trailer corruption");
                return;
            }
            unsafe {
                write_i32(header, 0, POISON);
                write_i32(ptr.as_ptr(), len as usize, POISON);
            }
            BLOCK_STATS.on_free(hdr_site);
            raw = NonNull::new(header).unwrap();
        }

        if config().mem_prealloc()
            && order > 0
            && config().allow_freelist()
            && self.pool.count(order) <= self.pool.max(order)
        {
            self.pool.put(raw, order);
        } else {
            // SAFETY: raw was obtained from the page source at this order
            // (directly, or via the pool which only ever holds such
            // buffers).
            unsafe { self.page_source.raw_free(raw, order) };
        }

        if debug {
            order_stats().alloc_count[order].fetch_sub(1, Ordering::Relaxed);
        }
    }
}

/// The process-wide block allocator instance.
pub static BRICK: Brick = Brick::new();

/// `block_alloc(pos, len, site) -> payload?` (see module docs and
/// [`Brick::block_alloc`]).
pub fn block_alloc(pos: i64, len: i32, site: i32) -> Option<NonNull<u8>> {
    BRICK.block_alloc(pos, len, site)
}

/// `block_free(ptr, len, caller_site)` (see [`Brick::block_free`]).
pub fn block_free(ptr: NonNull<u8>, len: i32, caller_site: i32) {
    BRICK.block_free(ptr, len, caller_site)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_block_has_no_guard() {
        // order 0: payload is the whole buffer, no header/trailer installed.
        let p = block_alloc(0, 128, 1).expect("alloc");
        unsafe {
            std::ptr::write_bytes(p.as_ptr(), 0x11, 128);
        }
        block_free(p, 128, 1);
    }

    #[test]
    fn large_block_roundtrip() {
        let len = 3 * PAGE_SIZE as i32;
        let p = block_alloc(0, len, 77).expect("alloc");
        unsafe {
            std::ptr::write_bytes(p.as_ptr(), 0x22, len as usize);
        }
        block_free(p, len, 77);
    }

    #[test]
    fn negative_pos_rejected() {
        assert!(block_alloc(-1, 128, 1).is_none());
    }
}
