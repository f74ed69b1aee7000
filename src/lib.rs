//! # `brickmem` — a tiered block/small/string allocator with debug guards
//! and a hierarchical rate limiter
//!
//! This crate wraps the host's page-granularity memory primitive
//! (`mmap`/`VirtualAlloc`) with an order-indexed freelist pool, a guarded
//! small-object allocator, a guarded string allocator, and a reservation
//! driver that can pre-warm or drain the pool in bulk. A companion
//! hierarchical rate limiter tracks byte/op rates over a decaying window
//! across a parent chain, for callers that need to throttle I/O rather than
//! bound memory.
//!
//! ## Guard policy
//!
//! In debug builds (`debug-mem` feature, on by default) every allocation
//! carries a magic-number header and, for block/small allocations longer
//! than a page, a trailing magic int as well. A mismatch on free is treated
//! as corruption: the allocator logs an error and **leaks** rather than
//! risk a double-free or a free of a foreign pointer. This is deliberate —
//! see the `block`, `small`, and `string_alloc` module docs.
//!
//! ## Example
//!
//! ```
//! use brickmem::{mem_alloc, mem_free};
//!
//! let buf = mem_alloc(64, 1).expect("allocation failed");
//! unsafe { std::ptr::write_bytes(buf.as_ptr(), 0, 64) };
//! mem_free(buf, 1);
//! ```

#![warn(missing_docs)]

pub mod block;
pub mod config;
pub mod constants;
pub mod error;
mod guard;
pub mod host;
pub mod io;
pub mod limiter;
pub mod order;
pub mod page;
pub mod pool;
pub mod reserve;
pub mod small;
pub mod stats;
pub mod string_alloc;

pub use block::{block_alloc, block_free};
pub use config::{config, init_memavail, BrickConfig};
pub use error::BrickError;
pub use io::{io_map, Page};
pub use limiter::{limit, limit_reset, limit_sleep, Limiter};
pub use order::order_of;
pub use reserve::{mem_reserve, Reservation};
pub use small::{mem_alloc, mem_free};
pub use string_alloc::{string_alloc, string_free};

/// Renders a human-readable accounting dump across every tracked order and
/// call site, including the process-wide freelist pool's per-order
/// occupancy. See [`stats::statistics`].
pub fn statistics() -> String {
    stats::statistics(block::BRICK.pool())
}
