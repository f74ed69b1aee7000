//! Fixed layout constants shared by the block/small/string allocators.
//!
//! Magic values are taken verbatim from the brick allocator this crate is
//! modeled on, so that a core dump from either implementation is recognizable
//! against the same four bytes.

/// Page granularity the block allocator deals orders in.
pub const PAGE_SIZE: usize = 4096;

/// Highest order the block allocator will hand out: `PAGE_SIZE << MAX_ORDER`
/// bytes is the largest single allocation (4 MiB at the default page size).
pub const MAX_ORDER: usize = 10;

/// Number of per-call-site accounting slots. Site tags are clamped into
/// `[0, DEBUG_SLOTS)` before indexing any counter array.
pub const DEBUG_SLOTS: usize = 10_000;

/// Default length used by `string_alloc` when the caller passes `len <= 0`.
pub const BRICK_STRING_LEN: i32 = 1024;

/// Extra slack allocated past the requested length in debug builds, to give
/// an overrun a chance to land inside owned memory instead of faulting.
pub const DEBUG_STRING_SLACK: usize = 1024;

/// Cap applied to limiter rates, mirroring the source's 32-bit `int` rate
/// fields even though this crate stores them as `i64`.
pub const RATE_CAP: i64 = i32::MAX as i64;

/// Poison value written over a freed guard's magic field.
pub const POISON: i32 = -1; // 0xffffffff as i32

pub const MAGIC_BLOCK: i32 = 0x8B39_5D7Bu32 as i32;
pub const MAGIC_BEND: i32 = 0x8B39_5D7Cu32 as i32;
pub const MAGIC_MEM: i32 = 0x8B39_5D7Du32 as i32;
pub const MAGIC_END: i32 = 0x8B39_5D7Eu32 as i32;
pub const MAGIC_STR: i32 = 0x8B39_5D7Fu32 as i32;
