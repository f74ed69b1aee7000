//! Error types for the few call paths that return a typed `Result` instead of
//! a nullable pointer.
//!
//! Corruption is deliberately *not* one of these variants: per the
//! leak-on-corruption policy the allocators log and return `None`/`()`
//! rather than propagate an error (see module docs on `block`, `small`,
//! `string_alloc`).

use thiserror::Error;

/// Errors surfaced by the allocator's typed entry points.
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum BrickError {
    /// `order_of` could not place `len` bytes in `[0, MAX_ORDER]`, or `len`
    /// was not positive.
    #[error("cannot size allocation of {len} bytes (order would exceed max order {max_order})")]
    BadSize { len: i64, max_order: usize },

    /// A reservation request could not fully raise the pool to its target;
    /// buffers placed before the failure remain in the pool.
    #[error("reservation could not fully satisfy the requested target (host allocator out of memory)")]
    OutOfMemory,
}
