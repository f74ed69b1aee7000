//! C6 — per-call-site and per-order debug accounting.
//!
//! Every counter here is atomic so the hot allocation paths never take a
//! lock to update them. Per-site tables are sized lazily (`OnceLock`) since
//! `DEBUG_SLOTS` entries of `AtomicI64` are too many to spell out as a const
//! array literal; this mirrors the lazily-initialized global singleton
//! pattern used for this crate's other process-wide state.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::OnceLock;

use crate::constants::{DEBUG_SLOTS, MAX_ORDER};
use crate::pool::FreelistPool;

fn new_site_table() -> Vec<AtomicI64> {
    (0..DEBUG_SLOTS).map(|_| AtomicI64::new(0)).collect()
}

/// Per-call-site alloc/free counters and the length of the last allocation
/// made at that site, for one allocation family (block, small, or string).
pub struct SiteStats {
    live: OnceLock<Vec<AtomicI64>>,
    freed: OnceLock<Vec<AtomicI64>>,
    last_len: OnceLock<Vec<AtomicI64>>,
}

impl SiteStats {
    const fn new() -> Self {
        Self {
            live: OnceLock::new(),
            freed: OnceLock::new(),
            last_len: OnceLock::new(),
        }
    }

    fn live(&self) -> &Vec<AtomicI64> {
        self.live.get_or_init(new_site_table)
    }

    fn freed(&self) -> &Vec<AtomicI64> {
        self.freed.get_or_init(new_site_table)
    }

    fn last_len(&self) -> &Vec<AtomicI64> {
        self.last_len.get_or_init(new_site_table)
    }

    /// Records a successful allocation at `site`, returning the live count
    /// after the increment (used by the dynamic-raise check).
    pub fn on_alloc(&self, site: usize, len: i64) -> i64 {
        self.last_len()[site].store(len, Ordering::Relaxed);
        self.live()[site].fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Records a successful free at `site`.
    pub fn on_free(&self, site: usize) {
        self.live()[site].fetch_sub(1, Ordering::Relaxed);
        self.freed()[site].fetch_add(1, Ordering::Relaxed);
    }

    pub fn live_at(&self, site: usize) -> i64 {
        self.live()[site].load(Ordering::Relaxed)
    }

    pub fn freed_at(&self, site: usize) -> i64 {
        self.freed()[site].load(Ordering::Relaxed)
    }

    pub fn last_len_at(&self, site: usize) -> i64 {
        self.last_len()[site].load(Ordering::Relaxed)
    }

    fn occupied_sites(&self) -> impl Iterator<Item = usize> + '_ {
        (0..DEBUG_SLOTS).filter(move |&s| self.live_at(s) != 0)
    }
}

/// Per-order operation/raw/alloc counters and the high-water mark of
/// concurrently live allocations at that order.
pub struct OrderStats {
    pub op_count: [AtomicI64; MAX_ORDER + 1],
    pub raw_count: [AtomicI64; MAX_ORDER + 1],
    pub alloc_count: [AtomicI64; MAX_ORDER + 1],
    alloc_max: [AtomicI64; MAX_ORDER + 1],
    alloc_line: [AtomicI64; MAX_ORDER + 1],
}

impl OrderStats {
    fn new() -> Self {
        Self {
            op_count: std::array::from_fn(|_| AtomicI64::new(0)),
            raw_count: std::array::from_fn(|_| AtomicI64::new(0)),
            alloc_count: std::array::from_fn(|_| AtomicI64::new(0)),
            alloc_max: std::array::from_fn(|_| AtomicI64::new(0)),
            alloc_line: std::array::from_fn(|_| AtomicI64::new(0)),
        }
    }

    /// Records the call site of the most recent allocation at `order`,
    /// mirroring the source's per-order `alloc_line` field.
    pub fn set_alloc_line(&self, order: usize, site: i32) {
        self.alloc_line[order].store(site as i64, Ordering::Relaxed);
    }

    pub fn alloc_line_at(&self, order: usize) -> i64 {
        self.alloc_line[order].load(Ordering::Relaxed)
    }

    /// Raises `alloc_max[order]` to `count` if `count` is higher, returning
    /// the resulting max.
    pub fn raise_alloc_max(&self, order: usize, count: i64) -> i64 {
        let mut cur = self.alloc_max[order].load(Ordering::Relaxed);
        while count > cur {
            match self.alloc_max[order].compare_exchange_weak(
                cur,
                count,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return count,
                Err(actual) => cur = actual,
            }
        }
        cur
    }

    pub fn alloc_max_at(&self, order: usize) -> i64 {
        self.alloc_max[order].load(Ordering::Relaxed)
    }
}

pub static BLOCK_STATS: SiteStats = SiteStats::new();
pub static MEM_STATS: SiteStats = SiteStats::new();
pub static STRING_STATS: SiteStats = SiteStats::new();

static ORDER_STATS: OnceLock<OrderStats> = OnceLock::new();

pub fn order_stats() -> &'static OrderStats {
    ORDER_STATS.get_or_init(OrderStats::new)
}

/// Renders a human-readable accounting dump, mirroring the field order of
/// the source's statistics emitter (including the `freelist_count = %4d /
/// %3d` per-order line). Formatting is this crate's own; only the set of
/// reported fields is part of the contract.
pub fn statistics(pool: &FreelistPool) -> String {
    use std::fmt::Write;
    let mut out = String::new();
    let order_stats = order_stats();

    writeln!(out, "======== page allocation:").ok();
    for order in 0..=MAX_ORDER {
        writeln!(
            out,
            "pages order = {:2} operations = {:9} raw_count = {:5} alloc_count = {:5} max_count = {:5} freelist_count = {:4} / {:3} last_site = {:5}",
            order,
            order_stats.op_count[order].load(Ordering::Relaxed),
            order_stats.raw_count[order].load(Ordering::Relaxed),
            order_stats.alloc_count[order].load(Ordering::Relaxed),
            order_stats.alloc_max_at(order),
            pool.count(order),
            pool.max(order),
            order_stats.alloc_line_at(order),
        )
        .ok();
    }

    for (label, table) in [
        ("block", &BLOCK_STATS),
        ("memory", &MEM_STATS),
        ("string", &STRING_STATS),
    ] {
        let mut total = 0i64;
        let mut places = 0i64;
        for site in table.occupied_sites().collect::<Vec<_>>() {
            let live = table.live_at(site);
            total += live;
            places += 1;
            writeln!(
                out,
                "site {:5}: {:6} allocated (last size = {:4}, freed = {:6})",
                site,
                live,
                table.last_len_at(site),
                table.freed_at(site),
            )
            .ok();
        }
        writeln!(out, "======== {total} {label} allocations in {places} places").ok();
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dynamic_max_only_rises() {
        let order_stats = OrderStats::new();
        assert_eq!(order_stats.raise_alloc_max(1, 5), 5);
        assert_eq!(order_stats.raise_alloc_max(1, 3), 5);
        assert_eq!(order_stats.raise_alloc_max(1, 9), 9);
    }
}
