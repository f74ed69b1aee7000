//! End-to-end scenarios exercising the public surface together, the way a
//! caller would rather than unit-by-unit.

use std::sync::Arc;
use std::time::Duration;

use brickmem::{
    block_alloc, block_free, limit, limit_reset, mem_alloc, mem_free, mem_reserve, statistics,
    Limiter, Reservation,
};

fn stats_mod() {
    let dump = statistics();
    assert!(dump.contains("page allocation"));
}

#[test]
fn s1_small_roundtrip_debug() {
    stats_mod();
    let site = 4200 + 1; // arbitrary distinctive site
    let p = mem_alloc(128, site).expect("alloc should succeed");
    unsafe {
        std::ptr::write_bytes(p.as_ptr(), 0xCD, 128);
    }
    mem_free(p, site);
    // A clean alloc/free pair leaves nothing to assert beyond "didn't panic
    // or log corruption" — stats.rs has no public per-site accessor outside
    // the crate, so this is exercised at the black-box level here.
}

#[test]
fn s2_corruption_is_detected_and_leaked() {
    let site = 4300 + 7;
    let p = mem_alloc(64, site).expect("alloc should succeed");
    unsafe {
        // stomp the trailer guard
        std::ptr::write_bytes(p.as_ptr().add(64), 0, 4);
    }
    // mem_free should log an error and return without freeing; we can't
    // observe the leak directly, but we can confirm it doesn't panic and
    // that a subsequent unrelated allocation still works.
    mem_free(p, site);
    let q = mem_alloc(64, site).expect("alloc should still succeed after a leaked corruption");
    mem_free(q, site);
}

#[test]
fn s3_block_pool_lifo_reuse() {
    let len = 3 * brickmem::constants::PAGE_SIZE as i32;
    let a = block_alloc(0, len, 1).expect("alloc a");
    block_free(a, len, 1);
    let b = block_alloc(0, len, 1).expect("alloc b");
    // LIFO: the freelist should hand back the same buffer.
    assert_eq!(a, b);
    block_free(b, len, 1);
}

#[test]
fn s4_reservation_then_drain() {
    // Order 8 is unlikely to collide with other block-allocator tests
    // running concurrently in this binary.
    let order = 8usize;
    let mut req = Reservation::new();
    req.amount[order] = 5;
    mem_reserve(&req).expect("reserve");

    let mut drain = Reservation::new();
    drain.amount[order] = -3;
    mem_reserve(&drain).expect("partial drain");
}

#[test]
fn s5_limiter_enforces_a_rate_cap() {
    let lim = Limiter::new(None)
        .with_max_amount_rate(1000)
        .with_min_window_ms(1000);

    let mut saw_delay = false;
    for _ in 0..3 {
        if limit(&lim, 400) > 0 {
            saw_delay = true;
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    assert!(saw_delay, "repeated bursts against a tight cap should trip a delay at least once");
    limit_reset(&lim);
}

#[test]
fn s6_hierarchical_limiter_honors_the_tighter_parent() {
    let parent = Arc::new(Limiter::new(None).with_max_amount_rate(500));
    let child = Limiter::new(Some(parent.clone())).with_max_amount_rate(1000);

    for _ in 0..3 {
        limit(&child, 400);
        std::thread::sleep(Duration::from_millis(100));
    }
    // The chain's delay is driven by whichever node is tightest; here
    // that's the parent, whose 500 byte/s cap is exceeded well before the
    // child's 1000 byte/s one.
    let delay = limit(&child, 400);
    assert!(delay > 0, "tighter parent cap should force a positive delay");
}
