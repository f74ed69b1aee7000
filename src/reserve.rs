//! C7 — the reservation driver: bulk-adjusts the freelist pool's per-order
//! capacity, topping it up (or draining the excess) immediately rather than
//! waiting for allocation traffic to do it organically. Runs high-order
//! first, since those are the pages most worth having ready.

use crate::block::BRICK;
use crate::constants::MAX_ORDER;
use crate::error::BrickError;
use crate::page::PageSource;

/// A per-order delta to apply to the pool's capacity. Positive entries grow
/// the pool (and pre-populate it); negative entries shrink it, draining and
/// freeing the surplus immediately.
pub struct Reservation {
    pub amount: [i64; MAX_ORDER + 1],
}

impl Reservation {
    pub fn new() -> Self {
        Self { amount: [0; MAX_ORDER + 1] }
    }
}

impl Default for Reservation {
    fn default() -> Self {
        Self::new()
    }
}

/// Applies `req` to the pool, order by order from [`MAX_ORDER`] down to 0.
/// Allocation failures while topping up are logged and rolled into the
/// returned error, but every order is still processed.
pub fn mem_reserve(req: &Reservation) -> Result<(), BrickError> {
    let mut out_of_memory = false;

    for order in (0..=MAX_ORDER).rev() {
        let delta = req.amount[order];
        let new_max = BRICK.pool().add_max(order, delta);
        tracing::info!(order, delta, new_max, "preallocating");

        let surplus = new_max - BRICK.pool().count(order);
        if surplus >= 0 {
            for _ in 0..surplus {
                match BRICK.page_source().raw_alloc(order) {
                    Some(ptr) => BRICK.pool().put(ptr, order),
                    None => out_of_memory = true,
                }
            }
        } else {
            for _ in 0..(-surplus) {
                if let Some(ptr) = BRICK.pool().get(order) {
                    // SAFETY: buffers in the pool were obtained from the
                    // page source at this same order.
                    unsafe { BRICK.page_source().raw_free(ptr, order) };
                }
            }
        }
    }

    if out_of_memory {
        Err(BrickError::OutOfMemory)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_then_drain_roundtrip() {
        // Use a high order unlikely to be touched by other tests sharing
        // the process-wide BRICK pool, and assert deltas rather than
        // absolute counts to stay robust under parallel test execution.
        let order = 6;
        let before = BRICK.pool().count(order);

        let mut req = Reservation::new();
        req.amount[order] = 4;
        mem_reserve(&req).expect("reserve");
        assert_eq!(BRICK.pool().count(order), before + 4);

        let mut drain = Reservation::new();
        drain.amount[order] = -4;
        mem_reserve(&drain).expect("drain");
        assert_eq!(BRICK.pool().count(order), before);
    }
}
