//! Debug assertion macros for ring buffer invariants.
//!
//! Active only in debug builds; release builds carry zero overhead.

/// Assert that the occupancy derived from free-running indices stays within
/// `ring_len - 1` (one slot is always reserved to distinguish empty from
/// full).
macro_rules! debug_assert_occupancy_bounded {
    ($head:expr, $tail:expr, $ring_len:expr) => {
        debug_assert!(
            ($head).wrapping_sub($tail) as usize <= $ring_len - 1,
            "occupancy {} exceeds ring bound {}",
            ($head).wrapping_sub($tail),
            $ring_len - 1
        )
    };
}

/// Assert that a free-running index only increases.
macro_rules! debug_assert_monotonic {
    ($name:literal, $old:expr, $new:expr) => {
        debug_assert!(
            $new >= $old,
            "{} decreased from {} to {}",
            $name,
            $old,
            $new
        )
    };
}

/// Assert that the consumer never advances past the producer.
macro_rules! debug_assert_tail_not_past_head {
    ($new_tail:expr, $head:expr) => {
        debug_assert!(
            $new_tail <= $head,
            "advancing tail {} beyond head {}",
            $new_tail,
            $head
        )
    };
}

/// Assert that a batch's valid-sample count fits its capacity.
macro_rules! debug_assert_len_fits {
    ($len:expr, $capacity:expr) => {
        debug_assert!(
            $len <= $capacity,
            "batch len {} exceeds capacity {}",
            $len,
            $capacity
        )
    };
}

pub(crate) use debug_assert_len_fits;
pub(crate) use debug_assert_monotonic;
pub(crate) use debug_assert_occupancy_bounded;
pub(crate) use debug_assert_tail_not_past_head;
