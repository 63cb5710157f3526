//! Batch metadata.

use crate::error::Ec;

/// Metadata for one fixed-capacity run of samples.
///
/// The sample storage itself is owned by the ring buffer; workers reach it
/// through the [`HeadRef`](crate::HeadRef) / [`TailRef`](crate::TailRef)
/// guard accessors. A `Batch` value lives in a ring slot and is overwritten
/// in place by the producer once the consumer has released the slot.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    /// Number of valid samples (0 ≤ `len` ≤ batch capacity).
    pub len: usize,
    /// Timestamp of the first sample, nanoseconds in a producer-chosen
    /// monotonic domain.
    pub t_ns: u64,
    /// Sampling period in nanoseconds. 0 means irregular / event stream.
    pub period_ns: u64,
    /// Monotonically increasing producer counter.
    pub batch_id: u64,
    /// Status code: [`Ec::Ok`] for data, [`Ec::Complete`] for end-of-stream,
    /// or any error code.
    pub ec: Ec,
}

impl Batch {
    /// `true` if this batch is the end-of-stream sentinel.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.ec == Ec::Complete
    }

    /// Resets the metadata for reuse by a producer.
    pub fn reset(&mut self) {
        *self = Batch::default();
    }
}
