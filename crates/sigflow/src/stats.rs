//! Counters and their plain snapshot types.
//!
//! Live counters are relaxed atomics so producer, consumer, and observers
//! never contend; snapshots are plain structs safe to move across threads.

use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time view of a ring buffer's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RingStats {
    /// Batches successfully published by the producer.
    pub total_batches: u64,
    /// Batches dropped at the head by `DropHead` overflow.
    pub dropped_batches: u64,
    /// Unconsumed batches dropped at the tail by `DropTail` overflow.
    pub dropped_by_producer: u64,
    /// Cumulative nanoseconds the producer spent blocked in `submit`.
    pub blocked_ns: u64,
    /// Batches currently buffered.
    pub occupancy: usize,
}

/// Point-in-time view of a filter's framework metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterStats {
    /// Batches the worker has processed.
    pub n_batches: u64,
    /// Samples the worker has processed.
    pub samples_processed: u64,
}

/// Live framework metrics embedded in a filter core.
#[derive(Debug, Default)]
pub struct FilterMetrics {
    n_batches: AtomicU64,
    samples_processed: AtomicU64,
}

impl FilterMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one processed batch of `samples` samples.
    #[inline]
    pub fn record_batch(&self, samples: usize) {
        self.n_batches.fetch_add(1, Ordering::Relaxed);
        self.samples_processed.fetch_add(samples as u64, Ordering::Relaxed);
    }

    /// Clears both counters. Used when a filter restarts.
    pub fn reset(&self) {
        self.n_batches.store(0, Ordering::Relaxed);
        self.samples_processed.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> FilterStats {
        FilterStats {
            n_batches: self.n_batches.load(Ordering::Relaxed),
            samples_processed: self.samples_processed.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_metrics_accumulate() {
        let metrics = FilterMetrics::new();
        metrics.record_batch(8);
        metrics.record_batch(8);
        metrics.record_batch(4);
        let snap = metrics.snapshot();
        assert_eq!(snap.n_batches, 3);
        assert_eq!(snap.samples_processed, 20);

        metrics.reset();
        assert_eq!(metrics.snapshot(), FilterStats::default());
    }
}
