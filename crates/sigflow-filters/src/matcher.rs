//! Re-batching filter.

use crate::support::{poll_input, submit_retrying, Polled};
use sigflow::{
    worker_ensure, worker_error, BatchRing, BehaviorOp, ConstraintOp, Ec, FilterConfig,
    FilterCore, FilterOps, InputConstraint, OutputBehavior, PortMask, PropValue, RingConfig,
    SignalProperty, WorkerError, WorkerFilter,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Configuration of a [`BatchMatcher`].
#[derive(Debug, Clone)]
pub struct MatcherConfig {
    pub name: String,
    /// Input ring configuration; output batch size comes from the first
    /// connected sink.
    pub ring: RingConfig,
    pub max_sinks: usize,
    pub timeout_us: u64,
}

impl MatcherConfig {
    pub fn new(name: impl Into<String>, ring: RingConfig) -> Self {
        Self { name: name.into(), ring, max_sinks: 1, timeout_us: 10_000 }
    }

    pub fn with_max_sinks(mut self, max_sinks: usize) -> Self {
        self.max_sinks = max_sinks;
        self
    }

    pub fn with_timeout_us(mut self, timeout_us: u64) -> Self {
        self.timeout_us = timeout_us;
        self
    }
}

/// Regroups a stream into batches of its sinks' capacity.
///
/// The output batch size is recorded when the first sink is connected (the
/// `sink_connect` hook); later sinks must carry the same capacity. Sample
/// timing is preserved: each output batch's `t_ns` is derived from the
/// position of its first sample in the input stream. A COMPLETE sentinel
/// flushes any partial batch before being forwarded.
pub struct BatchMatcher {
    inner: WorkerFilter,
    /// Output batch capacity fixed by the first sink connect; 0 = unset.
    out_capacity: Arc<AtomicUsize>,
}

impl BatchMatcher {
    pub fn new(config: MatcherConfig) -> Result<Self, Ec> {
        let filter_config = FilterConfig::new(config.name.clone(), config.ring)
            .with_inputs(1)
            .with_max_sinks(config.max_sinks)
            .with_timeout_us(config.timeout_us);

        let out_capacity = Arc::new(AtomicUsize::new(0));
        let worker_capacity = Arc::clone(&out_capacity);

        let mut pending: Vec<u32> = Vec::new();
        let mut pending_t_ns = 0u64;
        let mut pending_period_ns = 0u64;
        let mut out_id = 0u64;

        let worker = move |core: &FilterCore| {
            while core.is_running() {
                let target = worker_capacity.load(Ordering::Acquire);
                worker_ensure!(target > 0, Ec::NoSink, "no sink fixed the output batch size");

                let input = core.input(0).map_err(|code| worker_error!(code))?;
                let tail = match poll_input(core, input).map_err(|code| worker_error!(code))? {
                    Polled::Batch(tail) => tail,
                    Polled::Idle => continue,
                    Polled::Complete => {
                        // Flush the partial remainder before the sentinel.
                        if !pending.is_empty() {
                            match emit(core, &pending, pending_t_ns, pending_period_ns, out_id) {
                                Ok(()) => {}
                                Err(error) if error.code.is_shutdown() => return Ok(()),
                                Err(error) => return Err(error),
                            }
                            pending.clear();
                        }
                        core.forward_complete();
                        return Ok(());
                    }
                    Polled::Shutdown => return Ok(()),
                };

                if pending.is_empty() {
                    pending_t_ns = tail.t_ns;
                    pending_period_ns = tail.period_ns;
                }
                let samples_in = tail.len;
                pending.extend_from_slice(tail.words());
                tail.release().map_err(|code| worker_error!(code))?;

                while pending.len() >= target {
                    match emit(core, &pending[..target], pending_t_ns, pending_period_ns, out_id) {
                        Ok(()) => {}
                        Err(error) if error.code.is_shutdown() => return Ok(()),
                        Err(error) => return Err(error),
                    }
                    pending.drain(..target);
                    pending_t_ns += target as u64 * pending_period_ns;
                    out_id += 1;
                }

                core.metrics().record_batch(samples_in);
            }
            Ok(())
        };

        let inner = WorkerFilter::new(filter_config, worker)?;

        let core = inner.core();
        core.declare_constraint(InputConstraint {
            property: SignalProperty::DataType,
            op: ConstraintOp::Exists,
            input_mask: PortMask::ALL,
        })?;
        core.declare_behavior(OutputBehavior {
            property: SignalProperty::DataType,
            op: BehaviorOp::Preserve(0),
            output_mask: PortMask::ALL,
        })?;
        core.declare_behavior(OutputBehavior {
            property: SignalProperty::SamplePeriodNs,
            op: BehaviorOp::Preserve(0),
            output_mask: PortMask::ALL,
        })?;

        Ok(Self { inner, out_capacity })
    }

    /// Output batch capacity, once a sink has fixed it.
    pub fn output_capacity(&self) -> Option<usize> {
        match self.out_capacity.load(Ordering::Acquire) {
            0 => None,
            capacity => Some(capacity),
        }
    }
}

/// Writes `words` to every sink and publishes.
fn emit(
    core: &FilterCore,
    words: &[u32],
    t_ns: u64,
    period_ns: u64,
    batch_id: u64,
) -> Result<(), WorkerError> {
    for sink in core.sinks() {
        worker_ensure!(
            sink.batch_capacity() >= words.len(),
            Ec::CapacityMismatch,
            "sink batch capacity {} < {}",
            sink.batch_capacity(),
            words.len()
        );
        {
            let mut head = sink.get_head();
            head.words_mut()[..words.len()].copy_from_slice(words);
            head.len = words.len();
            head.t_ns = t_ns;
            head.period_ns = period_ns;
            head.batch_id = batch_id;
            head.ec = Ec::Ok;
        }
        submit_retrying(core, &sink).map_err(|code| worker_error!(code))?;
    }
    Ok(())
}

impl FilterOps for BatchMatcher {
    fn core(&self) -> &Arc<FilterCore> {
        self.inner.core()
    }

    /// Records the output batch size from the first connected sink; later
    /// sinks must match it.
    fn sink_connect(&self, sink_idx: usize, ring: Arc<BatchRing>) -> Result<(), Ec> {
        let recorded = self.out_capacity.load(Ordering::Acquire);
        if recorded != 0 && ring.batch_capacity() != recorded {
            return Err(Ec::CapacityMismatch);
        }

        let capacity = ring.batch_capacity();
        self.core().connect_sink(sink_idx, ring)?;

        if recorded == 0 {
            self.out_capacity.store(capacity, Ordering::Release);
            let value = PropValue::U32(capacity as u32);
            let _ = self.core().declare_behavior(OutputBehavior {
                property: SignalProperty::MinBatchCapacity,
                op: BehaviorOp::Set(value),
                output_mask: PortMask::ALL,
            });
            let _ = self.core().declare_behavior(OutputBehavior {
                property: SignalProperty::MaxBatchCapacity,
                op: BehaviorOp::Set(value),
                output_mask: PortMask::ALL,
            });
            log::debug!(
                "matcher '{}': output batch size fixed at {}",
                self.core().name(),
                capacity
            );
        }
        Ok(())
    }
}
