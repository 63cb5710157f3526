//! Dtype-agnostic copy filter with multi-sink fan-out.

use crate::support::{poll_input, submit_retrying, Polled};
use sigflow::{
    worker_ensure, worker_error, BehaviorOp, ConstraintOp, Ec, FilterConfig, FilterCore,
    FilterOps, InputConstraint, OutputBehavior, PortMask, PropValue, RingConfig, SignalProperty,
    WorkerFilter,
};
use std::sync::Arc;

/// Configuration of a [`Passthrough`] filter.
#[derive(Debug, Clone)]
pub struct PassthroughConfig {
    pub name: String,
    pub ring: RingConfig,
    /// Sink slots; more than one makes this a tee.
    pub max_sinks: usize,
    pub timeout_us: u64,
}

impl PassthroughConfig {
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

/// Copies every batch from its input to each connected sink unchanged.
///
/// Copies at the storage-word level, so one `Passthrough` works for any
/// dtype; it only demands that its sinks carry the same dtype as its input.
/// With `max_sinks > 1` it is the framework's tee.
pub struct Passthrough {
    inner: WorkerFilter,
}

impl Passthrough {
    pub fn new(config: PassthroughConfig) -> Result<Self, Ec> {
        let capacity = config.ring.batch_capacity();
        let dtype = config.ring.dtype;
        let filter_config = FilterConfig::new(config.name.clone(), config.ring)
            .with_inputs(1)
            .with_max_sinks(config.max_sinks)
            .with_timeout_us(config.timeout_us);

        let worker = move |core: &FilterCore| {
            while core.is_running() {
                let input = core.input(0).map_err(|code| worker_error!(code))?;
                let tail = match poll_input(core, input).map_err(|code| worker_error!(code))? {
                    Polled::Batch(tail) => tail,
                    Polled::Idle => continue,
                    Polled::Complete => {
                        core.forward_complete();
                        return Ok(());
                    }
                    Polled::Shutdown => return Ok(()),
                };

                let (len, t_ns, period_ns, batch_id) =
                    (tail.len, tail.t_ns, tail.period_ns, tail.batch_id);
                let words = tail.words().to_vec();
                tail.release().map_err(|code| worker_error!(code))?;

                for sink in core.sinks() {
                    worker_ensure!(
                        sink.dtype() == dtype,
                        Ec::DtypeMismatch,
                        "sink carries {}, input carries {}",
                        sink.dtype(),
                        dtype
                    );
                    worker_ensure!(
                        sink.batch_capacity() >= len,
                        Ec::CapacityMismatch,
                        "sink batch capacity {} < {}",
                        sink.batch_capacity(),
                        len
                    );

                    {
                        let mut head = sink.get_head();
                        head.words_mut()[..len].copy_from_slice(&words);
                        head.len = len;
                        head.t_ns = t_ns;
                        head.period_ns = period_ns;
                        head.batch_id = batch_id;
                        head.ec = Ec::Ok;
                    }
                    match submit_retrying(core, &sink) {
                        Ok(()) => {}
                        Err(code) if code.is_shutdown() => return Ok(()),
                        Err(code) => return Err(worker_error!(code, "submit to sink failed")),
                    }
                }

                core.metrics().record_batch(len);
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
        core.declare_constraint(InputConstraint {
            property: SignalProperty::MaxBatchCapacity,
            op: ConstraintOp::Lte(PropValue::U32(capacity as u32)),
            input_mask: PortMask::ALL,
        })?;
        for property in SignalProperty::ALL {
            core.declare_behavior(OutputBehavior {
                property,
                op: BehaviorOp::Preserve(0),
                output_mask: PortMask::ALL,
            })?;
        }

        Ok(Self { inner })
    }
}

impl FilterOps for Passthrough {
    fn core(&self) -> &Arc<FilterCore> {
        self.inner.core()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sigflow::DType;

    #[test]
    fn test_fan_out_copies_to_both_sinks() {
        let ring = RingConfig::new(DType::U32, 3, 2);
        let tee = Passthrough::new(
            PassthroughConfig::new("tee", ring).with_max_sinks(2).with_timeout_us(5_000),
        )
        .unwrap();

        let a = sigflow::BatchRing::new(ring).unwrap();
        let b = sigflow::BatchRing::new(ring).unwrap();
        tee.sink_connect(0, Arc::new(a)).unwrap();
        tee.sink_connect(1, Arc::new(b)).unwrap();

        let input = tee.core().input(0).unwrap();
        {
            let mut head = input.get_head();
            head.write_samples::<u32>(&[1, 2, 3, 4]).unwrap();
            head.batch_id = 9;
        }
        input.submit(0).unwrap();
        {
            let mut head = input.get_head();
            head.ec = Ec::Complete;
            head.len = 0;
        }
        input.submit(0).unwrap();

        tee.start().unwrap();
        let sink_a = tee.core().sink(0).unwrap();
        let sink_b = tee.core().sink(1).unwrap();

        let batch_a = sink_a.get_tail(0).unwrap();
        assert_eq!(batch_a.samples::<u32>().unwrap(), &[1, 2, 3, 4]);
        assert_eq!(batch_a.batch_id, 9);
        batch_a.release().unwrap();
        let complete_a = sink_a.get_tail(0).unwrap();
        assert!(complete_a.is_complete());
        complete_a.release().unwrap();

        let batch_b = sink_b.get_tail(0).unwrap();
        assert_eq!(batch_b.samples::<u32>().unwrap(), &[1, 2, 3, 4]);
        batch_b.release().unwrap();

        tee.stop().unwrap();
        assert_eq!(tee.health(), sigflow::Health::Healthy);
    }
}
