//! Elementwise transform filter.

use crate::support::{poll_input, submit_retrying, Polled};
use sigflow::{
    worker_ensure, worker_error, BehaviorOp, ConstraintOp, Ec, FilterConfig, FilterCore,
    FilterOps, InputConstraint, OutputBehavior, PortMask, PropValue, RingConfig, Sample,
    SignalProperty, WorkerFilter,
};
use std::marker::PhantomData;
use std::sync::Arc;

/// Configuration of a [`Map`] filter.
#[derive(Debug, Clone)]
pub struct MapConfig {
    pub name: String,
    /// Input ring configuration; the dtype must match the sample type.
    pub ring: RingConfig,
    pub max_sinks: usize,
    pub timeout_us: u64,
}

impl MapConfig {
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

/// Applies a function to every sample, preserving batch timing metadata.
///
/// Requires upstream `DATA_TYPE == S` and batches that fit its input ring;
/// everything else is inherited unchanged by its sinks.
pub struct Map<S: Sample> {
    inner: WorkerFilter,
    _marker: PhantomData<S>,
}

impl<S: Sample> std::fmt::Debug for Map<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Map").finish()
    }
}

impl<S: Sample> Map<S> {
    pub fn new<F>(config: MapConfig, mut f: F) -> Result<Self, Ec>
    where
        F: FnMut(S) -> S + Send + 'static,
    {
        if config.ring.dtype != S::DTYPE {
            return Err(Ec::DtypeMismatch);
        }

        let capacity = config.ring.batch_capacity();
        let filter_config = FilterConfig::new(config.name.clone(), config.ring)
            .with_inputs(1)
            .with_max_sinks(config.max_sinks)
            .with_timeout_us(config.timeout_us);

        let mut scratch: Vec<S> = Vec::with_capacity(capacity);

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

                let (t_ns, period_ns, batch_id) = (tail.t_ns, tail.period_ns, tail.batch_id);
                let samples = tail.samples::<S>().map_err(|code| worker_error!(code))?;
                scratch.clear();
                scratch.extend(samples.iter().copied().map(&mut f));
                tail.release().map_err(|code| worker_error!(code))?;

                for sink in core.sinks() {
                    worker_ensure!(
                        sink.dtype() == S::DTYPE,
                        Ec::DtypeMismatch,
                        "sink expects {}",
                        sink.dtype()
                    );
                    worker_ensure!(
                        sink.batch_capacity() >= scratch.len(),
                        Ec::CapacityMismatch,
                        "sink batch capacity {} < {}",
                        sink.batch_capacity(),
                        scratch.len()
                    );

                    {
                        let mut head = sink.get_head();
                        head.write_samples::<S>(&scratch)
                            .map_err(|code| worker_error!(code))?;
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

                core.metrics().record_batch(scratch.len());
            }
            Ok(())
        };

        let inner = WorkerFilter::new(filter_config, worker)?;

        let core = inner.core();
        core.declare_constraint(InputConstraint {
            property: SignalProperty::DataType,
            op: ConstraintOp::Eq(PropValue::DType(S::DTYPE)),
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

        Ok(Self { inner, _marker: PhantomData })
    }
}

impl<S: Sample> FilterOps for Map<S> {
    fn core(&self) -> &Arc<FilterCore> {
        self.inner.core()
    }
}
