//! Terminal filter gathering samples for inspection.

use crate::support::{poll_input, Polled};
use sigflow::{
    worker_error, ConstraintOp, Ec, FilterConfig, FilterCore, FilterOps, InputConstraint,
    PortMask, PropValue, RingConfig, Sample, SignalProperty, WorkerFilter,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Configuration of a [`CollectorSink`].
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub name: String,
    /// Input ring configuration; the dtype must match the sample type.
    pub ring: RingConfig,
    pub timeout_us: u64,
}

impl CollectorConfig {
    pub fn new(name: impl Into<String>, ring: RingConfig) -> Self {
        Self { name: name.into(), ring, timeout_us: 10_000 }
    }

    pub fn with_timeout_us(mut self, timeout_us: u64) -> Self {
        self.timeout_us = timeout_us;
        self
    }
}

/// Appends every received sample to shared memory and latches the COMPLETE
/// sentinel. Intended for tests, demos, and debugging taps.
pub struct CollectorSink<S: Sample> {
    inner: WorkerFilter,
    data: Arc<Mutex<Vec<S>>>,
    completed: Arc<AtomicBool>,
}

impl<S: Sample> std::fmt::Debug for CollectorSink<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectorSink").finish()
    }
}

impl<S: Sample> CollectorSink<S> {
    pub fn new(config: CollectorConfig) -> Result<Self, Ec> {
        if config.ring.dtype != S::DTYPE {
            return Err(Ec::DtypeMismatch);
        }

        let capacity = config.ring.batch_capacity();
        let filter_config = FilterConfig::new(config.name.clone(), config.ring)
            .with_inputs(1)
            .with_max_sinks(0)
            .with_timeout_us(config.timeout_us);

        let data: Arc<Mutex<Vec<S>>> = Arc::new(Mutex::new(Vec::new()));
        let completed = Arc::new(AtomicBool::new(false));
        let worker_data = Arc::clone(&data);
        let worker_completed = Arc::clone(&completed);

        let worker = move |core: &FilterCore| {
            while core.is_running() {
                let input = core.input(0).map_err(|code| worker_error!(code))?;
                let tail = match poll_input(core, input).map_err(|code| worker_error!(code))? {
                    Polled::Batch(tail) => tail,
                    Polled::Idle => continue,
                    Polled::Complete => {
                        worker_completed.store(true, Ordering::Release);
                        log::trace!("collector '{}' saw end of stream", core.name());
                        return Ok(());
                    }
                    Polled::Shutdown => return Ok(()),
                };

                let samples = tail.samples::<S>().map_err(|code| worker_error!(code))?;
                worker_data
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .extend_from_slice(samples);
                let n = tail.len;
                log::trace!("collector '{}' took batch {} ({n} samples)", core.name(), tail.batch_id);
                tail.release().map_err(|code| worker_error!(code))?;
                core.metrics().record_batch(n);
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

        Ok(Self { inner, data, completed })
    }

    /// Snapshot of every sample received so far.
    pub fn samples(&self) -> Vec<S> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Number of samples received so far.
    pub fn len(&self) -> usize {
        self.data.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `true` once the COMPLETE sentinel has been consumed.
    pub fn is_complete(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }
}

impl<S: Sample> FilterOps for CollectorSink<S> {
    fn core(&self) -> &Arc<FilterCore> {
        self.inner.core()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sigflow::DType;

    #[test]
    fn test_collects_until_complete() {
        let ring = RingConfig::new(DType::I32, 2, 2);
        let collector = CollectorSink::<i32>::new(
            CollectorConfig::new("col", ring).with_timeout_us(5_000),
        )
        .unwrap();

        let input = collector.core().input(0).unwrap();
        {
            let mut head = input.get_head();
            head.write_samples::<i32>(&[-1, 0, 1]).unwrap();
            head.batch_id = 0;
        }
        input.submit(0).unwrap();
        {
            let mut head = input.get_head();
            head.len = 0;
            head.ec = Ec::Complete;
        }
        input.submit(0).unwrap();

        collector.start().unwrap();
        while !collector.is_complete() {
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        collector.stop().unwrap();

        assert_eq!(collector.samples(), vec![-1, 0, 1]);
        assert_eq!(collector.stats().n_batches, 1);
        assert_eq!(collector.health(), sigflow::Health::Healthy);
    }

    #[test]
    fn test_rejects_wrong_dtype() {
        let ring = RingConfig::new(DType::F32, 2, 2);
        assert_eq!(
            CollectorSink::<i32>::new(CollectorConfig::new("col", ring)).unwrap_err(),
            Ec::DtypeMismatch
        );
    }
}
