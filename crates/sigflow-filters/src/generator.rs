//! Waveform source filter.

use crate::support::submit_retrying;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sigflow::{
    rate_hz_to_period_ns, worker_ensure, worker_error, BehaviorOp, DType, Ec, FilterConfig,
    FilterCore, FilterOps, OutputBehavior, PortMask, PropValue, RingConfig, SignalProperty,
    WorkerFilter,
};
use std::f64::consts::{PI, TAU};
use std::sync::Arc;

/// Waveform shapes the generator can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Waveform {
    #[default]
    Sine,
    Square,
    Sawtooth,
    /// Uniform noise in `[-amplitude, amplitude]`; ignores `frequency_hz`.
    WhiteNoise,
}

/// Configuration of a [`SignalGenerator`].
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    pub name: String,
    pub waveform: Waveform,
    /// Waveform frequency in Hz. Unused by [`Waveform::WhiteNoise`].
    pub frequency_hz: f64,
    pub amplitude: f32,
    /// Output sample rate in Hz. Must be positive.
    pub sample_rate_hz: f64,
    /// Samples per produced batch = `2^batch_expo`.
    pub batch_expo: u8,
    /// Sink slots available for fan-out.
    pub max_sinks: usize,
    /// Timeout for blocking submits, microseconds (0 = indefinite).
    pub timeout_us: u64,
    /// Stop after this many batches, ending the stream with a COMPLETE
    /// sentinel. `None` runs until stopped.
    pub batch_limit: Option<u64>,
    /// RNG seed for reproducible noise. `None` seeds from the OS.
    pub seed: Option<u64>,
}

impl GeneratorConfig {
    /// 1 kHz sine at 48 kHz, unit amplitude, 64-sample batches.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            waveform: Waveform::Sine,
            frequency_hz: 1_000.0,
            amplitude: 1.0,
            sample_rate_hz: 48_000.0,
            batch_expo: 6,
            max_sinks: 1,
            timeout_us: 10_000,
            batch_limit: None,
            seed: None,
        }
    }

    pub fn with_waveform(mut self, waveform: Waveform) -> Self {
        self.waveform = waveform;
        self
    }

    pub fn with_frequency_hz(mut self, frequency_hz: f64) -> Self {
        self.frequency_hz = frequency_hz;
        self
    }

    pub fn with_amplitude(mut self, amplitude: f32) -> Self {
        self.amplitude = amplitude;
        self
    }

    pub fn with_sample_rate_hz(mut self, sample_rate_hz: f64) -> Self {
        self.sample_rate_hz = sample_rate_hz;
        self
    }

    pub fn with_batch_expo(mut self, batch_expo: u8) -> Self {
        self.batch_expo = batch_expo;
        self
    }

    pub fn with_max_sinks(mut self, max_sinks: usize) -> Self {
        self.max_sinks = max_sinks;
        self
    }

    pub fn with_batch_limit(mut self, batch_limit: u64) -> Self {
        self.batch_limit = Some(batch_limit);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// Source filter emitting `f32` waveform batches at a fixed sample rate.
///
/// Has no input ports; its worker fills and publishes the head slot of every
/// connected sink in turn. Advertises `DATA_TYPE = f32`, its batch capacity,
/// and its sample period to downstream contracts.
pub struct SignalGenerator {
    inner: WorkerFilter,
}

impl std::fmt::Debug for SignalGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalGenerator").finish()
    }
}

impl SignalGenerator {
    pub fn new(config: GeneratorConfig) -> Result<Self, Ec> {
        if config.sample_rate_hz <= 0.0 || !config.sample_rate_hz.is_finite() {
            return Err(Ec::InvalidConfig);
        }
        if config.frequency_hz < 0.0 || !config.frequency_hz.is_finite() {
            return Err(Ec::InvalidConfig);
        }
        if !config.amplitude.is_finite() || config.amplitude < 0.0 {
            return Err(Ec::InvalidConfig);
        }

        let ring = RingConfig::new(DType::F32, config.batch_expo, 2);
        let filter_config = FilterConfig::new(config.name.clone(), ring)
            .with_inputs(0)
            .with_max_sinks(config.max_sinks)
            .with_timeout_us(config.timeout_us);

        let batch_samples = ring.batch_capacity();
        let period_ns = rate_hz_to_period_ns(config.sample_rate_hz);
        let phase_step = TAU * config.frequency_hz / config.sample_rate_hz;
        let waveform = config.waveform;
        let amplitude = config.amplitude;
        let batch_limit = config.batch_limit;
        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut phase = 0.0f64;
        let mut scratch = vec![0.0f32; batch_samples];
        let mut batch_id = 0u64;
        let mut t_ns = 0u64;

        let worker = move |core: &FilterCore| {
            while core.is_running() {
                let sinks = core.sinks();
                worker_ensure!(!sinks.is_empty(), Ec::NoSink, "generator has no connected sink");

                for sample in scratch.iter_mut() {
                    *sample = match waveform {
                        Waveform::Sine => phase.sin() as f32 * amplitude,
                        Waveform::Square => {
                            if phase < PI {
                                amplitude
                            } else {
                                -amplitude
                            }
                        }
                        Waveform::Sawtooth => ((phase / TAU) * 2.0 - 1.0) as f32 * amplitude,
                        Waveform::WhiteNoise => rng.gen_range(-amplitude..=amplitude),
                    };
                    phase += phase_step;
                    if phase >= TAU {
                        phase -= TAU;
                    }
                }

                for sink in &sinks {
                    worker_ensure!(
                        sink.dtype() == DType::F32,
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
                        head.write_samples::<f32>(&scratch)
                            .map_err(|code| worker_error!(code))?;
                        head.t_ns = t_ns;
                        head.period_ns = period_ns;
                        head.batch_id = batch_id;
                        head.ec = Ec::Ok;
                    }
                    match submit_retrying(core, sink) {
                        Ok(()) => {}
                        Err(code) if code.is_shutdown() => return Ok(()),
                        Err(code) => return Err(worker_error!(code, "submit to sink failed")),
                    }
                }

                core.metrics().record_batch(scratch.len());
                batch_id += 1;
                t_ns += scratch.len() as u64 * period_ns;

                if batch_limit.is_some_and(|limit| batch_id >= limit) {
                    core.forward_complete();
                    return Ok(());
                }
            }
            Ok(())
        };

        let inner = WorkerFilter::new(filter_config, worker)?;

        let core = inner.core();
        core.declare_behavior(OutputBehavior {
            property: SignalProperty::DataType,
            op: BehaviorOp::Set(PropValue::DType(DType::F32)),
            output_mask: PortMask::ALL,
        })?;
        core.declare_behavior(OutputBehavior {
            property: SignalProperty::MinBatchCapacity,
            op: BehaviorOp::Set(PropValue::U32(batch_samples as u32)),
            output_mask: PortMask::ALL,
        })?;
        core.declare_behavior(OutputBehavior {
            property: SignalProperty::MaxBatchCapacity,
            op: BehaviorOp::Set(PropValue::U32(batch_samples as u32)),
            output_mask: PortMask::ALL,
        })?;
        core.declare_behavior(OutputBehavior {
            property: SignalProperty::SamplePeriodNs,
            op: BehaviorOp::Set(PropValue::U64(period_ns)),
            output_mask: PortMask::ALL,
        })?;

        Ok(Self { inner })
    }
}

impl FilterOps for SignalGenerator {
    fn core(&self) -> &Arc<FilterCore> {
        self.inner.core()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_bad_rates() {
        assert_eq!(
            SignalGenerator::new(GeneratorConfig::new("g").with_sample_rate_hz(0.0)).unwrap_err(),
            Ec::InvalidConfig
        );
        assert_eq!(
            SignalGenerator::new(GeneratorConfig::new("g").with_frequency_hz(-1.0)).unwrap_err(),
            Ec::InvalidConfig
        );
    }

    #[test]
    fn test_advertises_output_properties() {
        let generator = SignalGenerator::new(
            GeneratorConfig::new("sine")
                .with_sample_rate_hz(8_000.0)
                .with_batch_expo(3),
        )
        .unwrap();

        let contract = generator.core().contract();
        let table = sigflow::propagate(&[], &contract, 0);
        assert_eq!(
            table.get(SignalProperty::DataType),
            Some(PropValue::DType(DType::F32))
        );
        assert_eq!(
            table.get(SignalProperty::MaxBatchCapacity),
            Some(PropValue::U32(8))
        );
        assert_eq!(
            table.get(SignalProperty::SamplePeriodNs),
            Some(PropValue::U64(125_000))
        );
    }

    #[test]
    fn test_no_sink_is_a_recorded_failure() {
        let generator =
            SignalGenerator::new(GeneratorConfig::new("lonely").with_batch_expo(3)).unwrap();
        generator.start().unwrap();
        generator.stop().unwrap();
        assert_eq!(generator.health(), sigflow::Health::Failed);
        assert_eq!(generator.core().error().unwrap().code, Ec::NoSink);
    }
}
