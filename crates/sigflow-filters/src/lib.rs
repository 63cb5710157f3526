//! Ready-made filters for the sigflow streaming framework.
//!
//! Every filter here is a thin subtype over [`sigflow::WorkerFilter`]:
//! a config struct, a declared property contract, and a worker closure
//! obeying the framework's worker contract. They double as reference
//! implementations for writing custom filters.
//!
//! - [`SignalGenerator`] — source producing sine / square / sawtooth /
//!   white-noise waveforms at a fixed sample rate.
//! - [`Map`] — elementwise transform, generic over the sample type.
//! - [`Passthrough`] — dtype-agnostic copy with multi-sink fan-out (a tee).
//! - [`BatchMatcher`] — re-batches a stream to the batch size of whatever
//!   sink is connected first.
//! - [`CollectorSink`] — terminal filter gathering samples into shared
//!   memory for inspection.

mod collector;
mod generator;
mod map;
mod matcher;
mod passthrough;
mod support;

pub use collector::{CollectorConfig, CollectorSink};
pub use generator::{GeneratorConfig, SignalGenerator, Waveform};
pub use map::{Map, MapConfig};
pub use matcher::{BatchMatcher, MatcherConfig};
pub use passthrough::{Passthrough, PassthroughConfig};
