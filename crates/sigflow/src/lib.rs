//! sigflow - Real-Time Streaming Framework for Sampled Signals
//!
//! A pipeline is built from **filters** — independent worker units connected
//! by bounded **batch ring buffers**. Each filter consumes batches from one
//! or more input rings, transforms them, and submits batches to zero or more
//! sink rings. The framework targets bounded-latency signal pipelines with
//! strict backpressure and deterministic shutdown.
//!
//! # Key pieces
//!
//! - [`BatchRing`]: lock-free SPSC ring of sample batches with blocking and
//!   dropping overflow policies, one-shot forced wake-ups for cancellation,
//!   and cache-line-partitioned producer/consumer state.
//! - [`FilterOps`] / [`WorkerFilter`] / [`FilterCore`]: the filter runtime —
//!   lifecycle, one worker thread per running filter, multi-sink fan-out,
//!   graceful stop.
//! - [`FilterContract`] and friends: declared input constraints and output
//!   behaviors, validated at wiring time and propagated through a DAG.
//! - [`Pipeline`]: a DAG of filters behaving as a single filter, sharing
//!   rings zero-copy across the composite boundary.
//!
//! # Example
//!
//! ```
//! use sigflow::{BatchRing, DType, RingConfig};
//!
//! // 8-sample f32 batches, 4 ring slots
//! let ring = BatchRing::new(RingConfig::new(DType::F32, 3, 2)).unwrap();
//!
//! // Producer side: fill the head slot and publish it
//! {
//!     let mut head = ring.get_head();
//!     head.write_samples::<f32>(&[0.0, 1.0, 2.0]).unwrap();
//!     head.t_ns = 0;
//!     head.period_ns = 125_000;
//!     head.batch_id = 0;
//! }
//! ring.submit(0).unwrap();
//!
//! // Consumer side: read the tail slot and release it
//! let tail = ring.get_tail(0).unwrap();
//! assert_eq!(tail.samples::<f32>().unwrap(), &[0.0, 1.0, 2.0]);
//! tail.release().unwrap();
//! ```

mod batch;
mod config;
mod dtype;
mod error;
mod filter;
mod invariants;
mod pipeline;
mod properties;
mod ring;
mod stats;

pub use batch::Batch;
pub use config::{
    Overflow, RingConfig, MAX_BATCH_EXPO, MAX_BEHAVIORS, MAX_CONSTRAINTS, MAX_INPUTS,
    MAX_NAME_LEN, MAX_RING_EXPO, MAX_SINKS,
};
pub use dtype::{DType, Sample};
pub use error::{Ec, WorkerError};
pub use filter::{FilterConfig, FilterCore, FilterOps, Health, Worker, WorkerFilter};
pub use pipeline::{Connection, Pipeline, PipelineConfig};
pub use properties::{
    period_ns_to_rate_hz, propagate, rate_hz_to_period_ns, validate_connection,
    validate_multi_input_alignment, BehaviorOp, ConstraintOp, FilterContract, InputConstraint,
    OutputBehavior, PortMask, PropValue, PropertyError, PropertyTable, SignalProperty,
    N_PROPERTIES,
};
pub use ring::{BatchRing, HeadRef, TailRef};
pub use stats::{FilterMetrics, FilterStats, RingStats};
