//! End-to-end demo: sine generator -> gain map -> collector, coordinated by
//! a pipeline.
//!
//! Run with `RUST_LOG=debug` to watch the lifecycle.

use anyhow::Result;
use sigflow::{Connection, DType, FilterOps, Pipeline, PipelineConfig, RingConfig};
use sigflow_filters::{
    CollectorConfig, CollectorSink, GeneratorConfig, Map, MapConfig, SignalGenerator, Waveform,
};
use std::sync::Arc;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let ring = RingConfig::new(DType::F32, 6, 4);

    let generator = Arc::new(SignalGenerator::new(
        GeneratorConfig::new("sine")
            .with_waveform(Waveform::Sine)
            .with_frequency_hz(1_000.0)
            .with_sample_rate_hz(48_000.0)
            .with_batch_expo(6)
            .with_batch_limit(64),
    )?);
    let gain = Arc::new(Map::<f32>::new(MapConfig::new("gain", ring), |x| x * 0.5)?);
    let collector = Arc::new(CollectorSink::<f32>::new(CollectorConfig::new("tap", ring))?);

    let pipeline = Pipeline::new(PipelineConfig {
        name: "demo".into(),
        filters: vec![
            Arc::clone(&generator) as Arc<dyn FilterOps>,
            Arc::clone(&gain) as Arc<dyn FilterOps>,
            Arc::clone(&collector) as Arc<dyn FilterOps>,
        ],
        connections: vec![Connection::new(0, 0, 1, 0), Connection::new(1, 0, 2, 0)],
        input: (0, 0),
        output: (2, 0),
        external_inputs: Vec::new(),
    })?;

    log::info!("{}", pipeline.describe());

    pipeline.start()?;
    while !collector.is_complete() {
        std::thread::sleep(std::time::Duration::from_millis(1));
    }
    pipeline.stop()?;

    let stats = pipeline.stats();
    let samples = collector.samples();
    let peak = samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
    log::info!(
        "pipeline processed {} batches / {} samples; collected {} samples, peak {:.3}",
        stats.n_batches,
        stats.samples_processed,
        samples.len(),
        peak
    );
    println!("collected {} samples, peak amplitude {peak:.3}", samples.len());

    Ok(())
}
