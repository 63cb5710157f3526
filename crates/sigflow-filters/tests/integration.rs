//! Integration tests for the ready-made filters.

use sigflow::{
    Connection, DType, Ec, FilterOps, Health, Pipeline, PipelineConfig, RingConfig,
};
use sigflow_filters::{
    BatchMatcher, CollectorConfig, CollectorSink, GeneratorConfig, Map, MapConfig, MatcherConfig,
    SignalGenerator, Waveform,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Polls `done` every millisecond until it holds or the deadline passes.
fn wait_for(what: &str, done: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !done() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(1));
    }
}

fn ring_f32(batch_expo: u8) -> RingConfig {
    RingConfig::new(DType::F32, batch_expo, 3)
}

#[test]
fn test_generator_to_collector_completes() {
    let generator = SignalGenerator::new(
        GeneratorConfig::new("sine")
            .with_sample_rate_hz(8_000.0)
            .with_batch_expo(3)
            .with_batch_limit(4),
    )
    .unwrap();
    let collector =
        CollectorSink::<f32>::new(CollectorConfig::new("col", ring_f32(3))).unwrap();

    generator
        .sink_connect(0, collector.core().input_ring(0).unwrap())
        .unwrap();

    collector.start().unwrap();
    generator.start().unwrap();

    wait_for("collector completion", || collector.is_complete());

    generator.stop().unwrap();
    collector.stop().unwrap();

    assert_eq!(collector.len(), 4 * 8);
    assert!(collector.samples().iter().all(|s| s.abs() <= 1.0));
    assert_eq!(generator.health(), Health::Healthy);
    assert_eq!(collector.health(), Health::Healthy);
    assert_eq!(collector.stats().n_batches, 4);
}

#[test]
fn test_generator_fan_out_feeds_both_collectors() {
    let generator = SignalGenerator::new(
        GeneratorConfig::new("noise")
            .with_waveform(Waveform::WhiteNoise)
            .with_seed(7)
            .with_sample_rate_hz(8_000.0)
            .with_batch_expo(3)
            .with_max_sinks(2)
            .with_batch_limit(3),
    )
    .unwrap();
    let left = CollectorSink::<f32>::new(CollectorConfig::new("left", ring_f32(3))).unwrap();
    let right = CollectorSink::<f32>::new(CollectorConfig::new("right", ring_f32(3))).unwrap();

    generator.sink_connect(0, left.core().input_ring(0).unwrap()).unwrap();
    generator.sink_connect(1, right.core().input_ring(0).unwrap()).unwrap();

    left.start().unwrap();
    right.start().unwrap();
    generator.start().unwrap();

    wait_for("both collectors", || left.is_complete() && right.is_complete());

    generator.stop().unwrap();
    left.stop().unwrap();
    right.stop().unwrap();

    assert_eq!(left.samples(), right.samples());
    assert_eq!(left.len(), 3 * 8);
}

#[test]
fn test_map_applies_function() {
    let generator = SignalGenerator::new(
        GeneratorConfig::new("square")
            .with_waveform(Waveform::Square)
            .with_amplitude(1.0)
            .with_sample_rate_hz(8_000.0)
            .with_batch_expo(3)
            .with_batch_limit(2),
    )
    .unwrap();
    let gain = Map::<f32>::new(MapConfig::new("gain", ring_f32(3)), |x| x * 2.0).unwrap();
    let collector =
        CollectorSink::<f32>::new(CollectorConfig::new("col", ring_f32(3))).unwrap();

    generator.sink_connect(0, gain.core().input_ring(0).unwrap()).unwrap();
    gain.sink_connect(0, collector.core().input_ring(0).unwrap()).unwrap();

    collector.start().unwrap();
    gain.start().unwrap();
    generator.start().unwrap();

    wait_for("collector completion", || collector.is_complete());

    generator.stop().unwrap();
    gain.stop().unwrap();
    collector.stop().unwrap();

    let samples = collector.samples();
    assert_eq!(samples.len(), 2 * 8);
    assert!(samples.iter().all(|s| s.abs() == 2.0), "samples: {samples:?}");
}

#[test]
fn test_matcher_rebatches_to_sink_capacity() {
    // 8-sample input batches, 4-sample output batches
    let matcher = BatchMatcher::new(
        MatcherConfig::new("rebatch", ring_f32(3)).with_timeout_us(5_000),
    )
    .unwrap();
    let collector =
        CollectorSink::<f32>::new(CollectorConfig::new("col", ring_f32(2))).unwrap();

    matcher
        .sink_connect(0, collector.core().input_ring(0).unwrap())
        .unwrap();
    assert_eq!(matcher.output_capacity(), Some(4));

    // Feed two 8-sample batches and the sentinel by hand.
    let input = matcher.core().input(0).unwrap();
    for batch in 0..2u64 {
        let mut samples = [0.0f32; 8];
        for (i, sample) in samples.iter_mut().enumerate() {
            *sample = (batch * 8 + i as u64) as f32;
        }
        {
            let mut head = input.get_head();
            head.write_samples::<f32>(&samples).unwrap();
            head.t_ns = batch * 1_000_000;
            head.period_ns = 125_000;
            head.batch_id = batch;
        }
        input.submit(0).unwrap();
    }
    {
        let mut head = input.get_head();
        head.len = 0;
        head.ec = Ec::Complete;
    }
    input.submit(0).unwrap();

    collector.start().unwrap();
    matcher.start().unwrap();

    wait_for("collector completion", || collector.is_complete());

    matcher.stop().unwrap();
    collector.stop().unwrap();

    let expected: Vec<f32> = (0..16).map(|i| i as f32).collect();
    assert_eq!(collector.samples(), expected);
    // 16 samples arrived as four 4-sample batches
    assert_eq!(collector.stats().n_batches, 4);
    assert_eq!(matcher.health(), Health::Healthy);
}

#[test]
fn test_pipeline_end_to_end() {
    let generator = Arc::new(
        SignalGenerator::new(
            GeneratorConfig::new("src")
                .with_sample_rate_hz(8_000.0)
                .with_batch_expo(3)
                .with_batch_limit(5),
        )
        .unwrap(),
    );
    let gain = Arc::new(Map::<f32>::new(MapConfig::new("map", ring_f32(3)), |x| x).unwrap());
    let collector = Arc::new(
        CollectorSink::<f32>::new(CollectorConfig::new("sink", ring_f32(3))).unwrap(),
    );

    let pipeline = Pipeline::new(PipelineConfig {
        name: "e2e".into(),
        filters: vec![
            Arc::clone(&generator) as Arc<dyn FilterOps>,
            Arc::clone(&gain) as Arc<dyn FilterOps>,
            Arc::clone(&collector) as Arc<dyn FilterOps>,
        ],
        connections: vec![Connection::new(0, 0, 1, 0), Connection::new(1, 0, 2, 0)],
        input: (0, 0),
        output: (2, 0),
        external_inputs: Vec::new(),
    })
    .unwrap();

    pipeline.validate_properties().unwrap();
    pipeline.start().unwrap();

    wait_for("pipeline completion", || collector.is_complete());

    pipeline.stop().unwrap();

    assert_eq!(collector.len(), 5 * 8);
    assert_eq!(pipeline.health(), Health::Healthy);
    assert_eq!(pipeline.backlog(), 0);

    // The propagated tables reached the sink: f32 @ 8 samples, 125 us period
    let sink_input = collector.core().input_properties(0).unwrap();
    assert_eq!(
        sink_input.get(sigflow::SignalProperty::SamplePeriodNs),
        Some(sigflow::PropValue::U64(125_000))
    );
}

#[test]
fn test_pipeline_rejects_capacity_mismatch() {
    // Generator emits 64-sample batches; collector tolerates at most 8.
    let generator = Arc::new(
        SignalGenerator::new(
            GeneratorConfig::new("src")
                .with_sample_rate_hz(8_000.0)
                .with_batch_expo(6),
        )
        .unwrap(),
    );
    let collector = Arc::new(
        CollectorSink::<f32>::new(CollectorConfig::new("small", ring_f32(3))).unwrap(),
    );

    let pipeline = Pipeline::new(PipelineConfig {
        name: "mismatch".into(),
        filters: vec![
            Arc::clone(&generator) as Arc<dyn FilterOps>,
            Arc::clone(&collector) as Arc<dyn FilterOps>,
        ],
        connections: vec![Connection::new(0, 0, 1, 0)],
        input: (0, 0),
        output: (1, 0),
        external_inputs: Vec::new(),
    })
    .unwrap();

    assert_eq!(pipeline.validate_properties().unwrap_err(), Ec::PropertyMismatch);
    assert_eq!(pipeline.start().unwrap_err(), Ec::PropertyMismatch);
}
