use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use sigflow::{BatchRing, DType, Ec, Overflow, RingConfig};
use std::sync::Arc;
use std::thread;

const BATCHES: u64 = 100_000;

fn bench_spsc_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("spsc");

    for batch_expo in [4u8, 6, 8].iter() {
        let samples_per_batch = 1u64 << batch_expo;
        group.throughput(Throughput::Elements(BATCHES * samples_per_batch));

        group.bench_with_input(
            BenchmarkId::from_parameter(format!("batch_{samples_per_batch}")),
            batch_expo,
            |b, &expo| {
                b.iter(|| {
                    let config = RingConfig::new(DType::F32, expo, 6);
                    let ring = Arc::new(BatchRing::new(config).unwrap());
                    let samples = vec![1.0f32; config.batch_capacity()];

                    let producer_ring = Arc::clone(&ring);
                    let producer = thread::spawn(move || {
                        for batch_id in 0..BATCHES {
                            {
                                let mut head = producer_ring.get_head();
                                head.write_samples::<f32>(&samples).unwrap();
                                head.batch_id = batch_id;
                            }
                            producer_ring.submit(0).unwrap();
                        }
                    });

                    let mut consumed = 0u64;
                    while consumed < BATCHES {
                        let tail = ring.get_tail(0).unwrap();
                        black_box(tail.samples::<f32>().unwrap());
                        tail.release().unwrap();
                        consumed += 1;
                    }

                    producer.join().unwrap();
                });
            },
        );
    }

    group.finish();
}

fn bench_drop_policies(c: &mut Criterion) {
    let mut group = c.benchmark_group("overflow");
    group.throughput(Throughput::Elements(BATCHES));

    for (label, overflow) in [("drop_head", Overflow::DropHead), ("drop_tail", Overflow::DropTail)]
    {
        group.bench_function(label, |b| {
            b.iter(|| {
                let config = RingConfig::new(DType::F32, 4, 4).with_overflow(overflow);
                let ring = BatchRing::new(config).unwrap();

                // Saturating producer with no consumer: exercises the drop path
                for batch_id in 0..BATCHES {
                    ring.get_head().batch_id = batch_id;
                    assert_eq!(ring.submit(0), Ok::<(), Ec>(()));
                }
                black_box(ring.stats());
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_spsc_round_trip, bench_drop_policies);
criterion_main!(benches);
