//! Benchmarks comparing linear and grid duplicate search during accumulation

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use depthmesh_algorithms::{AccumulatorConfig, DuplicateSearch, PointCloudAccumulator};
use depthmesh_core::Point3f;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn generate_batch(n: usize, seed: u64) -> (Vec<Point3f>, Vec<f32>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let points = (0..n)
        .map(|_| Point3f::new(rng.gen_range(0.0..0.3), rng.gen_range(0.0..0.3), rng.gen_range(0.0..0.3)))
        .collect();
    let confidences = (0..n).map(|_| rng.gen_range(0.4..1.0)).collect();
    (points, confidences)
}

fn bench_accumulate(c: &mut Criterion) {
    let mut group = c.benchmark_group("accumulate");
    group.sample_size(10);

    for &n in &[1_000usize, 5_000, 20_000] {
        let (points, confidences) = generate_batch(n, 42);

        for search in [DuplicateSearch::Linear, DuplicateSearch::Grid] {
            // Linear scan is quadratic; skip the largest batch
            if search == DuplicateSearch::Linear && n > 5_000 {
                continue;
            }
            group.bench_with_input(
                BenchmarkId::new(format!("{:?}", search).to_lowercase(), n),
                &(&points, &confidences),
                |b, &(points, confidences)| {
                    b.iter(|| {
                        let config = AccumulatorConfig::default().with_duplicate_search(search);
                        let mut acc = PointCloudAccumulator::with_config(config);
                        let acceptable = acc.accumulate(black_box(points), black_box(confidences)).unwrap();
                        black_box((acceptable, acc.len()));
                    });
                },
            );
        }
    }

    group.finish();
}

criterion_group!(benches, bench_accumulate);
criterion_main!(benches);
