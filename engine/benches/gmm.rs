use cadence_engine::cancel::CancellationToken;
use cadence_engine::config::GmmConfig;
use cadence_engine::gmm::{self, CovarianceKind};
use cadence_engine::progress::NoopProgressSink;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;

fn two_cluster_data(n_per_cluster: usize, dim: usize, rng: &mut StdRng) -> Array2<f64> {
    use rand::Rng;
    let mut rows = Vec::with_capacity(2 * n_per_cluster * dim);
    for _ in 0..n_per_cluster {
        rows.extend((0..dim).map(|_| rng.gen_range(-0.3..0.3)));
    }
    for _ in 0..n_per_cluster {
        rows.extend((0..dim).map(|_| 5.0 + rng.gen_range(-0.3..0.3)));
    }
    Array2::from_shape_vec((2 * n_per_cluster, dim), rows).unwrap()
}

fn bench_train_diagonal(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(0);
    let data = two_cluster_data(500, 16, &mut rng);
    let config = GmmConfig {
        max_iterations: 10,
        convergence_tolerance: 1e-6,
        min_variance: 1e-2,
        weight_sum_tolerance: 5e-2,
    };

    c.bench_function("cadence-engine: gmm.rs: train (diagonal)", |b| {
        b.iter(|| {
            let mut rng = StdRng::seed_from_u64(0);
            gmm::train(
                black_box(&data),
                4,
                CovarianceKind::Diagonal,
                1.0,
                &config,
                &mut rng,
                &NoopProgressSink,
                &CancellationToken::new(),
            )
            .unwrap()
        });
    });
}

fn bench_train_full(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(0);
    let data = two_cluster_data(200, 8, &mut rng);
    let config = GmmConfig {
        max_iterations: 10,
        convergence_tolerance: 1e-6,
        min_variance: 1e-2,
        weight_sum_tolerance: 5e-2,
    };

    c.bench_function("cadence-engine: gmm.rs: train (full)", |b| {
        b.iter(|| {
            let mut rng = StdRng::seed_from_u64(0);
            gmm::train(
                black_box(&data),
                4,
                CovarianceKind::Full,
                1.0,
                &config,
                &mut rng,
                &NoopProgressSink,
                &CancellationToken::new(),
            )
            .unwrap()
        });
    });
}

fn bench_symmetric_kl(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(1);
    let data = two_cluster_data(200, 8, &mut rng);
    let config = GmmConfig {
        max_iterations: 10,
        convergence_tolerance: 1e-6,
        min_variance: 1e-2,
        weight_sum_tolerance: 5e-2,
    };
    let model = gmm::train(
        &data,
        2,
        CovarianceKind::Diagonal,
        1.0,
        &config,
        &mut rng,
        &NoopProgressSink,
        &CancellationToken::new(),
    )
    .unwrap();

    c.bench_function("cadence-engine: gmm.rs: Gmm::symmetric_kl", |b| {
        b.iter(|| black_box(model.symmetric_kl(&model, 1000, &mut rng)));
    });
}

criterion_group!(benches, bench_train_diagonal, bench_train_full, bench_symmetric_kl);
criterion_main!(benches);
