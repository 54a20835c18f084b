use cadence_engine::cqt::{ConstantQTransform, CqtParams};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn params(fs: f64) -> CqtParams {
    CqtParams {
        f_min: 55.0,
        f_max: 8000.0,
        fs,
        bins_per_octave: 12,
        q: 1.0,
        threshold: 0.0005,
        atom_hop_factor: 0.25,
        transpose_cents: 0.0,
    }
}

fn bench_kernel_build(c: &mut Criterion) {
    c.bench_function("cadence-engine: cqt.rs: ConstantQTransform::build", |b| {
        b.iter(|| ConstantQTransform::build(black_box(params(22_050.0))).unwrap());
    });
}

fn bench_apply(c: &mut Criterion) {
    let fs = 22_050.0;
    let cqt = ConstantQTransform::build(params(fs)).unwrap();
    let signal: Vec<f64> = (0..(fs as usize * 5))
        .map(|i| (2.0 * std::f64::consts::PI * 440.0 * i as f64 / fs).sin())
        .collect();

    c.bench_function("cadence-engine: cqt.rs: ConstantQTransform::apply", |b| {
        b.iter(|| cqt.apply(black_box(&signal)).unwrap());
    });
}

criterion_group!(benches, bench_kernel_build, bench_apply);
criterion_main!(benches);
