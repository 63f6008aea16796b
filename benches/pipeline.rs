use criterion::{criterion_group, criterion_main, Criterion};
use ndarray::{Array1, Array2};
use radarqc::attenuation::zphi::ZphiConfig;
use radarqc::phase::reconstruction::ReconstructionStrategy;
use radarqc::{par_quality_control, quality_control, QcConfig, Sweep};

const NUM_RADIALS: usize = 36;
const NUM_GATES: usize = 400;

fn synthetic_sweep() -> Sweep {
    let phase = Array2::from_shape_fn((NUM_RADIALS, NUM_GATES), |(r, g)| {
        let noise = (((g * 37 + r * 11) % 13) as f64 - 6.0) * 0.4;
        match g {
            0..=29 => 20.0,
            30..=329 => 20.0 + 0.5 * (g - 30) as f64 + noise,
            _ => 170.0,
        }
    });
    let correlation = Array2::from_shape_fn((NUM_RADIALS, NUM_GATES), |(_, g)| {
        if (30..330).contains(&g) {
            0.98
        } else {
            0.5
        }
    });
    Sweep::new(
        Array1::from_elem(NUM_RADIALS, 0.25),
        Array2::from_elem((NUM_RADIALS, NUM_GATES), 3e3),
        Array2::zeros((NUM_RADIALS, NUM_GATES)),
        phase,
        correlation,
    )
    .expect("valid sweep")
}

fn criterion_benchmark(c: &mut Criterion) {
    let sweep = synthetic_sweep();
    let spline = QcConfig {
        attenuation: Some(ZphiConfig::default()),
        ..Default::default()
    };
    let lp = QcConfig {
        strategy: ReconstructionStrategy::MonotoneLp,
        ..Default::default()
    };

    c.bench_function("Spline + Z-PHI", |b| {
        b.iter(|| quality_control(&mut sweep.clone(), &spline).expect("qc"))
    });
    c.bench_function("Parallel Spline + Z-PHI", |b| {
        b.iter(|| par_quality_control(&mut sweep.clone(), &spline).expect("qc"))
    });
    c.bench_function("Monotone LP", |b| {
        b.iter(|| quality_control(&mut sweep.clone(), &lp).expect("qc"))
    });
    c.bench_function("Parallel Monotone LP", |b| {
        b.iter(|| par_quality_control(&mut sweep.clone(), &lp).expect("qc"))
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
