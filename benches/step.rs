//! Benchmarks for the neural CA simulation step.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

use neural_ca::{
    compute::{Perception, Seed, Simulation},
    schema::{FillMode, NcaConfig},
};

fn bench_markovian_step(c: &mut Criterion) {
    let mut group = c.benchmark_group("markovian_step");

    for size in [32, 64, 128, 256] {
        let mut config = NcaConfig::preset("growing").unwrap();
        config.width = size;
        config.height = size;

        let mut sim = Simulation::new(config).unwrap();
        sim.seed(Seed::Fill(&FillMode::Noise { scale: 8 })).unwrap();

        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}x{}", size, size)),
            &size,
            |b, _| {
                b.iter(|| {
                    black_box(&mut sim).step().unwrap();
                });
            },
        );
    }

    group.finish();
}

fn bench_state_space_gates(c: &mut Criterion) {
    let mut group = c.benchmark_group("state_space_step");

    for gate in ["gru", "lstm", "simple"] {
        let mut config = NcaConfig::preset("memory").unwrap();
        config.width = 64;
        config.height = 64;
        config.evolver.gate = serde_json::from_value(serde_json::json!(gate)).unwrap();

        let mut sim = Simulation::new(config).unwrap();
        sim.seed(Seed::Fill(&FillMode::Random { amplitude: 1.0 }))
            .unwrap();

        group.bench_with_input(BenchmarkId::from_parameter(gate), &gate, |b, _| {
            b.iter(|| {
                black_box(&mut sim).step().unwrap();
            });
        });
    }

    group.finish();
}

fn bench_perception(c: &mut Criterion) {
    let mut group = c.benchmark_group("perception_sample");

    for radius in [1, 2, 3] {
        let mut config = NcaConfig::default();
        config.width = 128;
        config.height = 128;
        config.perception.radius = radius;

        let perception = Perception::new(&config.perception, config.channels).unwrap();
        let mut sim = Simulation::new(config).unwrap();
        sim.seed(Seed::Fill(&FillMode::Noise { scale: 8 })).unwrap();

        group.bench_with_input(
            BenchmarkId::from_parameter(format!("radius_{}", radius)),
            &radius,
            |b, _| {
                b.iter(|| black_box(perception.sample(sim.grid())));
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_markovian_step,
    bench_state_space_gates,
    bench_perception
);
criterion_main!(benches);
