use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use ndarray::Array1;
use qora_gate::{
    fedavg, median, trimmed_mean, AnomalyMethod, AnomalyScorer, ClientUpdate, CoordinatorConfig,
    DataPoint, FederatedAggregator, LinearModel, Model, Round, ScreeningBaseline, WeightMap,
};

fn layers(n_params: usize, n_layers: usize) -> WeightMap {
    (0..n_layers)
        .map(|l| (format!("layer_{}", l), Array1::zeros(n_params / n_layers)))
        .collect()
}

fn client_updates(global: &WeightMap, n_clients: usize) -> Vec<ClientUpdate> {
    (0..n_clients)
        .map(|i| {
            let weights = global
                .iter()
                .map(|(name, w)| {
                    let len = w.len();
                    let layer = Array1::from_shape_fn(len, |j| ((i * len + j) as f32).sin());
                    (name.clone(), layer)
                })
                .collect();
            ClientUpdate::new(format!("client_{}", i), weights, 0).with_sample_count(10 + i as u64)
        })
        .collect()
}

fn bench_combine(c: &mut Criterion) {
    let mut group = c.benchmark_group("combine");

    for &n_clients in &[10, 50, 100] {
        for &n_params in &[1_000usize, 100_000] {
            let global = layers(n_params, 4);
            let updates = client_updates(&global, n_clients);
            let refs: Vec<&ClientUpdate> = updates.iter().collect();
            let id = format!("{}c_{}p", n_clients, n_params);

            group.bench_with_input(BenchmarkId::new("fedavg", &id), &refs, |b, refs| {
                b.iter(|| fedavg(&global, refs).unwrap())
            });

            group.bench_with_input(BenchmarkId::new("trimmed_mean", &id), &refs, |b, refs| {
                b.iter(|| trimmed_mean(&global, refs, 0.2).unwrap())
            });

            group.bench_with_input(BenchmarkId::new("median", &id), &refs, |b, refs| {
                b.iter(|| median(&global, refs).unwrap())
            });
        }
    }
    group.finish();
}

fn bench_round(c: &mut Criterion) {
    let mut group = c.benchmark_group("round");
    let aggregator = FederatedAggregator::from_config(&CoordinatorConfig::default()).unwrap();
    let baseline = ScreeningBaseline::default();

    for &n_clients in &[10, 50] {
        let model = LinearModel::new(256);
        let updates = client_updates(model.weights(), n_clients);

        group.bench_with_input(
            BenchmarkId::new("run_round", n_clients),
            &updates,
            |b, updates| {
                b.iter_batched(
                    || {
                        let mut round = Round::open(1, 1_000);
                        for u in updates {
                            round.submit(u.clone()).unwrap();
                        }
                        round
                    },
                    |round| aggregator.run_round(&model, round, &baseline),
                    BatchSize::SmallInput,
                )
            },
        );
    }
    group.finish();
}

fn bench_scoring(c: &mut Criterion) {
    let mut group = c.benchmark_group("anomaly");
    let scorer = AnomalyScorer::default();

    for &n_points in &[50usize, 200] {
        let points: Vec<DataPoint> = (0..n_points)
            .map(|i| {
                let x = i as f64;
                DataPoint::new(vec![x.sin(), x.cos(), (x * 0.5).sin()])
            })
            .collect();

        for method in AnomalyMethod::ALL {
            group.bench_with_input(
                BenchmarkId::new(method.as_str(), n_points),
                &points,
                |b, points| b.iter(|| scorer.score(points, method).unwrap()),
            );
        }
    }
    group.finish();
}

criterion_group!(benches, bench_combine, bench_round, bench_scoring);
criterion_main!(benches);
