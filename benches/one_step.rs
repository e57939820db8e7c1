use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use ixsel::{AutoMl, AutoMlConfig, CbExample, FeatureGroups, LoggedFeedback, Namespace, SgdCbLearner};
use std::hint::black_box;

fn stream(n: usize, namespaces: &[u8], actions: usize) -> Vec<(CbExample, LoggedFeedback, usize)> {
    (0..n)
        .map(|i| {
            let mut shared = FeatureGroups::new();
            for (j, &ns) in namespaces.iter().enumerate() {
                shared.push(Namespace(ns), ((i * 31 + j * 7) % 97) as u64, 1.0);
            }
            let acts = (0..actions)
                .map(|a| FeatureGroups::new().with(Namespace(b'z'), a as u64, 1.0))
                .collect();
            let action = i % actions;
            let logged = LoggedFeedback {
                cost: if action == 0 { 0.1 } else { 0.9 },
                probability: 1.0 / actions as f32,
            };
            (CbExample::new(shared, acts), logged, action)
        })
        .collect()
}

fn bench_one_step(c: &mut Criterion) {
    let mut group = c.benchmark_group("one_step");

    for live in [1usize, 4, 10] {
        group.bench_with_input(BenchmarkId::new("live_configs", live), &live, |b, &live| {
            let cfg = AutoMlConfig::default()
                .with_max_live_configs(live)
                .with_weight_bits(16)
                .with_collect_stable_examples(1);
            let data = stream(256, b"abcd", 4);
            b.iter(|| {
                let mut aml = AutoMl::new(cfg.clone()).unwrap();
                let mut base = SgdCbLearner::default();
                for (ex, logged, action) in &data {
                    let mut ex = ex.clone();
                    black_box(aml.one_step(&mut base, &mut ex, logged, *action).unwrap());
                }
            })
        });
    }

    group.bench_function("cubic/4_live", |b| {
        let cfg = AutoMlConfig::default()
            .with_interaction_type(ixsel::InteractionType::Cubic)
            .with_weight_bits(16)
            .with_collect_stable_examples(1);
        let data = stream(128, b"abcde", 3);
        b.iter(|| {
            let mut aml = AutoMl::new(cfg.clone()).unwrap();
            let mut base = SgdCbLearner::default();
            for (ex, logged, action) in &data {
                let mut ex = ex.clone();
                black_box(aml.one_step(&mut base, &mut ex, logged, *action).unwrap());
            }
        })
    });

    group.finish();
}

criterion_group!(benches, bench_one_step);
criterion_main!(benches);
