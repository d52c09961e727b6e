// Copyright 2025 the Canopy Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use criterion::{BatchSize, Criterion, Throughput, black_box, criterion_group, criterion_main};
use canopy_index::{
    AllKnn, BallBound, BuilderKind, FurthestDescendant, HRectBound, KnnParam, Mode, PointSet,
    TreeParams, build_tree,
};
use canopy_solver::{KnnRunner, SolverConfig};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn gen_uniform(n: usize, dim: usize, seed: u64) -> PointSet {
    let mut rng = StdRng::seed_from_u64(seed);
    PointSet::from_columns(dim, (0..n * dim).map(|_| rng.gen_range(0.0..1.0)).collect()).unwrap()
}

fn gen_clustered(n: usize, dim: usize, seed: u64) -> PointSet {
    let mut rng = StdRng::seed_from_u64(seed);
    let centers: Vec<f64> = (0..8 * dim).map(|_| rng.gen_range(0.0..100.0)).collect();
    let mut coords = Vec::with_capacity(n * dim);
    for i in 0..n {
        let c = i % 8;
        for d in 0..dim {
            coords.push(centers[c * dim + d] + rng.gen_range(-1.0..1.0));
        }
    }
    PointSet::from_columns(dim, coords).unwrap()
}

fn bench_modes(c: &mut Criterion) {
    let mut group = c.benchmark_group("allknn_modes");
    group.sample_size(10);
    for &n in &[1_000_usize, 5_000] {
        let points = gen_uniform(n, 3, 7);
        group.throughput(Throughput::Elements(n as u64));
        for mode in [Mode::Naive, Mode::SingleTree, Mode::DualTree] {
            if mode == Mode::Naive && n > 1_000 {
                continue;
            }
            let param = KnnParam {
                k: 5,
                mode,
                ..KnnParam::default()
            };
            group.bench_function(format!("{mode:?}_n{n}"), |b| {
                b.iter(|| {
                    let mut knn: AllKnn<'_> = AllKnn::new(&points, param).unwrap();
                    black_box(knn.compute_neighbors().unwrap());
                });
            });
        }
        let ball = KnnParam {
            k: 5,
            ..KnnParam::default()
        };
        group.bench_function(format!("DualTree_ball_n{n}"), |b| {
            b.iter(|| {
                let mut knn: AllKnn<'_, BallBound> = AllKnn::new(&points, ball).unwrap();
                black_box(knn.compute_neighbors().unwrap());
            });
        });
    }
    group.finish();
}

fn bench_builders(c: &mut Criterion) {
    let mut group = c.benchmark_group("tree_builders");
    group.sample_size(20);
    for &n in &[2_000_usize, 20_000] {
        let points = gen_clustered(n, 2, 11);
        group.throughput(Throughput::Elements(n as u64));
        for builder in [BuilderKind::Midpoint, BuilderKind::Rectangle] {
            let params = TreeParams {
                builder,
                ..TreeParams::default()
            };
            group.bench_function(format!("{builder:?}_n{n}"), |b| {
                b.iter(|| {
                    let tree = build_tree::<HRectBound, FurthestDescendant, _>(&points, &params)
                        .unwrap();
                    black_box(tree.len());
                });
            });
        }
    }
    group.finish();
}

fn bench_threads(c: &mut Criterion) {
    let mut group = c.benchmark_group("threaded_runner");
    group.sample_size(10);
    let points = gen_uniform(20_000, 3, 3);
    group.throughput(Throughput::Elements(20_000));
    for n_threads in [1_usize, 2, 4] {
        let config = SolverConfig {
            n_threads,
            ..SolverConfig::default()
        };
        group.bench_function(format!("threads_{n_threads}"), |b| {
            b.iter_batched(
                || KnnRunner::<HRectBound, FurthestDescendant>::new(KnnParam::default(), config).unwrap(),
                |runner| black_box(runner.monochromatic(&points).unwrap().summary),
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_modes, bench_builders, bench_threads);
criterion_main!(benches);
