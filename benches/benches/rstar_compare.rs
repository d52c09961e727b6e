// Copyright 2025 the Canopy Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

#![cfg(feature = "compare_rstar")]

use criterion::{BatchSize, Criterion, Throughput, black_box, criterion_group, criterion_main};
use canopy_index::{AllKnn, KnnParam, PointSet};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rstar::RTree;

fn gen_points(n: usize, seed: u64) -> Vec<[f64; 2]> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| [rng.gen_range(0.0..1000.0), rng.gen_range(0.0..1000.0)])
        .collect()
}

fn bench_allknn_vs_rstar(c: &mut Criterion) {
    let mut group = c.benchmark_group("allknn_vs_rstar");
    group.sample_size(10);
    let k = 4;
    for &n in &[2_000_usize, 10_000] {
        let raw = gen_points(n, 5);
        let points = PointSet::from_points(raw.iter().copied()).unwrap();
        group.throughput(Throughput::Elements(n as u64));

        group.bench_function(format!("canopy_dual_tree_n{n}"), |b| {
            let param = KnnParam {
                k,
                ..KnnParam::default()
            };
            b.iter(|| {
                let mut knn: AllKnn<'_> = AllKnn::new(&points, param).unwrap();
                black_box(knn.compute_neighbors().unwrap());
            });
        });

        group.bench_function(format!("rstar_per_point_n{n}"), |b| {
            b.iter_batched(
                || raw.clone(),
                |pts| {
                    let tree = RTree::bulk_load(pts.clone());
                    let mut total = 0.0;
                    for p in &pts {
                        // The first hit is the query point itself.
                        for q in tree.nearest_neighbor_iter(p).skip(1).take(k) {
                            total += (q[0] - p[0]).powi(2) + (q[1] - p[1]).powi(2);
                        }
                    }
                    black_box(total);
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_allknn_vs_rstar);
criterion_main!(benches);
