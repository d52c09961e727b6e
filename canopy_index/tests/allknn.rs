// Copyright 2025 the Canopy Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! End-to-end all-k-nearest-neighbors checks across modes, builders, and bounds.

use canopy_index::{
    AllKnn, BallBound, Bound, BuilderKind, DescendantRadius, FurthestDescendant, HRectBound,
    KnnParam, Mode, NeighborTable, NoStatistic, PointSet, Statistic, TreeParams,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const MODES: [Mode; 3] = [Mode::Naive, Mode::SingleTree, Mode::DualTree];

fn reference_points() -> PointSet {
    PointSet::from_columns(
        1,
        vec![
            0.05, 0.35, 0.15, 1.25, 5.05, -0.20, -2.00, -1.30, 0.45, 0.90, 1.00,
        ],
    )
    .unwrap()
}

fn tree_params(builder: BuilderKind, max_leaf_size: usize) -> TreeParams {
    TreeParams {
        max_leaf_size,
        min_leaf_size: 1,
        max_num_children: 3,
        min_num_children: 2,
        builder,
    }
}

fn run<B: Bound, S: Statistic<B> + DescendantRadius>(
    points: &PointSet,
    param: KnnParam,
) -> NeighborTable {
    let mut knn: AllKnn<'_, B, S> = AllKnn::new(points, param).unwrap();
    knn.compute_neighbors().unwrap()
}

#[test]
fn reference_scenario_holds_in_every_mode() {
    let points = reference_points();
    let expected_idx = [2, 5, 1, 8, 9, 10, 3, 7, 6, 4];
    let expected_dist = [
        0.01, 0.0625, 0.09, 0.16, 0.7225, 0.9025, 1.44, 1.8225, 4.2025, 25.0,
    ];
    for builder in [BuilderKind::Midpoint, BuilderKind::Rectangle] {
        for leaf in [2, 3, 20] {
            for mode in MODES {
                let param = KnnParam {
                    k: 10,
                    mode,
                    tree: tree_params(builder, leaf),
                };
                let table = run::<HRectBound, FurthestDescendant>(&points, param);
                assert_eq!(table.indices(0), &expected_idx, "{builder:?}/{leaf}/{mode:?}");
                for (got, want) in table.distances(0).iter().zip(expected_dist) {
                    assert!(
                        (got - want).abs() <= 1e-9 * want.max(1.0),
                        "{builder:?}/{leaf}/{mode:?}: {got} vs {want}"
                    );
                }
            }
        }
    }
}

fn random_points(rng: &mut StdRng, n: usize, dim: usize) -> PointSet {
    let data = (0..n * dim).map(|_| rng.gen_range(-10.0..10.0)).collect();
    PointSet::from_columns(dim, data).unwrap()
}

fn assert_modes_agree<B: Bound, S: Statistic<B> + DescendantRadius>(points: &PointSet, k: usize) {
    for builder in [BuilderKind::Midpoint, BuilderKind::Rectangle] {
        let tree = tree_params(builder, 4);
        let naive = run::<B, S>(points, KnnParam { k, mode: Mode::Naive, tree });
        for mode in [Mode::SingleTree, Mode::DualTree] {
            let table = run::<B, S>(points, KnnParam { k, mode, tree });
            let diff = naive.max_relative_difference(&table);
            assert!(
                diff.is_some_and(|d| d <= 1e-5),
                "{builder:?}/{mode:?} disagrees with naive: {diff:?}"
            );
        }
    }
}

#[test]
fn random_sets_agree_with_naive() {
    let mut rng = StdRng::seed_from_u64(7);
    for (n, dim, k) in [(60, 2, 1), (120, 3, 5), (90, 5, 8), (33, 1, 32)] {
        let points = random_points(&mut rng, n, dim);
        assert_modes_agree::<HRectBound, FurthestDescendant>(&points, k);
        assert_modes_agree::<BallBound, FurthestDescendant>(&points, k);
        assert_modes_agree::<HRectBound, NoStatistic>(&points, k);
    }
}

#[test]
fn clustered_duplicates_agree_with_naive() {
    let mut rng = StdRng::seed_from_u64(11);
    let mut data = Vec::new();
    for _ in 0..80 {
        let c = f64::from(rng.gen_range(0_u8..4)) * 3.0;
        data.extend([c, c + f64::from(rng.gen_range(0_u8..2))]);
    }
    let points = PointSet::from_columns(2, data).unwrap();
    assert_modes_agree::<HRectBound, FurthestDescendant>(&points, 6);
}

#[test]
fn bichromatic_matches_brute_force() {
    let mut rng = StdRng::seed_from_u64(3);
    let queries = random_points(&mut rng, 40, 2);
    let references = random_points(&mut rng, 70, 2);
    let k = 4;
    for mode in MODES {
        let param = KnnParam {
            k,
            mode,
            tree: tree_params(BuilderKind::Midpoint, 5),
        };
        let mut knn: AllKnn<'_> = AllKnn::bichromatic(&queries, &references, param).unwrap();
        let table = knn.compute_neighbors().unwrap();
        assert_eq!(knn.summary().queries, 40);
        for j in 0..queries.len() {
            let mut all: Vec<(f64, usize)> = (0..references.len())
                .map(|i| (canopy_index::squared_distance(queries.point(j), references.point(i)), i))
                .collect();
            all.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
            let want: Vec<usize> = all[..k].iter().map(|&(_, i)| i).collect();
            assert_eq!(table.indices(j), want.as_slice(), "{mode:?} query {j}");
        }
    }
}

#[test]
fn dual_tree_prunes_on_spread_data() {
    let mut rng = StdRng::seed_from_u64(5);
    let points = random_points(&mut rng, 400, 2);
    let param = KnnParam {
        k: 3,
        mode: Mode::DualTree,
        tree: tree_params(BuilderKind::Midpoint, 8),
    };
    let mut knn: AllKnn<'_> = AllKnn::new(&points, param).unwrap();
    knn.compute_neighbors().unwrap();
    let stats = knn.summary().traversal;
    assert!(stats.pruned > 0);
    assert!(stats.distance_evaluations < 400 * 400);
}
