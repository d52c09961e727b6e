// Copyright 2025 the Canopy Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Basic all-k-nearest-neighbors over a small 1-D set.
//!
//! Run:
//! - `cargo run -p canopy_index --example basic_knn`

use canopy_index::{AllKnn, KnnParam, Mode, PointSet};

fn main() {
    let points = PointSet::from_columns(
        1,
        vec![0.05, 0.35, 0.15, 1.25, 5.05, -0.20, -2.00, -1.30, 0.45, 0.90, 1.00],
    )
    .unwrap();

    for mode in [Mode::Naive, Mode::SingleTree, Mode::DualTree] {
        let param = KnnParam {
            k: 3,
            mode,
            ..KnnParam::default()
        };
        let mut knn: AllKnn<'_> = AllKnn::new(&points, param).unwrap();
        let table = knn.compute_neighbors().unwrap();
        println!("{mode:?}: point 0 -> {:?} {:?}", table.indices(0), table.distances(0));
        println!("  {:?}", knn.summary().traversal);
    }
}
