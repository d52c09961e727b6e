// Copyright 2025 the Canopy Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! All-k-nearest-neighbors basics.
//!
//! Run the same search in every traversal mode, inspect the tree, and load
//! points from a CSV file through the threaded runner.
//!
//! Run:
//! - `cargo run -p canopy_demos --example allknn_basics`
//! - `RUST_LOG=debug cargo run -p canopy_demos --example allknn_basics`

use std::io::Write;

use canopy_index::{AllKnn, FurthestDescendant, HRectBound, KnnParam, Mode, PointSet, build_tree};
use canopy_solver::{CsvLoader, KnnRunner, MatrixLoader, Settings};

fn main() -> canopy_solver::Result<()> {
    canopy_solver::logging::init("info")?;

    let points = PointSet::from_columns(
        1,
        vec![0.05, 0.35, 0.15, 1.25, 5.05, -0.20, -2.00, -1.30, 0.45, 0.90, 1.00],
    )?;

    for mode in [Mode::Naive, Mode::SingleTree, Mode::DualTree] {
        let param = KnnParam {
            k: 3,
            mode,
            ..KnnParam::default()
        };
        let mut knn: AllKnn<'_> = AllKnn::new(&points, param)?;
        let table = knn.compute_neighbors()?;
        println!(
            "{mode:?}: point 0 -> {:?} at {:?}",
            table.indices(0),
            table.distances(0)
        );
    }

    let tree = build_tree::<HRectBound, FurthestDescendant, _>(&points, &KnnParam::default().tree)?;
    println!("tree: {} nodes, depth {}", tree.len(), tree.depth());

    // Same search from a file, with settings from defaults and CANOPY_* variables.
    let mut file = tempfile::NamedTempFile::new()?;
    writeln!(file, "# x,y")?;
    for i in 0..40_u32 {
        let t = f64::from(i) * 0.25;
        writeln!(file, "{},{}", t.cos() * t, t.sin() * t)?;
    }
    let spiral = CsvLoader::new().load(file.path())?;
    let settings = Settings::load(None)?;
    let runner: KnnRunner = KnnRunner::from_settings(&settings)?;
    let out = runner.monochromatic(&spiral)?;
    println!(
        "spiral: {} queries over {} grains, nearest of point 10 is {:?}",
        out.summary.queries,
        out.n_grains,
        out.neighbors.indices(10)
    );
    Ok(())
}
