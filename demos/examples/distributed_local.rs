// Copyright 2025 the Canopy Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! A master and three workers in one process.
//!
//! The master serves points, tree nodes, grains and a results array; each
//! worker mirrors them through remote block stores and merges its results
//! back.
//!
//! Run:
//! - `cargo run -p canopy_demos --example distributed_local`

use std::sync::Arc;

use canopy_index::{KnnParam, PointSet};
use canopy_solver::SolverConfig;
use canopy_solver::distributed::{DistributedRunner, LocalCluster, MASTER};

fn main() -> canopy_solver::Result<()> {
    canopy_solver::logging::init("info")?;

    let n_peers = 4;
    let points = PointSet::from_points((0..500_u32).map(|i| {
        let t = f64::from(i);
        [t.sin() * 10.0, (t * 0.37).cos() * 10.0, t * 0.01]
    }))?;
    let param = KnnParam {
        k: 4,
        ..KnnParam::default()
    };
    let config = SolverConfig {
        n_threads: 2,
        n_block_points: 64,
        ..SolverConfig::default()
    };

    let cluster = LocalCluster::new(n_peers);
    let out = std::thread::scope(|s| {
        for rank in 1..n_peers {
            let endpoint = cluster.endpoint(rank);
            s.spawn(move || {
                let runner: DistributedRunner = DistributedRunner::new(Arc::new(endpoint));
                match runner.run_worker() {
                    Ok(summary) => tracing::info!(rank, queries = summary.queries, "worker done"),
                    Err(err) => tracing::error!(rank, %err, "worker failed"),
                }
            });
        }
        let master: DistributedRunner = DistributedRunner::new(Arc::new(cluster.endpoint(MASTER)));
        master.run_master(&param, &config, &points, None)
    })?;

    println!(
        "{} queries in {} grains; point 0 -> {:?}",
        out.summary.queries,
        out.n_grains,
        out.neighbors.indices(0)
    );
    Ok(())
}
