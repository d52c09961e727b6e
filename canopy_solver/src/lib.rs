// Copyright 2025 the Canopy Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Canopy Solver: parallel and distributed all-k-nearest-neighbors.
//!
//! - [`SimpleWorkQueue`] cuts the query tree into [`Grain`]s of top-level
//!   nodes; [`ThreadedSolver`] drains any [`WorkQueue`] with a pool of
//!   scoped threads, writing results into a paged array.
//! - [`KnnRunner`] pages the inputs, builds the trees and runs the solver
//!   on this machine.
//! - [`distributed::DistributedRunner`] runs the same search on a master
//!   and any number of workers joined by a [`distributed::Transport`].
//! - [`Settings`] layers defaults, an optional file, and `CANOPY_*`
//!   environment variables; [`logging::init`] installs a `tracing`
//!   subscriber filtered by `RUST_LOG` or the configured filter.
//! - [`CsvLoader`] reads one point per row.
//!
//! # Example
//!
//! ```rust
//! use canopy_index::{KnnParam, PointSet};
//! use canopy_solver::{KnnRunner, SolverConfig};
//!
//! let points = PointSet::from_points([[0.0, 0.0], [0.0, 1.0], [4.0, 4.0]]).unwrap();
//! let runner: KnnRunner = KnnRunner::new(KnnParam::default(), SolverConfig::default())?;
//! let out = runner.monochromatic(&points)?;
//! assert_eq!(out.neighbors.indices(2), &[1]);
//! # Ok::<(), canopy_solver::SolverError>(())
//! ```

pub mod distributed;
pub mod error;
pub mod loader;
pub mod logging;
pub mod runner;
pub mod settings;
pub mod solver;
pub mod work;

pub use error::{Result, SolverError};
pub use loader::{CsvLoader, MatrixLoader};
pub use runner::{KnnOutput, KnnRunner};
pub use settings::{Settings, SolverConfig, StorageKind};
pub use solver::{Dataset, ThreadedSolver};
pub use work::{Grain, SimpleWorkQueue, WorkQueue};
